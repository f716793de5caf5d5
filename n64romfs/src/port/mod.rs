//! Byte-stream transports to the cartridge.
//!
//! The cartridge is reachable either through its USB CDC serial interface or
//! through a TCP proxy. Both are exposed through the [`Port`] trait so the
//! command codec never needs to know which link it is talking to.
//!
//! ```text
//! +------------------+
//! |  Command Codec   |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |    Port trait    |
//! +----+--------+----+
//!      |        |
//!      v        v
//! +--------+ +--------+
//! | Native | |  Tcp   |
//! | Serial | |  Port  |
//! +--------+ +--------+
//! ```
//!
//! Ports never retry. A read that does not complete within the configured
//! timeout fails with [`std::io::ErrorKind::TimedOut`], which the session
//! reports as an I/O error.

#[cfg(feature = "native")]
pub mod native;
pub mod tcp;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default per-call read/write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate. The cartridge uses USB CDC, so this is nominal.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration for the given port name.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Unified byte-stream link to the cartridge.
///
/// Implementations exist for the USB serial interface, TCP, and the
/// in-memory emulator used in tests.
pub trait Port: Read + Write + Send {
    /// Set the per-call read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Discard any bytes buffered in either direction.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Human-readable link name (port path or socket address).
    fn name(&self) -> &str;

    /// Close the link. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes and flush.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Write::flush(self)?;
        Ok(())
    }

    /// Fill `buf` completely or fail.
    ///
    /// A port that reports end-of-stream is treated as a dropped link.
    fn read_exact_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        match Read::read_exact(self, buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Error::Io(
                std::io::Error::new(ErrorKind::ConnectionAborted, "link closed by device"),
            )),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(Error::Io(
                std::io::Error::new(ErrorKind::TimedOut, "read timed out"),
            )),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn clear_buffers(&mut self) -> Result<()> {
        (**self).clear_buffers()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;

    /// Find ports matching the given VID/PID.
    fn find_by_vid_pid(vid: u16, pid: u16) -> Result<Vec<PortInfo>> {
        let ports = Self::list_ports()?;
        Ok(ports
            .into_iter()
            .filter(|p| p.vid == Some(vid) && p.pid == Some(pid))
            .collect())
    }
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
pub use tcp::TcpPort;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct CursorPort(Cursor<Vec<u8>>);

    impl Read for CursorPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for CursorPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for CursorPort {
        fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        fn timeout(&self) -> Duration {
            DEFAULT_TIMEOUT
        }

        fn clear_buffers(&mut self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "cursor"
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_exact_eof_is_link_failure() {
        let mut port = CursorPort(Cursor::new(vec![1, 2]));
        let mut buf = [0u8; 4];
        let err = port.read_exact_bytes(&mut buf).unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), ErrorKind::ConnectionAborted),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyACM0")
            .with_timeout(Duration::from_secs(2))
            .with_baud_rate(921600);

        assert_eq!(config.port_name, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 921600);
        assert_eq!(config.timeout, Duration::from_secs(2));
    }

    struct FixedPorts;

    impl PortEnumerator for FixedPorts {
        fn list_ports() -> Result<Vec<PortInfo>> {
            let info = |name: &str, vid: Option<u16>, pid: Option<u16>| PortInfo {
                name: name.to_string(),
                vid,
                pid,
                manufacturer: None,
                product: None,
                serial_number: None,
            };
            Ok(vec![
                info("/dev/ttyS0", None, None),
                info("/dev/ttyACM0", Some(0x1209), Some(0x6800)),
                info("/dev/ttyUSB0", Some(0x1A86), Some(0x7523)),
            ])
        }
    }

    #[test]
    fn test_find_by_vid_pid() {
        let found = FixedPorts::find_by_vid_pid(0x1209, 0x6800).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "/dev/ttyACM0");
        assert!(FixedPorts::find_by_vid_pid(0x0403, 0x6001).unwrap().is_empty());
    }
}
