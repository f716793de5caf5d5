//! TCP link to a cartridge behind a network proxy.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, SocketAddrV4, TcpStream};
use std::time::Duration;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::port::Port;

/// TCP connection to a ROMFS proxy.
pub struct TcpPort {
    stream: Option<TcpStream>,
    name: String,
    timeout: Duration,
}

impl TcpPort {
    /// Connect to `addr`, waiting at most `timeout` for the handshake.
    pub fn connect(addr: SocketAddrV4, timeout: Duration) -> Result<Self> {
        debug!("Connecting to {addr}");
        let stream = TcpStream::connect_timeout(&SocketAddr::V4(addr), timeout)
            .map_err(|e| Error::Connection(format!("cannot connect to {addr}: {e}")))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        Ok(Self {
            stream: Some(stream),
            name: addr.to_string(),
            timeout,
        })
    }

    fn stream(&mut self) -> std::io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "socket closed"))
    }
}

impl Port for TcpPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(ref stream) = self.stream {
            stream.set_read_timeout(Some(timeout))?;
            stream.set_write_timeout(Some(timeout))?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        // No driver buffers on TCP. A link that lost a reply is closed
        // instead, see `RomfsClient::is_in_step`.
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            trace!("Closing {}", self.name);
            let _ = stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }
}

impl Read for TcpPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream()?.read(buf)
    }
}

impl Write for TcpPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream()?.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream()?.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    #[test]
    fn test_connect_refused_is_connection_error() {
        // Bind then drop to obtain a port nobody listens on.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = match listener.local_addr().unwrap() {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => unreachable!(),
        };
        drop(listener);

        let result = TcpPort::connect(addr, Duration::from_millis(500));
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[test]
    fn test_close_is_idempotent() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let SocketAddr::V4(addr) = listener.local_addr().unwrap() else {
            unreachable!()
        };

        let mut port = TcpPort::connect(addr, Duration::from_secs(1)).unwrap();
        assert_eq!(port.name(), addr.to_string());
        port.close().unwrap();
        port.close().unwrap();

        let mut buf = [0u8; 1];
        assert!(port.read(&mut buf).is_err());
    }
}
