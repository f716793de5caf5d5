//! Connection targets and cartridge discovery.
//!
//! A [`Target`] names where the cartridge lives: a USB serial port (found by
//! its VID/PID when no port is given) or a `host:port` network proxy.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use crate::error::{AddressFormatKind, Error, Result};
use crate::port::{Port, PortInfo, TcpPort};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// USB vendor ID of the cartridge (pid.codes).
pub const CART_VID: u16 = 0x1209;

/// USB product ID of the cartridge.
pub const CART_PID: u16 = 0x6800;

/// How the session reaches the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TransportKind {
    /// USB CDC serial link.
    Usb,
    /// TCP link to a proxy.
    Network,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb => write!(f, "USB"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A USB serial port; `None` picks the single attached cartridge.
    Usb {
        /// Port path, e.g. `/dev/ttyACM0` or `COM3`.
        port: Option<String>,
    },
    /// A network proxy.
    Network(SocketAddrV4),
}

impl Target {
    /// Network target from a `host:port` string.
    pub fn network(input: &str) -> Result<Self> {
        parse_host_port(input).map(Self::Network)
    }

    /// Transport used by this target.
    pub fn transport_kind(&self) -> TransportKind {
        match self {
            Self::Usb { .. } => TransportKind::Usb,
            Self::Network(_) => TransportKind::Network,
        }
    }

    /// Open a link to the target.
    pub fn open(&self, timeout: Duration, baud_rate: u32) -> Result<Box<dyn Port>> {
        match self {
            Self::Network(addr) => Ok(Box::new(TcpPort::connect(*addr, timeout)?)),
            #[cfg(feature = "native")]
            Self::Usb { port } => {
                let name = match port {
                    Some(name) => name.clone(),
                    None => auto_detect_port()?.name,
                };
                let config = crate::port::SerialConfig::new(name)
                    .with_timeout(timeout)
                    .with_baud_rate(baud_rate);
                Ok(Box::new(crate::port::NativePort::open(&config)?))
            },
            #[cfg(not(feature = "native"))]
            Self::Usb { .. } => {
                let _ = baud_rate;
                Err(Error::Connection(
                    "USB support was not compiled in (enable the `native` feature)".to_string(),
                ))
            },
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb { port: Some(p) } => write!(f, "USB {p}"),
            Self::Usb { port: None } => write!(f, "USB (auto)"),
            Self::Network(addr) => write!(f, "{addr}"),
        }
    }
}

/// Validate a `host:port` string.
///
/// The string is split at its last `:`. Missing or dangling parts are
/// [`AddressFormatKind::Malformed`]; a host that is not an IPv4 address or a
/// port outside 1-65535 is [`AddressFormatKind::Invalid`].
pub fn parse_host_port(input: &str) -> Result<SocketAddrV4> {
    let err = |kind| Error::AddressFormat {
        kind,
        input: input.to_string(),
    };
    let trimmed = input.trim();
    let colon = match trimmed.rfind(':') {
        Some(i) if i > 0 && i + 1 < trimmed.len() => i,
        _ => return Err(err(AddressFormatKind::Malformed)),
    };
    let host = trimmed[..colon].trim();
    let port = trimmed[colon + 1..].trim();

    let port: u16 = port
        .parse()
        .map_err(|_| err(AddressFormatKind::Invalid))?;
    if port == 0 || host.is_empty() {
        return Err(err(AddressFormatKind::Invalid));
    }
    let ip: Ipv4Addr = host.parse().map_err(|_| err(AddressFormatKind::Invalid))?;
    Ok(SocketAddrV4::new(ip, port))
}

/// A serial endpoint found on this host.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Endpoint name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Whether this endpoint is the cartridge.
    pub fn is_cartridge(&self) -> bool {
        self.vid == Some(CART_VID) && self.pid == Some(CART_PID)
    }
}

impl From<PortInfo> for DetectedPort {
    fn from(info: PortInfo) -> Self {
        Self {
            name: info.name,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }
}

/// Detect all available serial endpoints with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    use crate::port::{NativePortEnumerator, PortEnumerator};

    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|info| {
                if let (Some(vid), Some(pid)) = (info.vid, info.pid) {
                    trace!("Found USB port: {} (VID: {vid:04X}, PID: {pid:04X})", info.name);
                }
                DetectedPort::from(info)
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Detect all available serial endpoints (always empty without `native`).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Endpoints that look like the cartridge.
pub fn detect_cartridge_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_cartridge)
        .collect()
}

/// Pick the single attached cartridge.
///
/// Fails when there is none or more than one.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    select_single(detect_cartridge_ports()).inspect(|port| {
        info!("Auto-detected cartridge on {}", port.name);
    })
}

#[cfg_attr(not(feature = "native"), allow(dead_code))]
fn select_single(mut ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    match ports.len() {
        0 => Err(Error::Connection(format!(
            "no cartridge found (USB {CART_VID:04X}:{CART_PID:04X})"
        ))),
        1 => Ok(ports.remove(0)),
        _ => Err(Error::Connection(format!(
            "several cartridges found ({}), choose one explicitly",
            ports
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Format endpoints for display, marking the cartridge.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.is_cartridge() {
                " [N64 cartridge]".to_string()
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };
            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();
            format!("{}{device_info}{product_info}", port.name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(input: &str) -> Option<AddressFormatKind> {
        match parse_host_port(input) {
            Ok(_) => None,
            Err(Error::AddressFormat { kind, .. }) => Some(kind),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    fn port(name: &str, vid: Option<u16>, pid: Option<u16>) -> DetectedPort {
        DetectedPort {
            name: name.to_string(),
            vid,
            pid,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    #[test]
    fn test_parse_host_port_valid() {
        let addr = parse_host_port("192.168.1.20:6800").unwrap();
        assert_eq!(addr, SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 20), 6800));
        assert_eq!(
            parse_host_port(" 127.0.0.1 : 1 ").unwrap().port(),
            1
        );
        assert_eq!(parse_host_port("10.0.0.1:65535").unwrap().port(), 65535);
    }

    #[test]
    fn test_parse_host_port_malformed() {
        for input in ["", "localhost", "192.168.1.1", ":80", "192.168.1.1:"] {
            assert_eq!(kind_of(input), Some(AddressFormatKind::Malformed), "{input}");
        }
    }

    #[test]
    fn test_parse_host_port_invalid() {
        for input in [
            "192.168.1.1:0",
            "192.168.1.1:65536",
            "192.168.1.1:http",
            "localhost:80",
            "300.1.1.1:80",
            "::1:80",
        ] {
            assert_eq!(kind_of(input), Some(AddressFormatKind::Invalid), "{input}");
        }
    }

    #[test]
    fn test_target_kind_and_display() {
        let t = Target::network("127.0.0.1:6800").unwrap();
        assert_eq!(t.transport_kind(), TransportKind::Network);
        assert_eq!(t.to_string(), "127.0.0.1:6800");

        let usb = Target::Usb { port: None };
        assert_eq!(usb.transport_kind(), TransportKind::Usb);
        assert_eq!(usb.to_string(), "USB (auto)");
    }

    #[test]
    fn test_is_cartridge() {
        assert!(port("/dev/ttyACM0", Some(0x1209), Some(0x6800)).is_cartridge());
        assert!(!port("/dev/ttyUSB0", Some(0x1A86), Some(0x7523)).is_cartridge());
        assert!(!port("/dev/ttyS0", None, None).is_cartridge());
    }

    #[test]
    fn test_select_single() {
        assert!(matches!(select_single(Vec::new()), Err(Error::Connection(_))));
        let one = select_single(vec![port("/dev/ttyACM0", Some(CART_VID), Some(CART_PID))]);
        assert_eq!(one.unwrap().name, "/dev/ttyACM0");
        let two = select_single(vec![
            port("/dev/ttyACM0", Some(CART_VID), Some(CART_PID)),
            port("/dev/ttyACM1", Some(CART_VID), Some(CART_PID)),
        ]);
        match two {
            Err(Error::Connection(msg)) => assert!(msg.contains("/dev/ttyACM1")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_format_port_list() {
        let ports = vec![
            port("/dev/ttyACM0", Some(CART_VID), Some(CART_PID)),
            port("/dev/ttyUSB1", Some(0x1A86), Some(0x7523)),
        ];
        let formatted = format_port_list(&ports);
        assert_eq!(formatted[0], "/dev/ttyACM0 [N64 cartridge]");
        assert_eq!(formatted[1], "/dev/ttyUSB1 [VID:1A86 PID:7523]");
    }

    #[test]
    fn test_detected_port_from_port_info() {
        let detected = DetectedPort::from(PortInfo {
            name: "COM5".to_string(),
            vid: Some(CART_VID),
            pid: Some(CART_PID),
            manufacturer: Some("pid.codes".to_string()),
            product: None,
            serial_number: Some("0001".to_string()),
        });
        assert!(detected.is_cartridge());
        assert_eq!(detected.serial.as_deref(), Some("0001"));
    }
}
