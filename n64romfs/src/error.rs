//! Error types for n64romfs.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for n64romfs operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which part of a `host:port` target failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFormatKind {
    /// The string does not have the `host:port` shape.
    Malformed,
    /// The shape is right but the host is not an IPv4 address or the port
    /// is outside 1-65535.
    Invalid,
}

impl fmt::Display for AddressFormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

/// Error type for n64romfs operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The link to the cartridge could not be established.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A network target string could not be parsed.
    #[error("Address is {kind}: {input}")]
    AddressFormat {
        /// Which validation step failed.
        kind: AddressFormatKind,
        /// The rejected input.
        input: String,
    },

    /// The operation needs a connected session.
    #[error("Not connected to a device")]
    NotConnected,

    /// A transfer is active or the device reported that it is busy.
    #[error("Device is busy")]
    DeviceBusy,

    /// The device reported that the path does not exist.
    #[error("No such file or directory: {0}")]
    PathNotFound(String),

    /// The device reported that the destination already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A name or path the device cannot store.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// ROM data that cannot be converted to canonical byte order.
    #[error("Invalid ROM image: {0}")]
    InvalidRom(String),

    /// Malformed or unexpected response from the device.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport-level read/write failure, timeout or device storage error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A batch operation where some items succeeded and some failed.
    #[error(
        "{} of {} entries failed",
        .failed.len(),
        .failed.len() + .succeeded.len()
    )]
    PartialFailure {
        /// Paths that were processed successfully.
        succeeded: Vec<String>,
        /// Paths that failed together with their error.
        failed: Vec<(String, Error)>,
    },
}

impl Error {
    /// Shorthand for a protocol error.
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether this error means the link itself is gone or unusable.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Protocol(_))
    }
}

#[cfg(feature = "native")]
impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::Io(kind) => Self::Io(io::Error::new(kind, err.description)),
            _ => Self::Connection(err.description),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_format_display() {
        let err = Error::AddressFormat {
            kind: AddressFormatKind::Malformed,
            input: "nope".into(),
        };
        assert_eq!(err.to_string(), "Address is malformed: nope");
    }

    #[test]
    fn test_partial_failure_counts() {
        let err = Error::PartialFailure {
            succeeded: vec!["/a".into(), "/b".into()],
            failed: vec![("/c".into(), Error::PathNotFound("/c".into()))],
        };
        assert_eq!(err.to_string(), "1 of 3 entries failed");
    }

    #[test]
    fn test_link_failure_classification() {
        assert!(Error::protocol("bad crc").is_link_failure());
        assert!(Error::Io(io::Error::from(io::ErrorKind::TimedOut)).is_link_failure());
        assert!(!Error::DeviceBusy.is_link_failure());
    }
}
