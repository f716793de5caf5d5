//! # n64romfs
//!
//! A library for managing the ROMFS volume of an N64 flash cartridge.
//!
//! The cartridge exposes a small hierarchical file store in its flash. This
//! crate talks to it over the cartridge's USB serial interface or through a
//! TCP proxy and provides:
//!
//! - A [`Session`] that owns the link and serializes every device command
//! - Directory listing, mkdir, rename, batch delete and format
//! - Chunked uploads and downloads on a background thread with progress,
//!   ETA and cooperative cancellation ([`TransferHandle`])
//! - N64 ROM byte-order detection and conversion ([`RomFormat`])
//! - Cartridge discovery by USB VID/PID and `host:port` target validation
//!
//! ## Features
//!
//! - `native` (default): USB serial support via the `serialport` crate
//! - `serde`: Serialization support for data types
//! - `emulator`: In-memory cartridge usable as a port or a TCP server
//!
//! ## Example
//!
//! ```rust,no_run
//! use n64romfs::{Session, SessionConfig, Target, TransferEvent};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::new(SessionConfig::default());
//!     session.connect(Target::Usb { port: None })?;
//!
//!     let download = session.start_download("/saves/zelda.eep", "zelda.eep".as_ref())?;
//!     if let Some(events) = download.take_events() {
//!         for event in events {
//!             if let TransferEvent::Progress(p) = event {
//!                 println!("{}/{}", p.transferred_bytes, p.total_bytes);
//!             }
//!         }
//!     }
//!     download.join()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
#[cfg(any(test, feature = "emulator"))]
pub mod emulator;
pub mod error;
pub mod model;
pub mod port;
pub mod protocol;
pub mod rom;
pub mod session;
pub mod transfer;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, Target, TransportKind, parse_host_port},
    error::{AddressFormatKind, Error, Result},
    model::{CartInfo, DeviceInfo, Entry, FirmwareVersion},
    port::{Port, PortEnumerator, PortInfo, SerialConfig, TcpPort},
    protocol::CHUNK_SIZE,
    rom::RomFormat,
    session::{ConnectionState, DeleteReport, Session, SessionConfig, UploadOptions},
    transfer::{
        Direction, TransferEvent, TransferEvents, TransferHandle, TransferProgress, TransferState,
    },
};
