//! ROMFS command codec.
//!
//! [`frame`] defines the byte layout of requests and responses and
//! [`client`] runs them over a [`Port`](crate::port::Port) one exchange at a
//! time.

pub mod client;
pub mod crc;
pub mod frame;

pub use client::RomfsClient;
pub use frame::{CHUNK_SIZE, DeviceError, ListPage, MAX_NAME_LEN, MAX_PATH_LEN, Opcode, Request, Response};
