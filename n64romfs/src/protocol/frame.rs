//! ROMFS command and response frames.
//!
//! Every exchange is a single request frame answered by a single response
//! frame. All integers are little-endian.
//!
//! ## Request
//!
//! ```text
//! +------------+--------+--------+-----------+--------+
//! |   Magic    | Length | Opcode |  Payload  | CRC16  |
//! +------------+--------+--------+-----------+--------+
//! |  4 bytes   | 2 bytes| 2 bytes| variable  | 2 bytes|
//! +------------+--------+--------+-----------+--------+
//! | 0x53464D52 | total  |  cmd   |           |        |
//! +------------+--------+--------+-----------+--------+
//! ```
//!
//! ## Response
//!
//! ```text
//! +------------+--------+--------+--------+-----------+--------+
//! |   Magic    | Length | Status | Opcode |  Payload  | CRC16  |
//! +------------+--------+--------+--------+-----------+--------+
//! |  4 bytes   | 2 bytes| 2 bytes| 2 bytes| variable  | 2 bytes|
//! +------------+--------+--------+--------+-----------+--------+
//! ```
//!
//! `Status` is [`ACK_NOERROR`] or [`ACK_ERROR`]; an error response carries a
//! single [`DeviceError`] code as payload. The CRC covers every byte before
//! it.

use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::model::{CartInfo, Entry, FirmwareVersion};
use crate::protocol::crc::crc16_xmodem;

/// Frame magic ("RMFS" on the wire).
pub const FRAME_MAGIC: u32 = 0x5346_4D52;

/// Response status for success.
pub const ACK_NOERROR: u16 = 0x5432;

/// Response status for failure.
pub const ACK_ERROR: u16 = 0x5433;

/// Bytes moved by one read-chunk or write-chunk command (one flash sector).
pub const CHUNK_SIZE: usize = 4096;

/// Longest entry name the volume stores.
pub const MAX_NAME_LEN: usize = 56;

/// Longest path accepted in a request.
pub const MAX_PATH_LEN: usize = 1024;

/// List cursor value meaning "no more pages".
pub const LIST_END: u16 = 0xFFFF;

/// Magic + length, enough to learn the full frame size.
pub const PREFIX_LEN: usize = 6;

/// Request header: magic, length, opcode.
pub const REQUEST_HEADER_LEN: usize = 8;

/// Response header: magic, length, status, opcode.
pub const RESPONSE_HEADER_LEN: usize = 10;

/// Trailing checksum length.
pub const CRC_LEN: usize = 2;

const KIND_FILE: u8 = 0;
const KIND_DIR: u8 = 1;

/// Command opcodes.
///
/// `CartInfo` and `Bootloader` share their values with the cartridge's USB
/// command set; the rest address the ROMFS volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Firmware version and flash window (0x2345).
    CartInfo = 0x2345,
    /// Reboot into the bootloader for firmware update (0x234E).
    Bootloader = 0x234E,
    /// Reboot the cartridge (0x234F).
    Reboot = 0x234F,
    /// One page of a directory listing (0x2360).
    List = 0x2360,
    /// Size and kind of a single path (0x2361).
    Stat = 0x2361,
    /// Read a bounded chunk of a file (0x2362).
    ReadChunk = 0x2362,
    /// Write a bounded chunk of a file (0x2363).
    WriteChunk = 0x2363,
    /// Remove a file or empty directory (0x2364).
    Delete = 0x2364,
    /// Move or rename an entry (0x2365).
    Rename = 0x2365,
    /// Create a directory (0x2366).
    Mkdir = 0x2366,
    /// Erase the whole volume (0x2367).
    Format = 0x2367,
    /// Free bytes on the volume (0x2368).
    FreeSpace = 0x2368,
}

impl TryFrom<u16> for Opcode {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        Ok(match value {
            0x2345 => Self::CartInfo,
            0x234E => Self::Bootloader,
            0x234F => Self::Reboot,
            0x2360 => Self::List,
            0x2361 => Self::Stat,
            0x2362 => Self::ReadChunk,
            0x2363 => Self::WriteChunk,
            0x2364 => Self::Delete,
            0x2365 => Self::Rename,
            0x2366 => Self::Mkdir,
            0x2367 => Self::Format,
            0x2368 => Self::FreeSpace,
            other => return Err(Error::protocol(format!("unknown opcode 0x{other:04X}"))),
        })
    }
}

/// Error codes reported by the device in an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceError {
    /// No such entry.
    NoEntry = 1,
    /// The entry table is full.
    NoFreeEntries = 2,
    /// No free flash sectors.
    NoSpace = 3,
    /// Destination exists.
    FileExists = 4,
    /// File data exceeds what the volume can hold.
    DataTooBig = 5,
    /// Read past the end of a file.
    EndOfFile = 6,
    /// Directory is not empty.
    NotEmpty = 7,
    /// Device is busy with another operation.
    Busy = 0x10,
    /// Request was well-formed but not acceptable (e.g. non-append write).
    BadRequest = 0x11,
}

impl DeviceError {
    /// Decode a wire error code.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::NoEntry,
            2 => Self::NoFreeEntries,
            3 => Self::NoSpace,
            4 => Self::FileExists,
            5 => Self::DataTooBig,
            6 => Self::EndOfFile,
            7 => Self::NotEmpty,
            0x10 => Self::Busy,
            0x11 => Self::BadRequest,
            _ => return None,
        })
    }

    /// Device-side description, matching the firmware's error strings.
    pub fn description(self) -> &'static str {
        match self {
            Self::NoEntry => "No list entry",
            Self::NoFreeEntries => "No free list entries",
            Self::NoSpace => "No free space",
            Self::FileExists => "File exists",
            Self::DataTooBig => "File data too long",
            Self::EndOfFile => "End of file",
            Self::NotEmpty => "Directory not empty",
            Self::Busy => "Device busy",
            Self::BadRequest => "Bad request",
        }
    }

    /// Convert into the library error taxonomy for an operation on `path`.
    pub fn into_error(self, path: &str) -> Error {
        let io = |kind: io::ErrorKind| {
            Error::Io(io::Error::new(
                kind,
                format!("{path}: {}", self.description()),
            ))
        };
        match self {
            Self::NoEntry => Error::PathNotFound(path.to_string()),
            Self::FileExists => Error::AlreadyExists(path.to_string()),
            Self::Busy => Error::DeviceBusy,
            Self::NoSpace | Self::NoFreeEntries => io(io::ErrorKind::StorageFull),
            Self::DataTooBig => io(io::ErrorKind::FileTooLarge),
            Self::NotEmpty => io(io::ErrorKind::DirectoryNotEmpty),
            Self::EndOfFile => io(io::ErrorKind::UnexpectedEof),
            Self::BadRequest => io(io::ErrorKind::InvalidInput),
        }
    }
}

/// Frame length announced by a frame prefix.
///
/// `prefix` must hold at least [`PREFIX_LEN`] bytes.
pub fn frame_len(prefix: &[u8]) -> Result<usize> {
    if prefix.len() < PREFIX_LEN {
        return Err(Error::protocol("truncated frame header"));
    }
    let magic = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    if magic != FRAME_MAGIC {
        return Err(Error::protocol(format!("bad frame magic 0x{magic:08X}")));
    }
    let len = usize::from(u16::from_le_bytes([prefix[4], prefix[5]]));
    if len < REQUEST_HEADER_LEN + CRC_LEN {
        return Err(Error::protocol(format!("frame length {len} too short")));
    }
    Ok(len)
}

fn check_frame(frame: &[u8], header_len: usize) -> Result<()> {
    let len = frame_len(frame)?;
    if len != frame.len() {
        return Err(Error::protocol(format!(
            "length mismatch: header says {len}, got {}",
            frame.len()
        )));
    }
    if len < header_len + CRC_LEN {
        return Err(Error::protocol(format!("frame length {len} too short")));
    }
    let body = &frame[..len - CRC_LEN];
    let expected = u16::from_le_bytes([frame[len - 2], frame[len - 1]]);
    let actual = crc16_xmodem(body);
    if expected != actual {
        return Err(Error::protocol(format!(
            "CRC mismatch: expected {expected:#06x}, got {actual:#06x}"
        )));
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)] // frames are bounded well below 64 KiB
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
fn seal(mut buf: Vec<u8>) -> Vec<u8> {
    let total = buf.len() + CRC_LEN;
    buf[4..6].copy_from_slice(&(total as u16).to_le_bytes());
    let crc = crc16_xmodem(&buf);
    buf.write_u16::<LittleEndian>(crc).unwrap();
    buf
}

#[allow(clippy::cast_possible_truncation)]
fn put_path(buf: &mut Vec<u8>, path: &str) {
    debug_assert!(path.len() <= MAX_PATH_LEN);
    buf.extend_from_slice(&(path.len() as u16).to_le_bytes());
    buf.extend_from_slice(path.as_bytes());
}

/// Command frame builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    opcode: Opcode,
    payload: Vec<u8>,
}

impl Request {
    /// Create a request with an empty payload.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            payload: Vec::new(),
        }
    }

    /// Query firmware version and flash window.
    pub fn cart_info() -> Self {
        Self::new(Opcode::CartInfo)
    }

    /// Query free bytes.
    pub fn free_space() -> Self {
        Self::new(Opcode::FreeSpace)
    }

    /// Erase the volume.
    pub fn format() -> Self {
        Self::new(Opcode::Format)
    }

    /// Reboot the cartridge.
    pub fn reboot() -> Self {
        Self::new(Opcode::Reboot)
    }

    /// Reboot into the bootloader.
    pub fn bootloader() -> Self {
        Self::new(Opcode::Bootloader)
    }

    /// Request the page of `path` starting at `cursor`.
    pub fn list(path: &str, cursor: u16) -> Self {
        let mut req = Self::new(Opcode::List);
        put_path(&mut req.payload, path);
        req.payload.extend_from_slice(&cursor.to_le_bytes());
        req
    }

    /// Size and kind of `path`.
    pub fn stat(path: &str) -> Self {
        let mut req = Self::new(Opcode::Stat);
        put_path(&mut req.payload, path);
        req
    }

    /// Read up to `len` bytes of `path` starting at `offset`.
    pub fn read_chunk(path: &str, offset: u64, len: u16) -> Self {
        let mut req = Self::new(Opcode::ReadChunk);
        put_path(&mut req.payload, path);
        req.payload.extend_from_slice(&offset.to_le_bytes());
        req.payload.extend_from_slice(&len.to_le_bytes());
        req
    }

    /// Write `data` to `path` at `offset`.
    ///
    /// Offset 0 creates or truncates the file; any other offset must equal
    /// the current file size.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_chunk(path: &str, offset: u64, data: &[u8]) -> Self {
        debug_assert!(data.len() <= CHUNK_SIZE);
        let mut req = Self::new(Opcode::WriteChunk);
        put_path(&mut req.payload, path);
        req.payload.extend_from_slice(&offset.to_le_bytes());
        req.payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
        req.payload.extend_from_slice(data);
        req
    }

    /// Remove `path`.
    pub fn delete(path: &str) -> Self {
        let mut req = Self::new(Opcode::Delete);
        put_path(&mut req.payload, path);
        req
    }

    /// Move `from` to `to`.
    pub fn rename(from: &str, to: &str) -> Self {
        let mut req = Self::new(Opcode::Rename);
        put_path(&mut req.payload, from);
        put_path(&mut req.payload, to);
        req
    }

    /// Create directory `path`.
    pub fn mkdir(path: &str) -> Self {
        let mut req = Self::new(Opcode::Mkdir);
        put_path(&mut req.payload, path);
        req
    }

    /// Command opcode.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Build the complete frame.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(REQUEST_HEADER_LEN + self.payload.len() + CRC_LEN);
        buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&(self.opcode as u16).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        seal(buf)
    }

    /// Parse a complete request frame.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        check_frame(frame, REQUEST_HEADER_LEN)?;
        let opcode = Opcode::try_from(u16::from_le_bytes([frame[6], frame[7]]))?;
        Ok(Self {
            opcode,
            payload: frame[REQUEST_HEADER_LEN..frame.len() - CRC_LEN].to_vec(),
        })
    }
}

/// Response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Opcode of the request this answers.
    pub opcode: Opcode,
    /// [`ACK_NOERROR`] or [`ACK_ERROR`].
    pub status: u16,
    /// Response payload.
    pub payload: Vec<u8>,
}

impl Response {
    /// Successful response carrying `payload`.
    pub fn ok(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            opcode,
            status: ACK_NOERROR,
            payload,
        }
    }

    /// Error response carrying a device error code.
    pub fn error(opcode: Opcode, err: DeviceError) -> Self {
        Self {
            opcode,
            status: ACK_ERROR,
            payload: vec![err as u8],
        }
    }

    /// Build the complete frame.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RESPONSE_HEADER_LEN + self.payload.len() + CRC_LEN);
        buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&self.status.to_le_bytes());
        buf.extend_from_slice(&(self.opcode as u16).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        seal(buf)
    }

    /// Parse a complete response frame.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        check_frame(frame, RESPONSE_HEADER_LEN)?;
        let status = u16::from_le_bytes([frame[6], frame[7]]);
        let opcode = Opcode::try_from(u16::from_le_bytes([frame[8], frame[9]]))?;
        Ok(Self {
            opcode,
            status,
            payload: frame[RESPONSE_HEADER_LEN..frame.len() - CRC_LEN].to_vec(),
        })
    }

    /// Split into the success payload or the device error.
    pub fn into_result(self) -> Result<std::result::Result<Vec<u8>, DeviceError>> {
        match self.status {
            ACK_NOERROR => Ok(Ok(self.payload)),
            ACK_ERROR => match self.payload.as_slice() {
                [code] => DeviceError::from_code(*code)
                    .map(Err)
                    .ok_or_else(|| Error::protocol(format!("unknown device error {code}"))),
                other => Err(Error::protocol(format!(
                    "error response carries {} bytes",
                    other.len()
                ))),
            },
            other => Err(Error::protocol(format!("unknown status 0x{other:04X}"))),
        }
    }
}

/// Bounds-checked reader over a frame payload.
///
/// Running past the end or leaving bytes unread is a length mismatch and
/// reported as a protocol error.
pub struct PayloadReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> PayloadReader<'a> {
    /// Wrap a payload.
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(payload),
        }
    }

    fn short(_: io::Error) -> Error {
        Error::protocol("payload too short")
    }

    /// Read one byte.
    pub fn u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(Self::short)
    }

    /// Read a u16.
    pub fn u16(&mut self) -> Result<u16> {
        self.cursor.read_u16::<LittleEndian>().map_err(Self::short)
    }

    /// Read a u32.
    pub fn u32(&mut self) -> Result<u32> {
        self.cursor.read_u32::<LittleEndian>().map_err(Self::short)
    }

    /// Read a u64.
    pub fn u64(&mut self) -> Result<u64> {
        self.cursor.read_u64::<LittleEndian>().map_err(Self::short)
    }

    /// Read exactly `len` bytes.
    pub fn bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.cursor.read_exact(&mut buf).map_err(Self::short)?;
        Ok(buf)
    }

    /// Read a u16-length-prefixed UTF-8 path.
    pub fn path(&mut self) -> Result<String> {
        let len = usize::from(self.u16()?);
        let raw = self.bytes(len)?;
        String::from_utf8(raw).map_err(|_| Error::protocol("path is not UTF-8"))
    }

    /// Read a u8-length-prefixed UTF-8 entry name.
    pub fn name(&mut self) -> Result<String> {
        let len = usize::from(self.u8()?);
        let raw = self.bytes(len)?;
        String::from_utf8(raw).map_err(|_| Error::protocol("entry name is not UTF-8"))
    }

    /// Read the size/kind pair shared by stat and list entries.
    pub fn entry_body(&mut self, name: String) -> Result<Entry> {
        let size = self.u64()?;
        let is_directory = match self.u8()? {
            KIND_FILE => false,
            KIND_DIR => true,
            other => return Err(Error::protocol(format!("unknown entry kind {other}"))),
        };
        Ok(Entry {
            name,
            size,
            is_directory,
        })
    }

    /// Fail if bytes remain.
    #[allow(clippy::cast_possible_truncation)]
    pub fn finish(self) -> Result<()> {
        let total = self.cursor.get_ref().len();
        let pos = self.cursor.position() as usize;
        if pos == total {
            Ok(())
        } else {
            Err(Error::protocol(format!(
                "length mismatch: {} trailing bytes",
                total - pos
            )))
        }
    }
}

/// One page of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPage {
    /// Entries in device order.
    pub entries: Vec<Entry>,
    /// Cursor of the next page, `None` on the last page.
    pub next: Option<u16>,
}

impl ListPage {
    /// Decode a list response payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let next = r.u16()?;
        let count = r.u16()?;
        let mut entries = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let name = r.name()?;
            entries.push(r.entry_body(name)?);
        }
        r.finish()?;
        Ok(Self {
            entries,
            next: (next != LIST_END).then_some(next),
        })
    }

    /// Encode as a list response payload.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.next.unwrap_or(LIST_END).to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        for entry in &self.entries {
            buf.push(entry.name.len() as u8);
            buf.extend_from_slice(entry.name.as_bytes());
            put_entry_body(&mut buf, entry);
        }
        buf
    }
}

/// Append the size/kind pair of `entry`.
pub fn put_entry_body(buf: &mut Vec<u8>, entry: &Entry) {
    buf.extend_from_slice(&entry.size.to_le_bytes());
    buf.push(if entry.is_directory { KIND_DIR } else { KIND_FILE });
}

impl CartInfo {
    /// Decode a cart-info response payload (`start`, `size`, `vers`).
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let flash_start = r.u32()?;
        let flash_size = r.u32()?;
        let firmware = FirmwareVersion::from_packed(r.u32()?);
        r.finish()?;
        Ok(Self {
            flash_start,
            flash_size,
            firmware,
        })
    }

    /// Encode as a cart-info response payload.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        buf.write_u32::<LittleEndian>(self.flash_start).unwrap();
        buf.write_u32::<LittleEndian>(self.flash_size).unwrap();
        let vers = (u32::from(self.firmware.major) << 8) | u32::from(self.firmware.minor);
        buf.write_u32::<LittleEndian>(vers).unwrap();
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let data = Request::stat("/a").build();
        // magic + len + opcode + (2 + 2) path + crc
        assert_eq!(data.len(), 8 + 4 + 2);
        assert_eq!(&data[0..4], &[0x52, 0x4D, 0x46, 0x53]);
        assert_eq!(&data[4..6], &[14, 0]);
        assert_eq!(&data[6..8], &[0x61, 0x23]);
        assert_eq!(&data[8..12], &[2, 0, b'/', b'a']);
    }

    #[test]
    fn test_request_parse_rejects_bad_crc() {
        let mut data = Request::mkdir("/roms").build();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        let err = Request::parse(&data).unwrap_err();
        assert!(err.to_string().contains("CRC mismatch"));
    }

    #[test]
    fn test_request_parse_rejects_length_mismatch() {
        let mut data = Request::format().build();
        data.push(0);
        assert!(matches!(Request::parse(&data), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_write_chunk_payload() {
        let req = Request::write_chunk("/f", 4096, &[1, 2, 3]);
        let mut r = PayloadReader::new(req.payload());
        assert_eq!(r.path().unwrap(), "/f");
        assert_eq!(r.u64().unwrap(), 4096);
        assert_eq!(r.u16().unwrap(), 3);
        assert_eq!(r.bytes(3).unwrap(), vec![1, 2, 3]);
        r.finish().unwrap();
    }

    #[test]
    fn test_error_response_maps_to_taxonomy() {
        let frame = Response::error(Opcode::Stat, DeviceError::NoEntry).build();
        let resp = Response::parse(&frame).unwrap();
        let device_err = resp.into_result().unwrap().unwrap_err();
        assert!(matches!(
            device_err.into_error("/missing"),
            Error::PathNotFound(p) if p == "/missing"
        ));
        assert!(matches!(
            DeviceError::Busy.into_error("/"),
            Error::DeviceBusy
        ));
        match DeviceError::NoSpace.into_error("/big.z64") {
            Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::StorageFull),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_unknown_status_is_protocol_error() {
        let mut resp = Response::ok(Opcode::Format, Vec::new());
        resp.status = 0x1234;
        let parsed = Response::parse(&resp.build()).unwrap();
        assert!(matches!(parsed.into_result(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_frame_len_rejects_bad_magic() {
        let err = frame_len(&[0, 1, 2, 3, 10, 0]).unwrap_err();
        assert!(err.to_string().contains("bad frame magic"));
    }

    #[test]
    fn test_list_page_last_page() {
        let page = ListPage {
            entries: vec![Entry::directory("saves"), Entry::file("mario.z64", 8 << 20)],
            next: None,
        };
        let decoded = ListPage::decode(&page.encode()).unwrap();
        assert_eq!(decoded, page);
        assert_eq!(&page.encode()[0..2], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_list_page_trailing_bytes() {
        let mut payload = ListPage {
            entries: Vec::new(),
            next: Some(3),
        }
        .encode();
        payload.push(0);
        assert!(ListPage::decode(&payload).is_err());
    }

    #[test]
    fn test_cart_info_decode() {
        let payload = [
            0x00, 0x00, 0x10, 0x00, // start 0x100000
            0x00, 0x00, 0xF0, 0x00, // size 0xF00000
            0x02, 0x01, 0x00, 0x00, // vers 1.2
        ];
        let info = CartInfo::decode(&payload).unwrap();
        assert_eq!(info.flash_start, 0x0010_0000);
        assert_eq!(info.flash_size, 0x00F0_0000);
        assert_eq!(info.firmware, FirmwareVersion { major: 1, minor: 2 });
    }
}
