//! In-memory cartridge speaking the ROMFS wire protocol.
//!
//! The emulator keeps a small hierarchical volume in memory and answers
//! request frames exactly like the cartridge firmware would. It can be used
//! directly as a [`Port`] through [`Emulator::port`], or served over TCP with
//! [`Emulator::spawn_tcp`] so that a separate process can talk to it like it
//! would talk to a network proxy.
//!
//! Faults can be injected to exercise error paths: a permanently busy
//! device, firmware that does not answer status queries, a link that drops
//! after a number of commands, and slow chunk commands.

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info, trace};

use crate::error::Result;
use crate::model::{CartInfo, Entry, FirmwareVersion};
use crate::port::{DEFAULT_TIMEOUT, Port};
use crate::protocol::frame::{
    CHUNK_SIZE, DeviceError, LIST_END, ListPage, MAX_NAME_LEN, Opcode, PREFIX_LEN, PayloadReader,
    Request, Response, frame_len, put_entry_body,
};

/// Flash offset of the emulated volume.
pub const FLASH_START: u32 = 0x0010_0000;

/// Size of the emulated volume (16 MiB flash minus the firmware area).
pub const FLASH_SIZE: u32 = 0x00F0_0000;

/// Entries returned per listing page.
const PAGE_SIZE: usize = 16;

enum Node {
    File(Vec<u8>),
    Dir,
}

struct State {
    // Full path -> node, in creation order so listings keep device order.
    nodes: Vec<(String, Node)>,
    capacity: u64,
    firmware: FirmwareVersion,
    busy: bool,
    fail_info: bool,
    drop_after: Option<usize>,
    chunk_delay: Duration,
    seen: HashMap<Opcode, usize>,
}

/// What the device does with one request.
enum Outcome {
    Reply(Response),
    Silent,
    DropLink,
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn sectors(size: usize) -> u64 {
    (size.div_ceil(CHUNK_SIZE) * CHUNK_SIZE) as u64
}

impl State {
    fn find(&self, path: &str) -> Option<usize> {
        self.nodes.iter().position(|(p, _)| p == path)
    }

    fn is_dir(&self, path: &str) -> bool {
        path == "/" || self.find(path).is_some_and(|i| matches!(self.nodes[i].1, Node::Dir))
    }

    fn exists(&self, path: &str) -> bool {
        path == "/" || self.find(path).is_some()
    }

    fn children(&self, dir: &str) -> Vec<Entry> {
        self.nodes
            .iter()
            .filter(|(p, _)| p != "/" && parent_of(p) == dir)
            .map(|(p, node)| match node {
                Node::File(data) => Entry::file(name_of(p), data.len() as u64),
                Node::Dir => Entry::directory(name_of(p)),
            })
            .collect()
    }

    fn used(&self) -> u64 {
        self.nodes
            .iter()
            .map(|(_, n)| match n {
                Node::File(data) => sectors(data.len()),
                Node::Dir => 0,
            })
            .sum()
    }

    fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.used())
    }

    fn cart_info(&self) -> CartInfo {
        CartInfo {
            flash_start: FLASH_START,
            flash_size: FLASH_SIZE,
            firmware: self.firmware,
        }
    }

    fn handle(&mut self, req: &Request) -> Outcome {
        let op = req.opcode();
        *self.seen.entry(op).or_insert(0) += 1;

        if let Some(left) = self.drop_after {
            if left == 0 {
                self.drop_after = None;
                debug!("Emulator: dropping link on {op:?}");
                return Outcome::DropLink;
            }
            self.drop_after = Some(left - 1);
        }

        if matches!(op, Opcode::Reboot | Opcode::Bootloader) {
            info!("Emulator: {op:?}, link goes down");
            return Outcome::DropLink;
        }
        if self.busy {
            return Outcome::Reply(Response::error(op, DeviceError::Busy));
        }

        let result = match self.execute(req) {
            Ok(payload) => Response::ok(op, payload),
            Err(e) => Response::error(op, e),
        };
        Outcome::Reply(result)
    }

    fn execute(&mut self, req: &Request) -> std::result::Result<Vec<u8>, DeviceError> {
        let mut r = PayloadReader::new(req.payload());
        let bad = |_| DeviceError::BadRequest;
        match req.opcode() {
            Opcode::CartInfo | Opcode::FreeSpace if self.fail_info => Err(DeviceError::BadRequest),
            Opcode::CartInfo => Ok(self.cart_info().encode()),
            Opcode::FreeSpace => Ok(self.free().to_le_bytes().to_vec()),
            Opcode::Format => {
                self.nodes.clear();
                Ok(Vec::new())
            },
            Opcode::List => {
                let path = r.path().map_err(bad)?;
                let cursor = usize::from(r.u16().map_err(bad)?);
                if !self.is_dir(&path) {
                    return Err(DeviceError::NoEntry);
                }
                let all = self.children(&path);
                let end = (cursor + PAGE_SIZE).min(all.len());
                let entries = all.get(cursor..end).map(<[Entry]>::to_vec).unwrap_or_default();
                #[allow(clippy::cast_possible_truncation)]
                let next = (end < all.len()).then_some(end as u16).filter(|&n| n != LIST_END);
                Ok(ListPage { entries, next }.encode())
            },
            Opcode::Stat => {
                let path = r.path().map_err(bad)?;
                let mut buf = Vec::new();
                if path == "/" {
                    put_entry_body(&mut buf, &Entry::directory(""));
                    return Ok(buf);
                }
                let i = self.find(&path).ok_or(DeviceError::NoEntry)?;
                let entry = match &self.nodes[i].1 {
                    Node::File(data) => Entry::file(name_of(&path), data.len() as u64),
                    Node::Dir => Entry::directory(name_of(&path)),
                };
                put_entry_body(&mut buf, &entry);
                Ok(buf)
            },
            Opcode::ReadChunk => {
                let path = r.path().map_err(bad)?;
                let offset = r.u64().map_err(bad)?;
                let len = usize::from(r.u16().map_err(bad)?);
                let i = self.find(&path).ok_or(DeviceError::NoEntry)?;
                let Node::File(data) = &self.nodes[i].1 else {
                    return Err(DeviceError::BadRequest);
                };
                let start = usize::try_from(offset).map_err(|_| DeviceError::EndOfFile)?;
                if start > data.len() {
                    return Err(DeviceError::EndOfFile);
                }
                let end = (start + len.min(CHUNK_SIZE)).min(data.len());
                Ok(data[start..end].to_vec())
            },
            Opcode::WriteChunk => {
                let path = r.path().map_err(bad)?;
                let offset = r.u64().map_err(bad)?;
                let len = usize::from(r.u16().map_err(bad)?);
                let data = r.bytes(len).map_err(bad)?;
                r.finish().map_err(bad)?;
                self.write(&path, offset, &data)?;
                Ok(Vec::new())
            },
            Opcode::Delete => {
                let path = r.path().map_err(bad)?;
                if path == "/" {
                    return Err(DeviceError::BadRequest);
                }
                let i = self.find(&path).ok_or(DeviceError::NoEntry)?;
                if matches!(self.nodes[i].1, Node::Dir) && !self.children(&path).is_empty() {
                    return Err(DeviceError::NotEmpty);
                }
                self.nodes.remove(i);
                Ok(Vec::new())
            },
            Opcode::Rename => {
                let from = r.path().map_err(bad)?;
                let to = r.path().map_err(bad)?;
                self.rename(&from, &to)?;
                Ok(Vec::new())
            },
            Opcode::Mkdir => {
                let path = r.path().map_err(bad)?;
                self.create(&path, Node::Dir)?;
                Ok(Vec::new())
            },
            Opcode::Reboot | Opcode::Bootloader => Err(DeviceError::BadRequest),
        }
    }

    fn create(&mut self, path: &str, node: Node) -> std::result::Result<(), DeviceError> {
        if self.exists(path) {
            return Err(DeviceError::FileExists);
        }
        if !self.is_dir(parent_of(path)) {
            return Err(DeviceError::NoEntry);
        }
        let name = name_of(path);
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(DeviceError::BadRequest);
        }
        self.nodes.push((path.to_string(), node));
        Ok(())
    }

    fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> std::result::Result<(), DeviceError> {
        let current = match self.find(path) {
            Some(i) => match &self.nodes[i].1 {
                Node::File(existing) => Some((i, existing.len())),
                Node::Dir => return Err(DeviceError::FileExists),
            },
            None => None,
        };
        let current_len = current.map_or(0, |(_, len)| len);
        if offset != 0 && offset != current_len as u64 {
            return Err(DeviceError::BadRequest);
        }
        let new_len = if offset == 0 { data.len() } else { current_len + data.len() };
        let growth = sectors(new_len).saturating_sub(sectors(current_len));
        if offset == 0 {
            // Truncation frees the old sectors first.
            if sectors(new_len) > self.free() + sectors(current_len) {
                return Err(DeviceError::NoSpace);
            }
        } else if growth > self.free() {
            return Err(DeviceError::NoSpace);
        }

        match current {
            Some((i, _)) => {
                if let Node::File(existing) = &mut self.nodes[i].1 {
                    if offset == 0 {
                        existing.clear();
                    }
                    existing.extend_from_slice(data);
                }
            },
            None => self.create(path, Node::File(data.to_vec()))?,
        }
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> std::result::Result<(), DeviceError> {
        if from == "/" || to.starts_with(&format!("{from}/")) {
            return Err(DeviceError::BadRequest);
        }
        let i = self.find(from).ok_or(DeviceError::NoEntry)?;
        if self.exists(to) {
            return Err(DeviceError::FileExists);
        }
        if !self.is_dir(parent_of(to)) {
            return Err(DeviceError::NoEntry);
        }
        let name = name_of(to);
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(DeviceError::BadRequest);
        }
        let prefix = format!("{from}/");
        for (p, _) in &mut self.nodes {
            if let Some(rest) = p.strip_prefix(&prefix) {
                *p = format!("{to}/{rest}");
            }
        }
        self.nodes[i].0 = to.to_string();
        Ok(())
    }
}

/// Shared handle to one emulated cartridge.
///
/// Clones refer to the same device.
#[derive(Clone)]
pub struct Emulator {
    state: Arc<Mutex<State>>,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    /// Empty volume with the full flash window available, firmware 1.3.
    pub fn new() -> Self {
        Self::with_capacity(u64::from(FLASH_SIZE))
    }

    /// Empty volume holding at most `capacity` bytes of file data.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                nodes: Vec::new(),
                capacity,
                firmware: FirmwareVersion { major: 1, minor: 3 },
                busy: false,
                fail_info: false,
                drop_after: None,
                chunk_delay: Duration::ZERO,
                seen: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a fresh link to the device.
    pub fn port(&self) -> EmulatedPort {
        EmulatedPort {
            device: self.clone(),
            rx: Vec::new(),
            tx: VecDeque::new(),
            timeout: DEFAULT_TIMEOUT,
            dropped: false,
            closed: false,
        }
    }

    /// Volume size in bytes.
    pub fn capacity(&self) -> u64 {
        self.lock().capacity
    }

    /// Free bytes as the device would report them.
    pub fn free_bytes(&self) -> u64 {
        self.lock().free()
    }

    /// Place a file on the volume, replacing any existing one.
    ///
    /// Parent directories must already exist.
    pub fn insert_file(&self, path: &str, data: &[u8]) {
        let mut state = self.lock();
        if let Some(i) = state.find(path) {
            state.nodes.remove(i);
        }
        state.nodes.push((path.to_string(), Node::File(data.to_vec())));
    }

    /// Create a directory on the volume.
    pub fn insert_dir(&self, path: &str) {
        let mut state = self.lock();
        if state.find(path).is_none() {
            state.nodes.push((path.to_string(), Node::Dir));
        }
    }

    /// Contents of file `path`, if it exists.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        state.find(path).and_then(|i| match &state.nodes[i].1 {
            Node::File(data) => Some(data.clone()),
            Node::Dir => None,
        })
    }

    /// Whether `path` exists.
    pub fn exists(&self, path: &str) -> bool {
        self.lock().exists(path)
    }

    /// Number of `op` requests received so far.
    pub fn commands_seen(&self, op: Opcode) -> usize {
        self.lock().seen.get(&op).copied().unwrap_or(0)
    }

    /// Answer every command with a busy error.
    pub fn set_busy(&self, busy: bool) {
        self.lock().busy = busy;
    }

    /// Reject firmware-info and free-space queries, like older firmware.
    pub fn set_fail_info(&self, fail: bool) {
        self.lock().fail_info = fail;
    }

    /// Answer `n` more commands, then drop the link on the next one.
    pub fn drop_link_after(&self, n: usize) {
        self.lock().drop_after = Some(n);
    }

    /// Delay every read-chunk and write-chunk answer by `delay`.
    pub fn set_chunk_delay(&self, delay: Duration) {
        self.lock().chunk_delay = delay;
    }

    fn process(&self, frame: &[u8]) -> Outcome {
        let req = match Request::parse(frame) {
            Ok(req) => req,
            Err(e) => {
                debug!("Emulator: discarding frame: {e}");
                return Outcome::Silent;
            },
        };
        let (outcome, delay) = {
            let mut state = self.lock();
            let delay = match req.opcode() {
                Opcode::ReadChunk | Opcode::WriteChunk => state.chunk_delay,
                _ => Duration::ZERO,
            };
            (state.handle(&req), delay)
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        outcome
    }

    /// Serve connections from `listener` one after another, forever.
    pub fn serve(&self, listener: &TcpListener) -> io::Result<()> {
        for stream in listener.incoming() {
            let stream = stream?;
            debug!("Emulator: client {:?}", stream.peer_addr().ok());
            if let Err(e) = self.serve_client(stream) {
                debug!("Emulator: client gone: {e}");
            }
        }
        Ok(())
    }

    fn serve_client(&self, mut stream: TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)?;
        loop {
            let mut prefix = [0u8; PREFIX_LEN];
            stream.read_exact(&mut prefix)?;
            let Ok(len) = frame_len(&prefix) else {
                return Err(io::Error::new(ErrorKind::InvalidData, "bad frame"));
            };
            let mut frame = vec![0u8; len];
            frame[..PREFIX_LEN].copy_from_slice(&prefix);
            stream.read_exact(&mut frame[PREFIX_LEN..])?;
            match self.process(&frame) {
                Outcome::Reply(resp) => stream.write_all(&resp.build())?,
                Outcome::Silent => {},
                Outcome::DropLink => return Ok(()),
            }
        }
    }

    /// Serve this device on a loopback port from a background thread.
    pub fn spawn_tcp(&self) -> io::Result<SocketAddrV4> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let SocketAddr::V4(addr) = listener.local_addr()? else {
            return Err(io::Error::new(ErrorKind::AddrNotAvailable, "not an IPv4 socket"));
        };
        let device = self.clone();
        thread::spawn(move || {
            if let Err(e) = device.serve(&listener) {
                debug!("Emulator: listener stopped: {e}");
            }
        });
        info!("Emulator listening on {addr}");
        Ok(addr)
    }
}

/// A link to an [`Emulator`].
///
/// Requests are answered synchronously as soon as a complete frame has been
/// written. Reading with nothing pending times out immediately.
pub struct EmulatedPort {
    device: Emulator,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    timeout: Duration,
    dropped: bool,
    closed: bool,
}

impl EmulatedPort {
    fn pump(&mut self) {
        while self.rx.len() >= PREFIX_LEN {
            let Ok(len) = frame_len(&self.rx) else {
                trace!("Emulator: garbage on the line, resyncing");
                self.rx.clear();
                return;
            };
            if self.rx.len() < len {
                return;
            }
            let frame: Vec<u8> = self.rx.drain(..len).collect();
            match self.device.process(&frame) {
                Outcome::Reply(resp) => self.tx.extend(resp.build()),
                Outcome::Silent => {},
                Outcome::DropLink => {
                    self.dropped = true;
                    self.rx.clear();
                    self.tx.clear();
                    return;
                },
            }
        }
    }
}

impl Read for EmulatedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(ErrorKind::NotConnected, "port closed"));
        }
        if self.tx.is_empty() {
            if self.dropped {
                return Err(io::Error::new(ErrorKind::ConnectionAborted, "device went away"));
            }
            return Err(io::Error::new(ErrorKind::TimedOut, "no response from device"));
        }
        let n = buf.len().min(self.tx.len());
        for (dst, src) in buf.iter_mut().zip(self.tx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for EmulatedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(ErrorKind::NotConnected, "port closed"));
        }
        if self.dropped {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "device went away"));
        }
        self.rx.extend_from_slice(buf);
        self.pump();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for EmulatedPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx.clear();
        self.tx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "emulator"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
