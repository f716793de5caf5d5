//! Typed request/response exchanges over a port.
//!
//! [`RomfsClient`] owns the link and never pipelines: each method writes one
//! request frame and reads exactly one response frame before returning. A
//! response whose opcode does not echo the request, whose checksum fails or
//! whose payload has the wrong length is a [`Error::Protocol`].
//!
//! A request that gets no complete, matching reply (timeout, dropped link,
//! garbled or foreign frame) leaves the stream out of step: a late reply may
//! still arrive and would be read as the answer to the next request. The
//! client then refuses further commands until the link is reopened.

use std::io::{self, ErrorKind};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::model::{CartInfo, Entry};
use crate::port::Port;
use crate::protocol::frame::{
    CHUNK_SIZE, DeviceError, ListPage, PREFIX_LEN, PayloadReader, Request, Response, frame_len,
};

/// Command client bound to one link.
pub struct RomfsClient<P: Port> {
    port: P,
    in_step: bool,
}

impl<P: Port> RomfsClient<P> {
    /// Wrap an opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            in_step: true,
        }
    }

    /// Whether every request so far got its own reply.
    ///
    /// Once this is `false` the link must be reopened.
    pub fn is_in_step(&self) -> bool {
        self.in_step
    }

    fn out_of_step(&mut self, err: &Error) {
        if self.in_step {
            warn!("Link to {} out of step: {err}", self.port.name());
            self.in_step = false;
        }
    }

    fn check_in_step(&self) -> Result<()> {
        if self.in_step {
            Ok(())
        } else {
            Err(Error::Io(io::Error::new(
                ErrorKind::NotConnected,
                "link out of step with the device, reconnect",
            )))
        }
    }

    /// Borrow the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutably borrow the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Give the port back.
    pub fn into_inner(self) -> P {
        self.port
    }

    /// Send `req` and return the response payload or the device error code.
    pub fn transact(&mut self, req: &Request) -> Result<std::result::Result<Vec<u8>, DeviceError>> {
        self.check_in_step()?;
        let frame = req.build();
        trace!("TX {:?}: {} bytes", req.opcode(), frame.len());
        if let Err(e) = self.port.write_all_bytes(&frame) {
            self.out_of_step(&e);
            return Err(e);
        }

        let response = match self.read_response() {
            Ok(r) => r,
            Err(e) => {
                if matches!(e, Error::Protocol(_)) {
                    // Drop whatever is left of the garbled frame.
                    let _ = self.port.clear_buffers();
                }
                self.out_of_step(&e);
                return Err(e);
            },
        };
        if response.opcode != req.opcode() {
            let err = Error::protocol(format!(
                "response opcode {:?} does not match request {:?}",
                response.opcode,
                req.opcode()
            ));
            self.out_of_step(&err);
            return Err(err);
        }
        response.into_result()
    }

    fn read_response(&mut self) -> Result<Response> {
        let mut prefix = [0u8; PREFIX_LEN];
        self.port.read_exact_bytes(&mut prefix)?;
        let len = frame_len(&prefix)?;

        let mut frame = vec![0u8; len];
        frame[..PREFIX_LEN].copy_from_slice(&prefix);
        self.port.read_exact_bytes(&mut frame[PREFIX_LEN..])?;
        trace!("RX {} bytes", frame.len());
        Response::parse(&frame)
    }

    /// Send `req` and map a device error for `path` into the error taxonomy.
    fn call(&mut self, req: &Request, path: &str) -> Result<Vec<u8>> {
        self.transact(req)?.map_err(|e| {
            debug!("{:?} {path}: device error {e:?}", req.opcode());
            e.into_error(path)
        })
    }

    fn call_empty(&mut self, req: &Request, path: &str) -> Result<()> {
        let payload = self.call(req, path)?;
        PayloadReader::new(&payload).finish()
    }

    /// Write a request without waiting for a reply.
    ///
    /// Used for commands after which the device drops the link.
    pub fn send_only(&mut self, req: &Request) -> Result<()> {
        self.check_in_step()?;
        debug!("Sending {:?} without reply", req.opcode());
        let result = self.port.write_all_bytes(&req.build());
        if let Err(e) = &result {
            self.out_of_step(e);
        }
        result
    }

    /// Firmware version and flash window.
    pub fn cart_info(&mut self) -> Result<CartInfo> {
        let payload = self.call(&Request::cart_info(), "/")?;
        CartInfo::decode(&payload)
    }

    /// Free bytes on the volume.
    pub fn free_space(&mut self) -> Result<u64> {
        let payload = self.call(&Request::free_space(), "/")?;
        let mut r = PayloadReader::new(&payload);
        let free = r.u64()?;
        r.finish()?;
        Ok(free)
    }

    /// One listing page of `path` starting at `cursor`.
    pub fn list_page(&mut self, path: &str, cursor: u16) -> Result<ListPage> {
        let payload = self.call(&Request::list(path, cursor), path)?;
        ListPage::decode(&payload)
    }

    /// Every entry of directory `path`, in device order.
    pub fn list(&mut self, path: &str) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut cursor = 0u16;
        loop {
            let page = self.list_page(path, cursor)?;
            entries.extend(page.entries);
            match page.next {
                None => break,
                Some(next) if next > cursor => cursor = next,
                Some(next) => {
                    return Err(Error::protocol(format!(
                        "list cursor went from {cursor} to {next}"
                    )));
                },
            }
        }
        debug!("Listed {path}: {} entries", entries.len());
        Ok(entries)
    }

    /// Size and kind of `path`.
    pub fn stat(&mut self, path: &str) -> Result<Entry> {
        let payload = self.call(&Request::stat(path), path)?;
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        let mut r = PayloadReader::new(&payload);
        let entry = r.entry_body(name)?;
        r.finish()?;
        Ok(entry)
    }

    /// Read at most `len` bytes of `path` at `offset`.
    ///
    /// A short read means end of file.
    pub fn read_chunk(&mut self, path: &str, offset: u64, len: u16) -> Result<Vec<u8>> {
        let data = self.call(&Request::read_chunk(path, offset, len), path)?;
        if data.len() > usize::from(len) {
            return Err(Error::protocol(format!(
                "asked for {len} bytes, device sent {}",
                data.len()
            )));
        }
        Ok(data)
    }

    /// Write `data` to `path` at `offset`.
    pub fn write_chunk(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<()> {
        if data.len() > CHUNK_SIZE {
            return Err(Error::protocol(format!(
                "chunk of {} bytes exceeds {CHUNK_SIZE}",
                data.len()
            )));
        }
        self.call_empty(&Request::write_chunk(path, offset, data), path)
    }

    /// Remove a file or empty directory.
    pub fn delete(&mut self, path: &str) -> Result<()> {
        self.call_empty(&Request::delete(path), path)
    }

    /// Move `from` to `to`.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let payload = self
            .transact(&Request::rename(from, to))?
            .map_err(|e| match e {
                DeviceError::FileExists => e.into_error(to),
                _ => e.into_error(from),
            })?;
        PayloadReader::new(&payload).finish()
    }

    /// Create directory `path`.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        self.call_empty(&Request::mkdir(path), path)
    }

    /// Erase the whole volume.
    pub fn format(&mut self) -> Result<()> {
        self.call_empty(&Request::format(), "/")
    }

    /// Reboot the cartridge. The link drops afterwards.
    pub fn reboot(&mut self) -> Result<()> {
        self.send_only(&Request::reboot())
    }

    /// Reboot into the bootloader. The link drops afterwards.
    pub fn bootloader(&mut self) -> Result<()> {
        self.send_only(&Request::bootloader())
    }
}
