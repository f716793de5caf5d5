//! The device session.
//!
//! A [`Session`] is the only owner of the link to the cartridge. Every
//! device command goes through it, one at a time, so frames can never
//! interleave. Bulk transfers run on their own thread but take the same link
//! for their whole duration; while one is active the session rejects other
//! commands with [`Error::DeviceBusy`] instead of queueing them.
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected <--> Busy
//!      ^                        |                 |
//!      +-------- error ---------+                 |
//!      +---- disconnect / reboot / bootloader ----+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use n64romfs::{Session, SessionConfig, Target, UploadOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::new(SessionConfig::default());
//!     let info = session.connect(Target::network("192.168.1.50:6800")?)?;
//!     println!("{info}");
//!
//!     for entry in session.list("/")? {
//!         println!("{} {}", entry.name, entry.size);
//!     }
//!
//!     let upload = session.start_upload(
//!         "mario.v64".as_ref(),
//!         "/mario.z64",
//!         UploadOptions::default().with_byte_order_fix(true),
//!     )?;
//!     upload.join()?;
//!     Ok(())
//! }
//! ```

pub mod path;

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::device::{Target, TransportKind};
use crate::error::{Error, Result};
use crate::model::{CartInfo, DeviceInfo, Entry};
use crate::port::{DEFAULT_TIMEOUT, Port};
use crate::protocol::RomfsClient;
use crate::rom::{self, RomFormat};
use crate::transfer::{self, Direction, Plan, TransferHandle};

pub use path::{join_remote, normalize, validate_name};

/// The link as shared between the session and a transfer thread.
pub(crate) type SharedLink = Arc<Mutex<Option<RomfsClient<Box<dyn Port>>>>>;

/// Default number of attempts to open the link.
const DEFAULT_CONNECT_ATTEMPTS: usize = 3;

/// Default delay between attempts to open the link.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Nominal baud rate of the USB CDC interface.
const DEFAULT_BAUD: u32 = 115_200;

/// Connection state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ConnectionState {
    /// No link.
    Disconnected,
    /// Opening the link.
    Connecting,
    /// Idle and ready for commands.
    Connected,
    /// A transfer holds the link.
    Busy,
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Per-call read/write timeout on the link.
    pub timeout: Duration,
    /// Attempts to open the link before giving up.
    pub connect_attempts: usize,
    /// Pause between open attempts.
    pub retry_delay: Duration,
    /// Serial baud rate (nominal for USB CDC).
    pub baud_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            baud_rate: DEFAULT_BAUD,
        }
    }
}

impl SessionConfig {
    /// Set the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of open attempts (at least one is made).
    #[must_use]
    pub fn with_connect_attempts(mut self, attempts: usize) -> Self {
        self.connect_attempts = attempts;
        self
    }

    /// Set the pause between open attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the serial baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

/// Upload tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Convert V64/N64 images to Z64 before sending.
    pub byte_order_fix: bool,
    /// Rewrite the PI bus speed header byte (requires Z64 after conversion).
    pub pi_bus_speed: Option<u8>,
}

impl UploadOptions {
    /// Enable or disable byte-order conversion.
    #[must_use]
    pub fn with_byte_order_fix(mut self, fix: bool) -> Self {
        self.byte_order_fix = fix;
        self
    }

    /// Patch the PI bus speed byte.
    #[must_use]
    pub fn with_pi_bus_speed(mut self, speed: Option<u8>) -> Self {
        self.pi_bus_speed = speed;
        self
    }
}

/// Outcome of a batch delete.
#[derive(Debug, Default)]
pub struct DeleteReport {
    /// Paths removed, in request order.
    pub succeeded: Vec<String>,
    /// Paths that could not be removed, with the reason.
    pub failed: Vec<(String, Error)>,
}

impl DeleteReport {
    /// Whether every path was removed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// `Ok` when complete, otherwise [`Error::PartialFailure`].
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.failed.is_empty() {
            Ok(self.succeeded)
        } else {
            Err(Error::PartialFailure {
                succeeded: self.succeeded,
                failed: self.failed,
            })
        }
    }
}

fn lock_link(link: &SharedLink) -> MutexGuard<'_, Option<RomfsClient<Box<dyn Port>>>> {
    link.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One live connection to one cartridge.
pub struct Session {
    config: SessionConfig,
    link: SharedLink,
    state: ConnectionState,
    transport: Option<TransportKind>,
    cwd: String,
    cart: Option<CartInfo>,
    free: Option<u64>,
    active: Option<TransferHandle>,
}

impl Session {
    /// Create a disconnected session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            link: Arc::new(Mutex::new(None)),
            state: ConnectionState::Disconnected,
            transport: None,
            cwd: "/".to_string(),
            cart: None,
            free: None,
            active: None,
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state. `Busy` while a transfer has not ended.
    pub fn state(&self) -> ConnectionState {
        match (&self.state, &self.active) {
            (ConnectionState::Connected, Some(t)) if !t.is_finished() => ConnectionState::Busy,
            (state, _) => *state,
        }
    }

    /// Whether a link is open.
    pub fn is_connected(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    /// Transport of the open link.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport
    }

    /// Directory that relative paths resolve against.
    pub fn current_remote_path(&self) -> &str {
        &self.cwd
    }

    /// Change the current directory; `path` must be a directory.
    pub fn change_dir(&mut self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        let entry = self.with_client(|c| c.stat(&target))?;
        if !entry.is_directory {
            return Err(Error::InvalidPath(format!("{target}: not a directory")));
        }
        self.cwd = target;
        Ok(())
    }

    /// Resolve a path against the current directory.
    pub fn resolve(&self, path: &str) -> Result<String> {
        path::normalize(&self.cwd, path)
    }

    /// Open a link to `target` and read the device status.
    ///
    /// Opening is retried according to [`SessionConfig`]. Status queries that
    /// fail are logged and leave the value unknown.
    pub fn connect(&mut self, target: Target) -> Result<DeviceInfo> {
        self.disconnect()?;
        self.state = ConnectionState::Connecting;
        info!("Connecting to {target}");

        let attempts = self.config.connect_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match target.open(self.config.timeout, self.config.baud_rate) {
                Ok(port) => return self.attach(target.transport_kind(), port),
                Err(e) => {
                    debug!("Connect attempt {attempt}/{attempts} failed: {e}");
                    last_err = Some(e);
                    if attempt < attempts {
                        thread::sleep(self.config.retry_delay);
                    }
                },
            }
        }

        self.state = ConnectionState::Disconnected;
        Err(match last_err {
            Some(Error::Connection(msg)) => Error::Connection(msg),
            Some(other) => Error::Connection(other.to_string()),
            None => Error::Connection(format!("cannot reach {target}")),
        })
    }

    /// Use an already opened link.
    pub fn connect_port(&mut self, kind: TransportKind, port: Box<dyn Port>) -> Result<DeviceInfo> {
        self.disconnect()?;
        self.state = ConnectionState::Connecting;
        self.attach(kind, port)
    }

    fn attach(&mut self, kind: TransportKind, mut port: Box<dyn Port>) -> Result<DeviceInfo> {
        if let Err(e) = port.set_timeout(self.config.timeout) {
            warn!("Cannot set timeout on {}: {e}", port.name());
        }
        info!("Connected via {kind} ({})", port.name());
        *lock_link(&self.link) = Some(RomfsClient::new(port));
        self.transport = Some(kind);
        self.state = ConnectionState::Connected;
        self.cwd = "/".to_string();
        let info = self.refresh_device_info();
        if !self.is_connected() {
            return Err(Error::Connection(format!("{kind} device stopped answering")));
        }
        Ok(info)
    }

    /// Re-query firmware info and free space, keeping unknowns as `None`.
    pub fn refresh_device_info(&mut self) -> DeviceInfo {
        self.cart = None;
        self.free = None;
        match self.firmware_info() {
            Ok(_) => {},
            Err(e) => warn!("Firmware info query failed: {e}"),
        }
        match self.free_space() {
            Ok(_) => {},
            Err(e) => warn!("Free space query failed: {e}"),
        }
        self.device_info()
    }

    /// Last known device status, without touching the link.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            cart: self.cart,
            free_bytes: self.free,
        }
    }

    /// Close the link, cancelling any active transfer first.
    ///
    /// Always legal; a disconnected session stays disconnected.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(active) = self.active.take() {
            if !active.is_finished() {
                info!("Cancelling transfer of {} before disconnect", active.remote_path());
                active.cancel();
                active.wait();
            }
        }
        let client = lock_link(&self.link).take();
        self.mark_disconnected();
        if let Some(client) = client {
            let mut port = client.into_inner();
            info!("Disconnecting from {}", port.name());
            port.close()?;
        }
        Ok(())
    }

    fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.transport = None;
        self.cart = None;
        self.free = None;
    }

    fn ensure_idle(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Err(Error::NotConnected);
        }
        if let Some(active) = &self.active {
            if !active.is_finished() {
                return Err(Error::DeviceBusy);
            }
            self.active = None;
        }
        if lock_link(&self.link).is_none() {
            // A transfer gave up on the link.
            debug!("Link was dropped, session is disconnected");
            self.mark_disconnected();
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Run one command on the idle link.
    fn with_client<T>(
        &mut self,
        f: impl FnOnce(&mut RomfsClient<Box<dyn Port>>) -> Result<T>,
    ) -> Result<T> {
        self.ensure_idle()?;
        let (result, in_step) = {
            let mut guard = lock_link(&self.link);
            let client = guard.as_mut().ok_or(Error::NotConnected)?;
            let result = f(client);
            (result, client.is_in_step())
        };
        if !in_step {
            warn!("Dropping the link after a lost reply");
            let _ = self.disconnect();
        }
        result
    }

    /// Entries of directory `path`, in device order.
    pub fn list(&mut self, path: &str) -> Result<Vec<Entry>> {
        let path = self.resolve(path)?;
        self.with_client(|c| c.list(&path))
    }

    /// Size and kind of `path`.
    pub fn stat(&mut self, path: &str) -> Result<Entry> {
        let path = self.resolve(path)?;
        self.with_client(|c| c.stat(&path))
    }

    /// Whether `path` exists on the device.
    pub fn exists(&mut self, path: &str) -> Result<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(Error::PathNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create directory `name` inside `parent` and return its path.
    pub fn mkdir(&mut self, parent: &str, name: &str) -> Result<String> {
        path::validate_name(name)?;
        let target = join_remote(&self.resolve(parent)?, name);
        self.with_client(|c| c.mkdir(&target))?;
        debug!("Created directory {target}");
        Ok(target)
    }

    /// Remove each path in order, continuing past failures.
    pub fn delete<S: AsRef<str>>(&mut self, paths: &[S]) -> Result<DeleteReport> {
        self.ensure_idle()?;
        let mut report = DeleteReport::default();
        for raw in paths {
            let raw = raw.as_ref();
            let result = self.resolve(raw).and_then(|p| {
                if p == "/" {
                    return Err(Error::InvalidPath("cannot delete the root".to_string()));
                }
                self.with_client(|c| c.delete(&p)).map(|()| p)
            });
            match result {
                Ok(p) => {
                    debug!("Deleted {p}");
                    report.succeeded.push(raw.to_string());
                },
                Err(e) => {
                    debug!("Delete {raw} failed: {e}");
                    report.failed.push((raw.to_string(), e));
                },
            }
        }
        if !report.succeeded.is_empty() {
            self.free = None;
        }
        Ok(report)
    }

    /// Rename the entry at `path` to `new_name` within its directory.
    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<String> {
        path::validate_name(new_name)?;
        let from = self.resolve(path)?;
        if from == "/" {
            return Err(Error::InvalidPath("cannot rename the root".to_string()));
        }
        let to = join_remote(path::parent(&from), new_name);
        self.with_client(|c| c.rename(&from, &to))?;
        debug!("Renamed {from} -> {to}");
        Ok(to)
    }

    /// Erase the whole volume.
    pub fn format(&mut self) -> Result<()> {
        info!("Formatting volume");
        self.with_client(RomfsClient::format)?;
        self.free = None;
        self.cwd = "/".to_string();
        Ok(())
    }

    /// Reboot the cartridge and drop the session.
    pub fn reboot(&mut self) -> Result<()> {
        info!("Rebooting cartridge");
        self.with_client(RomfsClient::reboot)?;
        self.disconnect()
    }

    /// Reboot into the bootloader and drop the session.
    pub fn switch_to_bootloader(&mut self) -> Result<()> {
        info!("Switching cartridge to bootloader");
        self.with_client(RomfsClient::bootloader)?;
        self.disconnect()
    }

    /// Firmware version and flash window, cached.
    pub fn firmware_info(&mut self) -> Result<CartInfo> {
        if let Some(cart) = self.cart {
            return Ok(cart);
        }
        let cart = self.with_client(RomfsClient::cart_info)?;
        self.cart = Some(cart);
        Ok(cart)
    }

    /// Free bytes on the volume, cached until the next mutating operation.
    pub fn free_space(&mut self) -> Result<u64> {
        if let Some(free) = self.free {
            return Ok(free);
        }
        let free = self.with_client(RomfsClient::free_space)?;
        self.free = Some(free);
        Ok(free)
    }

    /// The transfer started last, if it has not been reset yet.
    pub fn active_transfer(&self) -> Option<&TransferHandle> {
        self.active.as_ref()
    }

    /// Upload `local` to `remote` on a background thread.
    ///
    /// The local file size is read up front. With byte-order conversion or
    /// a PI bus speed patch the whole image is converted before the first
    /// chunk is sent.
    pub fn start_upload(
        &mut self,
        local: &Path,
        remote: &str,
        options: UploadOptions,
    ) -> Result<TransferHandle> {
        self.ensure_idle()?;
        let remote = self.resolve(remote)?;
        if remote == "/" {
            return Err(Error::InvalidPath("upload needs a file name".to_string()));
        }

        let file = File::open(local)?;
        let total_bytes = file.metadata()?.len();
        let source: Box<dyn Read + Send> = if options.byte_order_fix || options.pi_bus_speed.is_some() {
            let mut data = Vec::with_capacity(usize::try_from(total_bytes).unwrap_or_default());
            BufReader::new(file).read_to_end(&mut data)?;
            if options.byte_order_fix {
                let format = rom::convert_to_canonical(&mut data)?;
                if format.needs_conversion() {
                    info!("Converted {} from {format} to {}", local.display(), RomFormat::Z64);
                }
            }
            if let Some(speed) = options.pi_bus_speed {
                rom::patch_pi_bus_speed(&mut data, speed)?;
            }
            Box::new(Cursor::new(data))
        } else {
            Box::new(BufReader::new(file))
        };

        info!("Uploading {} -> {remote} ({total_bytes} bytes)", local.display());
        let handle = transfer::start_upload(
            Arc::clone(&self.link),
            Plan {
                direction: Direction::Upload,
                local_path: local.to_path_buf(),
                remote_path: remote,
                total_bytes,
            },
            source,
        )?;
        self.free = None;
        self.active = Some(handle.clone());
        Ok(handle)
    }

    /// Download `remote` into `local` on a background thread.
    ///
    /// The local file is created (or truncated) before the transfer starts.
    pub fn start_download(&mut self, remote: &str, local: &Path) -> Result<TransferHandle> {
        let remote = self.resolve(remote)?;
        let entry = self.with_client(|c| c.stat(&remote))?;
        if entry.is_directory {
            return Err(Error::InvalidPath(format!("{remote}: is a directory")));
        }

        let sink = BufWriter::new(File::create(local)?);
        info!("Downloading {remote} -> {} ({} bytes)", local.display(), entry.size);
        let handle = transfer::start_download(
            Arc::clone(&self.link),
            Plan {
                direction: Direction::Download,
                local_path: local.to_path_buf(),
                remote_path: remote,
                total_bytes: entry.size,
            },
            Box::new(sink),
        )?;
        self.active = Some(handle.clone());
        Ok(handle)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}
