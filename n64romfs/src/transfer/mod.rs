//! Chunked uploads and downloads running off the caller's thread.
//!
//! A transfer is started through the [`Session`](crate::session::Session),
//! which hands back a [`TransferHandle`]. The chunk loop runs on its own
//! thread and holds the link for the whole transfer, so no other command can
//! interleave with chunk commands. The link is released on every exit path
//! before the terminal state becomes visible.
//!
//! ```text
//!  caller                     transfer thread                 device
//!    |  start_upload()              |                            |
//!    |----------------------------->|  lock link                 |
//!    |                              |  write-chunk #0 ---------->|
//!    |<-- Progress (try_send) ------|<--------------------- ack -|
//!    |  cancel()                    |  write-chunk #1 ---------->|
//!    |                              |<--------------------- ack -|
//!    |                              |  cancel seen, unlock link  |
//!    |<-- Finished(Canceled) -------|                            |
//! ```
//!
//! Progress events may be dropped when the consumer lags behind. The
//! `Finished` event is not queued: [`TransferEvents`] produces it once the
//! transfer thread has exited, so a stalled consumer never blocks the thread.

mod rate;

pub use rate::RateEstimator;

use std::cell::Cell;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{
    Receiver, RecvError, RecvTimeoutError, SyncSender, TryRecvError, sync_channel,
};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{CHUNK_SIZE, RomfsClient};
use crate::session::SharedLink;

/// Progress events buffered before new ones are dropped.
const EVENT_BUFFER: usize = 64;

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Direction {
    /// Local file to device.
    Upload,
    /// Device file to local file.
    Download,
}

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TransferState {
    /// Waiting for the link.
    Pending,
    /// Moving chunks.
    Running,
    /// Stopped at a chunk boundary on request.
    Canceled,
    /// Stopped by an error, see [`TransferHandle::take_error`].
    Failed,
    /// Every byte moved.
    Completed,
}

impl TransferState {
    /// Whether the transfer has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Failed | Self::Completed)
    }
}

/// Progress snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TransferProgress {
    /// Bytes moved so far.
    pub transferred_bytes: u64,
    /// Bytes to move in total.
    pub total_bytes: u64,
    /// Time since the transfer started.
    pub elapsed: Duration,
    /// Rate over the last chunk, bytes per second.
    pub rate: Option<u64>,
    /// Estimated time left, once the smoothed rate is known.
    pub eta: Option<Duration>,
}

/// Notification sent from the transfer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// A chunk completed.
    Progress(TransferProgress),
    /// The transfer ended; sent exactly once.
    Finished(TransferState),
}

struct Shared {
    direction: Direction,
    local_path: PathBuf,
    remote_path: String,
    total_bytes: u64,
    started_at: Instant,
    transferred: AtomicU64,
    cancel: AtomicBool,
    state: Mutex<TransferState>,
    done: Condvar,
    last: Mutex<TransferProgress>,
    error: Mutex<Option<Error>>,
    events: Mutex<Option<Receiver<TransferEvent>>>,
    listening: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn set_state(&self, state: TransferState) {
        *lock(&self.state) = state;
        if state.is_terminal() {
            self.done.notify_all();
        }
    }
}

/// Handle to one transfer.
///
/// Clones observe the same transfer.
#[derive(Clone)]
pub struct TransferHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferHandle")
            .field("direction", &self.shared.direction)
            .field("remote_path", &self.shared.remote_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl TransferHandle {
    /// Upload or download.
    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    /// Local side of the transfer.
    pub fn local_path(&self) -> &Path {
        &self.shared.local_path
    }

    /// Device side of the transfer.
    pub fn remote_path(&self) -> &str {
        &self.shared.remote_path
    }

    /// Bytes to move in total.
    pub fn total_bytes(&self) -> u64 {
        self.shared.total_bytes
    }

    /// Bytes moved so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.shared.transferred.load(Ordering::Acquire)
    }

    /// When the transfer was started.
    pub fn started_at(&self) -> Instant {
        self.shared.started_at
    }

    /// Current state.
    pub fn state(&self) -> TransferState {
        *lock(&self.shared.state)
    }

    /// Whether the transfer has ended.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> TransferProgress {
        *lock(&self.shared.last)
    }

    /// Ask the transfer to stop at the next chunk boundary.
    ///
    /// The chunk in flight always completes.
    pub fn cancel(&self) {
        if !self.shared.cancel.swap(true, Ordering::AcqRel) {
            debug!("Cancel requested for {}", self.shared.remote_path);
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel.load(Ordering::Acquire)
    }

    /// Take the event receiver. Only the first call gets it.
    ///
    /// Progress is only queued once the receiver has been taken. `Finished`
    /// is delivered either way, after every queued progress event.
    pub fn take_events(&self) -> Option<TransferEvents> {
        let rx = lock(&self.shared.events).take()?;
        self.shared.listening.store(true, Ordering::Release);
        Some(TransferEvents {
            rx,
            shared: Arc::clone(&self.shared),
            finished: Cell::new(false),
        })
    }

    /// Block until the transfer ends.
    pub fn wait(&self) -> TransferState {
        let mut state = lock(&self.shared.state);
        while !state.is_terminal() {
            state = self
                .shared
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *state
    }

    /// Block until the transfer ends or `timeout` passes.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TransferState> {
        let state = lock(&self.shared.state);
        let (state, _) = self
            .shared
            .done
            .wait_timeout_while(state, timeout, |s| !s.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        state.is_terminal().then_some(*state)
    }

    /// Take the error of a failed transfer.
    pub fn take_error(&self) -> Option<Error> {
        lock(&self.shared.error).take()
    }

    /// Wait for the end and turn `Failed` into its error.
    pub fn join(&self) -> Result<TransferState> {
        match self.wait() {
            TransferState::Failed => Err(self
                .take_error()
                .unwrap_or_else(|| Error::protocol("transfer failed"))),
            state => Ok(state),
        }
    }
}

/// Receiving end of a transfer's events.
///
/// Yields queued progress, then `Finished` exactly once when the transfer
/// thread has exited, then nothing.
pub struct TransferEvents {
    rx: Receiver<TransferEvent>,
    shared: Arc<Shared>,
    finished: Cell<bool>,
}

impl TransferEvents {
    // The sender lives on the transfer thread, so a closed channel means the
    // state is already terminal.
    fn finish(&self) -> Option<TransferEvent> {
        if self.finished.replace(true) {
            None
        } else {
            Some(TransferEvent::Finished(*lock(&self.shared.state)))
        }
    }

    /// Block for the next event.
    pub fn recv(&self) -> std::result::Result<TransferEvent, RecvError> {
        match self.rx.recv() {
            Ok(event) => Ok(event),
            Err(RecvError) => self.finish().ok_or(RecvError),
        }
    }

    /// Block for the next event for at most `timeout`.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<TransferEvent, RecvTimeoutError> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => Err(RecvTimeoutError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                self.finish().ok_or(RecvTimeoutError::Disconnected)
            },
        }
    }

    /// Next event if one is ready.
    pub fn try_recv(&self) -> std::result::Result<TransferEvent, TryRecvError> {
        match self.rx.try_recv() {
            Ok(event) => Ok(event),
            Err(TryRecvError::Empty) => Err(TryRecvError::Empty),
            Err(TryRecvError::Disconnected) => self.finish().ok_or(TryRecvError::Disconnected),
        }
    }

    /// Blocking iterator that ends after `Finished`.
    pub fn iter(&self) -> impl Iterator<Item = TransferEvent> + '_ {
        std::iter::from_fn(|| self.recv().ok())
    }
}

impl Iterator for TransferEvents {
    type Item = TransferEvent;

    fn next(&mut self) -> Option<TransferEvent> {
        self.recv().ok()
    }
}

/// Per-chunk bookkeeping on the transfer thread.
struct Reporter {
    shared: Arc<Shared>,
    tx: SyncSender<TransferEvent>,
    rate: RateEstimator,
    last_chunk: Instant,
}

impl Reporter {
    fn cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::Acquire)
    }

    fn advance(&mut self, chunk: usize) {
        let now = Instant::now();
        let chunk = chunk as u64;
        let transferred = self.shared.transferred.fetch_add(chunk, Ordering::AcqRel) + chunk;
        let rate = self.rate.sample(chunk, now - self.last_chunk);
        self.last_chunk = now;

        let total = self.shared.total_bytes;
        let progress = TransferProgress {
            transferred_bytes: transferred,
            total_bytes: total,
            elapsed: now - self.shared.started_at,
            rate,
            eta: self.rate.eta(total.saturating_sub(transferred)),
        };
        *lock(&self.shared.last) = progress;
        if self.shared.listening.load(Ordering::Acquire) {
            // Dropped when the consumer lags.
            let _ = self.tx.try_send(TransferEvent::Progress(progress));
        }
    }
}

/// Marks the transfer failed if the thread unwinds before finishing.
struct FinishGuard(Arc<Shared>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if !lock(&self.0.state).is_terminal() {
            self.0.set_state(TransferState::Failed);
        }
    }
}

type Client = RomfsClient<Box<dyn Port>>;

/// Body of a transfer: moves chunks and returns `Completed` or `Canceled`.
type Job = Box<dyn FnOnce(&mut Client, &mut Reporter) -> Result<TransferState> + Send>;

/// What the session needs to describe a new transfer.
pub(crate) struct Plan {
    pub direction: Direction,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub total_bytes: u64,
}

fn spawn(link: SharedLink, plan: Plan, job: Job) -> Result<TransferHandle> {
    let (tx, rx) = sync_channel(EVENT_BUFFER);
    let now = Instant::now();
    let shared = Arc::new(Shared {
        direction: plan.direction,
        local_path: plan.local_path,
        remote_path: plan.remote_path,
        total_bytes: plan.total_bytes,
        started_at: now,
        transferred: AtomicU64::new(0),
        cancel: AtomicBool::new(false),
        state: Mutex::new(TransferState::Pending),
        done: Condvar::new(),
        last: Mutex::new(TransferProgress {
            total_bytes: plan.total_bytes,
            ..TransferProgress::default()
        }),
        error: Mutex::new(None),
        events: Mutex::new(Some(rx)),
        listening: AtomicBool::new(false),
    });

    let handle = TransferHandle {
        shared: Arc::clone(&shared),
    };
    let mut reporter = Reporter {
        shared: Arc::clone(&shared),
        tx,
        rate: RateEstimator::default(),
        last_chunk: now,
    };

    thread::Builder::new()
        .name("n64romfs-transfer".to_string())
        .spawn(move || {
            let _guard = FinishGuard(Arc::clone(&shared));
            let outcome = {
                let mut link = lock(&link);
                let (outcome, in_step) = match link.as_mut() {
                    Some(client) => {
                        shared.set_state(TransferState::Running);
                        let outcome = job(client, &mut reporter);
                        (outcome, client.is_in_step())
                    },
                    None => (Err(Error::NotConnected), true),
                };
                if !in_step {
                    release_broken_link(&mut link);
                }
                outcome
            };

            let state = match outcome {
                Ok(state) => state,
                Err(e) => {
                    warn!("Transfer of {} failed: {e}", shared.remote_path);
                    *lock(&shared.error) = Some(e);
                    TransferState::Failed
                },
            };
            info!(
                "{:?} {} -> {state:?} ({} of {} bytes)",
                shared.direction,
                shared.remote_path,
                shared.transferred.load(Ordering::Acquire),
                shared.total_bytes
            );

            shared.set_state(state);
            // Dropping the sender tells the receiver that `state` is final.
            drop(reporter);
        })?;

    Ok(handle)
}

/// Close a link whose replies can no longer be matched to requests.
fn release_broken_link(link: &mut Option<Client>) {
    if let Some(client) = link.take() {
        let mut port = client.into_inner();
        warn!("Closing {} after a lost reply", port.name());
        let _ = port.close();
    }
}

/// Start an upload of `source` (exactly `plan.total_bytes` long).
pub(crate) fn start_upload(
    link: SharedLink,
    plan: Plan,
    mut source: Box<dyn Read + Send>,
) -> Result<TransferHandle> {
    let remote = plan.remote_path.clone();
    let total = plan.total_bytes;
    spawn(
        link,
        plan,
        Box::new(move |client, reporter| {
            let mut buf = vec![0u8; CHUNK_SIZE];
            let mut offset = 0u64;
            loop {
                if offset == total && offset > 0 {
                    break;
                }
                if reporter.cancelled() {
                    return Ok(TransferState::Canceled);
                }
                let n = fill(&mut source, &mut buf)?;
                if offset + n as u64 > total {
                    return Err(changed_during_upload());
                }
                // An empty file still needs one write to be created.
                if n == 0 && offset > 0 {
                    break;
                }
                client.write_chunk(&remote, offset, &buf[..n])?;
                offset += n as u64;
                reporter.advance(n);
                if n < CHUNK_SIZE {
                    break;
                }
            }
            if offset != total {
                return Err(changed_during_upload());
            }
            Ok(TransferState::Completed)
        }),
    )
}

fn changed_during_upload() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "local file changed size during upload",
    ))
}

/// Read until `buf` is full or the source ends.
fn fill(source: &mut dyn Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Start a download of `plan.total_bytes` into `sink`.
pub(crate) fn start_download(
    link: SharedLink,
    plan: Plan,
    mut sink: Box<dyn std::io::Write + Send>,
) -> Result<TransferHandle> {
    let remote = plan.remote_path.clone();
    let total = plan.total_bytes;
    spawn(
        link,
        plan,
        Box::new(move |client, reporter| {
            let mut offset = 0u64;
            while offset < total {
                if reporter.cancelled() {
                    sink.flush()?;
                    return Ok(TransferState::Canceled);
                }
                #[allow(clippy::cast_possible_truncation)]
                let want = (total - offset).min(CHUNK_SIZE as u64) as u16;
                let data = client.read_chunk(&remote, offset, want)?;
                if data.is_empty() {
                    return Err(Error::protocol(format!(
                        "device returned no data at offset {offset} of {total}"
                    )));
                }
                sink.write_all(&data)?;
                offset += data.len() as u64;
                reporter.advance(data.len());
            }
            sink.flush()?;
            Ok(TransferState::Completed)
        }),
    )
}
