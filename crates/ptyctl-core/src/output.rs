//! Output pump: drains the PTY master and forwards `output` events.
//!
//! Two [`OutputSource`] implementations exist:
//! - [`ReadinessSource`] registers the master with the tokio reactor and reads
//!   only when the descriptor reports readable.
//! - [`BlockingSource`] runs blocking reads on a dedicated worker thread and
//!   hands chunks over a channel.
//!
//! [`OutputPump`] drives either one identically, so the supervisor never
//! branches on the strategy after [`select_source`] has picked it.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ptyctl_proto::{Error, Event, EventSink, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::activity::ActivityClock;
pub use crate::config::PumpStrategy;
use crate::pty::PtyChannel;

/// A stream of raw chunks read from the PTY master.
#[async_trait]
pub trait OutputSource: Send {
    /// The strategy this source implements.
    fn strategy(&self) -> PumpStrategy;

    /// Waits for the next chunk. `Ok(None)` means end of stream.
    async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>>;
}

// ─── Readiness-driven source ──────────────────────────────────────────

#[cfg(unix)]
mod readiness {
    use std::io::{self, Read};
    use std::os::unix::io::{AsRawFd, RawFd};

    use async_trait::async_trait;
    use nix::fcntl::{FcntlArg, OFlag, fcntl};
    use tokio::io::Interest;
    use tokio::io::unix::AsyncFd;

    use super::OutputSource;
    use crate::config::PumpStrategy;

    /// Registration handle for the master descriptor. Does not own the fd;
    /// the [`PtyChannel`](crate::pty::PtyChannel) closes it after the pump
    /// has stopped.
    struct MasterFd(RawFd);

    impl AsRawFd for MasterFd {
        fn as_raw_fd(&self) -> RawFd {
            self.0
        }
    }

    /// Reads the master whenever the reactor reports it readable.
    pub struct ReadinessSource {
        fd: AsyncFd<MasterFd>,
        reader: Box<dyn Read + Send>,
        chunk_size: usize,
    }

    impl ReadinessSource {
        /// Registers `master_fd` with the current runtime and switches it to
        /// non-blocking mode. `reader` must read the same open file.
        pub fn new(
            master_fd: RawFd,
            reader: Box<dyn Read + Send>,
            chunk_size: usize,
        ) -> io::Result<Self> {
            let fd = AsyncFd::with_interest(MasterFd(master_fd), Interest::READABLE)?;
            set_nonblocking(master_fd)?;
            Ok(Self {
                fd,
                reader,
                chunk_size,
            })
        }
    }

    #[async_trait]
    impl OutputSource for ReadinessSource {
        fn strategy(&self) -> PumpStrategy {
            PumpStrategy::Readiness
        }

        async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
            let mut buf = vec![0u8; self.chunk_size];
            loop {
                let mut guard = self.fd.readable().await?;
                match guard.try_io(|_| self.reader.read(&mut buf)) {
                    Ok(Ok(0)) => return Ok(None),
                    Ok(Ok(n)) => {
                        buf.truncate(n);
                        return Ok(Some(buf));
                    }
                    Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {}
                    Ok(Err(e)) => return Err(e),
                    // Spurious wakeup; readiness was cleared, wait again.
                    Err(_would_block) => {}
                }
            }
        }
    }

    fn set_nonblocking(fd: RawFd) -> io::Result<()> {
        let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
        Ok(())
    }
}

#[cfg(unix)]
pub use readiness::ReadinessSource;

// ─── Blocking worker source ───────────────────────────────────────────

/// Messages from the worker thread.
#[derive(Debug)]
enum WorkerRead {
    Data(Vec<u8>),
    Eof,
    Failed(io::Error),
}

/// Reads the master with blocking calls on a dedicated thread.
pub struct BlockingSource {
    rx: mpsc::Receiver<WorkerRead>,
    stop: Arc<AtomicBool>,
}

impl BlockingSource {
    /// Starts the worker thread on `reader`.
    pub fn spawn(reader: Box<dyn Read + Send>, chunk_size: usize) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_worker = Arc::clone(&stop);

        debug!("Spawning PTY output reader thread");
        std::thread::Builder::new()
            .name("ptyctl-pump".to_string())
            .spawn(move || read_loop(reader, chunk_size, &tx, &stop_worker))?;

        Ok(Self { rx, stop })
    }
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    chunk_size: usize,
    tx: &mpsc::Sender<WorkerRead>,
    stop: &AtomicBool,
) {
    let mut buf = vec![0u8; chunk_size];
    loop {
        if stop.load(Ordering::SeqCst) {
            debug!("PTY reader: stop requested");
            break;
        }

        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("PTY reader: EOF");
                let _ = tx.blocking_send(WorkerRead::Eof);
                break;
            }
            Ok(n) => {
                if tx.blocking_send(WorkerRead::Data(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                debug!(error = %e, "PTY reader error");
                let _ = tx.blocking_send(WorkerRead::Failed(e));
                break;
            }
        }
    }
}

#[async_trait]
impl OutputSource for BlockingSource {
    fn strategy(&self) -> PumpStrategy {
        PumpStrategy::Blocking
    }

    async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.rx.recv().await {
            Some(WorkerRead::Data(data)) => Ok(Some(data)),
            Some(WorkerRead::Eof) | None => Ok(None),
            Some(WorkerRead::Failed(e)) => Err(e),
        }
    }
}

impl Drop for BlockingSource {
    fn drop(&mut self) {
        // The worker exits at its next wakeup; a read stuck on a slave held
        // open by a stray grandchild ends when that process does.
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Picks the source for `strategy` over the channel's master end.
///
/// `Auto` prefers readiness notifications and falls back to the blocking
/// worker when the descriptor cannot be registered.
pub fn select_source(
    strategy: PumpStrategy,
    channel: &mut PtyChannel,
    chunk_size: usize,
) -> Result<Box<dyn OutputSource>> {
    match strategy {
        PumpStrategy::Blocking => blocking_source(channel, chunk_size),
        PumpStrategy::Readiness => readiness_source(channel, chunk_size),
        PumpStrategy::Auto => match readiness_source(channel, chunk_size) {
            Ok(source) => Ok(source),
            Err(e) => {
                debug!(error = %e, "Readiness notification unavailable, using blocking reader");
                blocking_source(channel, chunk_size)
            }
        },
    }
}

fn blocking_source(channel: &mut PtyChannel, chunk_size: usize) -> Result<Box<dyn OutputSource>> {
    let reader = channel.take_reader()?;
    let source = BlockingSource::spawn(reader, chunk_size)
        .map_err(|e| Error::DescriptorIo(format!("failed to start reader thread: {e}")))?;
    Ok(Box::new(source))
}

#[cfg(unix)]
fn readiness_source(channel: &mut PtyChannel, chunk_size: usize) -> Result<Box<dyn OutputSource>> {
    let fd = channel
        .master_fd()
        .ok_or_else(|| Error::DescriptorIo("PTY master has no descriptor".to_string()))?;
    let reader = channel.take_reader()?;
    let source = ReadinessSource::new(fd, reader, chunk_size)
        .map_err(|e| Error::DescriptorIo(format!("readiness registration failed: {e}")))?;
    Ok(Box::new(source))
}

#[cfg(not(unix))]
fn readiness_source(_channel: &mut PtyChannel, _chunk_size: usize) -> Result<Box<dyn OutputSource>> {
    Err(Error::DescriptorIo(
        "readiness notification is not supported on this platform".to_string(),
    ))
}

// ─── Decoding ─────────────────────────────────────────────────────────

/// Incremental UTF-8 decoder.
///
/// A multi-byte character split across reads is held back until its tail
/// arrives; invalid bytes become U+FFFD. Decoding never fails.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `bytes`, keeping an incomplete trailing sequence for later.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest: &[u8] = &input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            self.pending = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flushes a dangling partial sequence as replacement characters.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

// ─── Pump ─────────────────────────────────────────────────────────────

/// What a finished pump observed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    pub chunks: usize,
    pub bytes: usize,
    /// Stopped by cancellation rather than end of stream.
    pub cancelled: bool,
}

/// Forwards chunks from an [`OutputSource`] as `output` events.
pub struct OutputPump {
    source: Box<dyn OutputSource>,
    sink: Arc<dyn EventSink>,
    activity: Arc<ActivityClock>,
    decoder: Utf8Decoder,
}

impl OutputPump {
    pub fn new(
        source: Box<dyn OutputSource>,
        sink: Arc<dyn EventSink>,
        activity: Arc<ActivityClock>,
    ) -> Self {
        Self {
            source,
            sink,
            activity,
            decoder: Utf8Decoder::new(),
        }
    }

    pub fn strategy(&self) -> PumpStrategy {
        self.source.strategy()
    }

    /// Pumps until end of stream, a read error, or cancellation.
    ///
    /// A read error counts as end of stream once any output has been seen, or
    /// when it is the hangup the master reports after the child side closes.
    /// Only an error before any output is returned as a fault.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<PumpReport> {
        let mut report = PumpReport::default();
        debug!(strategy = ?self.strategy(), "Output pump started");

        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Output pump cancelled");
                    report.cancelled = true;
                    break;
                }
                read = self.source.next_chunk() => read,
            };

            match read {
                Ok(Some(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    report.chunks += 1;
                    report.bytes += chunk.len();
                    self.activity.touch();
                    let data = self.decoder.decode(&chunk);
                    if !data.is_empty() {
                        self.sink.emit(Event::Output { data });
                    }
                }
                Ok(None) => {
                    debug!("PTY reached EOF");
                    break;
                }
                Err(e) if is_hangup(&e) || report.bytes > 0 => {
                    debug!(error = %e, "PTY read ended, treating as EOF");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "PTY read failed before any output");
                    return Err(Error::DescriptorIo(e.to_string()));
                }
            }
        }

        let tail = self.decoder.finish();
        if !tail.is_empty() {
            self.sink.emit(Event::Output { data: tail });
        }
        debug!(chunks = report.chunks, bytes = report.bytes, "Output pump stopped");
        Ok(report)
    }
}

/// The master reports EIO once every slave descriptor is closed.
#[cfg(unix)]
fn is_hangup(e: &io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::EIO as i32)
}

#[cfg(not(unix))]
fn is_hangup(_e: &io::Error) -> bool {
    false
}
