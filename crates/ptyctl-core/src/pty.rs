//! Pseudo-terminal pair ownership.
//!
//! [`PtyChannel`] owns the master end for the lifetime of an execution and the
//! slave end only until the child has been spawned on it. Every descriptor is
//! held in an `Option` so [`PtyChannel::close`] can release whatever remains
//! and be called any number of times.

use std::io::{self, Read, Write};
#[cfg(unix)]
use std::os::unix::io::RawFd;

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, SlavePty};
use ptyctl_proto::{Error, Result};
use tracing::debug;

/// A master/slave pseudo-terminal pair.
pub struct PtyChannel {
    master: Option<Box<dyn MasterPty + Send>>,
    slave: Option<Box<dyn SlavePty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    reader: Option<Box<dyn Read + Send>>,
}

impl PtyChannel {
    /// Allocates a pseudo-terminal pair of the given size.
    #[cfg(unix)]
    pub fn open(cols: u16, rows: u16) -> Result<Self> {
        let pair = portable_pty::native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::PtyUnavailable(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::PtyUnavailable(format!("master not writable: {e}")))?;

        debug!(fd = ?pair.master.as_raw_fd(), "Opened PTY pair");
        Ok(Self {
            master: Some(pair.master),
            slave: Some(pair.slave),
            writer: Some(writer),
            reader: None,
        })
    }

    /// PTY sessions need POSIX pseudo-terminals and process groups.
    #[cfg(not(unix))]
    pub fn open(_cols: u16, _rows: u16) -> Result<Self> {
        Err(Error::PtyUnavailable(
            "PTY-based sessions are not supported on this platform".to_string(),
        ))
    }

    /// Spawns `cmd` with the slave as its controlling terminal and stdio,
    /// then drops the parent's slave reference.
    ///
    /// The child becomes a session leader, so its process group id equals its
    /// pid.
    pub fn spawn(&mut self, cmd: CommandBuilder) -> Result<Box<dyn Child + Send + Sync>> {
        let slave = self
            .slave
            .as_ref()
            .ok_or_else(|| Error::SpawnFailure("PTY slave already released".to_string()))?;
        let child = slave
            .spawn_command(cmd)
            .map_err(|e| Error::SpawnFailure(e.to_string()))?;
        self.release_slave();
        Ok(child)
    }

    /// Closes the parent's slave descriptor. The child keeps its own copies.
    pub fn release_slave(&mut self) {
        if self.slave.take().is_some() {
            debug!("Released PTY slave in parent");
        }
    }

    /// Hands out a reader on the master end.
    ///
    /// The reader is a duplicate descriptor; it stays valid after the channel
    /// is closed and is released when dropped.
    pub fn take_reader(&mut self) -> Result<Box<dyn Read + Send>> {
        if let Some(reader) = self.reader.take() {
            return Ok(reader);
        }
        let master = self
            .master
            .as_ref()
            .ok_or_else(|| Error::DescriptorIo("PTY master is closed".to_string()))?;
        master
            .try_clone_reader()
            .map_err(|e| Error::DescriptorIo(e.to_string()))
    }

    /// Reads up to `max_bytes` from the master. An empty result means EOF,
    /// including reads on a closed channel.
    pub fn read(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        if self.master.is_none() {
            return Ok(Vec::new());
        }
        if self.reader.is_none() {
            let reader = self.take_reader().map_err(io::Error::other)?;
            self.reader = Some(reader);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Vec::new());
        };
        let mut buf = vec![0u8; max_bytes];
        let n = reader.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Writes `bytes` to the master, i.e. to the child's stdin.
    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "PTY master is closed"))?;
        writer.write_all(bytes)?;
        writer.flush()
    }

    /// Raw master descriptor for readiness registration.
    #[cfg(unix)]
    pub fn master_fd(&self) -> Option<RawFd> {
        self.master.as_ref().and_then(|m| m.as_raw_fd())
    }

    /// True once the master has been released.
    pub fn is_closed(&self) -> bool {
        self.master.is_none()
    }

    /// Releases whichever descriptors are still open. Safe to call repeatedly.
    pub fn close(&mut self) {
        let had_master = self.master.is_some();
        self.reader = None;
        self.writer = None;
        self.slave = None;
        self.master = None;
        if had_master {
            debug!("Closed PTY channel");
        }
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PtyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyChannel")
            .field("master_open", &self.master.is_some())
            .field("slave_open", &self.slave.is_some())
            .field("writer_open", &self.writer.is_some())
            .finish()
    }
}
