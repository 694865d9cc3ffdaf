//! The control protocol: one session per display surface.
//!
//! A [`Session`] dispatches inbound [`Command`]s to its [`ProcessSupervisor`]
//! and keeps the mirrored display fields in a [`StateMirror`]. Command and
//! working directory are read from the mirror at every `execute`, so edits
//! made by the remote surface take effect on the next run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ptyctl_proto::{Command, EventSink, Result, SessionState, Theme};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::debug;

use crate::config::SessionConfig;
use crate::supervisor::{ProcessHandle, ProcessSupervisor};

/// Fields shared with the remote display surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredState {
    pub command: String,
    pub working_directory: PathBuf,
    pub theme: Theme,
}

/// Observable copy of [`MirroredState`].
#[derive(Debug)]
pub struct StateMirror {
    tx: watch::Sender<MirroredState>,
}

impl StateMirror {
    pub fn new(initial: MirroredState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Current values.
    pub fn snapshot(&self) -> MirroredState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MirroredState> {
        self.tx.subscribe()
    }

    pub fn set_command(&self, command: impl Into<String>) {
        let command = command.into();
        self.tx.send_if_modified(|state| replace(&mut state.command, command));
    }

    pub fn set_working_directory(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        self.tx
            .send_if_modified(|state| replace(&mut state.working_directory, dir));
    }

    pub fn set_theme(&self, theme: Theme) {
        self.tx.send_if_modified(|state| replace(&mut state.theme, theme));
    }
}

/// Assigns `value` and reports whether it changed anything.
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// A command session bound to one event sink.
#[derive(Debug)]
pub struct Session {
    supervisor: Arc<ProcessSupervisor>,
    mirror: StateMirror,
}

impl Session {
    /// Creates a session; executes right away when `auto_run` is set.
    ///
    /// Executions run as tasks on `runtime`.
    pub fn new(config: SessionConfig, sink: Arc<dyn EventSink>, runtime: Handle) -> Self {
        let mirror = StateMirror::new(MirroredState {
            command: config.command,
            working_directory: config.working_directory,
            theme: config.theme,
        });
        let supervisor = ProcessSupervisor::new(config.supervisor, sink, runtime);
        let session = Self { supervisor, mirror };
        if config.auto_run {
            debug!("Auto-run enabled, executing on creation");
            session.execute();
        }
        session
    }

    /// Dispatches one inbound command.
    pub fn handle(&self, command: Command) {
        debug!(command = command.name(), "Handling command");
        match command {
            Command::Execute => {
                self.execute();
            }
            Command::Input { data } => self.send_input(&data),
            Command::Terminate => self.terminate(),
            Command::Kill => self.kill(),
        }
    }

    /// Decodes and dispatches one JSON message.
    ///
    /// Unknown types and malformed payloads are returned as errors and leave
    /// the session untouched.
    pub fn handle_message(&self, raw: &str) -> Result<()> {
        let command = Command::decode(raw)?;
        self.handle(command);
        Ok(())
    }

    /// Runs the mirrored command. Returns false while one is already active.
    pub fn execute(&self) -> bool {
        let MirroredState {
            command,
            working_directory,
            ..
        } = self.mirror.snapshot();
        self.supervisor.execute(&command, &working_directory)
    }

    pub fn send_input(&self, text: &str) {
        self.supervisor.send_input(text);
    }

    pub fn terminate(&self) {
        self.supervisor.terminate();
    }

    pub fn kill(&self) {
        self.supervisor.kill();
    }

    pub fn state(&self) -> SessionState {
        self.supervisor.state()
    }

    pub fn process(&self) -> Option<ProcessHandle> {
        self.supervisor.process()
    }

    pub fn mirror(&self) -> &StateMirror {
        &self.mirror
    }

    pub fn set_command(&self, command: impl Into<String>) {
        self.mirror.set_command(command);
    }

    pub fn set_working_directory(&self, dir: impl AsRef<Path>) {
        self.mirror.set_working_directory(dir.as_ref());
    }

    pub fn set_theme(&self, theme: Theme) {
        self.mirror.set_theme(theme);
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.supervisor.subscribe_state()
    }

    /// Resolves once no execution is active.
    pub async fn wait_until_finished(&self) {
        let mut state = self.supervisor.subscribe_state();
        // The sender lives in the supervisor we hold, so the channel stays open.
        let _ = state.wait_for(|s| !s.is_active()).await;
    }
}
