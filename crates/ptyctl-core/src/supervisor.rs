//! Process supervisor: spawns the command on a PTY and drives its lifecycle.
//!
//! Each execution runs as one task on the injected runtime handle:
//! - open a [`PtyChannel`], spawn the shell on its slave, emit `started`
//! - run the [`OutputPump`] concurrently with the exit watcher
//! - after the child has exited and the pump has drained, emit exactly one
//!   terminal event and release the PTY
//!
//! Commands (`send_input`, `terminate`, `kill`) act immediately from the
//! caller's thread. They share one lock with the execution task, which
//! serializes input writes against teardown and keeps `input_sent` ahead of
//! the terminal event.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use portable_pty::{Child, ChildKiller, CommandBuilder, ExitStatus};
use ptyctl_proto::{Error, Event, EventSink, Result, SessionState};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::ActivityClock;
use crate::config::SupervisorConfig;
use crate::output::{OutputPump, OutputSource, select_source};
use crate::pty::PtyChannel;
use crate::signal::{GroupSignal, signal_group};

/// Interval between exit-status polls.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Identifiers of the supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    /// Equal to `pid`: the child leads its own session and group.
    pub pgid: u32,
}

/// How an execution ended when it did not simply exit on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Terminated,
    Killed,
    Failed(String),
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    channel: Option<PtyChannel>,
    process: Option<ProcessHandle>,
    /// Exit status collected; signals would target a reaped group.
    exited: bool,
    /// Signal requested while the child was still being spawned.
    pending_signal: Option<GroupSignal>,
    outcome: Option<Outcome>,
    executions: u64,
}

impl Inner {
    /// Records a delivered signal. A kill is never downgraded to a terminate.
    fn record_signal(&mut self, signal: GroupSignal) {
        let outcome = match signal {
            GroupSignal::Terminate if self.outcome == Some(Outcome::Killed) => return,
            GroupSignal::Terminate => Outcome::Terminated,
            GroupSignal::Kill => Outcome::Killed,
        };
        self.outcome = Some(outcome);
    }

    /// Closes the PTY and clears process handles. Idempotent.
    fn teardown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.process = None;
        self.exited = false;
        self.pending_signal = None;
    }
}

/// What an execution runs.
#[derive(Debug, Clone)]
struct LaunchRequest {
    command: String,
    working_directory: PathBuf,
}

/// Progress of the idle-timeout escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleStage {
    Watching,
    Terminating { kill_at: Instant },
    Killed,
}

/// Supervises one command at a time on a pseudo-terminal.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    sink: Arc<dyn EventSink>,
    runtime: Handle,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
    activity: Arc<ActivityClock>,
}

impl ProcessSupervisor {
    /// Creates an idle supervisor. Executions are spawned on `runtime`.
    pub fn new(config: SupervisorConfig, sink: Arc<dyn EventSink>, runtime: Handle) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Arc::new(Self {
            config,
            sink,
            runtime,
            inner: Mutex::new(Inner::default()),
            state_tx,
            activity: Arc::new(ActivityClock::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        if inner.state != state {
            debug!(from = ?inner.state, to = ?state, "Session state change");
            inner.state = state;
            self.state_tx.send_replace(state);
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// The running child, if any.
    pub fn process(&self) -> Option<ProcessHandle> {
        self.lock().process
    }

    /// Number of executions started so far.
    pub fn executions(&self) -> u64 {
        self.lock().executions
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Starts `command` in `working_directory`.
    ///
    /// Only meaningful from `Idle` or `Finished`; while an execution is active
    /// the call is ignored. Returns whether a new execution was started.
    pub fn execute(self: &Arc<Self>, command: &str, working_directory: &Path) -> bool {
        {
            let mut inner = self.lock();
            if inner.state.is_active() {
                debug!(state = ?inner.state, "Execute ignored: command already running");
                return false;
            }
            inner.outcome = None;
            inner.executions += 1;
            self.set_state(&mut inner, SessionState::Running);
        }
        self.activity.touch();

        let request = LaunchRequest {
            command: command.to_string(),
            working_directory: working_directory.to_path_buf(),
        };
        let this = Arc::clone(self);
        self.runtime.spawn(async move { this.supervise(request).await });
        true
    }

    /// Writes `text` plus a newline to the child's stdin.
    ///
    /// Input outside `Running` is dropped without an event.
    pub fn send_input(&self, text: &str) {
        let mut inner = self.lock();
        if inner.state != SessionState::Running || inner.exited {
            debug!(state = ?inner.state, "Dropping input: no running command");
            return;
        }
        let Some(channel) = inner.channel.as_mut() else {
            debug!("Dropping input: command still starting");
            return;
        };

        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');
        match channel.write(&line) {
            Ok(()) => {
                self.activity.touch();
                self.sink.emit(Event::InputSent {
                    data: text.to_string(),
                });
            }
            Err(e) => warn!(error = %e, "Failed to write input to PTY"),
        }
    }

    /// Sends SIGTERM to the child's process group.
    pub fn terminate(&self) {
        self.signal(GroupSignal::Terminate);
    }

    /// Sends SIGKILL to the child's process group.
    pub fn kill(&self) {
        self.signal(GroupSignal::Kill);
    }

    /// Delivers `signal` to the running group, or answers `not_running`.
    ///
    /// The outcome (or the delivery failure) becomes the execution's terminal
    /// event once its output has drained.
    pub fn signal(&self, signal: GroupSignal) {
        let mut inner = self.lock();
        if !inner.state.is_active() || inner.exited {
            debug!(?signal, "No running command to signal");
            self.sink.emit(Event::NotRunning);
            return;
        }

        let Some(process) = inner.process else {
            debug!(?signal, "Command still starting, deferring signal");
            inner.pending_signal = match (inner.pending_signal, signal) {
                (Some(GroupSignal::Kill), _) => Some(GroupSignal::Kill),
                _ => Some(signal),
            };
            if signal == GroupSignal::Terminate {
                self.set_state(&mut inner, SessionState::Terminating);
            }
            return;
        };

        self.deliver(&mut inner, process, signal);
    }

    fn deliver(&self, inner: &mut Inner, process: ProcessHandle, signal: GroupSignal) {
        match signal_group(process.pgid, signal) {
            Ok(()) => {
                info!(pgid = process.pgid, ?signal, "Signal delivered to process group");
                inner.record_signal(signal);
                if signal == GroupSignal::Terminate && inner.state == SessionState::Running {
                    self.set_state(inner, SessionState::Terminating);
                }
            }
            Err(e) => {
                warn!(pgid = process.pgid, error = %e, "Signal delivery failed");
                if inner.outcome.is_none() {
                    inner.outcome = Some(Outcome::Failed(e.to_string()));
                }
            }
        }
    }

    /// Runs one execution; teardown and the terminal event happen exactly
    /// once, on every exit path including cancellation.
    async fn supervise(self: Arc<Self>, request: LaunchRequest) {
        let mut terminal = scopeguard::guard(None::<Event>, |terminal| {
            self.finish(terminal.unwrap_or_else(|| Event::error("supervision aborted")));
        });
        let event = self.drive(&request).await;
        *terminal = Some(event);
    }

    async fn drive(&self, request: &LaunchRequest) -> Event {
        let (mut child, source) = match self.launch(request) {
            Ok(launched) => launched,
            Err(e) => {
                warn!(command = %request.command, error = %e, "Failed to start command");
                return Event::error(e);
            }
        };

        let cancel = CancellationToken::new();
        // Stops the pump on any early return or abort of this task.
        let _stop_pump = cancel.clone().drop_guard();
        let pump = OutputPump::new(source, Arc::clone(&self.sink), Arc::clone(&self.activity));
        let mut pump_task = self.runtime.spawn(pump.run(cancel.clone()));

        let exit = self.wait_for_exit(&mut child).await;

        // The pump normally reaches EOF as soon as the child's side closes.
        // A grandchild holding the slave open must not keep us here forever.
        let pumped = match tokio::time::timeout(self.config.drain_timeout(), &mut pump_task).await {
            Ok(joined) => joined,
            Err(_) => {
                debug!("Output still open after child exit, cancelling pump");
                cancel.cancel();
                pump_task.await
            }
        };

        let status = match exit {
            Ok(status) => status,
            Err(e) => return Event::error(e),
        };
        match pumped {
            Ok(Ok(report)) => debug!(?report, "Output drained"),
            Ok(Err(e)) => return Event::error(e),
            Err(e) => return Event::error(format!("output pump failed: {e}")),
        }

        match self.lock().outcome.take() {
            Some(Outcome::Terminated) => Event::Terminated,
            Some(Outcome::Killed) => Event::Killed,
            Some(Outcome::Failed(error)) => Event::Error { error },
            None => Event::Completed {
                returncode: status.exit_code() as i32,
            },
        }
    }

    /// Opens the PTY, spawns the child, and announces it.
    fn launch(
        &self,
        request: &LaunchRequest,
    ) -> Result<(Box<dyn Child + Send + Sync>, Box<dyn OutputSource>)> {
        if !request.working_directory.is_dir() {
            return Err(Error::SpawnFailure(format!(
                "working directory not found: {}",
                request.working_directory.display()
            )));
        }

        let mut channel = PtyChannel::open(self.config.cols, self.config.rows)?;
        let mut child = channel.spawn(self.build_command(request))?;

        let source = child
            .process_id()
            .ok_or_else(|| Error::SpawnFailure("child has no process id".to_string()))
            .and_then(|pid| {
                select_source(self.config.strategy, &mut channel, self.config.read_chunk_size)
                    .map(|source| (pid, source))
            });
        let (pid, source) = match source {
            Ok(ok) => ok,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        let process = ProcessHandle { pid, pgid: pid };
        let mut inner = self.lock();
        inner.channel = Some(channel);
        inner.process = Some(process);
        info!(pid, command = %request.command, strategy = ?source.strategy(), "Spawned command on PTY");

        // Emitted under the lock so no input_sent can precede them.
        self.sink.emit(Event::Started {
            pid: process.pid,
            pgid: process.pgid,
        });
        self.sink.emit(Event::Output {
            data: format!("$ {}\n", request.command),
        });

        if let Some(signal) = inner.pending_signal.take() {
            self.deliver(&mut inner, process, signal);
        }
        Ok((child, source))
    }

    fn build_command(&self, request: &LaunchRequest) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.config.shell);
        cmd.args(&self.config.shell_args);
        cmd.arg(&request.command);
        cmd.cwd(&request.working_directory);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        cmd
    }

    /// Polls for the child's exit status, enforcing the idle timeout.
    async fn wait_for_exit(&self, child: &mut Box<dyn Child + Send + Sync>) -> Result<ExitStatus> {
        let idle_limit = self.config.idle_timeout();
        let mut idle = IdleStage::Watching;

        loop {
            if let Some(status) = child.try_wait()? {
                debug!(code = status.exit_code(), "Child exited");
                self.lock().exited = true;
                return Ok(status);
            }

            match idle {
                IdleStage::Watching => {
                    if let Some(limit) = idle_limit
                        && self.activity.idle_for() >= limit
                    {
                        self.expire_idle(limit);
                        idle = IdleStage::Terminating {
                            kill_at: Instant::now() + self.config.kill_grace(),
                        };
                    }
                }
                IdleStage::Terminating { kill_at } if Instant::now() >= kill_at => {
                    debug!("Grace period expired, sending SIGKILL");
                    self.escalate(GroupSignal::Kill);
                    idle = IdleStage::Killed;
                }
                IdleStage::Terminating { .. } | IdleStage::Killed => {}
            }

            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    fn expire_idle(&self, limit: Duration) {
        warn!(idle_secs = limit.as_secs(), "Idle timeout reached, terminating command");
        {
            let mut inner = self.lock();
            if !matches!(inner.outcome, Some(Outcome::Killed | Outcome::Terminated)) {
                inner.outcome = Some(Outcome::Failed(
                    Error::IdleTimeout(limit.as_secs()).to_string(),
                ));
            }
            self.set_state(&mut inner, SessionState::Terminating);
        }
        self.escalate(GroupSignal::Terminate);
    }

    /// Signals the group without touching the recorded outcome.
    fn escalate(&self, signal: GroupSignal) {
        let Some(process) = self.lock().process else {
            return;
        };
        if let Err(e) = signal_group(process.pgid, signal) {
            debug!(error = %e, "Idle escalation signal not delivered");
        }
    }

    /// Tears down and emits the terminal event.
    fn finish(&self, terminal: Event) {
        let mut inner = self.lock();
        inner.teardown();
        inner.outcome = None;
        info!(event = ?terminal, "Execution finished");
        self.sink.emit(terminal);
        self.set_state(&mut inner, SessionState::Finished);
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ProcessSupervisor")
            .field("state", &inner.state)
            .field("process", &inner.process)
            .field("executions", &inner.executions)
            .finish_non_exhaustive()
    }
}
