//! # ptyctl-core
//!
//! Runs shell commands on a pseudo-terminal and reports their lifecycle as
//! [`Event`](ptyctl_proto::Event)s.
//!
//! Layers, bottom-up:
//! - [`pty`]: ownership of the master/slave pair
//! - [`output`]: drains the master into `output` events, readiness-driven or
//!   on a blocking worker thread
//! - [`signal`]: SIGTERM/SIGKILL delivery to the child's process group
//! - [`supervisor`]: one execution at a time, with exactly one terminal event
//! - [`session`]: the command protocol and mirrored display state

pub mod activity;
pub mod config;
pub mod output;
pub mod pty;
pub mod session;
pub mod signal;
pub mod supervisor;

pub use activity::ActivityClock;
pub use config::{PumpStrategy, SessionConfig, SupervisorConfig};
pub use output::{BlockingSource, OutputPump, OutputSource, PumpReport, Utf8Decoder, select_source};
#[cfg(unix)]
pub use output::ReadinessSource;
pub use pty::PtyChannel;
pub use session::{MirroredState, Session, StateMirror};
pub use signal::{GroupSignal, signal_group};
pub use supervisor::{ProcessHandle, ProcessSupervisor};
