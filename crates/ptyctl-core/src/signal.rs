//! Process-group signalling.
//!
//! This is the platform boundary for group-wide termination. On Unix the
//! child is a session leader, so its pid doubles as its process group id and
//! `killpg` reaches every descendant that stayed in the group. Other platforms
//! need a different group-tracking mechanism and report the operation as
//! unsupported.

use ptyctl_proto::{Error, Result, SignalAction};
#[cfg(unix)]
use tracing::debug;

/// Signals the supervisor sends to a child's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    /// SIGTERM: ask the group to exit.
    Terminate,
    /// SIGKILL: end the group unconditionally.
    Kill,
}

impl GroupSignal {
    /// The command this signal serves, for error reporting.
    pub fn action(self) -> SignalAction {
        match self {
            GroupSignal::Terminate => SignalAction::Terminate,
            GroupSignal::Kill => SignalAction::Kill,
        }
    }

    #[cfg(unix)]
    fn as_nix(self) -> nix::sys::signal::Signal {
        match self {
            GroupSignal::Terminate => nix::sys::signal::Signal::SIGTERM,
            GroupSignal::Kill => nix::sys::signal::Signal::SIGKILL,
        }
    }
}

/// Delivers `signal` to every process in group `pgid`.
#[cfg(unix)]
pub fn signal_group(pgid: u32, signal: GroupSignal) -> Result<()> {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pgid as i32);
    debug!(pgid = %pid, signal = ?signal.as_nix(), "Signalling process group");
    killpg(pid, signal.as_nix()).map_err(|e| Error::SignalDelivery {
        action: signal.action(),
        reason: e.desc().to_string(),
    })
}

#[cfg(not(unix))]
pub fn signal_group(_pgid: u32, signal: GroupSignal) -> Result<()> {
    Err(Error::SignalDelivery {
        action: signal.action(),
        reason: "process groups are not supported on this platform".to_string(),
    })
}
