//! Error types for ptyctl.

use std::fmt;

use thiserror::Error;

/// Which group signal a failed delivery belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Terminate,
    Kill,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Terminate => write!(f, "Terminate"),
            SignalAction::Kill => write!(f, "Kill"),
        }
    }
}

/// Errors that can occur while supervising a PTY session.
#[derive(Debug, Error)]
pub enum Error {
    /// The platform cannot provide a pseudo-terminal.
    #[error("pseudo-terminal unavailable: {0}")]
    PtyUnavailable(String),

    /// The shell or its working directory could not be launched.
    #[error("failed to spawn command: {0}")]
    SpawnFailure(String),

    /// Reading or writing the PTY master failed.
    #[error("pty descriptor I/O failed: {0}")]
    DescriptorIo(String),

    /// Delivering a signal to the process group failed.
    #[error("{action} failed: {reason}")]
    SignalDelivery { action: SignalAction, reason: String },

    /// A message carried a `type` this version does not understand.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A message was not a valid command object.
    #[error("malformed command: {0}")]
    MalformedCommand(#[from] serde_json::Error),

    /// No output or input arrived within the configured idle window.
    #[error("idle timeout: no activity for {0}s")]
    IdleTimeout(u64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
