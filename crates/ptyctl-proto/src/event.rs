//! Outbound events delivered to the display surface.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An event emitted by the supervisor, in causal order.
///
/// `Started` precedes every `Output` of an execution, and each execution ends
/// with exactly one terminal event (see [`Event::is_terminal`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Child spawned; `pgid` equals `pid` because the child leads a new group.
    Started { pid: u32, pgid: u32 },
    /// Decoded PTY bytes.
    Output { data: String },
    /// A line was written to the child's stdin.
    InputSent { data: String },
    /// Child exited on its own with this code.
    Completed { returncode: i32 },
    /// Child ended after a SIGTERM was delivered to its group.
    Terminated,
    /// Child ended after a SIGKILL was delivered to its group.
    Killed,
    /// Terminate or kill requested with no active child.
    NotRunning,
    /// Failure during spawn, read, wait, or signal delivery.
    Error { error: String },
}

impl Event {
    /// Builds an `Error` event from anything displayable.
    pub fn error(err: impl fmt::Display) -> Self {
        Event::Error {
            error: err.to_string(),
        }
    }

    /// Returns true for events that end an execution's event sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::Completed { .. }
                | Event::Terminated
                | Event::Killed
                | Event::NotRunning
                | Event::Error { .. }
        )
    }

    /// Encodes the event as a single-line JSON object.
    pub fn encode(&self) -> String {
        // Serializing a plain enum of strings and integers cannot fail.
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","error":"event encoding failed: {e}"}}"#)
        })
    }
}
