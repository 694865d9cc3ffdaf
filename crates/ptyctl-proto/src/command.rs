//! Inbound commands sent by the display surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Tags this version of the protocol understands.
const KNOWN_TYPES: [&str; 4] = ["execute", "input", "terminate", "kill"];

/// A command received from the remote caller.
///
/// Encoded as a JSON object tagged by `type`, e.g. `{"type":"input","data":"y"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Start the configured command.
    Execute,
    /// Write a line to the child's stdin.
    Input {
        #[serde(default)]
        data: String,
    },
    /// Send SIGTERM to the child's process group.
    Terminate,
    /// Send SIGKILL to the child's process group.
    Kill,
}

impl Command {
    /// Decodes a single JSON message.
    ///
    /// A well-formed object whose `type` is not recognised yields
    /// [`Error::UnknownCommand`] rather than a generic parse error, so newer
    /// callers can be told apart from broken ones.
    pub fn decode(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    /// Decodes an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !KNOWN_TYPES.contains(&tag.as_str()) {
            return Err(Error::UnknownCommand(tag));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The wire tag of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Execute => "execute",
            Command::Input { .. } => "input",
            Command::Terminate => "terminate",
            Command::Kill => "kill",
        }
    }
}
