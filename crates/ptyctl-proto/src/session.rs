//! Session-level enums shared between the supervisor and the display surface.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Display theme mirrored to the surface. Has no effect on supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Dark => write!(f, "dark"),
            Theme::Light => write!(f, "light"),
        }
    }
}

impl FromStr for Theme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            other => Err(Error::Config(format!(
                "unknown theme '{other}' (expected dark or light)"
            ))),
        }
    }
}

/// Lifecycle of a supervised session.
///
/// ```text
/// Idle -> Running -> (Terminating) -> Finished
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, command not yet executed.
    #[default]
    Idle,
    /// Child spawned and being supervised.
    Running,
    /// SIGTERM delivered, waiting for the exit status.
    Terminating,
    /// Terminal event emitted and descriptors released.
    Finished,
}

impl SessionState {
    /// Whether a child may currently be alive.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Running | SessionState::Terminating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theme_parse_is_case_insensitive() {
        assert_eq!("Light".parse::<Theme>().unwrap(), Theme::Light);
        assert_eq!(" dark ".parse::<Theme>().unwrap(), Theme::Dark);
        assert!("solarized".parse::<Theme>().is_err());
    }

    #[test]
    fn test_theme_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Theme::Light).unwrap(), "\"light\"");
        let t: Theme = serde_json::from_str("\"dark\"").unwrap();
        assert_eq!(t, Theme::Dark);
    }

    #[test]
    fn test_active_states() {
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Running.is_active());
        assert!(SessionState::Terminating.is_active());
        assert!(!SessionState::Finished.is_active());
    }
}
