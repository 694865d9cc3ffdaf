//! Session and supervisor configuration.
//!
//! [`SupervisorConfig`] holds runtime knobs that can live in a `ptyctl.yml`
//! file; [`SessionConfig`] adds the per-session fields the display surface
//! supplies (command, working directory, theme, auto-run).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ptyctl_proto::{Error, Result, Theme};
use serde::{Deserialize, Serialize};

/// How the output pump waits for PTY data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpStrategy {
    /// Readiness notifications, falling back to a blocking worker when the
    /// descriptor cannot be registered.
    #[default]
    Auto,
    /// Readiness notifications only.
    Readiness,
    /// Blocking reads on a dedicated worker thread.
    Blocking,
}

/// Runtime settings shared by every session of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Shell used to run the command.
    pub shell: PathBuf,
    /// Arguments placed before the command text.
    pub shell_args: Vec<String>,
    /// Output pump strategy.
    pub strategy: PumpStrategy,
    /// Maximum bytes per PTY read.
    pub read_chunk_size: usize,
    /// Terminal width.
    pub cols: u16,
    /// Terminal height.
    pub rows: u16,
    /// Idle timeout in seconds (0 = disabled).
    pub idle_timeout_secs: u64,
    /// Seconds between SIGTERM and SIGKILL when the idle timeout fires.
    pub kill_grace_secs: u64,
    /// How long the pump may keep draining after the child has exited.
    pub drain_timeout_ms: u64,
    /// Extra environment for the child.
    pub env: BTreeMap<String, String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/bash"),
            shell_args: vec!["-c".to_string()],
            strategy: PumpStrategy::Auto,
            read_chunk_size: 1024,
            cols: 80,
            rows: 24,
            idle_timeout_secs: 0,
            kill_grace_secs: 2,
            drain_timeout_ms: 2000,
            env: BTreeMap::new(),
        }
    }
}

impl SupervisorConfig {
    /// Creates config from environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies `COLUMNS`/`LINES` on top of the current values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(cols) = std::env::var("COLUMNS").ok().and_then(|s| s.parse().ok()) {
            self.cols = cols;
        }
        if let Some(rows) = std::env::var("LINES").ok().and_then(|s| s.parse().ok()) {
            self.rows = rows;
        }
        self
    }

    /// Loads a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parses and validates YAML content.
    pub fn parse_yaml(content: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the supervisor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.read_chunk_size == 0 {
            return Err(Error::Config("read_chunk_size must be positive".into()));
        }
        if self.cols == 0 || self.rows == 0 {
            return Err(Error::Config("cols and rows must be positive".into()));
        }
        if self.shell.as_os_str().is_empty() {
            return Err(Error::Config("shell must not be empty".into()));
        }
        Ok(())
    }

    /// Idle timeout, if enabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Everything needed to create a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Command text passed to the shell.
    pub command: String,
    /// Directory the command runs in.
    pub working_directory: PathBuf,
    /// Display theme (mirrored only).
    pub theme: Theme,
    /// Execute immediately on creation.
    pub auto_run: bool,
    pub supervisor: SupervisorConfig,
}

impl SessionConfig {
    /// Creates a session config for `command` in the current directory.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_directory: PathBuf::from("."),
            theme: Theme::default(),
            auto_run: false,
            supervisor: SupervisorConfig::default(),
        }
    }

    /// Sets the working directory.
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = dir.into();
        self
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    pub fn with_auto_run(mut self, auto_run: bool) -> Self {
        self.auto_run = auto_run;
        self
    }

    pub fn with_supervisor(mut self, supervisor: SupervisorConfig) -> Self {
        self.supervisor = supervisor;
        self
    }
}
