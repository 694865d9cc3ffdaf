//! # ptyctl-proto
//!
//! Shared types, error definitions, and traits for ptyctl.
//!
//! This crate provides the foundational abstractions used across all ptyctl crates,
//! including:
//! - The inbound [`Command`] and outbound [`Event`] wire types
//! - Session-level enums ([`Theme`], [`SessionState`])
//! - The common [`Error`] type
//! - The [`EventSink`] trait that carries events to the remote display surface

mod command;
mod error;
mod event;
mod session;
mod sink;

pub use command::Command;
pub use error::{Error, Result, SignalAction};
pub use event::Event;
pub use session::{SessionState, Theme};
pub use sink::EventSink;
