//! Shared types for the teestream output duplication engine.
//!
//! This crate defines the vocabulary used by the capture engine, the
//! capture-to-target helper and the command-line front end: logical
//! channels, session configuration, lifecycle state, diagnostics and
//! statistics.

mod channel;
mod config;
mod diagnostic;
mod quote;
mod state;
mod stats;

pub use channel::{Buffering, Channel};
pub use config::{MergeMode, NewlineMode, TeeConfig, TextEncoding};
pub use diagnostic::{Diagnostic, DiagnosticKind, Severity};
pub use quote::{quote_bytes, quote_text};
pub use state::SessionState;
pub use stats::{ChannelStatistics, StreamStatistics};

/// Default merge-coordinator poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
