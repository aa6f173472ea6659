//! Capture the process's stdout into buffers, files or the original terminal.
//!
//! [`CaptureOutput`] wraps a stdout-only [`TeeStream`](teestream_capture::TeeStream)
//! with explicit setup/teardown and a scoped guard.

#[cfg(unix)]
mod capture;
mod error;

#[cfg(unix)]
pub use capture::{CaptureGuard, CaptureOutput, CaptureTarget, CaptureView};
pub use error::OutputError;

/// Result type for output capture operations.
pub type OutputResult<T> = Result<T, OutputError>;
