//! Error types for the output capture helper.

use std::io;
use std::path::PathBuf;

use teestream_capture::CaptureError;
use thiserror::Error;

/// Errors that can occur while capturing output.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Setup called again before teardown.
    #[error("Duplicate call to capture_output.setup")]
    DuplicateSetup,

    /// A file target could not be opened.
    #[error("Failed to open capture target {}: {source}", path.display())]
    OpenTarget {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The underlying capture session failed.
    #[error(transparent)]
    Capture(#[from] CaptureError),
}
