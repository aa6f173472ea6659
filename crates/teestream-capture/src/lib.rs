//! Output channel capture, duplication and merging.
//!
//! A [`TeeStream`] redirects the process's stdout and/or stderr into pipes,
//! drains them on background threads and copies every decoded chunk to a set
//! of [`Destination`]s. When both channels are captured and the platform can
//! count pending pipe bytes, a single merge coordinator reads both pipes so
//! that destinations see one chronologically ordered feed.

mod decoder;
mod destination;
mod diagnostics;
mod error;
mod fanout;
#[cfg(unix)]
mod handle;
#[cfg(unix)]
mod merge;
#[cfg(unix)]
mod platform;
#[cfg(unix)]
mod reader;
#[cfg(unix)]
mod session;
mod stats;

pub use decoder::{DecoderBuffer, Payload};
pub use destination::{
    shared_destination, Destination, FileDestination, SharedBuffer, SharedDestination,
    WriterDestination,
};
#[cfg(unix)]
pub use destination::OriginalStream;
pub use diagnostics::{render as render_diagnostics, DiagnosticLog};
pub use error::CaptureError;
pub use fanout::Fanout;
#[cfg(unix)]
pub use handle::ChannelHandle;
#[cfg(unix)]
pub use platform::peek_supported;
#[cfg(unix)]
pub use session::{TeardownReport, TeeStream, TeeStreamBuilder};
pub use stats::StreamStats;

pub use teestream_types::{
    Channel, Diagnostic, DiagnosticKind, MergeMode, NewlineMode, SessionState, StreamStatistics,
    TeeConfig, TextEncoding,
};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Largest single read from a channel pipe.
pub const READ_CHUNK_SIZE: usize = 8192;
