//! Error types for the capture module.

use std::io;

use teestream_types::Channel;
use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Operating system call failed.
    #[error("OS error while {context}: {source}")]
    Os {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// Channel was not requested when the session was built.
    #[error("Channel {0} was not requested for this session")]
    UnknownChannel(Channel),

    /// Session has not been acquired.
    #[error("Stream capture not acquired")]
    NotAcquired,

    /// Session is already capturing.
    #[error("Stream capture already acquired")]
    AlreadyAcquired,

    /// Session was released and cannot be reopened.
    #[error("Stream capture was released and cannot be reopened")]
    Released,

    /// Write to a handle whose session has closed.
    #[error("Write to a closed stream handle")]
    ClosedHandle,

    /// Another live session already redirects this channel.
    #[error("Channel {0} is already redirected by another session")]
    ChannelBusy(Channel),
}

impl CaptureError {
    pub(crate) fn os(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Os { context, source }
    }
}
