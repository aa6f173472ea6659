//! Recoverable conditions reported during capture and teardown.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::quote::{quote_bytes, quote_text};

/// Severity a diagnostic is logged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Kind of recoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A partial line was still buffered when the handle closed.
    PartialLine,

    /// A truncated multi-byte sequence was still undecoded when the handle closed.
    UndecodedBytes,

    /// A destination refused part of the output.
    DestinationClosed,
}

/// A recoverable condition with its exact message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// What happened.
    pub kind: DiagnosticKind,

    /// Channel the content came from, if known.
    pub channel: Option<Channel>,

    /// Logged severity.
    pub severity: Severity,

    /// Message text.
    pub message: String,
}

impl Diagnostic {
    /// Buffered residue: a partial line that no destination received.
    pub fn partial_line(channel: Option<Channel>, line: &str) -> Self {
        Self {
            kind: DiagnosticKind::PartialLine,
            channel,
            severity: Severity::Error,
            message: format!(
                "Stream handle closed with a partial line in the output buffer \
                 that was not emitted to the output stream(s):\n\t{}",
                quote_text(line)
            ),
        }
    }

    /// Decode residue: bytes of an incomplete character.
    pub fn undecoded_bytes(channel: Option<Channel>, bytes: &[u8]) -> Self {
        Self {
            kind: DiagnosticKind::UndecodedBytes,
            channel,
            severity: Severity::Error,
            message: format!(
                "Stream handle closed with un-decoded characters in the decoder \
                 buffer that was not emitted to the output stream(s):\n\t{}",
                quote_bytes(bytes)
            ),
        }
    }

    /// Destination failure; `remainder` is the already-quoted undelivered content.
    pub fn destination_closed(channel: Option<Channel>, remainder: &str) -> Self {
        Self {
            kind: DiagnosticKind::DestinationClosed,
            channel,
            severity: Severity::Error,
            message: format!(
                "Output stream closed before all output was written to it. \
                 The following was left in the output buffer:\n\t{remainder}"
            ),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
