//! Logical output channels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the process's two conventional output channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Normal output (stdout).
    Out,

    /// Diagnostic output (stderr).
    Err,
}

impl Channel {
    /// Both channels, in the order sessions request them by default.
    pub const ALL: [Channel; 2] = [Channel::Out, Channel::Err];

    /// The buffering discipline readers apply to this channel.
    pub fn buffering(self) -> Buffering {
        match self {
            Self::Out => Buffering::Line,
            Self::Err => Buffering::Unbuffered,
        }
    }

    /// Conventional stream name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Out => "stdout",
            Self::Err => "stderr",
        }
    }

    /// Index into per-channel arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Out => 0,
            Self::Err => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How decoded text is released to destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Buffering {
    /// Only complete lines are forwarded; a trailing partial line is held.
    Line,

    /// Everything decoded is forwarded immediately.
    Unbuffered,
}
