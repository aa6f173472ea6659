//! Session configuration.

use std::borrow::Cow;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_POLL_INTERVAL_MS;

/// Character set used to decode bytes read from a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    /// UTF-8.
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,

    /// ISO-8859-1. Every byte is one character.
    #[serde(rename = "latin-1", alias = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl TextEncoding {
    /// Parse an encoding label such as `utf-8` or `ISO-8859-1`.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "utf8" => Some(Self::Utf8),
            "latin1" | "iso88591" | "l1" | "cp819" => Some(Self::Latin1),
            _ => None,
        }
    }

    /// The encoding named by the process locale, falling back to UTF-8.
    pub fn platform_default() -> Self {
        ["LC_ALL", "LC_CTYPE", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.is_empty())
            .and_then(|locale| Self::from_locale(&locale))
            .unwrap_or(Self::Utf8)
    }

    /// Extract the codeset from a locale string (`en_US.ISO-8859-1@euro`).
    pub fn from_locale(locale: &str) -> Option<Self> {
        let codeset = locale.split_once('.')?.1;
        let codeset = codeset.split('@').next().unwrap_or(codeset);
        Self::from_label(codeset)
    }

    /// Longest byte sequence that encodes a single character.
    pub fn max_sequence_len(self) -> usize {
        match self {
            Self::Utf8 => 4,
            Self::Latin1 => 1,
        }
    }

    /// Canonical label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Latin1 => "latin-1",
        }
    }

    /// Encode text for writing into a channel.
    ///
    /// Latin-1 cannot represent characters above U+00FF; those are written as `?`.
    pub fn encode(self, text: &str) -> Cow<'_, [u8]> {
        match self {
            Self::Utf8 => Cow::Borrowed(text.as_bytes()),
            Self::Latin1 if text.is_ascii() => Cow::Borrowed(text.as_bytes()),
            Self::Latin1 => Cow::Owned(
                text.chars()
                    .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                    .collect(),
            ),
        }
    }
}

/// Line ending handling applied while decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewlineMode {
    /// `\r\n` and lone `\r` are delivered as `\n`.
    Universal,

    /// Line endings are delivered untouched; only `\n` ends a line.
    #[default]
    Preserve,
}

/// Whether the OUT and ERR channels are read by a single merge coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Merge when both channels are requested and the platform can report
    /// pending pipe bytes.
    #[default]
    Auto,

    /// Always use one independent reader per channel.
    Disabled,
}

/// Configuration for a capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeeConfig {
    /// Decode charset (None uses the platform default).
    pub encoding: Option<TextEncoding>,

    /// Forward raw bytes without decoding.
    pub binary: bool,

    /// Line ending translation.
    pub newline: NewlineMode,

    /// Merge coordinator selection.
    pub merge: MergeMode,

    /// Merge coordinator poll interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Redirect the process's real output channels into the session.
    pub redirect_process: bool,
}

impl TeeConfig {
    /// The encoding readers decode with, or None for binary sessions.
    pub fn resolved_encoding(&self) -> Option<TextEncoding> {
        if self.binary {
            None
        } else {
            Some(self.encoding.unwrap_or_else(TextEncoding::platform_default))
        }
    }

    /// Poll interval as a duration (never zero).
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            encoding: None,
            binary: false,
            newline: NewlineMode::Preserve,
            merge: MergeMode::Auto,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            redirect_process: true,
        }
    }
}
