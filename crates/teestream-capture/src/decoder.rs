//! Per-channel decoding and line buffering.
//!
//! Reads from a pipe end at arbitrary byte boundaries, so a read can stop in
//! the middle of a multi-byte character or in the middle of a line. The
//! [`DecoderBuffer`] carries both kinds of remainder between reads.

use bytes::{Bytes, BytesMut};
use teestream_types::{quote_bytes, quote_text, Buffering, NewlineMode, TextEncoding};

/// A chunk of output ready for destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Decoded text.
    Text(String),

    /// Raw bytes from a binary session.
    Binary(Bytes),
}

impl Payload {
    /// Bytes handed to destinations (text is delivered as UTF-8).
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Quoted literal of everything after the first `offset` bytes.
    pub fn quote_from(&self, offset: usize) -> String {
        match self {
            Self::Text(text) => match text.get(offset..) {
                Some(rest) => quote_text(rest),
                None => quote_text(&String::from_utf8_lossy(&text.as_bytes()[offset..])),
            },
            Self::Binary(bytes) => quote_bytes(&bytes[offset..]),
        }
    }
}

/// Carry-over state between reads of one channel.
#[derive(Debug)]
pub struct DecoderBuffer {
    encoding: Option<TextEncoding>,
    newline: NewlineMode,
    pending_bytes: Vec<u8>,
    pending_line: String,
    pending_binary: BytesMut,
    skip_lf: bool,
}

impl DecoderBuffer {
    /// Create a decoder; `None` selects binary pass-through.
    pub fn new(encoding: Option<TextEncoding>, newline: NewlineMode) -> Self {
        Self {
            encoding,
            newline,
            pending_bytes: Vec::new(),
            pending_line: String::new(),
            pending_binary: BytesMut::new(),
            skip_lf: false,
        }
    }

    /// Undecoded bytes of a truncated trailing character.
    pub fn pending_bytes(&self) -> &[u8] {
        &self.pending_bytes
    }

    /// Decoded text not yet released.
    pub fn pending_line(&self) -> &str {
        &self.pending_line
    }

    /// Returns true if decoded text is waiting for a line terminator.
    pub fn has_partial_line(&self) -> bool {
        !self.pending_line.is_empty()
    }

    /// Append freshly read bytes, decoding as much as possible.
    pub fn feed(&mut self, data: &[u8]) {
        match self.encoding {
            None => self.pending_binary.extend_from_slice(data),
            Some(TextEncoding::Latin1) => {
                let text: String = data.iter().copied().map(char::from).collect();
                self.push_decoded(&text);
            }
            Some(TextEncoding::Utf8) => {
                let mut input = std::mem::take(&mut self.pending_bytes);
                input.extend_from_slice(data);
                let (text, tail) = decode_utf8_prefix(&input);
                self.pending_bytes = tail.to_vec();
                self.push_decoded(&text);
            }
        }
    }

    /// Take the output this buffering discipline allows to leave now.
    pub fn take_ready(&mut self, buffering: Buffering) -> Option<Payload> {
        if self.encoding.is_none() {
            return self.take_binary();
        }

        match buffering {
            Buffering::Unbuffered => self.take_all(),
            Buffering::Line => {
                let end = self.pending_line.rfind('\n')? + 1;
                let rest = self.pending_line.split_off(end);
                let ready = std::mem::replace(&mut self.pending_line, rest);
                Some(Payload::Text(ready))
            }
        }
    }

    /// Take everything decoded so far, partial line included.
    pub fn take_all(&mut self) -> Option<Payload> {
        if self.encoding.is_none() {
            return self.take_binary();
        }

        if self.pending_line.is_empty() {
            None
        } else {
            Some(Payload::Text(std::mem::take(&mut self.pending_line)))
        }
    }

    /// Take the undecodable remainder, leaving the decoder empty.
    pub fn take_undecoded(&mut self) -> Option<Vec<u8>> {
        if self.pending_bytes.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending_bytes))
        }
    }

    fn take_binary(&mut self) -> Option<Payload> {
        if self.pending_binary.is_empty() {
            None
        } else {
            Some(Payload::Binary(self.pending_binary.split().freeze()))
        }
    }

    fn push_decoded(&mut self, text: &str) {
        if self.newline == NewlineMode::Preserve {
            self.pending_line.push_str(text);
            return;
        }

        for c in text.chars() {
            if std::mem::take(&mut self.skip_lf) && c == '\n' {
                continue;
            }
            if c == '\r' {
                self.pending_line.push('\n');
                self.skip_lf = true;
            } else {
                self.pending_line.push(c);
            }
        }
    }
}

/// Decode the longest prefix of `input`, returning the text and the
/// truncated trailing sequence (at most three bytes).
///
/// Invalid sequences that are followed by more input decode to U+FFFD.
fn decode_utf8_prefix(input: &[u8]) -> (String, &[u8]) {
    let mut text = String::with_capacity(input.len());
    let mut rest = input;

    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                return (text, &[]);
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                text.push_str(&String::from_utf8_lossy(valid));
                match err.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    }
                    None => return (text, after),
                }
            }
        }
    }
}
