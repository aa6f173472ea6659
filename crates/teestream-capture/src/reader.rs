//! Pipe reading for a single channel.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use teestream_types::{Buffering, Channel, Diagnostic, NewlineMode, TextEncoding};
use tracing::{debug, trace, warn};

use crate::decoder::DecoderBuffer;
use crate::fanout::Fanout;
use crate::platform;
use crate::READ_CHUNK_SIZE;

/// Read end of a channel's pipe together with its decoder state.
///
/// Owned by exactly one thread: its own reader, or the merge coordinator.
pub(crate) struct ChannelSource {
    channel: Channel,
    pipe: File,
    decoder: DecoderBuffer,
    buf: Vec<u8>,
    eof: bool,
}

impl ChannelSource {
    pub(crate) fn new(
        channel: Channel,
        read_end: OwnedFd,
        encoding: Option<TextEncoding>,
        newline: NewlineMode,
    ) -> Self {
        Self {
            channel,
            pipe: File::from(read_end),
            decoder: DecoderBuffer::new(encoding, newline),
            buf: vec![0; READ_CHUNK_SIZE],
            eof: false,
        }
    }

    pub(crate) fn channel(&self) -> Channel {
        self.channel
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }

    pub(crate) fn has_partial_line(&self) -> bool {
        self.decoder.has_partial_line()
    }

    /// Bytes queued in the pipe right now.
    pub(crate) fn pending(&self) -> io::Result<usize> {
        platform::pending_bytes(self.pipe.as_fd())
    }

    /// Read at most `limit` bytes into the decoder. Returns 0 at end of file.
    pub(crate) fn read_some(&mut self, limit: usize, fanout: &Fanout) -> io::Result<usize> {
        let limit = limit.clamp(1, self.buf.len());
        let n = loop {
            match self.pipe.read(&mut self.buf[..limit]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        if n == 0 {
            self.eof = true;
        } else {
            trace!(channel = self.channel.name(), bytes = n, "Read from pipe");
            fanout.stats().record_read(self.channel, n);
            self.decoder.feed(&self.buf[..n]);
        }
        Ok(n)
    }

    /// Read exactly `count` queued bytes (or up to end of file).
    pub(crate) fn read_pending(&mut self, mut count: usize, fanout: &Fanout) -> io::Result<()> {
        while count > 0 {
            let n = self.read_some(count, fanout)?;
            if n == 0 {
                break;
            }
            count -= n;
        }
        Ok(())
    }

    /// Forward what the buffering discipline allows.
    ///
    /// With no destinations the released text is dropped; a held partial
    /// line stays in the decoder until [`finish`](Self::finish).
    pub(crate) fn forward(&mut self, buffering: Buffering, fanout: &Fanout) {
        if let Some(payload) = self.decoder.take_ready(buffering) {
            if !fanout.is_empty() {
                fanout.deliver(self.channel, &payload);
            }
        }
    }

    /// Forward everything decoded, partial line included.
    pub(crate) fn forward_all(&mut self, fanout: &Fanout) {
        if fanout.is_empty() {
            return;
        }
        if let Some(payload) = self.decoder.take_all() {
            fanout.deliver(self.channel, &payload);
        }
    }

    /// Read until end of file, forwarding as data arrives.
    pub(crate) fn drain(&mut self, fanout: &Fanout) {
        let buffering = self.channel.buffering();
        while !self.eof {
            match self.read_some(READ_CHUNK_SIZE, fanout) {
                Ok(_) => self.forward(buffering, fanout),
                Err(e) => {
                    warn!(channel = self.channel.name(), "Pipe read failed: {}", e);
                    self.eof = true;
                }
            }
        }
    }

    /// Final flush once the write end is gone.
    ///
    /// A held partial line goes to the destinations when there are any and is
    /// reported otherwise; undecodable trailing bytes are always reported.
    pub(crate) fn finish(&mut self, fanout: &Fanout) {
        if fanout.is_empty() {
            if let Some(payload) = self.decoder.take_all() {
                let text = String::from_utf8_lossy(payload.as_bytes()).into_owned();
                fanout
                    .diagnostics()
                    .report(Diagnostic::partial_line(Some(self.channel), &text));
            }
        } else {
            self.forward_all(fanout);
        }

        if let Some(bytes) = self.decoder.take_undecoded() {
            fanout
                .diagnostics()
                .report(Diagnostic::undecoded_bytes(Some(self.channel), &bytes));
        }

        debug!(channel = self.channel.name(), "Channel finished");
    }
}

/// Spawn an independent reader that drains `source` until its write end closes.
pub(crate) fn spawn_reader(
    mut source: ChannelSource,
    fanout: Arc<Fanout>,
) -> io::Result<JoinHandle<()>> {
    let channel = source.channel();
    thread::Builder::new()
        .name(format!("teestream-{}", channel.name()))
        .spawn(move || {
            debug!(channel = channel.name(), "Reader thread started");
            source.drain(&fanout);
            source.finish(&fanout);
            debug!(channel = channel.name(), "Reader thread exiting");
        })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use teestream_types::DiagnosticKind;

    use super::*;
    use crate::destination::{shared_destination, SharedBuffer};
    use crate::diagnostics::DiagnosticLog;
    use crate::stats::StreamStats;

    fn fanout(buffer: Option<&SharedBuffer>) -> Arc<Fanout> {
        let destinations = buffer.map(|b| shared_destination(b.clone()));
        Arc::new(Fanout::new(
            destinations,
            Arc::new(DiagnosticLog::new()),
            Arc::new(StreamStats::new()),
        ))
    }

    fn source(channel: Channel) -> (ChannelSource, File) {
        let (read, write) = platform::pipe().unwrap();
        let source = ChannelSource::new(
            channel,
            read,
            Some(TextEncoding::Utf8),
            NewlineMode::Universal,
        );
        (source, File::from(write))
    }

    #[test]
    fn test_reader_delivers_until_eof() {
        let buffer = SharedBuffer::new();
        let fanout = fanout(Some(&buffer));
        let (source, mut writer) = source(Channel::Out);

        let reader = spawn_reader(source, Arc::clone(&fanout)).unwrap();
        writer.write_all(b"Hello\nno newline").unwrap();
        drop(writer);
        reader.join().unwrap();

        assert_eq!(buffer.text(), "Hello\nno newline");
        assert!(fanout.diagnostics().is_empty());
        assert_eq!(fanout.stats().snapshot().out.bytes_read, 16);
    }

    #[test]
    fn test_no_destination_reports_residue() {
        let fanout = fanout(None);
        let (mut source, mut writer) = source(Channel::Out);

        writer.write_all(b"done\nHello, \xc2").unwrap();
        drop(writer);

        source.drain(&fanout);
        source.finish(&fanout);

        let diagnostics = fanout.diagnostics().snapshot();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::PartialLine);
        assert!(diagnostics[0].message.ends_with("\t'Hello, '"));
        assert_eq!(diagnostics[1].kind, DiagnosticKind::UndecodedBytes);
        assert!(diagnostics[1].message.ends_with("\tb'\\xc2'"));
    }

    #[test]
    fn test_read_pending_reads_exact_count() {
        let fanout = fanout(None);
        let (mut source, mut writer) = source(Channel::Err);
        writer.write_all(b"abcdef").unwrap();

        assert_eq!(source.pending().unwrap(), 6);
        source.read_pending(4, &fanout).unwrap();
        assert_eq!(source.pending().unwrap(), 2);
        assert!(!source.is_eof());
    }
}
