//! Merge coordinator: one thread reading both channels in arrival order.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use teestream_types::Buffering;
use tracing::{debug, info, instrument, trace, warn};

use crate::fanout::Fanout;
use crate::reader::ChannelSource;

/// Consecutive empty OUT polls before a held partial line may be released.
const STALE_POLLS: u32 = 2;

/// Interleaves OUT and ERR into one ordered feed.
///
/// ERR is forwarded as soon as it is seen; OUT is forwarded a line at a time,
/// and a partial OUT line is released once OUT has been quiet long enough.
pub(crate) struct MergeCoordinator {
    thread: Option<JoinHandle<()>>,
    stop_tx: Option<Sender<()>>,
}

impl MergeCoordinator {
    /// Start the coordinator thread.
    #[instrument(name = "merge_start", skip_all, fields(poll_ms = poll.as_millis() as u64))]
    pub(crate) fn start(
        out: ChannelSource,
        err: ChannelSource,
        fanout: Arc<Fanout>,
        poll: Duration,
    ) -> io::Result<Self> {
        info!("Starting merge coordinator");

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let state = MergeState::new(out, err);

        let handle = thread::Builder::new()
            .name("teestream-merge".to_string())
            .spawn(move || merge_thread(state, fanout, poll, stop_rx))?;

        Ok(Self {
            thread: Some(handle),
            stop_tx: Some(stop_tx),
        })
    }

    /// Signal the coordinator to drain both pipes and wait for it to exit.
    ///
    /// Write ends must be closed first or the drain never reaches end of file.
    #[instrument(name = "merge_stop", skip(self))]
    pub(crate) fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if handle.join().is_err() {
            warn!("Merge coordinator thread panicked");
        }
        info!("Merge coordinator stopped");
    }
}

impl Drop for MergeCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn merge_thread(mut state: MergeState, fanout: Arc<Fanout>, poll: Duration, stop_rx: Receiver<()>) {
    debug!("Merge thread started");

    loop {
        match stop_rx.recv_timeout(poll) {
            Err(RecvTimeoutError::Timeout) => state.poll_once(&fanout, poll),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    state.finish(&fanout);
    debug!("Merge thread exiting");
}

struct MergeState {
    out: ChannelSource,
    err: ChannelSource,
    idle_polls: u32,
    partial_since: Option<Instant>,
}

impl MergeState {
    fn new(out: ChannelSource, err: ChannelSource) -> Self {
        Self {
            out,
            err,
            idle_polls: 0,
            partial_since: None,
        }
    }

    /// One poll tick. ERR is always handled before OUT.
    fn poll_once(&mut self, fanout: &Fanout, poll: Duration) {
        let err_pending = pending(&self.err);
        if err_pending > 0 {
            if let Err(e) = self.err.read_pending(err_pending, fanout) {
                warn!("ERR pipe read failed: {}", e);
            }
            self.err.forward(Buffering::Unbuffered, fanout);
        }

        let out_pending = pending(&self.out);
        if out_pending > 0 {
            if let Err(e) = self.out.read_pending(out_pending, fanout) {
                warn!("OUT pipe read failed: {}", e);
            }
            self.out.forward(Buffering::Line, fanout);
            self.idle_polls = 0;
            self.partial_since = self.out.has_partial_line().then(Instant::now);
            return;
        }

        self.idle_polls = self.idle_polls.saturating_add(1);
        let stale = self
            .partial_since
            .is_some_and(|since| since.elapsed() >= poll);

        if self.idle_polls >= STALE_POLLS && stale && !fanout.is_empty() {
            trace!("Releasing stale partial line");
            self.out.forward_all(fanout);
            fanout.stats().record_stale_flush();
            self.partial_since = None;
        }
    }

    /// Drain both pipes to end of file (ERR first) and flush residue.
    fn finish(&mut self, fanout: &Fanout) {
        self.err.drain(fanout);
        self.out.drain(fanout);
        self.err.finish(fanout);
        self.out.finish(fanout);
    }
}

fn pending(source: &ChannelSource) -> usize {
    match source.pending() {
        Ok(n) => n,
        Err(e) => {
            warn!(channel = source.channel().name(), "Pending byte count failed: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use teestream_types::{Channel, NewlineMode, TextEncoding};

    use super::*;
    use crate::destination::{shared_destination, SharedBuffer};
    use crate::diagnostics::DiagnosticLog;
    use crate::platform;
    use crate::stats::StreamStats;

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

    fn fanout(buffer: &SharedBuffer) -> Fanout {
        Fanout::new(
            [shared_destination(buffer.clone())],
            Arc::new(DiagnosticLog::new()),
            Arc::new(StreamStats::new()),
        )
    }

    #[test]
    fn test_err_preempts_partial_out_line() {
        let buffer = SharedBuffer::new();
        let fanout = fanout(&buffer);
        let (out, mut out_writer) = source(Channel::Out);
        let (err, mut err_writer) = source(Channel::Err);
        let mut state = MergeState::new(out, err);

        out_writer.write_all(b"Hello\nWorld").unwrap();
        state.poll_once(&fanout, Duration::ZERO);
        assert_eq!(buffer.text(), "Hello\n");

        err_writer.write_all(b"interrupting\ncow").unwrap();
        state.poll_once(&fanout, Duration::ZERO);
        assert_eq!(buffer.text(), "Hello\ninterrupting\ncow");

        state.poll_once(&fanout, Duration::ZERO);
        assert_eq!(buffer.text(), "Hello\ninterrupting\ncowWorld");
        assert_eq!(fanout.stats().snapshot().stale_line_flushes, 1);
    }

    #[test]
    fn test_err_first_when_both_pending() {
        let buffer = SharedBuffer::new();
        let fanout = fanout(&buffer);
        let (out, mut out_writer) = source(Channel::Out);
        let (err, mut err_writer) = source(Channel::Err);
        let mut state = MergeState::new(out, err);

        out_writer.write_all(b"out\n").unwrap();
        err_writer.write_all(b"err\n").unwrap();
        state.poll_once(&fanout, Duration::ZERO);
        assert_eq!(buffer.text(), "err\nout\n");
    }

    #[test]
    fn test_partial_line_is_not_released_before_it_is_stale() {
        let buffer = SharedBuffer::new();
        let fanout = fanout(&buffer);
        let (out, mut out_writer) = source(Channel::Out);
        let (err, _err_writer) = source(Channel::Err);
        let mut state = MergeState::new(out, err);

        out_writer.write_all(b"partial").unwrap();
        let poll = Duration::from_secs(3600);
        for _ in 0..4 {
            state.poll_once(&fanout, poll);
        }
        assert_eq!(buffer.text(), "");
    }

    #[test]
    fn test_stop_drains_remaining_output() {
        let buffer = SharedBuffer::new();
        let fanout = Arc::new(fanout(&buffer));
        let (out, mut out_writer) = source(Channel::Out);
        let (err, mut err_writer) = source(Channel::Err);

        let mut coordinator =
            MergeCoordinator::start(out, err, Arc::clone(&fanout), Duration::from_secs(3600))
                .unwrap();

        out_writer.write_all(b"tail without newline").unwrap();
        err_writer.write_all(b"err\n").unwrap();
        drop(out_writer);
        drop(err_writer);
        coordinator.stop();

        assert_eq!(buffer.text(), "err\ntail without newline");
        assert!(fanout.diagnostics().is_empty());
    }
}
