//! Capture session lifecycle.

use std::os::fd::AsFd;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use teestream_types::{
    Channel, Diagnostic, MergeMode, NewlineMode, SessionState, StreamStatistics, TeeConfig,
    TextEncoding,
};
use tracing::{debug, info, instrument, warn};

use crate::destination::SharedDestination;
use crate::diagnostics::{self, DiagnosticLog};
use crate::error::CaptureError;
use crate::fanout::Fanout;
use crate::handle::ChannelHandle;
use crate::merge::MergeCoordinator;
use crate::platform::{self, Redirection};
use crate::reader::{self, ChannelSource};
use crate::stats::StreamStats;
use crate::CaptureResult;

/// What a session left behind when it was released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Diagnostics raised during the session, in the order they occurred.
    pub diagnostics: Vec<Diagnostic>,

    /// Counters at release.
    pub statistics: StreamStatistics,
}

impl TeardownReport {
    /// Returns true if nothing was lost.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Diagnostics as log text, one newline-terminated message each.
    pub fn render_diagnostics(&self) -> String {
        diagnostics::render(&self.diagnostics)
    }
}

/// Builder for [`TeeStream`].
#[derive(Default)]
pub struct TeeStreamBuilder {
    config: TeeConfig,
    channels: Option<Vec<Channel>>,
    shared: Vec<SharedDestination>,
    per_channel: [Vec<SharedDestination>; 2],
}

impl TeeStreamBuilder {
    /// Add a destination that receives every requested channel.
    pub fn destination(mut self, destination: SharedDestination) -> Self {
        self.shared.push(destination);
        self
    }

    /// Add several destinations that receive every requested channel.
    pub fn destinations(
        mut self,
        destinations: impl IntoIterator<Item = SharedDestination>,
    ) -> Self {
        self.shared.extend(destinations);
        self
    }

    /// Add a destination for one channel only.
    pub fn channel_destination(mut self, channel: Channel, destination: SharedDestination) -> Self {
        self.per_channel[channel.index()].push(destination);
        self
    }

    /// Channels to capture (both by default).
    pub fn channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        let mut requested: Vec<Channel> = Vec::new();
        for channel in channels {
            if !requested.contains(&channel) {
                requested.push(channel);
            }
        }
        self.channels = Some(requested);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: TeeConfig) -> Self {
        self.config = config;
        self
    }

    /// Decode with `encoding`.
    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.config.encoding = Some(encoding);
        self
    }

    /// Forward raw bytes without decoding.
    pub fn binary(mut self, binary: bool) -> Self {
        self.config.binary = binary;
        self
    }

    /// Line ending translation.
    pub fn newline(mut self, newline: NewlineMode) -> Self {
        self.config.newline = newline;
        self
    }

    /// Merge coordinator selection.
    pub fn merge(mut self, merge: MergeMode) -> Self {
        self.config.merge = merge;
        self
    }

    /// Merge coordinator poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Whether to redirect the process's own output channels.
    pub fn redirect_process(mut self, redirect: bool) -> Self {
        self.config.redirect_process = redirect;
        self
    }

    /// Build an idle session.
    pub fn build(self) -> TeeStream {
        let channels = self.channels.unwrap_or_else(|| Channel::ALL.to_vec());
        let destinations = Channel::ALL.map(|channel| {
            let mut list = self.shared.clone();
            list.extend(self.per_channel[channel.index()].iter().cloned());
            list
        });

        TeeStream {
            config: self.config,
            channels,
            destinations,
            state: SessionState::Idle,
            handles: Vec::new(),
            active: None,
            diagnostics: Arc::new(DiagnosticLog::new()),
            stats: Arc::new(StreamStats::new()),
        }
    }

    /// Build and acquire.
    pub fn start(self) -> CaptureResult<TeeStream> {
        let mut stream = self.build();
        stream.acquire()?;
        Ok(stream)
    }
}

/// Resources held while a session is active.
#[derive(Default)]
struct ActiveCapture {
    redirections: Vec<Redirection>,
    coordinator: Option<MergeCoordinator>,
    readers: Vec<JoinHandle<()>>,
}

impl ActiveCapture {
    /// Stop everything, given that every handle's write end is already closed.
    fn shutdown(&mut self) {
        while let Some(mut redirection) = self.redirections.pop() {
            if let Err(e) = redirection.restore() {
                warn!(channel = redirection.channel().name(), "Restore failed: {}", e);
            }
        }

        if let Some(mut coordinator) = self.coordinator.take() {
            coordinator.stop();
        }

        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
    }
}

/// A capture session over the OUT and/or ERR channels.
///
/// While active, everything written to a requested channel (through its
/// [`ChannelHandle`], or through the process's real stdout/stderr when
/// redirection is enabled) is decoded and copied to every destination.
pub struct TeeStream {
    config: TeeConfig,
    channels: Vec<Channel>,
    destinations: [Vec<SharedDestination>; 2],
    state: SessionState,
    handles: Vec<Arc<ChannelHandle>>,
    active: Option<ActiveCapture>,
    diagnostics: Arc<DiagnosticLog>,
    stats: Arc<StreamStats>,
}

impl TeeStream {
    /// Start building a session.
    pub fn builder() -> TeeStreamBuilder {
        TeeStreamBuilder::default()
    }

    /// Session configuration.
    pub fn config(&self) -> &TeeConfig {
        &self.config
    }

    /// Requested channels.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true if a merge coordinator is reading both channels.
    pub fn is_merged(&self) -> bool {
        self.state.is_merged()
    }

    /// Diagnostics raised so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.snapshot()
    }

    /// Current counters.
    pub fn statistics(&self) -> StreamStatistics {
        self.stats.snapshot()
    }

    fn should_merge(&self) -> bool {
        self.config.merge == MergeMode::Auto
            && Channel::ALL.iter().all(|c| self.channels.contains(c))
            && platform::peek_supported()
    }

    /// Open pipes, redirect the requested channels and start reading.
    ///
    /// On failure everything created so far is undone and the session stays idle.
    #[instrument(name = "tee_acquire", skip(self), fields(channels = ?self.channels))]
    pub fn acquire(&mut self) -> CaptureResult<()> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Active { .. } => return Err(CaptureError::AlreadyAcquired),
            SessionState::Released => return Err(CaptureError::Released),
        }

        let merged = self.should_merge();
        let mut active = ActiveCapture::default();
        let mut handles = Vec::new();

        if let Err(e) = self.install(&mut active, &mut handles, merged) {
            warn!("Acquire failed, rolling back: {}", e);
            for handle in &handles {
                handle.close();
            }
            active.shutdown();
            return Err(e);
        }

        info!(
            merged,
            redirect = self.config.redirect_process,
            "Stream capture acquired"
        );

        self.handles = handles;
        self.active = Some(active);
        self.state = SessionState::Active { merged };
        Ok(())
    }

    fn install(
        &self,
        active: &mut ActiveCapture,
        handles: &mut Vec<Arc<ChannelHandle>>,
        merged: bool,
    ) -> CaptureResult<()> {
        let encoding = self.config.resolved_encoding();
        let mut sources: [Option<ChannelSource>; 2] = [None, None];

        for &channel in &self.channels {
            let (read, write) = platform::pipe().map_err(CaptureError::os("creating pipe"))?;
            if self.config.redirect_process {
                active
                    .redirections
                    .push(Redirection::install(channel, write.as_fd())?);
            }
            handles.push(Arc::new(ChannelHandle::new(channel, encoding, write)));
            sources[channel.index()] = Some(ChannelSource::new(
                channel,
                read,
                encoding,
                self.config.newline,
            ));
        }

        match sources {
            [Some(out), Some(err)] if merged => {
                let fanout = Arc::new(self.fanout(Channel::ALL));
                let coordinator =
                    MergeCoordinator::start(out, err, fanout, self.config.poll_interval())
                        .map_err(CaptureError::os("starting merge coordinator"))?;
                active.coordinator = Some(coordinator);
            }
            sources => {
                for source in sources.into_iter().flatten() {
                    let fanout = Arc::new(self.fanout([source.channel()]));
                    let reader = reader::spawn_reader(source, fanout)
                        .map_err(CaptureError::os("starting reader thread"))?;
                    active.readers.push(reader);
                }
            }
        }

        Ok(())
    }

    fn fanout(&self, channels: impl IntoIterator<Item = Channel>) -> Fanout {
        let destinations = channels
            .into_iter()
            .flat_map(|channel| self.destinations[channel.index()].iter().cloned());
        Fanout::new(
            destinations,
            Arc::clone(&self.diagnostics),
            Arc::clone(&self.stats),
        )
    }

    /// The handle for `channel`. Every call returns the same handle.
    pub fn handle(&self, channel: Channel) -> CaptureResult<Arc<ChannelHandle>> {
        if !self.channels.contains(&channel) {
            return Err(CaptureError::UnknownChannel(channel));
        }
        if self.state.is_idle() {
            return Err(CaptureError::NotAcquired);
        }

        self.handles
            .iter()
            .find(|h| h.channel() == channel)
            .cloned()
            .ok_or(CaptureError::UnknownChannel(channel))
    }

    /// The OUT handle.
    pub fn out(&self) -> CaptureResult<Arc<ChannelHandle>> {
        self.handle(Channel::Out)
    }

    /// The ERR handle.
    pub fn err(&self) -> CaptureResult<Arc<ChannelHandle>> {
        self.handle(Channel::Err)
    }

    /// Drain, flush and restore everything, returning what was left behind.
    ///
    /// Releasing twice returns an empty report.
    #[instrument(name = "tee_release", skip(self))]
    pub fn release(&mut self) -> CaptureResult<TeardownReport> {
        match self.state {
            SessionState::Idle => return Err(CaptureError::NotAcquired),
            SessionState::Released => return Ok(TeardownReport::default()),
            SessionState::Active { .. } => {}
        }

        for handle in &self.handles {
            handle.close();
        }
        if let Some(mut active) = self.active.take() {
            active.shutdown();
        }
        self.state = SessionState::Released;

        let report = TeardownReport {
            diagnostics: self.diagnostics.drain(),
            statistics: self.stats.snapshot(),
        };

        debug!(
            diagnostics = report.diagnostics.len(),
            bytes_read = report.statistics.total_bytes_read(),
            "Stream capture released"
        );
        Ok(report)
    }
}

impl Drop for TeeStream {
    fn drop(&mut self) {
        if self.state.is_active() {
            let _ = self.release();
        }
    }
}
