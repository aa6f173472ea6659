//! Stdout capture with explicit setup and teardown.

use std::fmt;
use std::fs;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use teestream_capture::{
    shared_destination, CaptureError, Channel, ChannelHandle, Destination, FileDestination,
    OriginalStream, SharedBuffer, SharedDestination, TeardownReport, TeeConfig, TeeStream,
};
use tracing::{debug, info, instrument, warn};

use crate::error::OutputError;
use crate::OutputResult;

/// Where captured stdout goes.
#[derive(Clone)]
pub enum CaptureTarget {
    /// In-memory buffer.
    Buffer(SharedBuffer),

    /// File opened (truncated) at setup and closed at teardown.
    Path(PathBuf),

    /// Caller-supplied destination.
    Destination(SharedDestination),

    /// The stdout the process had before setup.
    Original,
}

impl fmt::Debug for CaptureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(buffer) => f.debug_tuple("Buffer").field(buffer).finish(),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Destination(_) => f.write_str("Destination"),
            Self::Original => f.write_str("Original"),
        }
    }
}

impl From<SharedBuffer> for CaptureTarget {
    fn from(buffer: SharedBuffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<PathBuf> for CaptureTarget {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for CaptureTarget {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<&str> for CaptureTarget {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<String> for CaptureTarget {
    fn from(path: String) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<SharedDestination> for CaptureTarget {
    fn from(destination: SharedDestination) -> Self {
        Self::Destination(destination)
    }
}

/// Read-back view of the primary target.
#[derive(Debug, Clone)]
pub enum CaptureView {
    /// Captured into a buffer.
    Buffer(SharedBuffer),

    /// Captured into a file.
    File(PathBuf),

    /// Captured somewhere that cannot be read back.
    Opaque,
}

impl CaptureView {
    /// Text captured so far.
    pub fn text(&self) -> io::Result<String> {
        match self {
            Self::Buffer(buffer) => Ok(buffer.text()),
            Self::File(path) => fs::read_to_string(path),
            Self::Opaque => Ok(String::new()),
        }
    }

    /// The buffer, if the primary target is one.
    pub fn buffer(&self) -> Option<&SharedBuffer> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// The file path, if the primary target is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path.as_path()),
            _ => None,
        }
    }

    fn of(target: &CaptureTarget) -> Self {
        match target {
            CaptureTarget::Buffer(buffer) => Self::Buffer(buffer.clone()),
            CaptureTarget::Path(path) => Self::File(path.clone()),
            CaptureTarget::Destination(_) | CaptureTarget::Original => Self::Opaque,
        }
    }
}

/// Captures stdout for the duration of a setup/teardown pair.
///
/// ```no_run
/// use teestream_output::CaptureOutput;
///
/// let mut capture = CaptureOutput::buffered();
/// {
///     let _guard = capture.scoped()?;
///     println!("Hello World");
/// }
/// let text = capture.view().map(|v| v.text()).transpose()?;
/// assert_eq!(text.as_deref(), Some("Hello World\n"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct CaptureOutput {
    targets: Vec<CaptureTarget>,
    tee_original: bool,
    config: TeeConfig,
    session: Option<TeeStream>,
    opened: Vec<SharedDestination>,
    view: Option<CaptureView>,
}

impl CaptureOutput {
    /// A helper with no targets; setup captures into a fresh buffer.
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
            tee_original: false,
            config: TeeConfig::default(),
            session: None,
            opened: Vec::new(),
            view: None,
        }
    }

    /// Capture into a new in-memory buffer.
    pub fn buffered() -> Self {
        Self::to(SharedBuffer::new())
    }

    /// Capture into `target`.
    pub fn to(target: impl Into<CaptureTarget>) -> Self {
        Self::new().also(target)
    }

    /// Capture into an additional target.
    pub fn also(mut self, target: impl Into<CaptureTarget>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// Keep mirroring to the original stdout.
    pub fn tee_original(mut self, tee: bool) -> Self {
        self.tee_original = tee;
        self
    }

    /// Session configuration.
    pub fn config(mut self, config: TeeConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns true between setup and teardown.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// View of the primary target from the latest setup.
    pub fn view(&self) -> Option<&CaptureView> {
        self.view.as_ref()
    }

    /// The stdout handle of the active session.
    pub fn handle(&self) -> Option<Arc<ChannelHandle>> {
        self.session
            .as_ref()
            .and_then(|session| session.handle(Channel::Out).ok())
    }

    /// Start capturing.
    #[instrument(name = "capture_output_setup", skip(self))]
    pub fn setup(&mut self) -> OutputResult<CaptureView> {
        if self.session.is_some() {
            return Err(OutputError::DuplicateSetup);
        }

        if self.targets.is_empty() {
            self.targets.push(CaptureTarget::Buffer(SharedBuffer::new()));
        }

        let destinations = match self.open_destinations() {
            Ok(destinations) => destinations,
            Err(e) => {
                self.close_opened();
                return Err(e);
            }
        };

        let started = TeeStream::builder()
            .config(self.config.clone())
            .channels([Channel::Out])
            .destinations(destinations)
            .start();

        let session = match started {
            Ok(session) => session,
            Err(e) => {
                self.close_opened();
                return Err(e.into());
            }
        };

        let view = CaptureView::of(&self.targets[0]);
        info!(targets = self.targets.len(), tee = self.tee_original, "Capturing stdout");

        self.session = Some(session);
        self.view = Some(view.clone());
        Ok(view)
    }

    fn open_destinations(&mut self) -> OutputResult<Vec<SharedDestination>> {
        let mut destinations = Vec::new();
        let wants_original = self.tee_original
            || self
                .targets
                .iter()
                .any(|t| matches!(t, CaptureTarget::Original));

        // Duplicated now, before stdout points at the pipe.
        let original = if wants_original {
            let stream = OriginalStream::stdout().map_err(|source| CaptureError::Os {
                context: "duplicating original stdout",
                source,
            })?;
            Some(shared_destination(stream))
        } else {
            None
        };

        for target in &self.targets {
            let destination = match target {
                CaptureTarget::Buffer(buffer) => shared_destination(buffer.clone()),
                CaptureTarget::Path(path) => {
                    let file = FileDestination::create(path).map_err(|source| {
                        OutputError::OpenTarget {
                            path: path.clone(),
                            source,
                        }
                    })?;
                    debug!(path = %path.display(), "Opened capture file");
                    let shared = shared_destination(file);
                    self.opened.push(shared.clone());
                    shared
                }
                CaptureTarget::Destination(destination) => destination.clone(),
                CaptureTarget::Original => continue,
            };
            destinations.push(destination);
        }

        destinations.extend(original);
        Ok(destinations)
    }

    fn close_opened(&mut self) {
        for destination in self.opened.drain(..) {
            let mut destination = destination.lock();
            if let Err(e) = destination.close() {
                warn!(destination = %destination.describe(), "Close failed: {}", e);
            }
        }
    }

    /// Stop capturing and close any file this helper opened.
    ///
    /// Does nothing if capture is not active.
    #[instrument(name = "capture_output_teardown", skip(self))]
    pub fn teardown(&mut self) -> OutputResult<TeardownReport> {
        let Some(mut session) = self.session.take() else {
            self.close_opened();
            return Ok(TeardownReport::default());
        };

        let released = session.release();
        self.close_opened();
        let report = released?;

        info!(
            bytes = report.statistics.out.bytes_read,
            clean = report.is_clean(),
            "Stopped capturing stdout"
        );
        Ok(report)
    }

    /// Set up and return a guard that tears down on drop.
    pub fn scoped(&mut self) -> OutputResult<CaptureGuard<'_>> {
        let view = self.setup()?;
        Ok(CaptureGuard { output: self, view })
    }
}

impl Default for CaptureOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CaptureOutput {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("Capture teardown failed: {}", e);
        }
    }
}

/// Active capture; tears down when dropped.
pub struct CaptureGuard<'a> {
    output: &'a mut CaptureOutput,
    view: CaptureView,
}

impl CaptureGuard<'_> {
    /// The stdout handle of the active session.
    pub fn handle(&self) -> Option<Arc<ChannelHandle>> {
        self.output.handle()
    }

    /// Tear down now and return the report.
    pub fn finish(mut self) -> OutputResult<TeardownReport> {
        self.output.teardown()
    }
}

impl Deref for CaptureGuard<'_> {
    type Target = CaptureView;

    fn deref(&self) -> &CaptureView {
        &self.view
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.output.teardown() {
            warn!("Capture teardown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> TeeConfig {
        TeeConfig {
            redirect_process: false,
            ..TeeConfig::default()
        }
    }

    #[test]
    fn test_duplicate_setup() {
        let mut capture = CaptureOutput::buffered().config(detached());
        capture.setup().unwrap();

        let err = capture.setup().unwrap_err();
        assert!(matches!(err, OutputError::DuplicateSetup));
        assert_eq!(err.to_string(), "Duplicate call to capture_output.setup");

        capture.teardown().unwrap();
        capture.setup().unwrap();
    }

    #[test]
    fn test_teardown_without_setup_is_noop() {
        let mut capture = CaptureOutput::new();
        let report = capture.teardown().unwrap();
        assert!(report.is_clean());
        assert!(capture.view().is_none());
    }

    #[test]
    fn test_path_target_receives_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tee_log.log");
        let extra = SharedBuffer::new();

        let mut capture = CaptureOutput::to(path.as_path())
            .also(extra.clone())
            .config(detached());
        let view = capture.setup().unwrap();
        assert_eq!(view.path(), Some(path.as_path()));

        capture.handle().unwrap().write_str("HELLO WORLD\n").unwrap();
        capture.teardown().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "HELLO WORLD\n");
        assert_eq!(view.text().unwrap(), "HELLO WORLD\n");
        assert_eq!(extra.text(), "HELLO WORLD\n");
    }

    #[test]
    fn test_unopenable_path_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.log");

        let mut capture = CaptureOutput::to(path.clone()).config(detached());
        let err = capture.setup().unwrap_err();
        assert!(matches!(err, OutputError::OpenTarget { .. }));
        assert!(!capture.is_active());
        capture.teardown().unwrap();
    }

    #[test]
    fn test_scoped_guard_tears_down() {
        let mut capture = CaptureOutput::new().config(detached());
        {
            let guard = capture.scoped().unwrap();
            guard.handle().unwrap().write_str("scoped\n").unwrap();
            assert!(guard.buffer().is_some());
        }
        assert!(!capture.is_active());
        assert_eq!(capture.view().unwrap().text().unwrap(), "scoped\n");
    }

    #[test]
    fn test_destination_target() {
        let buffer = SharedBuffer::new();
        let destination: SharedDestination = shared_destination(buffer.clone());
        let mut capture = CaptureOutput::to(destination).config(detached());

        let guard = capture.scoped().unwrap();
        assert!(matches!(*guard, CaptureView::Opaque));
        guard.handle().unwrap().write_str("x").unwrap();
        let report = guard.finish().unwrap();

        assert!(report.is_clean());
        assert_eq!(buffer.text(), "x");
        assert!(!buffer.is_closed());
        let mut probe = buffer.clone();
        assert!(Destination::write(&mut probe, b"!").is_ok());
    }
}
