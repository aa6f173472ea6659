//! Diagnostic collection.

use parking_lot::Mutex;
use teestream_types::{Diagnostic, Severity};
use tracing::{error, warn};

/// Collects diagnostics raised by reader threads.
///
/// Each diagnostic is logged as it is reported and kept so the session can
/// hand it back at release.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and record a diagnostic.
    pub fn report(&self, diagnostic: Diagnostic) {
        let channel = diagnostic.channel.map(|c| c.name()).unwrap_or("unknown");
        match diagnostic.severity {
            Severity::Error => error!(channel, kind = ?diagnostic.kind, "{}", diagnostic.message),
            Severity::Warning => warn!(channel, kind = ?diagnostic.kind, "{}", diagnostic.message),
        }
        self.entries.lock().push(diagnostic);
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Number of recorded diagnostics.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Render diagnostics the way they appear in a log: one message per entry,
/// each terminated by a newline.
pub fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| format!("{}\n", d.message))
        .collect()
}

#[cfg(test)]
mod tests {
    use teestream_types::{Channel, DiagnosticKind};

    use super::*;

    #[test]
    fn test_report_keeps_order() {
        let log = DiagnosticLog::new();
        log.report(Diagnostic::partial_line(Some(Channel::Out), "Hello, "));
        log.report(Diagnostic::undecoded_bytes(Some(Channel::Out), &[0xc2]));

        let entries = log.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, DiagnosticKind::PartialLine);
        assert_eq!(entries[1].kind, DiagnosticKind::UndecodedBytes);

        assert_eq!(log.drain().len(), 2);
        assert!(log.is_empty());
    }

    #[test]
    fn test_render_terminates_each_message() {
        let diagnostics = vec![Diagnostic::undecoded_bytes(None, &[0xc2])];
        let rendered = render(&diagnostics);
        assert!(rendered.ends_with("\tb'\\xc2'\n"));
        assert_eq!(rendered.lines().count(), 2);
        assert_eq!(render(&[]), "");
    }
}
