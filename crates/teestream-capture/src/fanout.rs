//! Delivery of decoded chunks to every destination.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use teestream_types::{Buffering, Channel, Diagnostic};
use tracing::{trace, warn};

use crate::decoder::Payload;
use crate::destination::{Destination, SharedDestination};
use crate::diagnostics::DiagnosticLog;
use crate::stats::StreamStats;

/// Ordered set of destinations fed by one reader or the merge coordinator.
///
/// A destination that refuses output is reported once and skipped from then
/// on.
pub struct Fanout {
    destinations: Vec<SharedDestination>,
    failed: Vec<AtomicBool>,
    diagnostics: Arc<DiagnosticLog>,
    stats: Arc<StreamStats>,
}

impl Fanout {
    /// Create a fanout, dropping repeated destinations (by identity).
    pub fn new(
        destinations: impl IntoIterator<Item = SharedDestination>,
        diagnostics: Arc<DiagnosticLog>,
        stats: Arc<StreamStats>,
    ) -> Self {
        let mut unique: Vec<SharedDestination> = Vec::new();
        for destination in destinations {
            if !unique.iter().any(|d| Arc::ptr_eq(d, &destination)) {
                unique.push(destination);
            }
        }

        let failed = unique.iter().map(|_| AtomicBool::new(false)).collect();

        Self {
            destinations: unique,
            failed,
            diagnostics,
            stats,
        }
    }

    /// Returns true if there is nowhere to deliver output.
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Number of destinations.
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    /// Diagnostic log shared with the session.
    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    /// Statistics shared with the session.
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Write `payload` to every destination in order.
    ///
    /// A destination that refuses part of the chunk gets a diagnostic quoting
    /// the rest and receives nothing further; delivery to the remaining
    /// destinations continues.
    pub fn deliver(&self, channel: Channel, payload: &Payload) {
        if payload.is_empty() {
            return;
        }

        let data = payload.as_bytes();
        trace!(channel = channel.name(), bytes = data.len(), "Delivering chunk");

        for (destination, failed) in self.destinations.iter().zip(&self.failed) {
            if failed.load(Ordering::Acquire) {
                continue;
            }

            let mut destination = destination.lock();
            let (written, error) = write_fully(&mut *destination, data);

            if written < data.len() {
                if failed.swap(true, Ordering::AcqRel) {
                    continue;
                }
                warn!(
                    channel = channel.name(),
                    destination = %destination.describe(),
                    error = ?error,
                    "Destination refused output, dropping it"
                );
                self.stats.record_destination_failure();
                self.diagnostics.report(Diagnostic::destination_closed(
                    Some(channel),
                    &payload.quote_from(written),
                ));
                continue;
            }

            if channel.buffering() == Buffering::Unbuffered {
                if let Err(e) = destination.flush() {
                    warn!(
                        destination = %destination.describe(),
                        "Destination flush failed: {}", e
                    );
                }
            }
        }

        self.stats.record_delivery(channel, data.len());
    }
}

/// Write until everything is accepted, the destination accepts nothing, or
/// it fails. Returns the accepted byte count and the error, if any.
fn write_fully(
    destination: &mut dyn Destination,
    data: &[u8],
) -> (usize, Option<io::Error>) {
    let mut written = 0;
    while written < data.len() {
        match destination.write(&data[written..]) {
            Ok(0) => return (written, None),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return (written, Some(e)),
        }
    }
    (written, None)
}
