//! Live capture counters.

use std::sync::atomic::{AtomicU64, Ordering};

use teestream_types::{Channel, ChannelStatistics, StreamStatistics};

#[derive(Debug, Default)]
struct ChannelCounters {
    bytes_read: AtomicU64,
    chunks_delivered: AtomicU64,
    bytes_delivered: AtomicU64,
}

impl ChannelCounters {
    fn snapshot(&self) -> ChannelStatistics {
        ChannelStatistics {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            chunks_delivered: self.chunks_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
        }
    }
}

/// Counters shared by a session's reader threads.
#[derive(Debug, Default)]
pub struct StreamStats {
    channels: [ChannelCounters; 2],
    destination_failures: AtomicU64,
    stale_line_flushes: AtomicU64,
}

impl StreamStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bytes read from a channel's pipe.
    pub fn record_read(&self, channel: Channel, bytes: usize) {
        self.channels[channel.index()]
            .bytes_read
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a chunk handed to destinations.
    pub fn record_delivery(&self, channel: Channel, bytes: usize) {
        let counters = &self.channels[channel.index()];
        counters.chunks_delivered.fetch_add(1, Ordering::Relaxed);
        counters
            .bytes_delivered
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a destination that refused part of a chunk.
    pub fn record_destination_failure(&self) {
        self.destination_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stale partial line released by the merge coordinator.
    pub fn record_stale_flush(&self) {
        self.stale_line_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of the counters.
    pub fn snapshot(&self) -> StreamStatistics {
        StreamStatistics {
            out: self.channels[Channel::Out.index()].snapshot(),
            err: self.channels[Channel::Err.index()].snapshot(),
            destination_failures: self.destination_failures.load(Ordering::Relaxed),
            stale_line_flushes: self.stale_line_flushes.load(Ordering::Relaxed),
        }
    }
}
