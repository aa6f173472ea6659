//! Capture statistics snapshots.

use serde::{Deserialize, Serialize};

/// Per-channel counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatistics {
    /// Bytes read from the channel's pipe.
    pub bytes_read: u64,

    /// Decoded chunks handed to destinations.
    pub chunks_delivered: u64,

    /// Bytes handed to destinations (after decoding).
    pub bytes_delivered: u64,
}

/// Snapshot of a session's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatistics {
    /// OUT channel counters.
    pub out: ChannelStatistics,

    /// ERR channel counters.
    pub err: ChannelStatistics,

    /// Writes a destination refused or truncated.
    pub destination_failures: u64,

    /// Partial OUT lines the merge coordinator released after going stale.
    pub stale_line_flushes: u64,
}

impl StreamStatistics {
    /// Total bytes read across both channels.
    pub fn total_bytes_read(&self) -> u64 {
        self.out.bytes_read + self.err.bytes_read
    }
}
