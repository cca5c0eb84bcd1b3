//! State and counters shared by the capture and playback ports.
//!
//! Counters are plain atomics so the driver callback can update them
//! without taking any lock.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Lifecycle of a port session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl PortState {
    /// Upper-case name used in logs and stats
    pub fn name(&self) -> &'static str {
        match self {
            PortState::Stopped => "STOPPED",
            PortState::Starting => "STARTING",
            PortState::Running => "RUNNING",
            PortState::Stopping => "STOPPING",
            PortState::Error => "ERROR",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PortState::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PortState::Stopped)
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Live counters for one port session
///
/// `dropped` counts overruns on a capture port and underruns on a
/// playback port.
#[derive(Debug, Default)]
pub struct PortCounters {
    chunks: AtomicU64,
    bytes: AtomicU64,
    dropped: AtomicU64,
    queue_depth: AtomicUsize,
}

impl PortCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_chunk(&self, bytes: usize) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub(crate) fn increment_depth(&self) {
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decrement_depth(&self) {
        // Saturating: a racing reset may have already zeroed the depth.
        let _ = self
            .queue_depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| d.checked_sub(1));
    }

    pub(crate) fn reset(&self) {
        self.chunks.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.queue_depth.store(0, Ordering::Relaxed);
    }

    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }
}

/// Snapshot of a capture port session
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStats {
    pub state: PortState,
    pub chunks_captured: u64,
    pub bytes_captured: u64,
    pub overruns: u64,
    pub queue_size: usize,
}

/// Snapshot of a playback port session
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStats {
    pub state: PortState,
    pub chunks_played: u64,
    pub bytes_played: u64,
    pub underruns: u64,
    pub queue_size: usize,
}
