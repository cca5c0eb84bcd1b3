use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::state::{PipelineMode, PipelineState};
use crate::link::LinkStats;

/// Live counters of one direction, shared with its two tasks
#[derive(Debug, Default)]
pub struct DirectionCounters {
    captured: AtomicU64,
    sent: AtomicU64,
    received: AtomicU64,
    played: AtomicU64,
    errors: AtomicU64,
}

impl DirectionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_played(&self) {
        self.played.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DirectionStats {
        DirectionStats {
            captured: self.captured.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            played: self.played.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Chunk counts of one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionStats {
    /// Chunks read from the input port
    pub captured: u64,
    /// Chunks accepted by the link
    pub sent: u64,
    /// Translated chunks taken from the link
    pub received: u64,
    /// Chunks queued on the output port
    pub played: u64,
    pub errors: u64,
}

impl std::ops::Add for DirectionStats {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            captured: self.captured + other.captured,
            sent: self.sent + other.sent,
            received: self.received + other.received,
            played: self.played + other.played,
            errors: self.errors + other.errors,
        }
    }
}

/// Serializable pipeline statistics
///
/// Single-direction modes report their link under `link`; bidirectional
/// mode uses `outgoing_link` and `incoming_link`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub state: PipelineState,
    pub mode: PipelineMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outgoing: Option<DirectionStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incoming: Option<DirectionStats>,
    pub totals: DirectionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outgoing_link: Option<LinkStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incoming_link: Option<LinkStats>,
}
