use crate::link::session::LinkState;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Bytes per second of 16kHz mono s16le
pub const INPUT_BYTES_PER_SECOND: f64 = 32000.0;

/// Bytes per second of 24kHz mono s16le
pub const OUTPUT_BYTES_PER_SECOND: f64 = 48000.0;

/// Service billing estimate
pub const TOKENS_PER_AUDIO_SECOND: f64 = 25.0;

/// Cumulative link counters, shared with the receive task
#[derive(Debug, Default)]
pub struct LinkCounters {
    chunks_sent: AtomicU64,
    bytes_sent: AtomicU64,
    chunks_received: AtomicU64,
    bytes_received: AtomicU64,
    errors: AtomicU64,
    reconnections: AtomicU64,
}

impl LinkCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnection(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn reconnections(&self) -> u64 {
        self.reconnections.load(Ordering::Relaxed)
    }

    /// Snapshot with derived audio and token figures
    pub fn snapshot(&self, state: LinkState, connection_duration: Duration) -> LinkStats {
        let bytes_sent = self.bytes_sent.load(Ordering::Relaxed);
        let bytes_received = self.bytes_received.load(Ordering::Relaxed);

        let audio_seconds_sent = bytes_sent as f64 / INPUT_BYTES_PER_SECOND;
        let audio_seconds_received = bytes_received as f64 / OUTPUT_BYTES_PER_SECOND;
        let estimated_input_tokens = (audio_seconds_sent * TOKENS_PER_AUDIO_SECOND) as u64;
        let estimated_output_tokens = (audio_seconds_received * TOKENS_PER_AUDIO_SECOND) as u64;

        LinkStats {
            state,
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            bytes_sent,
            bytes_received,
            connection_duration_secs: connection_duration.as_secs_f64(),
            error_count: self.errors(),
            reconnection_count: self.reconnections(),
            audio_seconds_sent: round2(audio_seconds_sent),
            audio_seconds_received: round2(audio_seconds_received),
            estimated_input_tokens,
            estimated_output_tokens,
            estimated_total_tokens: estimated_input_tokens + estimated_output_tokens,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Serializable link statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkStats {
    pub state: LinkState,
    pub chunks_sent: u64,
    pub chunks_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connection_duration_secs: f64,
    pub error_count: u64,
    pub reconnection_count: u64,
    pub audio_seconds_sent: f64,
    pub audio_seconds_received: f64,
    pub estimated_input_tokens: u64,
    pub estimated_output_tokens: u64,
    pub estimated_total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimates() {
        let counters = LinkCounters::new();
        // 2s of input, 1s of output
        counters.record_sent(32000);
        counters.record_sent(32000);
        counters.record_received(48000);

        let stats = counters.snapshot(LinkState::Connected, Duration::from_secs(3));
        assert_eq!(stats.chunks_sent, 2);
        assert_eq!(stats.bytes_sent, 64000);
        assert_eq!(stats.audio_seconds_sent, 2.0);
        assert_eq!(stats.audio_seconds_received, 1.0);
        assert_eq!(stats.estimated_input_tokens, 50);
        assert_eq!(stats.estimated_output_tokens, 25);
        assert_eq!(stats.estimated_total_tokens, 75);
        assert_eq!(stats.connection_duration_secs, 3.0);
    }

    #[test]
    fn test_partial_seconds_round_down_for_tokens() {
        let counters = LinkCounters::new();
        counters.record_sent(1000);
        let stats = counters.snapshot(LinkState::Connected, Duration::ZERO);
        assert_eq!(stats.audio_seconds_sent, 0.03);
        assert_eq!(stats.estimated_input_tokens, 0);
    }

    #[test]
    fn test_serializes_state_name() {
        let counters = LinkCounters::new();
        counters.record_error();
        counters.record_reconnection();
        let json = serde_json::to_value(counters.snapshot(LinkState::Reconnecting, Duration::ZERO))
            .unwrap();
        assert_eq!(json["state"], "RECONNECTING");
        assert_eq!(json["error_count"], 1);
        assert_eq!(json["reconnection_count"], 1);
    }
}
