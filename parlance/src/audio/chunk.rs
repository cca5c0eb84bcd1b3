use crate::audio::format::{self, BYTES_PER_SAMPLE};
use std::time::{Duration, Instant};

/// One buffer of captured s16le PCM plus its format
///
/// Chunks are immutable once built. A chunk lives in exactly one queue at a
/// time and is handed out by value, so it is consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Vec<u8>,
    captured_at: Instant,
    sample_rate: u32,
    channels: u16,
    frames: usize,
}

impl AudioChunk {
    /// Build a chunk from raw interleaved s16le bytes
    pub fn new(data: Vec<u8>, sample_rate: u32, channels: u16, captured_at: Instant) -> Self {
        let frame_bytes = BYTES_PER_SAMPLE * channels.max(1) as usize;
        let frames = data.len() / frame_bytes;
        Self {
            data,
            captured_at,
            sample_rate,
            channels,
            frames,
        }
    }

    /// Build a chunk from interleaved samples
    pub fn from_samples(
        samples: &[i16],
        sample_rate: u32,
        channels: u16,
        captured_at: Instant,
    ) -> Self {
        Self::new(
            format::samples_to_bytes(samples),
            sample_rate,
            channels,
            captured_at,
        )
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Instant the driver delivered this buffer
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback length in milliseconds
    pub fn duration_ms(&self) -> f64 {
        format::duration_ms(self.frames, self.sample_rate)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_ms() / 1000.0)
    }
}
