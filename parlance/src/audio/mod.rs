/// Hardware stream backends and driver callbacks
pub mod backend;

/// Bounded queue from the capture callback to async readers
pub mod capture_queue;

/// Captured audio chunk
pub mod chunk;

/// Audio device lookup
pub mod device;

/// Audio-related error types
pub mod error;

/// PCM format helpers and one-shot resampling
pub mod format;

/// Capture port
pub mod input;

/// Playback port
pub mod output;

/// Bounded queue from async writers to the playback callback
pub mod playback_queue;

/// Port state and counters
pub mod port;

/// Streaming resampler
pub mod resampler;

// Re-export commonly used types
pub use backend::{AudioBackend, CpalBackend, StreamFormat, StreamRequest};
pub use chunk::AudioChunk;
pub use device::{
    list_devices, CpalDeviceDirectory, DeviceDirectory, DeviceHandle, DeviceQuery, DeviceRole,
    DeviceType,
};
pub use error::{AudioError, AudioResult};
pub use input::{AudioInputPort, InputPortConfig};
pub use output::{AudioOutputPort, OutputPortConfig};
pub use port::{CaptureStats, PlaybackStats, PortCounters, PortState};
pub use resampler::StreamResampler;
