use crate::audio::PortState;
use thiserror::Error;

/// Audio-related errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// No device matched the requested role/name
    #[error("No audio device found: {0}")]
    DeviceNotFound(String),

    /// Explicit device index does not exist on the host
    #[error("Invalid audio device index: {0}")]
    InvalidDeviceIndex(usize),

    /// Device cannot run the requested stream format
    #[error("Unsupported device configuration: {0}")]
    UnsupportedConfig(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildFailed(String),

    /// Audio stream error
    #[error("Audio stream error: {0}")]
    StreamError(String),

    /// Port was started while not stopped
    #[error("Audio port already active (state: {0})")]
    AlreadyRunning(PortState),

    /// Operation requires a running port
    #[error("Audio port is not running")]
    NotRunning,

    /// No captured chunk arrived in time
    #[error("Timed out after {0}ms waiting for audio")]
    ReadTimeout(u64),

    /// Playback queue stayed full past the deadline
    #[error("Timed out after {0}ms writing audio")]
    WriteTimeout(u64),

    /// Resampling failed
    #[error("Resampling failed: {0}")]
    ResampleFailed(String),

    /// PCM layout the utilities cannot handle
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// cpal error
    #[error("cpal error: {0}")]
    CpalError(#[from] cpal::DevicesError),

    /// Device name lookup error
    #[error("Device name error: {0}")]
    DeviceNameError(#[from] cpal::DeviceNameError),

    /// Default config error
    #[error("Default config error: {0}")]
    DefaultConfigError(#[from] cpal::DefaultStreamConfigError),
}

impl AudioError {
    /// Device could not be found or cannot be configured; retrying will not help
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            AudioError::DeviceNotFound(_)
                | AudioError::InvalidDeviceIndex(_)
                | AudioError::UnsupportedConfig(_)
                | AudioError::DeviceNameError(_)
                | AudioError::DefaultConfigError(_)
        )
    }

    /// Fault in opening or running a stream; the port instance is unusable
    pub fn is_stream_error(&self) -> bool {
        matches!(
            self,
            AudioError::StreamBuildFailed(_)
                | AudioError::StreamError(_)
                | AudioError::AlreadyRunning(_)
                | AudioError::NotRunning
                | AudioError::CpalError(_)
        )
    }

    /// Read or write timed out; the caller may simply try again
    pub fn is_transfer_error(&self) -> bool {
        matches!(self, AudioError::ReadTimeout(_) | AudioError::WriteTimeout(_))
    }
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
