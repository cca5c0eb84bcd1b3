use thiserror::Error;

use super::state::PipelineState;
use crate::audio::AudioError;
use crate::link::LinkError;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No device could be found for a role and none was configured
    #[error("Device discovery failed: {0}")]
    DeviceDiscovery(String),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Invalid pipeline transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    /// Too many rejected sends in a row
    #[error("Send failed {0} times in a row")]
    SendFailures(u32),
}

impl PipelineError {
    /// Device lookup or device configuration failed
    pub fn is_device_error(&self) -> bool {
        match self {
            PipelineError::DeviceDiscovery(_) => true,
            PipelineError::Audio(e) => e.is_device_error(),
            _ => false,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
