//! Application-wide error aggregate
//!
//! Collects the module errors into one `AppError`, classifies them into
//! the six error kinds the pipeline reacts to, and gives each a stable
//! code, a user-facing message and a recovery hint.
//!
//! # Example
//!
//! ```
//! use parlance_lib::link::LinkError;
//! use parlance_lib::utils::error::{AppError, ErrorKind};
//!
//! let err = AppError::from(LinkError::Authentication("bad key".into()));
//! assert_eq!(err.kind(), Some(ErrorKind::LinkAuthenticationError));
//! assert!(!err.is_recoverable());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::error::AudioError;
use crate::config::ConfigError;
use crate::link::error::LinkError;
use crate::pipeline::error::PipelineError;

/// Application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How the pipeline reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Device missing or unusable; fatal, raised immediately
    DeviceError,
    /// Stream could not be opened or broke; fatal for the port instance
    StreamError,
    /// Credentials rejected; aborts reconnection
    LinkAuthenticationError,
    /// Connection failure; absorbed by backoff, then terminal
    LinkConnectionError,
    /// Session ceiling reached; drives a reconnect
    LinkSessionExpiredError,
    /// One chunk failed to move; counted
    AudioTransferError,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceError => "DeviceError",
            Self::StreamError => "StreamError",
            Self::LinkAuthenticationError => "LinkAuthenticationError",
            Self::LinkConnectionError => "LinkConnectionError",
            Self::LinkSessionExpiredError => "LinkSessionExpiredError",
            Self::AudioTransferError => "AudioTransferError",
        }
    }

    /// Whether the pipeline keeps going after an error of this kind
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LinkConnectionError | Self::LinkSessionExpiredError | Self::AudioTransferError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stable error code for scripts and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Audio
    AudioDeviceNotFound,
    AudioInvalidDevice,
    AudioUnsupportedConfig,
    AudioStreamError,
    AudioTimeout,
    AudioResampleFailed,

    // Link
    LinkAuthFailed,
    LinkConnectionFailed,
    LinkTimeout,
    LinkConnectionLost,
    LinkRetriesExhausted,
    LinkSessionExpired,
    LinkSendRejected,
    LinkProtocolError,

    // Pipeline
    PipelineInvalidState,
    PipelineSendFailures,

    // Config
    ConfigLoadFailed,
    ConfigInvalid,

    InternalError,
}

/// Everything a caller needs to report an error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub code: ErrorCode,
    pub kind: Option<ErrorKind>,
    /// Message fit for an operator
    pub message: String,
    /// Underlying error text, for logs
    pub detail: Option<String>,
    pub recovery_hint: Option<String>,
    pub recoverable: bool,
}

impl ErrorContext {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: None,
            message: message.into(),
            detail: None,
            recovery_hint: None,
            recoverable: true,
        }
    }

    pub fn with_kind(mut self, kind: Option<ErrorKind>) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_recovery_hint(mut self, hint: impl Into<String>) -> Self {
        self.recovery_hint = Some(hint.into());
        self
    }

    pub fn not_recoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }
}

fn audio_kind(e: &AudioError) -> ErrorKind {
    if e.is_device_error() {
        ErrorKind::DeviceError
    } else if e.is_transfer_error() {
        ErrorKind::AudioTransferError
    } else {
        ErrorKind::StreamError
    }
}

fn link_kind(e: &LinkError) -> ErrorKind {
    if e.is_authentication() {
        ErrorKind::LinkAuthenticationError
    } else if e.is_session_expired() {
        ErrorKind::LinkSessionExpiredError
    } else if e.is_transfer_error() {
        ErrorKind::AudioTransferError
    } else {
        ErrorKind::LinkConnectionError
    }
}

impl AppError {
    /// Error kind; `None` for configuration and internal errors
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            AppError::Audio(e) => Some(audio_kind(e)),
            AppError::Link(e) => Some(link_kind(e)),
            AppError::Pipeline(e) => match e {
                PipelineError::DeviceDiscovery(_) => Some(ErrorKind::DeviceError),
                PipelineError::Audio(e) => Some(audio_kind(e)),
                PipelineError::Link(e) => Some(link_kind(e)),
                PipelineError::SendFailures(_) => Some(ErrorKind::AudioTransferError),
                PipelineError::InvalidTransition { .. } => None,
            },
            AppError::Config(_) | AppError::Internal(_) => None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Audio(e) | AppError::Pipeline(PipelineError::Audio(e)) => audio_code(e),
            AppError::Link(e) | AppError::Pipeline(PipelineError::Link(e)) => link_code(e),
            AppError::Pipeline(PipelineError::DeviceDiscovery(_)) => ErrorCode::AudioDeviceNotFound,
            AppError::Pipeline(PipelineError::InvalidTransition { .. }) => {
                ErrorCode::PipelineInvalidState
            }
            AppError::Pipeline(PipelineError::SendFailures(_)) => ErrorCode::PipelineSendFailures,
            AppError::Config(ConfigError::Io(_)) => ErrorCode::ConfigLoadFailed,
            AppError::Config(_) => ErrorCode::ConfigInvalid,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Short message for the operator
    pub fn user_message(&self) -> String {
        let message = match self.code() {
            ErrorCode::AudioDeviceNotFound => "No matching audio device was found",
            ErrorCode::AudioInvalidDevice => "The configured audio device index does not exist",
            ErrorCode::AudioUnsupportedConfig => "The audio device does not support the requested format",
            ErrorCode::AudioStreamError => "The audio stream failed",
            ErrorCode::AudioTimeout => "Audio did not arrive in time",
            ErrorCode::AudioResampleFailed => "Audio resampling failed",
            ErrorCode::LinkAuthFailed => "The translation service rejected the credentials",
            ErrorCode::LinkConnectionFailed => "Could not connect to the translation service",
            ErrorCode::LinkTimeout => "The translation service did not answer in time",
            ErrorCode::LinkConnectionLost => "The connection to the translation service was lost",
            ErrorCode::LinkRetriesExhausted => "Reconnecting to the translation service failed",
            ErrorCode::LinkSessionExpired => "The translation session expired",
            ErrorCode::LinkSendRejected => "Audio could not be sent to the translation service",
            ErrorCode::LinkProtocolError => "The translation service sent an unexpected message",
            ErrorCode::PipelineInvalidState => "The pipeline cannot do that in its current state",
            ErrorCode::PipelineSendFailures => "Too many audio chunks were rejected in a row",
            ErrorCode::ConfigLoadFailed => "The configuration file could not be read",
            ErrorCode::ConfigInvalid => "The configuration is invalid",
            ErrorCode::InternalError => "Internal error",
        };
        message.to_string()
    }

    pub fn recovery_hint(&self) -> Option<String> {
        let hint = match self.code() {
            ErrorCode::AudioDeviceNotFound | ErrorCode::AudioInvalidDevice => {
                "Check the device indices in the pipeline section of the configuration"
            }
            ErrorCode::AudioUnsupportedConfig => "Try a different sample rate for this device",
            ErrorCode::LinkAuthFailed => "Check the provider credentials in the link section",
            ErrorCode::LinkConnectionFailed | ErrorCode::LinkTimeout => {
                "Check the network connection and try again"
            }
            ErrorCode::LinkRetriesExhausted => "Restart the pipeline once the service is reachable",
            ErrorCode::ConfigLoadFailed | ErrorCode::ConfigInvalid => {
                "Fix the configuration file and restart"
            }
            _ => return None,
        };
        Some(hint.to_string())
    }

    /// Whether the pipeline can carry on after this error
    pub fn is_recoverable(&self) -> bool {
        self.kind().is_some_and(|kind| kind.is_recoverable())
    }

    pub fn context(&self) -> ErrorContext {
        let mut ctx = ErrorContext::new(self.code(), self.user_message())
            .with_kind(self.kind())
            .with_detail(self.to_string());
        ctx.recovery_hint = self.recovery_hint();
        if !self.is_recoverable() {
            ctx = ctx.not_recoverable();
        }
        ctx
    }
}

fn audio_code(e: &AudioError) -> ErrorCode {
    match e {
        AudioError::DeviceNotFound(_) | AudioError::DeviceNameError(_) => {
            ErrorCode::AudioDeviceNotFound
        }
        AudioError::InvalidDeviceIndex(_) => ErrorCode::AudioInvalidDevice,
        AudioError::UnsupportedConfig(_)
        | AudioError::UnsupportedFormat(_)
        | AudioError::DefaultConfigError(_) => ErrorCode::AudioUnsupportedConfig,
        AudioError::ReadTimeout(_) | AudioError::WriteTimeout(_) => ErrorCode::AudioTimeout,
        AudioError::ResampleFailed(_) => ErrorCode::AudioResampleFailed,
        _ => ErrorCode::AudioStreamError,
    }
}

fn link_code(e: &LinkError) -> ErrorCode {
    match e {
        LinkError::Authentication(_) => ErrorCode::LinkAuthFailed,
        LinkError::Timeout(_) => ErrorCode::LinkTimeout,
        LinkError::ConnectionLost(_) => ErrorCode::LinkConnectionLost,
        LinkError::RetriesExhausted(_) | LinkError::Exhausted => ErrorCode::LinkRetriesExhausted,
        LinkError::SessionExpired | LinkError::SessionExpiring => ErrorCode::LinkSessionExpired,
        LinkError::SendRejected(_) => ErrorCode::LinkSendRejected,
        LinkError::Protocol(_) | LinkError::Serialization(_) => ErrorCode::LinkProtocolError,
        _ => ErrorCode::LinkConnectionFailed,
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Internal(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}
