//! Application configuration
//!
//! A single JSON document with three sections: `link`, `audio` and
//! `pipeline`. Every field has a default, so a partial file (or none at
//! all) is valid input.
//!
//! # Example
//!
//! ```no_run
//! use parlance_lib::config::ConfigManager;
//!
//! let config = ConfigManager::load("parlance.json").unwrap();
//! config.validate().unwrap();
//! println!("Translating into {}", config.link.target_language);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::{InputPortConfig, OutputPortConfig};
use crate::link::{LinkOptions, Provider, ReconnectionPolicy, SessionSetup, SupportedLanguage};
use crate::pipeline::PipelineMode;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A value failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub audio: AudioConfig,
    pub pipeline: PipelineConfig,
}

/// Translation service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub target_language: SupportedLanguage,
    pub model: String,
    pub provider: Provider,
    /// Turns on both transcription directions
    pub enable_transcription: bool,
    pub input_transcription: bool,
    pub output_transcription: bool,
    pub enable_affective_dialog: bool,
    pub voice_name: Option<String>,
    pub system_instruction: Option<String>,
    pub enable_auto_reconnect: bool,
    pub connect_timeout_ms: u64,
    pub receive_poll_interval_ms: u64,
    pub receive_queue_capacity: usize,
    pub session_timeout_secs: u64,
    pub session_buffer_secs: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            target_language: SupportedLanguage::default(),
            model: "gemini-live-2.5-flash-preview-native-audio".to_string(),
            provider: Provider::default(),
            enable_transcription: false,
            input_transcription: false,
            output_transcription: false,
            enable_affective_dialog: false,
            voice_name: None,
            system_instruction: None,
            enable_auto_reconnect: true,
            connect_timeout_ms: 10_000,
            receive_poll_interval_ms: 1_000,
            receive_queue_capacity: 100,
            session_timeout_secs: 600,
            session_buffer_secs: 30,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// What every session of this configuration is set up with
    pub fn session_setup(&self) -> SessionSetup {
        SessionSetup {
            model: self.model.clone(),
            language_code: self.target_language.code().to_string(),
            voice_name: self.voice_name.clone(),
            system_instruction: self.system_instruction.clone(),
            input_transcription: self.enable_transcription || self.input_transcription,
            output_transcription: self.enable_transcription || self.output_transcription,
            affective_dialog: self.enable_affective_dialog,
        }
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            enable_auto_reconnect: self.enable_auto_reconnect,
            receive_poll_interval: Duration::from_millis(self.receive_poll_interval_ms),
            receive_queue_capacity: self.receive_queue_capacity,
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            session_buffer: Duration::from_secs(self.session_buffer_secs),
            reconnect: self.reconnect.policy(),
        }
    }
}

/// Backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Total attempts per reconnect cycle
    pub max_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_retries: 5,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectionPolicy {
        ReconnectionPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            max_retries: self.max_retries,
        }
    }
}

/// Audio port settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub frames_per_buffer: usize,
    pub capture_queue_capacity: usize,
    pub playback_queue_capacity: usize,
    /// Silent buffers queued before playback starts
    pub prebuffer_chunks: usize,
    pub mic_sample_rate: u32,
    /// Capture rate of the loopback device
    pub system_sample_rate: u32,
    pub output_sample_rate: u32,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub drain_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frames_per_buffer: 1024,
            capture_queue_capacity: 100,
            playback_queue_capacity: 100,
            prebuffer_chunks: 2,
            mic_sample_rate: 16_000,
            system_sample_rate: 24_000,
            output_sample_rate: 24_000,
            read_timeout_ms: 1_000,
            write_timeout_ms: 1_000,
            drain_timeout_ms: 2_000,
        }
    }
}

impl AudioConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn microphone(&self) -> InputPortConfig {
        InputPortConfig::microphone()
            .with_sample_rate(self.mic_sample_rate)
            .with_frames_per_buffer(self.frames_per_buffer)
            .with_queue_capacity(self.capture_queue_capacity)
            .with_read_timeout(self.read_timeout())
    }

    pub fn loopback(&self) -> InputPortConfig {
        InputPortConfig::loopback()
            .with_sample_rate(self.system_sample_rate)
            .with_frames_per_buffer(self.frames_per_buffer)
            .with_queue_capacity(self.capture_queue_capacity)
            .with_read_timeout(self.read_timeout())
    }

    pub fn playback(&self) -> OutputPortConfig {
        OutputPortConfig::speech()
            .with_sample_rate(self.output_sample_rate)
            .with_frames_per_buffer(self.frames_per_buffer)
            .with_queue_capacity(self.playback_queue_capacity)
            .with_prebuffer_chunks(self.prebuffer_chunks)
    }
}

/// Orchestration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    /// Device indices; `None` picks the role default or auto-discovers
    pub mic_device: Option<usize>,
    pub speaker_device: Option<usize>,
    pub virtual_output_device: Option<usize>,
    pub loopback_device: Option<usize>,
    /// Rejected sends tolerated in a row before the send loop fails
    pub max_consecutive_send_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            mic_device: None,
            speaker_device: None,
            virtual_output_device: None,
            loopback_device: None,
            max_consecutive_send_failures: 10,
        }
    }
}

impl AppConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.link.model.trim().is_empty() {
            return invalid("link.model must not be empty");
        }
        self.link
            .provider
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.link.receive_queue_capacity == 0 {
            return invalid("link.receive_queue_capacity must be positive");
        }
        if self.link.receive_poll_interval_ms == 0 {
            return invalid("link.receive_poll_interval_ms must be positive");
        }
        if self.link.session_buffer_secs >= self.link.session_timeout_secs {
            return invalid("link.session_buffer_secs must be shorter than session_timeout_secs");
        }
        if self.link.reconnect.max_retries == 0 {
            return invalid("link.reconnect.max_retries must be at least 1");
        }
        let multiplier = self.link.reconnect.multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return invalid("link.reconnect.multiplier must be at least 1.0");
        }

        if self.audio.frames_per_buffer == 0 {
            return invalid("audio.frames_per_buffer must be positive");
        }
        if self.audio.capture_queue_capacity == 0 || self.audio.playback_queue_capacity == 0 {
            return invalid("audio queue capacities must be positive");
        }
        if self.audio.mic_sample_rate == 0
            || self.audio.system_sample_rate == 0
            || self.audio.output_sample_rate == 0
        {
            return invalid("audio sample rates must be positive");
        }

        Ok(())
    }
}

/// Loads and saves [`AppConfig`] as JSON
pub struct ConfigManager;

impl ConfigManager {
    /// Read the configuration at `path`; defaults if the file does not exist
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<AppConfig> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Loading config");

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: AppConfig = serde_json::from_str(&content)?;
            tracing::info!(path = %path.display(), "Config loaded successfully");
            Ok(config)
        } else {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Ok(AppConfig::default())
        }
    }

    /// Write `config` to `path`, creating parent directories
    pub fn save(path: impl AsRef<Path>, config: &AppConfig) -> ConfigResult<()> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Saving config");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(path, content)?;

        tracing::info!(path = %path.display(), "Config saved successfully");
        Ok(())
    }
}
