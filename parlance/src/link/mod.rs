//! Streaming link to the remote translation service
//!
//! Speaks the Gemini Live `BidiGenerateContent` protocol over WebSocket and
//! keeps sessions alive across transient failures and the service's
//! session-duration ceiling.

/// `TranslationLink`, one self-healing session
pub mod client;

/// WebSocket connector and endpoint selection
pub mod connection;

/// Link error types
pub mod error;

/// Target languages
pub mod language;

/// Wire message types
pub mod messages;

/// Backoff policy and reconnect cycles
pub mod reconnect;

/// Transport seam and link state
pub mod session;

/// Link counters and statistics
pub mod stats;

/// Background receive task
pub mod tasks;

/// Session age tracking
pub mod timeout;

// Re-export commonly used types
pub use client::{LinkOptions, TranslationLink};
pub use connection::{GeminiConnector, Provider};
pub use error::{LinkError, LinkResult};
pub use language::SupportedLanguage;
pub use messages::{ServerEvent, SessionSetup, TranscriptSource};
pub use reconnect::{ReconnectionHandler, ReconnectionPolicy, ReconnectionState};
pub use session::{LinkState, SessionConnector, SessionHalves, SessionReceiver, SessionSender};
pub use stats::{LinkCounters, LinkStats};
pub use tasks::Transcripts;
pub use timeout::SessionTimeoutTracker;
