/// Audio devices, ports and format conversion
pub mod audio;

/// Application configuration
pub mod config;

/// Streaming translation client
pub mod link;

/// Translation pipeline orchestration
pub mod pipeline;

/// Logging and error utilities
pub mod utils;
