//! Translation pipeline orchestration
//!
//! A pipeline runs one or two directions. Each direction is an input port,
//! a translation link and an output port, joined by a send loop and a
//! receive loop.

/// Pipeline error types
pub mod error;

/// Send and receive loops
pub(crate) mod loops;

/// Pipeline orchestrator
pub mod orchestrator;

/// Modes, directions and lifecycle state
pub mod state;

/// Per-direction counters and statistics
pub mod stats;

pub use error::{PipelineError, PipelineResult};
pub use orchestrator::TranslationPipeline;
pub use state::{Direction, PipelineMode, PipelineState, StateManager};
pub use stats::{DirectionCounters, DirectionStats, PipelineStats};
