/// Logging setup
pub mod logging;

/// Error aggregate and classification
pub mod error;

pub use error::{AppError, AppResult, ErrorCode, ErrorContext, ErrorKind};
pub use logging::{init_logging, try_init_logging};
