use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "parlance=debug,parlance_lib=debug,warn";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Initialize logging with tracing
///
/// Reads the filter from `RUST_LOG`, falling back to debug output for this
/// crate and warnings for everything else.
///
/// # Panics
/// If a global subscriber is already installed. Use [`try_init_logging`]
/// where that can happen.
///
/// # Example
///
/// ```no_run
/// use parlance_lib::utils::logging::init_logging;
///
/// init_logging();
/// ```
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter())
        .init();

    tracing::info!("Parlance logging initialized");
}

/// Like [`init_logging`], but returns `false` instead of panicking when a
/// subscriber is already set
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(filter())
        .try_init()
        .is_ok()
}
