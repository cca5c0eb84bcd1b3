use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Hard session ceiling imposed by the service
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(600);

/// How long before the ceiling to reconnect
pub const RECONNECT_BUFFER: Duration = Duration::from_secs(30);

/// Tracks session age against the service's duration ceiling
///
/// Shared by reference between the send and receive paths, so the start
/// instant lives in an [`ArcSwapOption`].
#[derive(Debug)]
pub struct SessionTimeoutTracker {
    session_timeout: Duration,
    reconnect_buffer: Duration,
    started_at: ArcSwapOption<Instant>,
}

impl SessionTimeoutTracker {
    pub fn new(session_timeout: Duration, reconnect_buffer: Duration) -> Self {
        Self {
            session_timeout,
            reconnect_buffer,
            started_at: ArcSwapOption::empty(),
        }
    }

    pub fn start_session(&self) {
        self.start_session_at(Instant::now());
    }

    /// Start tracking from a given instant
    pub fn start_session_at(&self, started_at: Instant) {
        self.started_at.store(Some(Arc::new(started_at)));
        debug!("Session timeout tracking started");
    }

    pub fn end_session(&self) {
        if self.started_at.swap(None).is_some() {
            debug!("Session timeout tracking ended");
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.started_at.load().is_some()
    }

    /// Age of the current session; zero when none is tracked
    pub fn session_duration(&self) -> Duration {
        self.started_at
            .load()
            .as_deref()
            .map(|start| start.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Elapsed time at which to reconnect proactively
    pub fn threshold(&self) -> Duration {
        self.session_timeout.saturating_sub(self.reconnect_buffer)
    }

    /// Whether the session is within the buffer of the ceiling
    pub fn should_reconnect(&self) -> bool {
        if !self.is_tracking() {
            return false;
        }

        let duration = self.session_duration();
        if duration >= self.threshold() {
            warn!(
                elapsed_secs = duration.as_secs_f64(),
                timeout_secs = self.session_timeout.as_secs_f64(),
                "Session approaching timeout, proactive reconnection recommended"
            );
            return true;
        }
        false
    }

    /// Whether the ceiling itself has passed
    pub fn is_expired(&self) -> bool {
        self.is_tracking() && self.session_duration() >= self.session_timeout
    }

    /// Time left before a proactive reconnect is due
    ///
    /// `None` when no session is tracked, zero once past the threshold.
    pub fn time_until_reconnect(&self) -> Option<Duration> {
        if !self.is_tracking() {
            return None;
        }
        Some(self.threshold().saturating_sub(self.session_duration()))
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub fn reconnect_buffer(&self) -> Duration {
        self.reconnect_buffer
    }
}

impl Default for SessionTimeoutTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT, RECONNECT_BUFFER)
    }
}
