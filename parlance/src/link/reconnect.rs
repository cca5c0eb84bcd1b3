//! Reconnection with exponential backoff
//!
//! [`ReconnectionPolicy`] is the pure part: retry number in, delay out.
//! [`ReconnectionHandler`] runs one reconnect cycle against a connect
//! closure and tracks where it is.

use crate::link::error::{LinkError, LinkResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Whether retrying an error can help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Give up immediately
    Fatal,
    /// Retry after a delay
    Transient,
}

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectionPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Total connection attempts per cycle, the immediate first one included
    pub max_retries: u32,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: 5,
        }
    }
}

impl ReconnectionPolicy {
    /// Delay before retry `retry` (1-based), without jitter
    ///
    /// `min(base * multiplier^(retry - 1), max)`; zero for the first attempt.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = (retry - 1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// [`delay_for`](Self::delay_for) scaled by a uniform jitter in [0.5, 1.0]
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        self.delay_for(retry).mul_f64(jitter)
    }

    /// Authentication failures are fatal; everything else is transient
    pub fn classify(error: &LinkError) -> ErrorClass {
        if error.is_authentication() {
            ErrorClass::Fatal
        } else {
            ErrorClass::Transient
        }
    }
}

/// Where a reconnect cycle stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconnectionState {
    Idle,
    Connecting,
    Connected,
    Failed,
}

/// Runs reconnect cycles
///
/// # Example
/// ```
/// use parlance_lib::link::reconnect::{ReconnectionHandler, ReconnectionPolicy};
/// use parlance_lib::link::LinkError;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let policy = ReconnectionPolicy {
///         base_delay: Duration::from_millis(1),
///         ..ReconnectionPolicy::default()
///     };
///     let mut handler = ReconnectionHandler::new(policy);
///     let mut attempts = 0;
///     let result = handler
///         .reconnect_with_backoff(|| {
///             attempts += 1;
///             let attempt = attempts;
///             async move {
///                 if attempt < 2 {
///                     Err(LinkError::Connection("refused".into()))
///                 } else {
///                     Ok(())
///                 }
///             }
///         })
///         .await;
///     assert!(result.is_ok());
///     assert_eq!(handler.retry_count(), 0);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectionHandler {
    policy: ReconnectionPolicy,
    retry_count: u32,
    state: ReconnectionState,
}

impl ReconnectionHandler {
    pub fn new(policy: ReconnectionPolicy) -> Self {
        Self {
            policy,
            retry_count: 0,
            state: ReconnectionState::Idle,
        }
    }

    pub fn reset(&mut self) {
        self.retry_count = 0;
        self.state = ReconnectionState::Idle;
    }

    pub fn state(&self) -> ReconnectionState {
        self.state
    }

    /// Failed attempts in the current cycle
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn policy(&self) -> &ReconnectionPolicy {
        &self.policy
    }

    /// Call `connect` until it succeeds, fails fatally, or attempts run out
    ///
    /// The first attempt is immediate; retry `n` waits
    /// [`ReconnectionPolicy::jittered_delay`]`(n)` first.
    ///
    /// # Errors
    /// - The connect error itself when it is fatal.
    /// - `LinkError::RetriesExhausted` once `max_retries` attempts failed.
    pub async fn reconnect_with_backoff<F, Fut, T>(&mut self, mut connect: F) -> LinkResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LinkResult<T>>,
    {
        self.state = ReconnectionState::Connecting;
        self.retry_count = 0;
        let max_attempts = self.policy.max_retries.max(1);

        loop {
            if self.retry_count > 0 {
                let delay = self.policy.jittered_delay(self.retry_count);
                info!(
                    attempt = self.retry_count + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnection attempt scheduled"
                );
                tokio::time::sleep(delay).await;
            } else {
                info!("Initial connection attempt");
            }

            match connect().await {
                Ok(value) => {
                    info!(attempts = self.retry_count + 1, "Connection established");
                    self.reset();
                    self.state = ReconnectionState::Connected;
                    return Ok(value);
                }
                Err(e) if ReconnectionPolicy::classify(&e) == ErrorClass::Fatal => {
                    error!(error = %e, "Authentication failed, not retrying");
                    self.state = ReconnectionState::Failed;
                    return Err(e);
                }
                Err(e) => {
                    self.retry_count += 1;
                    warn!(attempt = self.retry_count, error = %e, "Connection attempt failed");

                    if self.retry_count >= max_attempts {
                        error!(max_attempts, "Max retries exceeded, giving up");
                        self.state = ReconnectionState::Failed;
                        return Err(LinkError::RetriesExhausted(max_attempts));
                    }
                }
            }
        }
    }
}

impl Default for ReconnectionHandler {
    fn default() -> Self {
        Self::new(ReconnectionPolicy::default())
    }
}
