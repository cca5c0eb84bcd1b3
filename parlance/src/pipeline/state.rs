use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::{PipelineError, PipelineResult};

/// Which translation directions run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Microphone to the virtual output device
    #[default]
    Outgoing,
    /// Loopback device to the speakers
    Incoming,
    /// Both, on independent links
    Bidirectional,
}

impl PipelineMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Outgoing => "outgoing",
            Self::Incoming => "incoming",
            Self::Bidirectional => "bidirectional",
        }
    }

    /// Directions in start and shutdown order
    pub fn directions(&self) -> &'static [Direction] {
        match self {
            Self::Outgoing => &[Direction::Outgoing],
            Self::Incoming => &[Direction::Incoming],
            Self::Bidirectional => &[Direction::Outgoing, Direction::Incoming],
        }
    }

    pub fn runs(&self, direction: Direction) -> bool {
        self.directions().contains(&direction)
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One input, link and output chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Outgoing => "outgoing",
            Self::Incoming => "incoming",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pipeline lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Error => "ERROR",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition_to(&self, to: PipelineState) -> bool {
        use PipelineState::*;

        matches!(
            (self, to),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Starting, Stopping)
                | (Running, Error)
                | (Running, Stopping)
                | (Error, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pipeline state with lock-free reads and change notifications
///
/// Shared between the orchestrator and its tasks; any task may move the
/// pipeline to `Error`. Listeners see changes in the order they were made.
pub struct StateManager {
    state: ArcSwap<PipelineState>,
    listeners: Mutex<Vec<mpsc::Sender<PipelineState>>>,
}

impl StateManager {
    /// # Examples
    ///
    /// ```
    /// use parlance_lib::pipeline::{PipelineState, StateManager};
    ///
    /// let manager = StateManager::new();
    /// assert_eq!(manager.current(), PipelineState::Stopped);
    /// assert!(manager.transition(PipelineState::Starting).is_ok());
    /// assert!(manager.transition(PipelineState::Stopped).is_err());
    /// ```
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(PipelineState::Stopped),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> PipelineState {
        **self.state.load()
    }

    /// Move to `to` if that is legal from the current state
    ///
    /// Atomic with respect to concurrent transitions: two tasks racing to
    /// `Error` see exactly one succeed.
    ///
    /// # Errors
    /// [`PipelineError::InvalidTransition`] if the move is not allowed.
    pub fn transition(&self, to: PipelineState) -> PipelineResult<()> {
        // Held across the swap so notifications keep the change order
        let listeners = self.lock_listeners();
        loop {
            let current = self.state.load_full();
            if !current.can_transition_to(to) {
                return Err(PipelineError::InvalidTransition { from: *current, to });
            }

            let previous = self.state.compare_and_swap(&current, Arc::new(to));
            if Arc::ptr_eq(&previous, &current) {
                tracing::debug!(from = %current, to = %to, "Pipeline state changed");
                notify(&listeners, to);
                return Ok(());
            }
        }
    }

    /// Set the state without validation
    pub fn force_set(&self, state: PipelineState) {
        let listeners = self.lock_listeners();
        self.state.store(Arc::new(state));
        notify(&listeners, state);
    }

    /// Receive every subsequent state change
    ///
    /// A listener that falls more than 32 changes behind misses the newer
    /// ones.
    pub fn subscribe(&self) -> mpsc::Receiver<PipelineState> {
        let (tx, rx) = mpsc::channel(32);
        self.lock_listeners().push(tx);
        rx
    }

    /// Drop listeners whose receivers are gone
    pub fn cleanup_listeners(&self) {
        self.lock_listeners().retain(|tx| !tx.is_closed());
    }

    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<mpsc::Sender<PipelineState>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn notify(listeners: &[mpsc::Sender<PipelineState>], state: PipelineState) {
    for listener in listeners {
        let _ = listener.try_send(state);
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_mode_directions() {
        assert_eq!(PipelineMode::Outgoing.directions(), &[Direction::Outgoing]);
        assert_eq!(PipelineMode::Incoming.directions(), &[Direction::Incoming]);
        assert!(PipelineMode::Bidirectional.runs(Direction::Outgoing));
        assert!(PipelineMode::Bidirectional.runs(Direction::Incoming));
        assert!(!PipelineMode::Incoming.runs(Direction::Outgoing));
    }

    #[test]
    fn test_mode_serde() {
        let mode: PipelineMode = serde_json::from_str("\"bidirectional\"").unwrap();
        assert_eq!(mode, PipelineMode::Bidirectional);
        assert_eq!(serde_json::to_string(&PipelineState::Running).unwrap(), "\"RUNNING\"");
    }

    #[test]
    fn test_lifecycle() {
        let manager = StateManager::new();
        manager.transition(PipelineState::Starting).unwrap();
        manager.transition(PipelineState::Running).unwrap();
        manager.transition(PipelineState::Stopping).unwrap();
        manager.transition(PipelineState::Stopped).unwrap();
        assert!(manager.current().is_stopped());
    }

    #[test]
    fn test_error_paths() {
        let manager = StateManager::new();
        assert!(manager.transition(PipelineState::Error).is_err());

        manager.transition(PipelineState::Starting).unwrap();
        manager.transition(PipelineState::Error).unwrap();

        // A second failing task cannot re-enter Error
        let result = manager.transition(PipelineState::Error);
        assert!(matches!(
            result,
            Err(PipelineError::InvalidTransition {
                from: PipelineState::Error,
                to: PipelineState::Error
            })
        ));

        manager.transition(PipelineState::Stopping).unwrap();
        manager.transition(PipelineState::Stopped).unwrap();
    }

    #[test]
    fn test_invalid_transitions() {
        let manager = StateManager::new();
        assert!(manager.transition(PipelineState::Running).is_err());
        assert!(manager.transition(PipelineState::Stopping).is_err());

        manager.force_set(PipelineState::Running);
        assert!(manager.transition(PipelineState::Starting).is_err());
    }

    #[tokio::test]
    async fn test_listener_receives_changes() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        manager.transition(PipelineState::Starting).unwrap();
        manager.transition(PipelineState::Running).unwrap();

        let first = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert_eq!(first.unwrap(), Some(PipelineState::Starting));
    }

    #[test]
    fn test_listener_notified_without_runtime() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        manager.transition(PipelineState::Starting).unwrap();
        manager.force_set(PipelineState::Stopped);

        assert_eq!(rx.try_recv().ok(), Some(PipelineState::Starting));
        assert_eq!(rx.try_recv().ok(), Some(PipelineState::Stopped));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_listener_order_on_worker_threads() {
        let manager = Arc::new(StateManager::new());
        let mut rx = manager.subscribe();

        for _ in 0..5 {
            let worker = Arc::clone(&manager);
            tokio::spawn(async move {
                worker.transition(PipelineState::Starting).unwrap();
                worker.transition(PipelineState::Running).unwrap();
                worker.transition(PipelineState::Stopping).unwrap();
                worker.transition(PipelineState::Stopped).unwrap();
            })
            .await
            .unwrap();
        }

        let mut seen = Vec::new();
        while let Ok(state) = rx.try_recv() {
            seen.push(state);
        }
        assert_eq!(seen.len(), 20);
        for cycle in seen.chunks(4) {
            assert_eq!(
                cycle,
                &[
                    PipelineState::Starting,
                    PipelineState::Running,
                    PipelineState::Stopping,
                    PipelineState::Stopped
                ]
            );
        }
    }

    #[test]
    fn test_listener_count() {
        let manager = StateManager::new();
        let rx1 = manager.subscribe();
        let _rx2 = manager.subscribe();
        assert_eq!(manager.listener_count(), 2);

        drop(rx1);
        manager.cleanup_listeners();
        assert_eq!(manager.listener_count(), 1);
    }
}
