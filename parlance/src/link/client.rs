//! One streaming translation session, kept alive across failures
//!
//! [`TranslationLink`] owns a session from a [`SessionConnector`], a
//! background receive task feeding a bounded audio queue, and the
//! reconnection machinery. All methods take `&self`, so a link is shared
//! between a send loop and a receive loop through an `Arc`.

use crate::link::error::{LinkError, LinkResult};
use crate::link::messages::SessionSetup;
use crate::link::reconnect::{ReconnectionHandler, ReconnectionPolicy};
use crate::link::session::{LinkState, SessionConnector, SessionHalves, SessionSender};
use crate::link::stats::{LinkCounters, LinkStats};
use crate::link::tasks::{lock_transcripts, receive_task, ReceiveContext, SharedTranscripts, Transcripts};
use crate::link::timeout::{SessionTimeoutTracker, DEFAULT_SESSION_TIMEOUT, RECONNECT_BUFFER};
use arc_swap::{ArcSwap, ArcSwapOption};
use futures_util::stream::{self, Stream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runtime behaviour of a link
#[derive(Debug, Clone, PartialEq)]
pub struct LinkOptions {
    /// Reconnect on expiry or a dead session instead of surfacing an error
    pub enable_auto_reconnect: bool,
    /// Longest single wait in [`TranslationLink::next_audio`]
    pub receive_poll_interval: Duration,
    /// Bound of the received-audio queue
    pub receive_queue_capacity: usize,
    pub session_timeout: Duration,
    pub session_buffer: Duration,
    pub reconnect: ReconnectionPolicy,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            enable_auto_reconnect: true,
            receive_poll_interval: Duration::from_secs(1),
            receive_queue_capacity: 100,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            session_buffer: RECONNECT_BUFFER,
            reconnect: ReconnectionPolicy::default(),
        }
    }
}

/// A translation session that reconnects itself
///
/// # Example
/// ```no_run
/// use parlance_lib::link::{GeminiConnector, LinkOptions, Provider, SessionSetup, TranslationLink};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let connector = GeminiConnector::new(
///         Provider::GoogleAi { api_key: "key".into() },
///         Duration::from_secs(10),
///     );
///     let setup = SessionSetup {
///         model: "gemini-live-2.5-flash-preview-native-audio".into(),
///         language_code: "ja-JP".into(),
///         ..SessionSetup::default()
///     };
///     let link = TranslationLink::new("outgoing", setup, LinkOptions::default(), Arc::new(connector));
///
///     link.connect().await.unwrap();
///     link.send(&[0u8; 3200]).await.unwrap();
///     if let Ok(Some(pcm)) = link.next_audio().await {
///         println!("{} bytes of translated audio", pcm.len());
///     }
///     link.disconnect().await;
/// }
/// ```
pub struct TranslationLink {
    label: String,
    setup: SessionSetup,
    options: LinkOptions,
    connector: Arc<dyn SessionConnector>,
    state: ArcSwap<LinkState>,
    sender: Mutex<Option<Box<dyn SessionSender>>>,
    audio_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    reconnection: Mutex<ReconnectionHandler>,
    exhausted: AtomicBool,
    /// Bumped on every established session
    generation: AtomicU64,
    expiring: Arc<AtomicBool>,
    task_alive: Arc<AtomicBool>,
    tracker: SessionTimeoutTracker,
    counters: Arc<LinkCounters>,
    transcripts: SharedTranscripts,
    connected_at: ArcSwapOption<Instant>,
}

impl TranslationLink {
    pub fn new(
        label: impl Into<String>,
        setup: SessionSetup,
        options: LinkOptions,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        let tracker = SessionTimeoutTracker::new(options.session_timeout, options.session_buffer);
        let reconnection = ReconnectionHandler::new(options.reconnect);
        Self {
            label: label.into(),
            setup,
            options,
            connector,
            state: ArcSwap::from_pointee(LinkState::Disconnected),
            sender: Mutex::new(None),
            audio_rx: Mutex::new(None),
            receive_task: Mutex::new(None),
            reconnection: Mutex::new(reconnection),
            exhausted: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            expiring: Arc::new(AtomicBool::new(false)),
            task_alive: Arc::new(AtomicBool::new(false)),
            tracker,
            counters: Arc::new(LinkCounters::new()),
            transcripts: SharedTranscripts::default(),
            connected_at: ArcSwapOption::empty(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn setup(&self) -> &SessionSetup {
        &self.setup
    }

    pub fn options(&self) -> &LinkOptions {
        &self.options
    }

    pub fn state(&self) -> LinkState {
        **self.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Between sessions: connecting or reconnecting
    pub fn is_transitioning(&self) -> bool {
        matches!(self.state(), LinkState::Connecting | LinkState::Reconnecting)
    }

    /// The retry budget ran out; the link will not connect again
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    pub fn tracker(&self) -> &SessionTimeoutTracker {
        &self.tracker
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.state.swap(Arc::new(state));
        if *previous != state {
            debug!(link = %self.label, from = %previous, to = %state, "Link state changed");
        }
    }

    /// Open a session
    ///
    /// No-op when already connected.
    ///
    /// # Errors
    /// - `LinkError::Exhausted` after a failed reconnect cycle.
    /// - Whatever the connector returns; the link is then in `Error`.
    pub async fn connect(&self) -> LinkResult<()> {
        if self.is_exhausted() {
            return Err(LinkError::Exhausted);
        }

        let _cycle = self.reconnection.lock().await;
        if self.is_connected() {
            debug!(link = %self.label, "Already connected");
            return Ok(());
        }

        self.teardown().await;
        info!(link = %self.label, language = %self.setup.language_code, "Connecting link");
        self.establish(LinkState::Error).await.inspect_err(|e| {
            error!(link = %self.label, error = %e, "Link connection failed");
        })
    }

    async fn establish(&self, failure_state: LinkState) -> LinkResult<()> {
        self.set_state(LinkState::Connecting);
        self.expiring.store(false, Ordering::Release);

        match self.connector.connect(&self.setup).await {
            Ok(halves) => {
                self.install(halves).await;
                Ok(())
            }
            Err(e) => {
                self.counters.record_error();
                self.set_state(failure_state);
                Err(e)
            }
        }
    }

    async fn install(&self, halves: SessionHalves) {
        let (audio_tx, audio_rx) = mpsc::channel(self.options.receive_queue_capacity.max(1));
        self.task_alive.store(true, Ordering::Release);

        let ctx = ReceiveContext {
            label: self.label.clone(),
            audio_tx,
            counters: Arc::clone(&self.counters),
            transcripts: Arc::clone(&self.transcripts),
            expiring: Arc::clone(&self.expiring),
            alive: Arc::clone(&self.task_alive),
            input_transcription: self.setup.input_transcription,
            output_transcription: self.setup.output_transcription,
        };
        let handle = tokio::spawn(receive_task(halves.receiver, ctx));

        *self.sender.lock().await = Some(halves.sender);
        *self.audio_rx.lock().await = Some(audio_rx);
        *self.receive_task.lock().await = Some(handle);

        self.tracker.start_session();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.connected_at.store(Some(Arc::new(Instant::now())));
        self.set_state(LinkState::Connected);
        info!(link = %self.label, "Link connected");
    }

    /// Stop the receive task and close the current session, if any
    async fn teardown(&self) {
        if let Some(handle) = self.receive_task.lock().await.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(link = %self.label, error = %e, "Receive task panicked");
                }
            }
        }

        if let Some(mut sender) = self.sender.lock().await.take() {
            if let Err(e) = sender.close().await {
                debug!(link = %self.label, error = %e, "Session close failed");
            }
        }

        self.audio_rx.lock().await.take();
        self.task_alive.store(false, Ordering::Release);
        self.tracker.end_session();
        self.connected_at.store(None);
    }

    /// Send one chunk of 16kHz mono s16le PCM
    ///
    /// # Errors
    /// - `LinkError::NotConnected` unless connected.
    /// - `LinkError::SessionExpired` once the server announced the end of
    ///   the session or the ceiling passed.
    /// - `LinkError::SendRejected` when the transport refused the chunk.
    pub async fn send(&self, pcm: &[u8]) -> LinkResult<()> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        if self.session_ending() {
            return Err(LinkError::SessionExpired);
        }

        let mut sender = self.sender.lock().await;
        let sender = sender.as_mut().ok_or(LinkError::NotConnected)?;

        match sender.send_audio(pcm).await {
            Ok(()) => {
                self.counters.record_sent(pcm.len());
                Ok(())
            }
            Err(e) => {
                self.counters.record_error();
                if self.session_ending() {
                    warn!(link = %self.label, error = %e, "Send failed on an expiring session");
                    Err(LinkError::SessionExpired)
                } else {
                    warn!(link = %self.label, error = %e, "Audio chunk rejected");
                    Err(LinkError::SendRejected(e.to_string()))
                }
            }
        }
    }

    fn session_ending(&self) -> bool {
        self.expiring.load(Ordering::Acquire) || self.tracker.is_expired()
    }

    fn near_ceiling(&self) -> bool {
        self.tracker.is_tracking() && self.tracker.session_duration() >= self.tracker.threshold()
    }

    fn is_healthy(&self) -> bool {
        self.is_connected()
            && self.task_alive.load(Ordering::Acquire)
            && !self.expiring.load(Ordering::Acquire)
            && !self.near_ceiling()
    }

    /// Wait up to one poll interval for translated audio
    ///
    /// `Ok(None)` means nothing arrived in time. Idle polls double as health
    /// checks: an expiring session or a dead receive task triggers
    /// [`reconnect`](Self::reconnect) when auto-reconnect is on.
    ///
    /// # Errors
    /// - `LinkError::Exhausted` once the link failed terminally.
    /// - `LinkError::NotConnected` when there is no session.
    /// - `LinkError::SessionExpiring` or `LinkError::ConnectionLost` when
    ///   auto-reconnect is off.
    pub async fn next_audio(&self) -> LinkResult<Option<Vec<u8>>> {
        if self.is_exhausted() {
            return Err(LinkError::Exhausted);
        }

        let interval = self.options.receive_poll_interval;
        let polled = {
            let mut audio_rx = self.audio_rx.lock().await;
            match audio_rx.as_mut() {
                Some(rx) => Some(tokio::time::timeout(interval, rx.recv()).await),
                None => None,
            }
        };

        match polled {
            Some(Ok(Some(pcm))) => return Ok(Some(pcm)),
            Some(Ok(None)) => debug!(link = %self.label, "Audio queue closed"),
            Some(Err(_)) => {}
            None if self.is_transitioning() => {
                tokio::time::sleep(interval).await;
                return Ok(None);
            }
            None => return Err(LinkError::NotConnected),
        }

        self.check_health().await.map(|_| None)
    }

    async fn check_health(&self) -> LinkResult<()> {
        if !self.is_connected() {
            return Ok(());
        }

        let expiring = self.expiring.load(Ordering::Acquire) || self.tracker.should_reconnect();
        let dead = !self.task_alive.load(Ordering::Acquire);
        if !expiring && !dead {
            return Ok(());
        }

        if self.options.enable_auto_reconnect {
            info!(link = %self.label, expiring, dead, "Proactive reconnection");
            self.reconnect().await
        } else if expiring {
            Err(LinkError::SessionExpiring)
        } else {
            Err(LinkError::ConnectionLost("receive task ended".into()))
        }
    }

    /// Translated audio as a stream
    ///
    /// Ends after the link is disconnected, or after yielding its first error.
    pub fn receive(&self) -> impl Stream<Item = LinkResult<Vec<u8>>> + Send + '_ {
        stream::unfold(false, move |done| async move {
            if done {
                return None;
            }
            loop {
                if self.state() == LinkState::Disconnected {
                    return None;
                }
                match self.next_audio().await {
                    Ok(Some(pcm)) => return Some((Ok(pcm), false)),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), true)),
                }
            }
        })
    }

    /// Replace the session with a fresh one
    ///
    /// Concurrent callers are serialised. A caller that finds a healthy
    /// session established while it waited returns without reconnecting.
    ///
    /// # Errors
    /// `LinkError::RetriesExhausted` or `LinkError::Authentication` when the
    /// cycle fails, after which the link is terminal.
    pub async fn reconnect(&self) -> LinkResult<()> {
        let observed = self.generation.load(Ordering::Acquire);
        let mut handler = self.reconnection.lock().await;
        if self.is_exhausted() {
            return Err(LinkError::Exhausted);
        }
        if self.generation.load(Ordering::Acquire) != observed && self.is_healthy() {
            debug!(link = %self.label, "Link already reconnected");
            return Ok(());
        }

        self.set_state(LinkState::Reconnecting);
        self.counters.record_reconnection();
        info!(
            link = %self.label,
            reconnection = self.counters.reconnections(),
            "Reconnecting link"
        );
        self.teardown().await;

        match handler
            .reconnect_with_backoff(|| self.establish(LinkState::Reconnecting))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(link = %self.label, error = %e, "Reconnection failed, link is terminal");
                self.exhausted.store(true, Ordering::Release);
                self.set_state(LinkState::Error);
                Err(e)
            }
        }
    }

    /// Close the session; safe to call in any state
    pub async fn disconnect(&self) {
        let was = self.state();
        self.teardown().await;
        self.set_state(LinkState::Disconnected);
        if was != LinkState::Disconnected {
            info!(link = %self.label, "Link disconnected");
        }
    }

    /// Copy of the transcripts collected so far
    pub fn transcriptions(&self) -> Transcripts {
        lock_transcripts(&self.transcripts).clone()
    }

    pub fn clear_transcriptions(&self) {
        lock_transcripts(&self.transcripts).clear();
    }

    pub fn stats(&self) -> LinkStats {
        let duration = self
            .connected_at
            .load()
            .as_deref()
            .map(Instant::elapsed)
            .unwrap_or_default();
        self.counters.snapshot(self.state(), duration)
    }
}

impl std::fmt::Debug for TranslationLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationLink")
            .field("label", &self.label)
            .field("state", &self.state())
            .field("exhausted", &self.is_exhausted())
            .finish_non_exhaustive()
    }
}

impl Drop for TranslationLink {
    fn drop(&mut self) {
        if let Some(handle) = self.receive_task.get_mut().take() {
            handle.abort();
        }
    }
}
