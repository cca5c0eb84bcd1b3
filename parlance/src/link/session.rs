//! Transport seam for translation sessions
//!
//! [`TranslationLink`](crate::link::TranslationLink) only ever talks to a
//! [`SessionConnector`]. The WebSocket implementation lives in
//! [`connection`](crate::link::connection); tests plug in scripted ones.

use crate::link::error::LinkResult;
use crate::link::messages::{ServerEvent, SessionSetup};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a translation link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl LinkState {
    pub fn name(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "DISCONNECTED",
            LinkState::Connecting => "CONNECTING",
            LinkState::Connected => "CONNECTED",
            LinkState::Reconnecting => "RECONNECTING",
            LinkState::Error => "ERROR",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opens sessions against one endpoint
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Open a session and complete its setup handshake
    ///
    /// Implementations map credential rejections to
    /// `LinkError::Authentication` and bound the whole handshake by their
    /// connect timeout.
    async fn connect(&self, setup: &SessionSetup) -> LinkResult<SessionHalves>;
}

/// Write half of an open session
#[async_trait]
pub trait SessionSender: Send {
    /// Send one chunk of 16kHz mono s16le PCM
    async fn send_audio(&mut self, pcm: &[u8]) -> LinkResult<()>;

    /// Close the session; safe to call more than once
    async fn close(&mut self) -> LinkResult<()>;
}

/// Read half of an open session
#[async_trait]
pub trait SessionReceiver: Send {
    /// Events from the next server message
    ///
    /// `Ok(None)` means the remote closed the session.
    async fn next_events(&mut self) -> LinkResult<Option<Vec<ServerEvent>>>;
}

/// Both halves of an open session
pub struct SessionHalves {
    pub sender: Box<dyn SessionSender>,
    pub receiver: Box<dyn SessionReceiver>,
}

impl SessionHalves {
    pub fn new(sender: impl SessionSender + 'static, receiver: impl SessionReceiver + 'static) -> Self {
        Self {
            sender: Box::new(sender),
            receiver: Box::new(receiver),
        }
    }
}

impl fmt::Debug for SessionHalves {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHalves").finish_non_exhaustive()
    }
}
