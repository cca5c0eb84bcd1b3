//! WebSocket connection to the Live `BidiGenerateContent` endpoint
//!
//! Supports Vertex AI (bearer token) and Google AI (API key) endpoints.

use crate::link::error::{LinkError, LinkResult};
use crate::link::messages::{
    decode_server_message, ClientMessage, RealtimeInputMessage, ServerEvent, SessionSetup,
    SetupMessage,
};
use crate::link::session::{SessionConnector, SessionHalves, SessionReceiver, SessionSender};
use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue, StatusCode},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of the WebSocket stream
pub type WsWriter = SplitSink<WsStream, Message>;

/// Read half of the WebSocket stream
pub type WsReader = SplitStream<WsStream>;

/// Which API surface to talk to, with its credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Provider {
    VertexAi {
        project: String,
        #[serde(default = "default_region")]
        region: String,
        /// OAuth2 access token
        #[serde(default)]
        access_token: String,
    },
    GoogleAi {
        #[serde(default)]
        api_key: String,
    },
}

fn default_region() -> String {
    "us-central1".to_string()
}

impl Default for Provider {
    fn default() -> Self {
        Provider::VertexAi {
            project: String::new(),
            region: default_region(),
            access_token: String::new(),
        }
    }
}

// Credentials stay out of logs.
impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::VertexAi {
                project, region, ..
            } => f
                .debug_struct("VertexAi")
                .field("project", project)
                .field("region", region)
                .field("access_token", &"<redacted>")
                .finish(),
            Provider::GoogleAi { .. } => f
                .debug_struct("GoogleAi")
                .field("api_key", &"<redacted>")
                .finish(),
        }
    }
}

impl Provider {
    /// Endpoint URL, including the key for Google AI
    pub fn url(&self) -> String {
        match self {
            Provider::VertexAi { region, .. } => format!(
                "wss://{}-aiplatform.googleapis.com/ws/google.cloud.aiplatform.v1beta1.LlmBidiService/BidiGenerateContent",
                region
            ),
            Provider::GoogleAi { api_key } => format!(
                "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent?key={}",
                api_key
            ),
        }
    }

    /// Fully qualified model path for the setup message
    pub fn model_path(&self, model: &str) -> String {
        match self {
            Provider::VertexAi {
                project, region, ..
            } => format!(
                "projects/{}/locations/{}/publishers/google/models/{}",
                project, region, model
            ),
            Provider::GoogleAi { .. } => format!("models/{}", model),
        }
    }

    /// Host name, for log lines that must not contain the key
    pub fn host(&self) -> String {
        match self {
            Provider::VertexAi { region, .. } => format!("{}-aiplatform.googleapis.com", region),
            Provider::GoogleAi { .. } => "generativelanguage.googleapis.com".to_string(),
        }
    }

    /// Missing credentials or project
    pub fn validate(&self) -> LinkResult<()> {
        match self {
            Provider::VertexAi {
                project,
                region,
                access_token,
            } => {
                if project.trim().is_empty() {
                    return Err(LinkError::InvalidConfig("Vertex AI project is required".into()));
                }
                if region.trim().is_empty() {
                    return Err(LinkError::InvalidConfig("Vertex AI region is required".into()));
                }
                if access_token.trim().is_empty() {
                    return Err(LinkError::InvalidConfig(
                        "Vertex AI access token is required".into(),
                    ));
                }
            }
            Provider::GoogleAi { api_key } => {
                if api_key.trim().is_empty() {
                    return Err(LinkError::InvalidConfig("Google AI API key is required".into()));
                }
            }
        }
        Ok(())
    }
}

/// Session connector over `tokio-tungstenite`
///
/// # Example
/// ```no_run
/// use parlance_lib::link::connection::{GeminiConnector, Provider};
/// use parlance_lib::link::messages::SessionSetup;
/// use parlance_lib::link::session::SessionConnector;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let connector = GeminiConnector::new(
///         Provider::GoogleAi { api_key: "your-api-key".into() },
///         Duration::from_secs(10),
///     );
///     let setup = SessionSetup {
///         model: "gemini-live-2.5-flash-preview".into(),
///         language_code: "ja-JP".into(),
///         ..SessionSetup::default()
///     };
///     let mut halves = connector.connect(&setup).await.unwrap();
///     halves.sender.close().await.unwrap();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct GeminiConnector {
    provider: Provider,
    connect_timeout: Duration,
}

impl GeminiConnector {
    pub fn new(provider: Provider, connect_timeout: Duration) -> Self {
        Self {
            provider,
            connect_timeout,
        }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    fn timeout_error(&self) -> LinkError {
        LinkError::Timeout(self.connect_timeout.as_millis() as u64)
    }

    async fn open(&self) -> LinkResult<WsStream> {
        let mut request = self.provider.url().into_client_request()?;
        if let Provider::VertexAi { access_token, .. } = &self.provider {
            let value = HeaderValue::from_str(&format!("Bearer {}", access_token))
                .map_err(|e| LinkError::InvalidConfig(format!("Invalid access token: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| {
                if let tokio_tungstenite::tungstenite::Error::Http(resp) = &e {
                    let status = resp.status();
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return LinkError::Authentication(format!("HTTP {}", status.as_u16()));
                    }
                }
                LinkError::Connection(e.to_string())
            })?;

        debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(ws_stream)
    }

    /// Read until `setupComplete`, bounded by `deadline`
    async fn await_setup(&self, reader: &mut GeminiReceiver, deadline: Instant) -> LinkResult<()> {
        loop {
            let events = tokio::time::timeout_at(deadline, reader.next_events())
                .await
                .map_err(|_| self.timeout_error())??;

            match events {
                Some(events) if events.contains(&ServerEvent::SetupComplete) => return Ok(()),
                Some(events) => debug!(count = events.len(), "Ignoring events before setup completed"),
                None => {
                    return Err(LinkError::Connection(
                        "session closed before setup completed".into(),
                    ))
                }
            }
        }
    }
}

#[async_trait]
impl SessionConnector for GeminiConnector {
    async fn connect(&self, setup: &SessionSetup) -> LinkResult<SessionHalves> {
        let deadline = Instant::now() + self.connect_timeout;
        info!(
            host = %self.provider.host(),
            model = %setup.model,
            language = %setup.language_code,
            "Connecting to translation service"
        );

        let (mut writer, reader) = self.open().await?.split();
        let mut reader = GeminiReceiver { reader };

        let message = ClientMessage::Setup(SetupMessage::new(
            self.provider.model_path(&setup.model),
            setup,
        ));
        let json = serde_json::to_string(&message)?;
        debug!(bytes = json.len(), "Sending setup message");
        writer.send(Message::Text(json.into())).await?;

        self.await_setup(&mut reader, deadline).await?;
        info!(host = %self.provider.host(), "Translation session ready");

        Ok(SessionHalves::new(
            GeminiSender {
                writer,
                closed: false,
            },
            reader,
        ))
    }
}

/// Write half of a live session
pub struct GeminiSender {
    writer: WsWriter,
    closed: bool,
}

#[async_trait]
impl SessionSender for GeminiSender {
    async fn send_audio(&mut self, pcm: &[u8]) -> LinkResult<()> {
        if self.closed {
            return Err(LinkError::NotConnected);
        }

        let json = serde_json::to_string(&ClientMessage::RealtimeInput(
            RealtimeInputMessage::audio(pcm),
        ))?;
        self.writer.send(Message::Text(json.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> LinkResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        info!("Closing WebSocket connection");
        self.writer.close().await?;
        Ok(())
    }
}

/// Read half of a live session
pub struct GeminiReceiver {
    reader: WsReader,
}

#[async_trait]
impl SessionReceiver for GeminiReceiver {
    async fn next_events(&mut self) -> LinkResult<Option<Vec<ServerEvent>>> {
        while let Some(frame) = self.reader.next().await {
            match frame? {
                Message::Text(text) => return decode_server_message(&text).map(Some),
                // The service frames its JSON as binary
                Message::Binary(data) => {
                    let text = std::str::from_utf8(&data).map_err(|e| {
                        LinkError::Protocol(format!("binary frame is not UTF-8: {}", e))
                    })?;
                    return decode_server_message(text).map(Some);
                }
                Message::Close(frame) => {
                    match &frame {
                        Some(frame) => info!(code = %frame.code, reason = %frame.reason, "Received close frame"),
                        None => info!("Received close frame"),
                    }
                    return Ok(None);
                }
                Message::Ping(data) => {
                    // Pong is queued by the library and flushed with the next write
                    debug!(len = data.len(), "Received ping");
                }
                Message::Pong(_) => debug!("Received pong"),
                Message::Frame(_) => warn!("Received raw frame"),
            }
        }

        info!("WebSocket stream ended");
        Ok(None)
    }
}
