//! WebSocket message types for the Live `BidiGenerateContent` protocol
//!
//! Client messages are plain serde structs. Server envelopes carry several
//! optional members at once, so they are decoded into a flat list of
//! [`ServerEvent`]s with an explicit [`ServerEvent::Other`] arm for anything
//! this client does not act on.

use crate::link::error::{LinkError, LinkResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// MIME type of the audio the client streams
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Rate of the audio the client streams
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Rate of the audio the service returns
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

// ============================================================================
// Client -> Server Messages
// ============================================================================

/// What a session is set up with, independent of the endpoint
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSetup {
    /// Model name without any path prefix
    pub model: String,
    /// BCP-47 target language code
    pub language_code: String,
    pub voice_name: Option<String>,
    pub system_instruction: Option<String>,
    pub input_transcription: bool,
    pub output_transcription: bool,
    pub affective_dialog: bool,
}

/// First message on every session
///
/// # Example
/// ```
/// use parlance_lib::link::messages::{SessionSetup, SetupMessage};
///
/// let setup = SessionSetup {
///     model: "gemini-live".into(),
///     language_code: "ja-JP".into(),
///     ..SessionSetup::default()
/// };
/// let json = serde_json::to_string(&SetupMessage::new("models/gemini-live", &setup)).unwrap();
/// assert!(json.contains("\"languageCode\":\"ja-JP\""));
/// ```
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified model path
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_affective_dialog: Option<bool>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub language_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_config: Option<VoiceConfig>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Text content, used for the system instruction
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TextPart {
    pub text: String,
}

/// Empty object that switches a transcription stream on
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioTranscriptionConfig {}

impl SetupMessage {
    /// Build the setup for `model_path` from endpoint-independent settings
    pub fn new(model_path: impl Into<String>, setup: &SessionSetup) -> Self {
        let voice_config = setup.voice_name.as_ref().map(|name| VoiceConfig {
            prebuilt_voice_config: PrebuiltVoiceConfig {
                voice_name: name.clone(),
            },
        });

        Self {
            setup: Setup {
                model: model_path.into(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        language_code: setup.language_code.clone(),
                        voice_config,
                    },
                },
                system_instruction: setup.system_instruction.as_ref().map(|text| Content {
                    parts: vec![TextPart { text: text.clone() }],
                }),
                input_audio_transcription: setup
                    .input_transcription
                    .then_some(AudioTranscriptionConfig {}),
                output_audio_transcription: setup
                    .output_transcription
                    .then_some(AudioTranscriptionConfig {}),
                enable_affective_dialog: setup.affective_dialog.then_some(true),
            },
        }
    }
}

/// Streamed audio input
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RealtimeInput {
    pub audio: Blob,
}

/// Base64 payload with its MIME type
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

impl RealtimeInputMessage {
    /// Wrap raw 16kHz mono s16le PCM
    pub fn audio(pcm: &[u8]) -> Self {
        Self {
            realtime_input: RealtimeInput {
                audio: Blob {
                    mime_type: Some(INPUT_MIME_TYPE.to_string()),
                    data: STANDARD.encode(pcm),
                },
            },
        }
    }
}

/// Union type for all client messages
#[derive(Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum ClientMessage {
    Setup(SetupMessage),
    RealtimeInput(RealtimeInputMessage),
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

/// Raw server envelope; every member is optional
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerEnvelope {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    #[serde(default)]
    pub inline_data: Option<Blob>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    /// Protobuf duration string, e.g. `"12.5s"`
    #[serde(default)]
    pub time_left: Option<String>,
}

/// Which side of the conversation a transcript belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptSource {
    /// What the local speaker said
    Input,
    /// What the service said back
    Output,
}

/// One decoded unit of server output
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Translated PCM, 24kHz mono s16le
    Audio(Vec<u8>),
    Transcript {
        source: TranscriptSource,
        text: String,
    },
    SetupComplete,
    TurnComplete,
    Interrupted,
    /// The service will close the session soon
    GoAway { time_left: Option<Duration> },
    /// Anything this client does not act on
    Other,
}

impl ServerEvent {
    pub fn is_audio(&self) -> bool {
        matches!(self, ServerEvent::Audio(_))
    }

    pub fn audio(&self) -> Option<&[u8]> {
        match self {
            ServerEvent::Audio(data) => Some(data),
            _ => None,
        }
    }
}

impl ServerEnvelope {
    /// Flatten the envelope into events, decoding inline audio
    ///
    /// # Errors
    /// Returns `LinkError::Protocol` if inline audio is not valid base64.
    pub fn into_events(self) -> LinkResult<Vec<ServerEvent>> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(ServerEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
                if let Some(blob) = part.inline_data {
                    let data = STANDARD
                        .decode(blob.data.as_bytes())
                        .map_err(|e| LinkError::Protocol(format!("invalid inline audio: {}", e)))?;
                    events.push(ServerEvent::Audio(data));
                }
                if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    events.push(ServerEvent::Transcript {
                        source: TranscriptSource::Output,
                        text,
                    });
                }
            }

            let transcripts = [
                (TranscriptSource::Input, content.input_transcription),
                (TranscriptSource::Output, content.output_transcription),
            ];
            for (source, transcription) in transcripts {
                if let Some(text) = transcription.and_then(|t| t.text).filter(|t| !t.is_empty()) {
                    events.push(ServerEvent::Transcript { source, text });
                }
            }

            if content.interrupted == Some(true) {
                events.push(ServerEvent::Interrupted);
            }
            if content.turn_complete == Some(true) {
                events.push(ServerEvent::TurnComplete);
            }
        }

        if let Some(go_away) = self.go_away {
            events.push(ServerEvent::GoAway {
                time_left: go_away.time_left.as_deref().and_then(parse_duration),
            });
        }

        if events.is_empty() {
            events.push(ServerEvent::Other);
        }
        Ok(events)
    }
}

/// Decode one server text frame
pub fn decode_server_message(text: &str) -> LinkResult<Vec<ServerEvent>> {
    let envelope: ServerEnvelope = serde_json::from_str(text)?;
    envelope.into_events()
}

/// Parse a protobuf JSON duration (`"30s"`, `"1.5s"`)
pub fn parse_duration(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().strip_suffix('s')?.parse().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds))
}
