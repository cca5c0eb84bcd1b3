//! Background receive task of a translation link
//!
//! Drains a [`SessionReceiver`] and fans its events out: audio to the link's
//! bounded queue, transcripts to the shared buffers, `goAway` to the
//! expiring flag.

use crate::link::messages::{ServerEvent, TranscriptSource};
use crate::link::session::SessionReceiver;
use crate::link::stats::LinkCounters;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Transcript text collected during a link's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcripts {
    pub input: Vec<String>,
    pub output: Vec<String>,
}

impl Transcripts {
    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }

    fn push(&mut self, source: TranscriptSource, text: String) {
        match source {
            TranscriptSource::Input => self.input.push(text),
            TranscriptSource::Output => self.output.push(text),
        }
    }
}

pub(crate) type SharedTranscripts = Arc<Mutex<Transcripts>>;

/// Lock the transcript buffers, ignoring poison
pub(crate) fn lock_transcripts(
    transcripts: &SharedTranscripts,
) -> std::sync::MutexGuard<'_, Transcripts> {
    transcripts.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the receive task writes to
pub(crate) struct ReceiveContext {
    pub label: String,
    pub audio_tx: mpsc::Sender<Vec<u8>>,
    pub counters: Arc<LinkCounters>,
    pub transcripts: SharedTranscripts,
    pub expiring: Arc<AtomicBool>,
    pub alive: Arc<AtomicBool>,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

impl ReceiveContext {
    fn wants(&self, source: TranscriptSource) -> bool {
        match source {
            TranscriptSource::Input => self.input_transcription,
            TranscriptSource::Output => self.output_transcription,
        }
    }
}

/// Clears the alive flag however the task ends, abort included
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Receive until the session closes, errors, or the link stops listening
pub(crate) async fn receive_task(mut receiver: Box<dyn SessionReceiver>, ctx: ReceiveContext) {
    ctx.alive.store(true, Ordering::Release);
    let _guard = AliveGuard(Arc::clone(&ctx.alive));

    info!(link = %ctx.label, "Receive task started");
    let mut audio_chunks = 0u64;

    loop {
        let events = match receiver.next_events().await {
            Ok(Some(events)) => events,
            Ok(None) => {
                info!(link = %ctx.label, "Session closed by server");
                break;
            }
            Err(e) => {
                error!(link = %ctx.label, error = %e, "Receive failed");
                ctx.counters.record_error();
                break;
            }
        };

        for event in events {
            match event {
                ServerEvent::Audio(pcm) => {
                    ctx.counters.record_received(pcm.len());
                    audio_chunks += 1;
                    // Blocks while the queue is full
                    if ctx.audio_tx.send(pcm).await.is_err() {
                        debug!(link = %ctx.label, "Audio queue closed, stopping receive task");
                        return;
                    }
                }
                ServerEvent::Transcript { source, text } => {
                    if ctx.wants(source) {
                        debug!(link = %ctx.label, ?source, "Transcript: {}", text);
                        lock_transcripts(&ctx.transcripts).push(source, text);
                    }
                }
                ServerEvent::GoAway { time_left } => {
                    warn!(
                        link = %ctx.label,
                        time_left_secs = time_left.map(|t| t.as_secs_f64()),
                        "Server announced session end"
                    );
                    ctx.expiring.store(true, Ordering::Release);
                }
                ServerEvent::Interrupted => {
                    debug!(link = %ctx.label, "Model turn interrupted");
                }
                other => {
                    debug!(link = %ctx.label, "Server event: {:?}", other);
                }
            }
        }
    }

    info!(link = %ctx.label, audio_chunks, "Receive task completed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::error::{LinkError, LinkResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<LinkResult<Option<Vec<ServerEvent>>>>);

    #[async_trait]
    impl SessionReceiver for Scripted {
        async fn next_events(&mut self) -> LinkResult<Option<Vec<ServerEvent>>> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
    }

    fn context(capacity: usize) -> (ReceiveContext, mpsc::Receiver<Vec<u8>>) {
        let (audio_tx, audio_rx) = mpsc::channel(capacity);
        let ctx = ReceiveContext {
            label: "test".into(),
            audio_tx,
            counters: Arc::new(LinkCounters::new()),
            transcripts: SharedTranscripts::default(),
            expiring: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(false)),
            input_transcription: true,
            output_transcription: false,
        };
        (ctx, audio_rx)
    }

    #[tokio::test]
    async fn test_routes_events() {
        let (ctx, mut audio_rx) = context(8);
        let counters = Arc::clone(&ctx.counters);
        let transcripts = Arc::clone(&ctx.transcripts);
        let expiring = Arc::clone(&ctx.expiring);
        let alive = Arc::clone(&ctx.alive);

        let script = Scripted(VecDeque::from(vec![
            Ok(Some(vec![ServerEvent::SetupComplete])),
            Ok(Some(vec![
                ServerEvent::Audio(vec![1, 2, 3, 4]),
                ServerEvent::Transcript {
                    source: TranscriptSource::Input,
                    text: "hello".into(),
                },
                ServerEvent::Transcript {
                    source: TranscriptSource::Output,
                    text: "konnichiwa".into(),
                },
            ])),
            Ok(Some(vec![ServerEvent::GoAway { time_left: None }])),
        ]));

        receive_task(Box::new(script), ctx).await;

        assert_eq!(audio_rx.recv().await, Some(vec![1, 2, 3, 4]));
        let stats = counters.snapshot(crate::link::LinkState::Connected, Default::default());
        assert_eq!(stats.chunks_received, 1);
        assert_eq!(stats.bytes_received, 4);

        let collected = lock_transcripts(&transcripts).clone();
        assert_eq!(collected.input, vec!["hello".to_string()]);
        assert!(collected.output.is_empty(), "output transcription disabled");

        assert!(expiring.load(Ordering::Acquire));
        assert!(!alive.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_error_is_counted() {
        let (ctx, _audio_rx) = context(8);
        let counters = Arc::clone(&ctx.counters);
        let script = Scripted(VecDeque::from(vec![Err(LinkError::ConnectionLost(
            "reset".into(),
        ))]));

        receive_task(Box::new(script), ctx).await;
        assert_eq!(counters.errors(), 1);
    }

    #[tokio::test]
    async fn test_stops_when_queue_dropped() {
        let (ctx, audio_rx) = context(1);
        drop(audio_rx);
        let alive = Arc::clone(&ctx.alive);
        let script = Scripted(VecDeque::from(vec![
            Ok(Some(vec![ServerEvent::Audio(vec![0; 2])])),
            Ok(Some(vec![ServerEvent::Audio(vec![0; 2])])),
        ]));

        receive_task(Box::new(script), ctx).await;
        assert!(!alive.load(Ordering::Acquire));
    }
}
