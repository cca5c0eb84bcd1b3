//! Send and receive loops of one pipeline direction
//!
//! Each loop owns its port while it runs and hands it back when it ends,
//! so the orchestrator can release ports in a fixed order. A loop that
//! fails marks the pipeline `Error` and counts against its own direction
//! only.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::error::{PipelineError, PipelineResult};
use super::state::{Direction, PipelineState, StateManager};
use super::stats::DirectionCounters;
use crate::audio::format::{bytes_to_samples, samples_to_bytes};
use crate::audio::{AudioError, AudioInputPort, AudioOutputPort, StreamResampler};
use crate::link::messages::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::link::{LinkError, TranslationLink};

/// What both loops of a direction share
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub direction: Direction,
    pub link: Arc<TranslationLink>,
    pub counters: Arc<DirectionCounters>,
    pub state: Arc<StateManager>,
    pub shutdown: watch::Receiver<bool>,
}

impl LoopContext {
    fn fail(&self, task: &str, e: &PipelineError) {
        error!(direction = %self.direction, task, error = %e, "Pipeline task failed");
        self.counters.record_error();
        if let Err(e) = self.state.transition(PipelineState::Error) {
            debug!(direction = %self.direction, error = %e, "Pipeline already leaving Running");
        }
    }
}

/// Resampler for `from -> to`, or `None` when the rates match
fn resampler_for(from: u32, to: u32) -> PipelineResult<Option<StreamResampler>> {
    if from == to {
        return Ok(None);
    }
    Ok(Some(StreamResampler::new(from, to)?))
}

/// Convert a chunk; `None` when the resampler is still filling a block
fn convert(resampler: &mut Option<StreamResampler>, pcm: Vec<u8>) -> PipelineResult<Option<Vec<u8>>> {
    let Some(resampler) = resampler.as_mut() else {
        return Ok(Some(pcm));
    };
    let samples = resampler.process(&bytes_to_samples(&pcm))?;
    if samples.is_empty() {
        return Ok(None);
    }
    Ok(Some(samples_to_bytes(&samples)))
}

/// Input port to link
pub(crate) struct SendLoop {
    pub ctx: LoopContext,
    pub input: AudioInputPort,
    pub read_timeout: Duration,
    pub max_consecutive_failures: u32,
}

impl SendLoop {
    pub async fn run(mut self) -> AudioInputPort {
        info!(direction = %self.ctx.direction, "Send loop started");
        match self.pump().await {
            Ok(()) => info!(direction = %self.ctx.direction, "Send loop finished"),
            Err(e) => self.ctx.fail("send", &e),
        }
        self.input
    }

    async fn pump(&mut self) -> PipelineResult<()> {
        let input_rate = self.input.sample_rate().ok_or(AudioError::NotRunning)?;
        let mut resampler = resampler_for(input_rate, INPUT_SAMPLE_RATE)?;
        if resampler.is_some() {
            info!(
                direction = %self.ctx.direction,
                from = input_rate,
                to = INPUT_SAMPLE_RATE,
                "Resampling captured audio"
            );
        }

        let mut failures = 0u32;
        loop {
            if *self.ctx.shutdown.borrow() {
                break;
            }

            let read = tokio::select! {
                biased;
                _ = self.ctx.shutdown.changed() => break,
                read = self.input.read_next(self.read_timeout) => read,
            };

            let chunk = match read {
                Ok(chunk) => chunk,
                Err(AudioError::ReadTimeout(ms)) => {
                    debug!(direction = %self.ctx.direction, timeout_ms = ms, "No audio captured");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.ctx.counters.record_captured();

            let Some(pcm) = convert(&mut resampler, chunk.into_data())? else {
                continue;
            };

            match self.ctx.link.send(&pcm).await {
                Ok(()) => {
                    failures = 0;
                    self.ctx.counters.record_sent();
                }
                Err(LinkError::SessionExpired) => {
                    info!(direction = %self.ctx.direction, "Session expired, reconnecting");
                    tokio::select! {
                        biased;
                        _ = self.ctx.shutdown.changed() => break,
                        result = self.ctx.link.reconnect() => result?,
                    }
                }
                Err(LinkError::NotConnected) if self.ctx.link.is_transitioning() => {
                    debug!(direction = %self.ctx.direction, "Link reconnecting, chunk dropped");
                }
                Err(LinkError::SendRejected(reason)) => {
                    failures += 1;
                    warn!(
                        direction = %self.ctx.direction,
                        failures,
                        reason = %reason,
                        "Audio chunk rejected"
                    );
                    if failures > self.max_consecutive_failures {
                        return Err(PipelineError::SendFailures(failures));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

/// Link to output port
pub(crate) struct ReceiveLoop {
    pub ctx: LoopContext,
    pub output: AudioOutputPort,
    pub write_timeout: Duration,
}

impl ReceiveLoop {
    pub async fn run(mut self) -> AudioOutputPort {
        info!(direction = %self.ctx.direction, "Receive loop started");
        match self.pump().await {
            Ok(()) => info!(direction = %self.ctx.direction, "Receive loop finished"),
            Err(e) => self.ctx.fail("receive", &e),
        }
        self.output
    }

    async fn pump(&mut self) -> PipelineResult<()> {
        let output_rate = self.output.sample_rate().ok_or(AudioError::NotRunning)?;
        let mut resampler = resampler_for(OUTPUT_SAMPLE_RATE, output_rate)?;

        let link = Arc::clone(&self.ctx.link);
        let mut audio = std::pin::pin!(link.receive());

        loop {
            if *self.ctx.shutdown.borrow() {
                break;
            }

            let pcm = tokio::select! {
                biased;
                _ = self.ctx.shutdown.changed() => break,
                next = audio.next() => match next {
                    Some(Ok(pcm)) => pcm,
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        info!(direction = %self.ctx.direction, "Link closed");
                        break;
                    }
                },
            };
            self.ctx.counters.record_received();

            let Some(pcm) = convert(&mut resampler, pcm)? else {
                continue;
            };

            match self.output.write(pcm, self.write_timeout).await {
                Ok(()) => self.ctx.counters.record_played(),
                Err(AudioError::WriteTimeout(ms)) => {
                    warn!(direction = %self.ctx.direction, timeout_ms = ms, "Playback queue full, chunk dropped");
                    self.ctx.counters.record_error();
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}
