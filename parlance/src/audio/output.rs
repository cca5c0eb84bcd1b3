use crate::audio::backend::{
    ActiveStream, AudioBackend, PlaybackCallback, StreamFault, StreamFormat, StreamRequest,
};
use crate::audio::device::DeviceHandle;
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::format::buffer_bytes;
use crate::audio::playback_queue::{PlaybackQueue, PlaybackWriter, WriteRejected};
use crate::audio::port::{PlaybackStats, PortCounters, PortState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Interval between queue checks in `write` and `drain`
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shorter back-off used while `write` waits for room
const WRITE_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Playback port settings
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPortConfig {
    /// Preferred rate; `None` uses the device default
    pub sample_rate: Option<u32>,
    /// Channels of the data written to the port
    pub channels: u16,
    pub frames_per_buffer: usize,
    /// Playback queue capacity, in buffers
    pub queue_capacity: usize,
    /// Silence buffers queued before the stream opens
    pub prebuffer_chunks: usize,
}

impl OutputPortConfig {
    /// Translated speech: 24kHz mono
    pub fn speech() -> Self {
        Self {
            sample_rate: Some(24000),
            channels: 1,
            frames_per_buffer: 1024,
            queue_capacity: 100,
            prebuffer_chunks: 2,
        }
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_prebuffer_chunks(mut self, chunks: usize) -> Self {
        self.prebuffer_chunks = chunks;
        self
    }

    pub fn with_frames_per_buffer(mut self, frames: usize) -> Self {
        self.frames_per_buffer = frames;
        self
    }

    /// Size of one silence buffer in bytes
    pub fn silence_bytes(&self) -> usize {
        buffer_bytes(self.frames_per_buffer, self.channels)
    }

    fn request(&self) -> StreamRequest {
        StreamRequest {
            sample_rate: self.sample_rate,
            channels: self.channels,
            frames_per_buffer: self.frames_per_buffer,
        }
    }
}

impl Default for OutputPortConfig {
    fn default() -> Self {
        Self::speech()
    }
}

/// Audio playback port
///
/// Writers enqueue PCM from async code or any thread; the driver callback
/// pulls it back out and never sees a short buffer.
pub struct AudioOutputPort {
    label: String,
    config: OutputPortConfig,
    device: Option<DeviceHandle>,
    backend: Arc<dyn AudioBackend>,
    state: PortState,
    stream: Option<Box<dyn ActiveStream>>,
    writer: Option<PlaybackWriter>,
    format: Option<StreamFormat>,
    fault: StreamFault,
    counters: Arc<PortCounters>,
}

impl AudioOutputPort {
    pub fn new(
        label: impl Into<String>,
        config: OutputPortConfig,
        device: Option<DeviceHandle>,
        backend: Arc<dyn AudioBackend>,
    ) -> Self {
        Self {
            label: label.into(),
            config,
            device,
            backend,
            state: PortState::Stopped,
            stream: None,
            writer: None,
            format: None,
            fault: StreamFault::new(),
            counters: Arc::new(PortCounters::new()),
        }
    }

    /// Prebuffer silence and open the playback stream
    ///
    /// # Errors
    /// Same contract as [`AudioInputPort::start`](crate::audio::AudioInputPort::start).
    pub fn start(&mut self) -> AudioResult<()> {
        if !self.state.is_stopped() {
            warn!(port = %self.label, state = %self.state, "Playback port already active");
            return Err(AudioError::AlreadyRunning(self.state));
        }

        self.state = PortState::Starting;
        info!(
            port = %self.label,
            device = self.device.as_ref().map(|d| d.name.as_str()).unwrap_or("default"),
            "Starting audio playback"
        );

        match self.open() {
            Ok(()) => {
                self.state = PortState::Running;
                info!(port = %self.label, "Audio playback started");
                Ok(())
            }
            Err(e) if e.is_device_error() => {
                error!(port = %self.label, error = %e, "Playback device unavailable");
                self.release();
                self.state = PortState::Stopped;
                Err(e)
            }
            Err(e) => {
                error!(port = %self.label, error = %e, "Failed to start audio playback");
                self.release();
                self.state = PortState::Error;
                Err(e)
            }
        }
    }

    fn open(&mut self) -> AudioResult<()> {
        let format = self
            .backend
            .playback_format(self.device.as_ref(), &self.config.request())?;

        self.counters.reset();
        self.fault.clear();

        let (writer, feeder) =
            PlaybackQueue::new(self.config.queue_capacity, Arc::clone(&self.counters));

        let silence = self.config.silence_bytes();
        let prebuffer = self.config.prebuffer_chunks.min(self.config.queue_capacity);
        for _ in 0..prebuffer {
            if writer.try_write(vec![0u8; silence]).is_err() {
                break;
            }
        }

        debug!(
            port = %self.label,
            rate = format.sample_rate,
            device_channels = format.device_channels,
            prebuffered = writer.len(),
            silence_bytes = silence,
            "Playback format negotiated"
        );

        let callback = PlaybackCallback::new(
            feeder,
            &format,
            self.config.channels,
            self.fault.clone(),
        );
        let stream = self
            .backend
            .open_playback(self.device.as_ref(), &format, callback)?;

        self.stream = Some(stream);
        self.writer = Some(writer);
        self.format = Some(format);
        Ok(())
    }

    fn running_writer(&mut self) -> AudioResult<&PlaybackWriter> {
        if !self.state.is_running() {
            return Err(AudioError::NotRunning);
        }
        if self.fault.is_raised() {
            self.state = PortState::Error;
            return Err(AudioError::StreamError(format!(
                "{} stream reported a fault",
                self.label
            )));
        }
        self.writer.as_ref().ok_or(AudioError::NotRunning)
    }

    /// Enqueue `data`, waiting up to `timeout` for room
    ///
    /// # Errors
    /// - `AudioError::WriteTimeout` if the queue stayed full.
    /// - `AudioError::NotRunning` / `AudioError::StreamError` as for reads.
    pub async fn write(&mut self, data: Vec<u8>, timeout: Duration) -> AudioResult<()> {
        let deadline = Instant::now() + timeout;
        let mut pending = data;

        loop {
            let writer = self.running_writer()?;
            match writer.try_write(pending) {
                Ok(()) => return Ok(()),
                Err((WriteRejected::Closed, _)) => return Err(AudioError::NotRunning),
                Err((WriteRejected::Full, data)) => pending = data,
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AudioError::WriteTimeout(timeout.as_millis() as u64));
            }
            tokio::time::sleep(WRITE_RETRY_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Enqueue without waiting; `false` if the port is not running or full
    pub fn write_nowait(&self, data: Vec<u8>) -> bool {
        if !self.state.is_running() {
            return false;
        }
        self.writer
            .as_ref()
            .map(|w| w.try_write(data).is_ok())
            .unwrap_or(false)
    }

    /// Cloneable writer for producers on other threads
    pub fn writer(&self) -> Option<PlaybackWriter> {
        self.writer.clone()
    }

    /// Wait until everything queued has been played
    ///
    /// Gives up after `timeout` with a warning; that is not an error.
    pub async fn drain(&self, timeout: Duration) -> AudioResult<()> {
        let Some(writer) = self.writer.as_ref() else {
            return Ok(());
        };

        let deadline = Instant::now() + timeout;
        while !writer.is_empty() {
            if Instant::now() >= deadline {
                warn!(
                    port = %self.label,
                    remaining = writer.len(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Playback drain timed out"
                );
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        debug!(port = %self.label, "Playback queue drained");
        Ok(())
    }

    /// Stop playback, drop queued audio and release the device
    pub fn stop(&mut self) {
        if self.state.is_stopped() && self.stream.is_none() {
            return;
        }

        info!(port = %self.label, state = %self.state, "Stopping audio playback");
        self.state = PortState::Stopping;
        self.release();
        self.state = PortState::Stopped;
        debug!(port = %self.label, "Audio playback stopped");
    }

    fn release(&mut self) {
        // The feeder lives inside the callback, so closing the stream drops
        // every queued buffer with it.
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        if let Some(writer) = self.writer.take() {
            let discarded = writer.len();
            if discarded > 0 {
                debug!(port = %self.label, discarded, "Discarded queued playback");
            }
        }
        self.counters.set_queue_depth(0);
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            state: self.state,
            chunks_played: self.counters.chunks(),
            bytes_played: self.counters.bytes(),
            underruns: self.counters.dropped(),
            queue_size: self.counters.queue_depth(),
        }
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &OutputPortConfig {
        &self.config
    }

    pub fn device(&self) -> Option<&DeviceHandle> {
        self.device.as_ref()
    }

    /// Rate the device actually plays at, once started
    pub fn sample_rate(&self) -> Option<u32> {
        self.format.map(|f| f.sample_rate)
    }

    pub fn counters(&self) -> Arc<PortCounters> {
        Arc::clone(&self.counters)
    }
}

impl Drop for AudioOutputPort {
    fn drop(&mut self) {
        self.stop();
    }
}
