use crate::audio::backend::{
    ActiveStream, AudioBackend, CaptureCallback, StreamFault, StreamFormat, StreamRequest,
};
use crate::audio::capture_queue::{CaptureConsumer, CaptureQueue};
use crate::audio::chunk::AudioChunk;
use crate::audio::device::DeviceHandle;
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::port::{CaptureStats, PortCounters, PortState};
use futures_util::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Capture port settings
#[derive(Debug, Clone, PartialEq)]
pub struct InputPortConfig {
    /// Preferred rate; `None` uses the device default
    pub sample_rate: Option<u32>,
    /// Channels opened on the device
    pub capture_channels: u16,
    /// Average each frame pair into one channel before queueing
    pub downmix_to_mono: bool,
    pub frames_per_buffer: usize,
    /// Capture queue capacity, in chunks
    pub queue_capacity: usize,
    /// Per-poll wait used by [`AudioInputPort::stream`]
    pub read_timeout: Duration,
}

impl InputPortConfig {
    /// Microphone: 16kHz mono
    pub fn microphone() -> Self {
        Self {
            sample_rate: Some(16000),
            capture_channels: 1,
            downmix_to_mono: false,
            frames_per_buffer: 1024,
            queue_capacity: 100,
            read_timeout: Duration::from_secs(1),
        }
    }

    /// System audio through a loopback device: 24kHz stereo downmixed to mono
    pub fn loopback() -> Self {
        Self {
            sample_rate: Some(24000),
            capture_channels: 2,
            downmix_to_mono: true,
            ..Self::microphone()
        }
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    pub fn with_frames_per_buffer(mut self, frames: usize) -> Self {
        self.frames_per_buffer = frames;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Channels of the chunks the port hands out
    pub fn chunk_channels(&self) -> u16 {
        if self.downmix_to_mono { 1 } else { self.capture_channels }
    }

    fn request(&self) -> StreamRequest {
        StreamRequest {
            sample_rate: self.sample_rate,
            channels: self.capture_channels,
            frames_per_buffer: self.frames_per_buffer,
        }
    }
}

impl Default for InputPortConfig {
    fn default() -> Self {
        Self::microphone()
    }
}

/// Audio capture port
///
/// Bridges the driver's callback thread to async code: the callback pushes
/// chunks into a bounded [`CaptureQueue`] without ever blocking, and the
/// port reads them back with a timeout.
pub struct AudioInputPort {
    label: String,
    config: InputPortConfig,
    device: Option<DeviceHandle>,
    backend: Arc<dyn AudioBackend>,
    state: PortState,
    stream: Option<Box<dyn ActiveStream>>,
    consumer: Option<CaptureConsumer>,
    format: Option<StreamFormat>,
    fault: StreamFault,
    counters: Arc<PortCounters>,
}

impl AudioInputPort {
    /// Create a stopped port
    ///
    /// `device` of `None` opens the host's default input.
    ///
    /// # Example
    /// ```no_run
    /// use parlance_lib::audio::{AudioInputPort, CpalBackend, InputPortConfig};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let mut mic = AudioInputPort::new(
    ///         "microphone",
    ///         InputPortConfig::microphone(),
    ///         None,
    ///         Arc::new(CpalBackend::new()),
    ///     );
    ///     mic.start().unwrap();
    ///     let chunk = mic.read_next(Duration::from_secs(1)).await.unwrap();
    ///     println!("{} frames at {} Hz", chunk.frames(), chunk.sample_rate());
    ///     mic.stop();
    /// }
    /// ```
    pub fn new(
        label: impl Into<String>,
        config: InputPortConfig,
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
            consumer: None,
            format: None,
            fault: StreamFault::new(),
            counters: Arc::new(PortCounters::new()),
        }
    }

    /// Open the device and begin capturing
    ///
    /// # Errors
    /// - `AudioError::AlreadyRunning` if the port is not stopped; nothing changes.
    /// - Device errors (bad index, unsupported format) leave the port stopped.
    /// - Any other failure leaves the port in `Error` until [`stop`](Self::stop).
    pub fn start(&mut self) -> AudioResult<()> {
        if !self.state.is_stopped() {
            warn!(port = %self.label, state = %self.state, "Capture port already active");
            return Err(AudioError::AlreadyRunning(self.state));
        }

        self.state = PortState::Starting;
        info!(
            port = %self.label,
            device = self.device.as_ref().map(|d| d.name.as_str()).unwrap_or("default"),
            "Starting audio capture"
        );

        match self.open() {
            Ok(()) => {
                self.state = PortState::Running;
                info!(port = %self.label, "Audio capture started");
                Ok(())
            }
            Err(e) if e.is_device_error() => {
                error!(port = %self.label, error = %e, "Capture device unavailable");
                self.release();
                self.state = PortState::Stopped;
                Err(e)
            }
            Err(e) => {
                error!(port = %self.label, error = %e, "Failed to start audio capture");
                self.release();
                self.state = PortState::Error;
                Err(e)
            }
        }
    }

    fn open(&mut self) -> AudioResult<()> {
        let format = self
            .backend
            .capture_format(self.device.as_ref(), &self.config.request())?;

        self.counters.reset();
        self.fault.clear();

        let (producer, consumer) =
            CaptureQueue::new(self.config.queue_capacity, Arc::clone(&self.counters));
        let callback = CaptureCallback::new(
            producer,
            &format,
            self.config.chunk_channels(),
            self.fault.clone(),
        );

        debug!(
            port = %self.label,
            rate = format.sample_rate,
            device_channels = format.device_channels,
            chunk_channels = callback.chunk_channels(),
            capacity = self.config.queue_capacity,
            "Capture format negotiated"
        );

        let stream = self
            .backend
            .open_capture(self.device.as_ref(), &format, callback)?;

        self.stream = Some(stream);
        self.consumer = Some(consumer);
        self.format = Some(format);
        Ok(())
    }

    /// Wait up to `timeout` for the next captured chunk
    ///
    /// # Errors
    /// - `AudioError::ReadTimeout` when nothing arrived in time.
    /// - `AudioError::NotRunning` when the port is not running.
    /// - `AudioError::StreamError` once the driver has reported a fault.
    pub async fn read_next(&mut self, timeout: Duration) -> AudioResult<AudioChunk> {
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

        let consumer = self.consumer.as_mut().ok_or(AudioError::NotRunning)?;
        consumer.pop(timeout).await
    }

    /// Chunks in capture order until the port stops or faults
    ///
    /// Each poll waits `read_timeout`; idle polls are retried so the
    /// sequence only ends when the port leaves `Running`.
    pub fn stream(&mut self) -> impl Stream<Item = AudioChunk> + '_ {
        stream::unfold(self, |port| async move {
            loop {
                let timeout = port.config.read_timeout;
                match port.read_next(timeout).await {
                    Ok(chunk) => return Some((chunk, port)),
                    Err(AudioError::ReadTimeout(_)) => continue,
                    Err(e) => {
                        debug!(port = %port.label, error = %e, "Capture stream ended");
                        return None;
                    }
                }
            }
        })
    }

    /// Stop capturing and release the device
    ///
    /// Safe from any state and safe to call repeatedly. Counters keep their
    /// final values until the next start.
    pub fn stop(&mut self) {
        if self.state.is_stopped() && self.stream.is_none() {
            return;
        }

        info!(port = %self.label, state = %self.state, "Stopping audio capture");
        self.state = PortState::Stopping;
        self.release();
        self.state = PortState::Stopped;
        debug!(port = %self.label, "Audio capture stopped");
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        if let Some(mut consumer) = self.consumer.take() {
            let discarded = consumer.clear();
            if discarded > 0 {
                debug!(port = %self.label, discarded, "Discarded unread chunks");
            }
        }
        self.counters.set_queue_depth(0);
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            state: self.state,
            chunks_captured: self.counters.chunks(),
            bytes_captured: self.counters.bytes(),
            overruns: self.counters.dropped(),
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

    pub fn config(&self) -> &InputPortConfig {
        &self.config
    }

    pub fn device(&self) -> Option<&DeviceHandle> {
        self.device.as_ref()
    }

    /// Rate of the chunks this port delivers, once started
    pub fn sample_rate(&self) -> Option<u32> {
        self.format.map(|f| f.sample_rate)
    }

    pub fn counters(&self) -> Arc<PortCounters> {
        Arc::clone(&self.counters)
    }
}

impl Drop for AudioInputPort {
    fn drop(&mut self) {
        self.stop();
    }
}
