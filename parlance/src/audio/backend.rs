//! Hardware stream backends
//!
//! Ports never talk to cpal directly. They hand a callback object to an
//! [`AudioBackend`], which wires it to a driver thread and returns a guard
//! that keeps the stream alive. [`CpalBackend`] is the real implementation;
//! anything that drives the callbacks itself can stand in for it.

use crate::audio::capture_queue::CaptureProducer;
use crate::audio::chunk::AudioChunk;
use crate::audio::device::{device_at, DeviceHandle};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::format::{downmix_pair, f32_to_i16, i16_to_f32};
use crate::audio::playback_queue::PlaybackFeeder;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize, SupportedStreamConfigRange,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// What a port asks the backend for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    /// Preferred rate; `None` takes the device default
    pub sample_rate: Option<u32>,
    /// Channels the port delivers or consumes
    pub channels: u16,
    pub frames_per_buffer: usize,
}

/// Format a backend actually opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    /// Channels on the device side of the callback
    pub device_channels: u16,
    pub frames_per_buffer: usize,
}

/// Flag raised by a driver's error callback
#[derive(Debug, Clone, Default)]
pub struct StreamFault(Arc<AtomicBool>);

impl StreamFault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Capture-side driver callback
///
/// [`CaptureCallback::on_buffer`] is the entry point the driver thread
/// calls once per hardware buffer.
pub struct CaptureCallback {
    producer: CaptureProducer,
    sample_rate: u32,
    device_channels: u16,
    downmix: bool,
    scratch: Vec<i16>,
    fault: StreamFault,
}

impl CaptureCallback {
    pub(crate) fn new(
        producer: CaptureProducer,
        format: &StreamFormat,
        port_channels: u16,
        fault: StreamFault,
    ) -> Self {
        let downmix = port_channels == 1 && format.device_channels >= 2;
        Self {
            producer,
            sample_rate: format.sample_rate,
            device_channels: format.device_channels,
            downmix,
            scratch: Vec::with_capacity(format.frames_per_buffer),
            fault,
        }
    }

    /// Wrap one interleaved buffer into a chunk and enqueue it
    ///
    /// Returns `false` when the chunk was dropped as an overrun.
    pub fn on_buffer(&mut self, data: &[i16]) -> bool {
        let captured_at = Instant::now();

        let chunk = if self.downmix {
            self.scratch.clear();
            let channels = self.device_channels as usize;
            self.scratch.extend(
                data.chunks_exact(channels)
                    .map(|frame| downmix_pair(frame[0], frame[1])),
            );
            AudioChunk::from_samples(&self.scratch, self.sample_rate, 1, captured_at)
        } else {
            AudioChunk::from_samples(data, self.sample_rate, self.device_channels, captured_at)
        };

        self.producer.push(chunk)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channels of the chunks this callback produces
    pub fn chunk_channels(&self) -> u16 {
        if self.downmix { 1 } else { self.device_channels }
    }

    pub fn fault(&self) -> StreamFault {
        self.fault.clone()
    }
}

/// Playback-side driver callback
pub struct PlaybackCallback {
    feeder: PlaybackFeeder,
    device_channels: u16,
    source_channels: u16,
    scratch: Vec<i16>,
    fault: StreamFault,
}

impl PlaybackCallback {
    pub(crate) fn new(
        feeder: PlaybackFeeder,
        format: &StreamFormat,
        source_channels: u16,
        fault: StreamFault,
    ) -> Self {
        Self {
            feeder,
            device_channels: format.device_channels,
            source_channels,
            scratch: Vec::with_capacity(format.frames_per_buffer),
            fault,
        }
    }

    /// Fill one interleaved device buffer
    ///
    /// Mono sources are copied onto every device channel.
    pub fn fill(&mut self, out: &mut [i16]) {
        if self.device_channels == self.source_channels || self.source_channels != 1 {
            self.feeder.fill(out);
            return;
        }

        let channels = self.device_channels as usize;
        let frames = out.len() / channels;
        self.scratch.resize(frames, 0);
        self.feeder.fill(&mut self.scratch);
        for (frame, sample) in out.chunks_exact_mut(channels).zip(&self.scratch) {
            frame.fill(*sample);
        }
    }

    pub fn fault(&self) -> StreamFault {
        self.fault.clone()
    }
}

/// A running stream; dropping or closing it releases the device
pub trait ActiveStream: Send {
    fn close(self: Box<Self>);
}

/// Opens hardware streams on behalf of the ports
pub trait AudioBackend: Send + Sync {
    /// Work out what format a capture stream will run at
    fn capture_format(
        &self,
        device: Option<&DeviceHandle>,
        request: &StreamRequest,
    ) -> AudioResult<StreamFormat>;

    /// Work out what format a playback stream will run at
    fn playback_format(
        &self,
        device: Option<&DeviceHandle>,
        request: &StreamRequest,
    ) -> AudioResult<StreamFormat>;

    fn open_capture(
        &self,
        device: Option<&DeviceHandle>,
        format: &StreamFormat,
        callback: CaptureCallback,
    ) -> AudioResult<Box<dyn ActiveStream>>;

    fn open_playback(
        &self,
        device: Option<&DeviceHandle>,
        format: &StreamFormat,
        callback: PlaybackCallback,
    ) -> AudioResult<Box<dyn ActiveStream>>;
}

/// `cpal::Stream` is `!Send` on some hosts. The stream is only ever played
/// and dropped through this wrapper, never touched from two threads at once.
struct SendableStream(cpal::Stream);

// SAFETY: the wrapped stream is owned by exactly one port and only dropped.
unsafe impl Send for SendableStream {}

impl ActiveStream for SendableStream {
    fn close(self: Box<Self>) {
        if let Err(e) = self.0.pause() {
            debug!(error = %e, "Pause before close failed");
        }
        drop(self);
    }
}

/// Backend over the default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Capture,
    Playback,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    fn device(&self, handle: Option<&DeviceHandle>, direction: Direction) -> AudioResult<Device> {
        let host = cpal::default_host();
        match handle {
            Some(handle) => device_at(&host, handle.index),
            None => match direction {
                Direction::Capture => host
                    .default_input_device()
                    .ok_or_else(|| AudioError::DeviceNotFound("default input".into())),
                Direction::Playback => host
                    .default_output_device()
                    .ok_or_else(|| AudioError::DeviceNotFound("default output".into())),
            },
        }
    }

    fn ranges(device: &Device, direction: Direction) -> AudioResult<Vec<SupportedStreamConfigRange>> {
        let ranges = match direction {
            Direction::Capture => device
                .supported_input_configs()
                .map(|it| it.collect::<Vec<_>>()),
            Direction::Playback => device
                .supported_output_configs()
                .map(|it| it.collect::<Vec<_>>()),
        };
        ranges.map_err(|e| AudioError::UnsupportedConfig(e.to_string()))
    }

    fn default_rate(device: &Device, direction: Direction) -> AudioResult<u32> {
        let config = match direction {
            Direction::Capture => device.default_input_config()?,
            Direction::Playback => device.default_output_config()?,
        };
        Ok(config.sample_rate().0)
    }

    /// Pick the device channel count and rate closest to the request.
    ///
    /// Mono requests fall back to a stereo device; the callbacks convert.
    fn negotiate(
        &self,
        handle: Option<&DeviceHandle>,
        request: &StreamRequest,
        direction: Direction,
    ) -> AudioResult<StreamFormat> {
        let device = self.device(handle, direction)?;
        let ranges = Self::ranges(&device, direction)?;
        let default_rate = Self::default_rate(&device, direction)?;

        let mut channel_candidates = vec![request.channels];
        if request.channels == 1 {
            channel_candidates.push(2);
        }

        for channels in channel_candidates {
            let usable: Vec<&SupportedStreamConfigRange> = ranges
                .iter()
                .filter(|r| r.channels() == channels && sample_format_supported(r.sample_format()))
                .collect();
            if usable.is_empty() {
                continue;
            }

            let supports = |rate: u32| {
                usable
                    .iter()
                    .any(|r| r.min_sample_rate().0 <= rate && rate <= r.max_sample_rate().0)
            };

            let rate = match request.sample_rate {
                Some(rate) if supports(rate) => rate,
                _ if supports(default_rate) => default_rate,
                _ => usable[0].max_sample_rate().0,
            };

            return Ok(StreamFormat {
                sample_rate: rate,
                device_channels: channels,
                frames_per_buffer: request.frames_per_buffer,
            });
        }

        Err(AudioError::UnsupportedConfig(format!(
            "no {:?} configuration with {} channel(s) in i16/f32",
            direction, request.channels
        )))
    }

    /// Sample format and buffer size the device accepts for `format`
    fn stream_setup(
        device: &Device,
        format: &StreamFormat,
        direction: Direction,
    ) -> AudioResult<(SampleFormat, StreamConfig)> {
        let ranges = Self::ranges(device, direction)?;
        let matching = |wanted: SampleFormat| {
            ranges.iter().find(|r| {
                r.channels() == format.device_channels
                    && r.sample_format() == wanted
                    && r.min_sample_rate().0 <= format.sample_rate
                    && format.sample_rate <= r.max_sample_rate().0
            })
        };

        let range = matching(SampleFormat::I16)
            .or_else(|| matching(SampleFormat::F32))
            .ok_or_else(|| {
                AudioError::UnsupportedConfig(format!(
                    "{} Hz / {} channel(s) not available",
                    format.sample_rate, format.device_channels
                ))
            })?;

        // Fixed-size buffers only where the host advertises the size; the
        // callbacks handle any length otherwise.
        let frames = format.frames_per_buffer as u32;
        let buffer_size = match range.buffer_size() {
            SupportedBufferSize::Range { min, max } if *min <= frames && frames <= *max => {
                cpal::BufferSize::Fixed(frames)
            }
            _ => cpal::BufferSize::Default,
        };

        let config = StreamConfig {
            channels: format.device_channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size,
        };

        Ok((range.sample_format(), config))
    }

    fn build_capture(
        device: &Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        mut callback: CaptureCallback,
    ) -> Result<cpal::Stream, cpal::BuildStreamError> {
        let fault = callback.fault();
        let on_error = move |err: cpal::StreamError| {
            error!(error = %err, "Capture stream error");
            fault.raise();
        };

        match sample_format {
            SampleFormat::F32 => {
                let mut converted: Vec<i16> = Vec::new();
                device.build_input_stream(
                    config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        converted.clear();
                        converted.extend(data.iter().map(|s| f32_to_i16(*s)));
                        callback.on_buffer(&converted);
                    },
                    on_error,
                    None,
                )
            }
            _ => device.build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    callback.on_buffer(data);
                },
                on_error,
                None,
            ),
        }
    }

    fn build_playback(
        device: &Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        mut callback: PlaybackCallback,
    ) -> Result<cpal::Stream, cpal::BuildStreamError> {
        let fault = callback.fault();
        let on_error = move |err: cpal::StreamError| {
            error!(error = %err, "Playback stream error");
            fault.raise();
        };

        match sample_format {
            SampleFormat::F32 => {
                let mut samples: Vec<i16> = Vec::new();
                device.build_output_stream(
                    config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        samples.resize(data.len(), 0);
                        callback.fill(&mut samples);
                        for (out, sample) in data.iter_mut().zip(&samples) {
                            *out = i16_to_f32(*sample);
                        }
                    },
                    on_error,
                    None,
                )
            }
            _ => device.build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    callback.fill(data);
                },
                on_error,
                None,
            ),
        }
    }

    fn start(stream: cpal::Stream) -> AudioResult<Box<dyn ActiveStream>> {
        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        Ok(Box::new(SendableStream(stream)))
    }
}

fn sample_format_supported(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::I16 | SampleFormat::F32)
}

impl AudioBackend for CpalBackend {
    fn capture_format(
        &self,
        device: Option<&DeviceHandle>,
        request: &StreamRequest,
    ) -> AudioResult<StreamFormat> {
        self.negotiate(device, request, Direction::Capture)
    }

    fn playback_format(
        &self,
        device: Option<&DeviceHandle>,
        request: &StreamRequest,
    ) -> AudioResult<StreamFormat> {
        self.negotiate(device, request, Direction::Playback)
    }

    fn open_capture(
        &self,
        handle: Option<&DeviceHandle>,
        format: &StreamFormat,
        callback: CaptureCallback,
    ) -> AudioResult<Box<dyn ActiveStream>> {
        let device = self.device(handle, Direction::Capture)?;
        let (sample_format, config) = Self::stream_setup(&device, format, Direction::Capture)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        info!(
            device = %name,
            rate = format.sample_rate,
            channels = format.device_channels,
            ?sample_format,
            buffer = ?config.buffer_size,
            "Opening capture stream"
        );

        let stream = Self::build_capture(&device, &config, sample_format, callback)
            .map_err(|e| AudioError::StreamBuildFailed(e.to_string()))?;
        Self::start(stream)
    }

    fn open_playback(
        &self,
        handle: Option<&DeviceHandle>,
        format: &StreamFormat,
        callback: PlaybackCallback,
    ) -> AudioResult<Box<dyn ActiveStream>> {
        let device = self.device(handle, Direction::Playback)?;
        let (sample_format, config) = Self::stream_setup(&device, format, Direction::Playback)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        info!(
            device = %name,
            rate = format.sample_rate,
            channels = format.device_channels,
            ?sample_format,
            buffer = ?config.buffer_size,
            "Opening playback stream"
        );

        let stream = Self::build_playback(&device, &config, sample_format, callback)
            .map_err(|e| AudioError::StreamBuildFailed(e.to_string()))?;
        Self::start(stream)
    }
}
