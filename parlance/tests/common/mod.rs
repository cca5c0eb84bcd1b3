//! Test doubles shared by the integration tests
//!
//! - `HandBackend`: audio backend whose capture callbacks the test drives
//! - `FixedDirectory`: device directory over a fixed device list
//! - `ScriptedConnector`: session connector with scripted outcomes

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use parlance_lib::audio::backend::{ActiveStream, CaptureCallback, PlaybackCallback};
use parlance_lib::audio::{
    AudioBackend, AudioError, AudioResult, DeviceDirectory, DeviceHandle, StreamFormat,
    StreamRequest,
};
use parlance_lib::config::AppConfig;
use parlance_lib::link::{
    LinkError, LinkResult, ServerEvent, SessionConnector, SessionHalves, SessionReceiver,
    SessionSender, SessionSetup,
};

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

type Slot<T> = Arc<Mutex<HashMap<String, T>>>;

/// Backend that keeps every opened callback, keyed by device name
#[derive(Default)]
pub struct HandBackend {
    captures: Slot<CaptureCallback>,
    playbacks: Slot<PlaybackCallback>,
    /// Device names whose streams fail to open
    pub broken: Mutex<Vec<String>>,
}

struct HandStream<T: Send + 'static> {
    slot: Slot<T>,
    key: String,
}

impl<T: Send + 'static> ActiveStream for HandStream<T> {
    fn close(self: Box<Self>) {
        self.slot.lock().unwrap().remove(&self.key);
    }
}

fn key(device: Option<&DeviceHandle>) -> String {
    device.map(|d| d.name.clone()).unwrap_or_else(|| "default".into())
}

impl HandBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver one hardware buffer to the capture stream on `device`
    pub fn capture(&self, device: &str, samples: &[i16]) -> bool {
        self.captures
            .lock()
            .unwrap()
            .get_mut(device)
            .map(|cb| cb.on_buffer(samples))
            .unwrap_or(false)
    }

    /// Pull one device buffer from the playback stream on `device`
    pub fn play(&self, device: &str, frames: usize) -> Option<Vec<i16>> {
        let mut playbacks = self.playbacks.lock().unwrap();
        let cb = playbacks.get_mut(device)?;
        let mut out = vec![0i16; frames];
        cb.fill(&mut out);
        Some(out)
    }

    pub fn is_capturing(&self, device: &str) -> bool {
        self.captures.lock().unwrap().contains_key(device)
    }

    pub fn is_playing(&self, device: &str) -> bool {
        self.playbacks.lock().unwrap().contains_key(device)
    }

    pub fn open_streams(&self) -> usize {
        self.captures.lock().unwrap().len() + self.playbacks.lock().unwrap().len()
    }

    pub fn break_device(&self, device: &str) {
        self.broken.lock().unwrap().push(device.to_string());
    }

    fn check(&self, device: Option<&DeviceHandle>) -> AudioResult<()> {
        let name = key(device);
        if self.broken.lock().unwrap().contains(&name) {
            return Err(AudioError::StreamBuildFailed(format!("{} is busy", name)));
        }
        Ok(())
    }
}

impl AudioBackend for HandBackend {
    fn capture_format(
        &self,
        _device: Option<&DeviceHandle>,
        request: &StreamRequest,
    ) -> AudioResult<StreamFormat> {
        Ok(StreamFormat {
            sample_rate: request.sample_rate.unwrap_or(16000),
            device_channels: request.channels,
            frames_per_buffer: request.frames_per_buffer,
        })
    }

    fn playback_format(
        &self,
        device: Option<&DeviceHandle>,
        request: &StreamRequest,
    ) -> AudioResult<StreamFormat> {
        self.capture_format(device, request)
    }

    fn open_capture(
        &self,
        device: Option<&DeviceHandle>,
        _format: &StreamFormat,
        callback: CaptureCallback,
    ) -> AudioResult<Box<dyn ActiveStream>> {
        self.check(device)?;
        let key = key(device);
        self.captures.lock().unwrap().insert(key.clone(), callback);
        Ok(Box::new(HandStream {
            slot: Arc::clone(&self.captures),
            key,
        }))
    }

    fn open_playback(
        &self,
        device: Option<&DeviceHandle>,
        _format: &StreamFormat,
        callback: PlaybackCallback,
    ) -> AudioResult<Box<dyn ActiveStream>> {
        self.check(device)?;
        let key = key(device);
        self.playbacks.lock().unwrap().insert(key.clone(), callback);
        Ok(Box::new(HandStream {
            slot: Arc::clone(&self.playbacks),
            key,
        }))
    }
}

pub const MIC: &str = "USB Microphone";
pub const SPEAKERS: &str = "Speakers";
pub const CABLE_INPUT: &str = "CABLE Input (VB-Audio Virtual Cable)";
pub const LOOPBACK: &str = "BlackHole 2ch";

fn device(index: usize, name: &str, inputs: u16, outputs: u16, virtual_device: bool) -> DeviceHandle {
    DeviceHandle {
        index,
        name: name.to_string(),
        host_api: "Test".to_string(),
        max_input_channels: inputs,
        max_output_channels: outputs,
        default_sample_rate: 48000,
        is_default_input: index == 0,
        is_default_output: index == 1,
        is_virtual: virtual_device,
    }
}

/// Directory over a fixed device list
pub struct FixedDirectory(pub Vec<DeviceHandle>);

impl FixedDirectory {
    /// Microphone, speakers, a virtual cable and a loopback device
    pub fn studio() -> Arc<Self> {
        Arc::new(Self(vec![
            device(0, MIC, 1, 0, false),
            device(1, SPEAKERS, 0, 2, false),
            device(2, CABLE_INPUT, 0, 2, true),
            device(3, LOOPBACK, 2, 0, true),
        ]))
    }

    /// Microphone and speakers only
    pub fn laptop() -> Arc<Self> {
        Arc::new(Self(vec![
            device(0, MIC, 1, 0, false),
            device(1, SPEAKERS, 0, 2, false),
        ]))
    }
}

impl DeviceDirectory for FixedDirectory {
    fn list(&self) -> AudioResult<Vec<DeviceHandle>> {
        Ok(self.0.clone())
    }
}

/// One 1024-frame buffer of a constant level
pub fn tone(level: i16) -> Vec<i16> {
    vec![level; 1024]
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

type EventTx = mpsc::UnboundedSender<LinkResult<Option<Vec<ServerEvent>>>>;

struct ScriptedSender {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    reject: Arc<AtomicBool>,
}

#[async_trait]
impl SessionSender for ScriptedSender {
    async fn send_audio(&mut self, pcm: &[u8]) -> LinkResult<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(LinkError::ConnectionLost("write failed".into()));
        }
        self.sent.lock().unwrap().push(pcm.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> LinkResult<()> {
        Ok(())
    }
}

struct ScriptedReceiver(mpsc::UnboundedReceiver<LinkResult<Option<Vec<ServerEvent>>>>);

#[async_trait]
impl SessionReceiver for ScriptedReceiver {
    async fn next_events(&mut self) -> LinkResult<Option<Vec<ServerEvent>>> {
        self.0.recv().await.unwrap_or(Ok(None))
    }
}

/// Connector whose attempts follow a script; attempts past the end succeed
#[derive(Default)]
pub struct ScriptedConnector {
    script: Mutex<VecDeque<LinkResult<()>>>,
    attempts: AtomicU32,
    sessions: Mutex<Vec<EventTx>>,
    setups: Mutex<Vec<SessionSetup>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    reject: Arc<AtomicBool>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(outcomes: Vec<LinkResult<()>>) -> Arc<Self> {
        let connector = Self::default();
        *connector.script.lock().unwrap() = outcomes.into();
        Arc::new(connector)
    }

    /// Every send fails from now on
    pub fn reject_sends(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent_chunks(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_setup(&self) -> Option<SessionSetup> {
        self.setups.lock().unwrap().last().cloned()
    }

    /// Deliver events on the newest session
    pub fn push(&self, events: Vec<ServerEvent>) {
        if let Some(tx) = self.sessions.lock().unwrap().last() {
            let _ = tx.send(Ok(Some(events)));
        }
    }

    pub fn push_audio(&self, pcm: Vec<u8>) {
        self.push(vec![ServerEvent::Audio(pcm)]);
    }

    /// Remote side closes every open session
    pub fn close_sessions(&self) {
        self.sessions.lock().unwrap().clear();
    }
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(&self, setup: &SessionSetup) -> LinkResult<SessionHalves> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.setups.lock().unwrap().push(setup.clone());
        if let Some(Err(e)) = self.script.lock().unwrap().pop_front() {
            return Err(e);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().unwrap().push(tx);
        Ok(SessionHalves::new(
            ScriptedSender {
                sent: Arc::clone(&self.sent),
                reject: Arc::clone(&self.reject),
            },
            ScriptedReceiver(rx),
        ))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Configuration tuned for fast tests
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.audio.read_timeout_ms = 50;
    config.audio.write_timeout_ms = 50;
    config.audio.drain_timeout_ms = 50;
    config.audio.system_sample_rate = 16000;
    config.link.receive_poll_interval_ms = 50;
    config.link.reconnect.base_delay_ms = 1;
    config.link.reconnect.max_delay_ms = 5;
    config
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
