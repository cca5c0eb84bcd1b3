use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{PipelineError, PipelineResult};
use super::loops::{LoopContext, ReceiveLoop, SendLoop};
use super::state::{Direction, PipelineMode, PipelineState, StateManager};
use super::stats::{DirectionCounters, DirectionStats, PipelineStats};
use crate::audio::{
    AudioBackend, AudioError, AudioInputPort, AudioOutputPort, CpalBackend, CpalDeviceDirectory,
    DeviceDirectory, DeviceHandle, DeviceQuery, DeviceRole,
};
use crate::config::AppConfig;
use crate::link::{GeminiConnector, LinkStats, SessionConnector, TranslationLink};

/// One running direction: its link and the tasks holding its ports
struct DirectionRuntime {
    direction: Direction,
    link: Arc<TranslationLink>,
    send_task: Option<JoinHandle<AudioInputPort>>,
    receive_task: Option<JoinHandle<AudioOutputPort>>,
}

/// Speech translation pipeline
///
/// Composes input port, link and output port chains for one or both
/// directions. The directions share nothing but the pipeline state: each
/// has its own link, ports and counters.
///
/// # Example
/// ```no_run
/// use parlance_lib::config::ConfigManager;
/// use parlance_lib::pipeline::TranslationPipeline;
///
/// #[tokio::main]
/// async fn main() {
///     let config = ConfigManager::load("parlance.json").unwrap();
///     let mut pipeline = TranslationPipeline::new(config);
///
///     pipeline.start().await.unwrap();
///     tokio::signal::ctrl_c().await.unwrap();
///     pipeline.stop().await;
///
///     println!("{}", serde_json::to_string_pretty(&pipeline.stats()).unwrap());
/// }
/// ```
pub struct TranslationPipeline {
    config: AppConfig,
    directory: Arc<dyn DeviceDirectory>,
    backend: Arc<dyn AudioBackend>,
    outgoing_connector: Option<Arc<dyn SessionConnector>>,
    incoming_connector: Option<Arc<dyn SessionConnector>>,
    state: Arc<StateManager>,
    shutdown: Option<watch::Sender<bool>>,
    outgoing: Option<DirectionRuntime>,
    incoming: Option<DirectionRuntime>,
    outgoing_counters: Arc<DirectionCounters>,
    incoming_counters: Arc<DirectionCounters>,
    /// Link statistics captured when each direction was released
    last_link_stats: HashMap<Direction, LinkStats>,
}

impl TranslationPipeline {
    /// Pipeline over the cpal host and the configured provider
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            directory: Arc::new(CpalDeviceDirectory::new()),
            backend: Arc::new(CpalBackend::new()),
            outgoing_connector: None,
            incoming_connector: None,
            state: Arc::new(StateManager::new()),
            shutdown: None,
            outgoing: None,
            incoming: None,
            outgoing_counters: Arc::new(DirectionCounters::new()),
            incoming_counters: Arc::new(DirectionCounters::new()),
            last_link_stats: HashMap::new(),
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn DeviceDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn AudioBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Use `connector` for every direction
    pub fn with_connector(mut self, connector: Arc<dyn SessionConnector>) -> Self {
        self.outgoing_connector = Some(Arc::clone(&connector));
        self.incoming_connector = Some(connector);
        self
    }

    pub fn with_direction_connector(
        mut self,
        direction: Direction,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        match direction {
            Direction::Outgoing => self.outgoing_connector = Some(connector),
            Direction::Incoming => self.incoming_connector = Some(connector),
        }
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn mode(&self) -> PipelineMode {
        self.config.pipeline.mode
    }

    pub fn state(&self) -> PipelineState {
        self.state.current()
    }

    /// Shared state, for subscribing to changes
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Link of a running direction
    pub fn link(&self, direction: Direction) -> Option<Arc<TranslationLink>> {
        self.runtime(direction).map(|r| Arc::clone(&r.link))
    }

    fn runtime(&self, direction: Direction) -> Option<&DirectionRuntime> {
        match direction {
            Direction::Outgoing => self.outgoing.as_ref(),
            Direction::Incoming => self.incoming.as_ref(),
        }
    }

    fn counters(&self, direction: Direction) -> &Arc<DirectionCounters> {
        match direction {
            Direction::Outgoing => &self.outgoing_counters,
            Direction::Incoming => &self.incoming_counters,
        }
    }

    fn connector(&self, direction: Direction) -> Arc<dyn SessionConnector> {
        let configured = match direction {
            Direction::Outgoing => self.outgoing_connector.as_ref(),
            Direction::Incoming => self.incoming_connector.as_ref(),
        };
        match configured {
            Some(connector) => Arc::clone(connector),
            None => Arc::new(GeminiConnector::new(
                self.config.link.provider.clone(),
                self.config.link.connect_timeout(),
            )),
        }
    }

    /// Resolve devices, start ports and links, spawn the loops
    ///
    /// Direction counters start from zero. On failure everything already
    /// started is released again and the pipeline is left in `Error`.
    ///
    /// # Errors
    /// - `PipelineError::InvalidTransition` unless stopped.
    /// - `PipelineError::DeviceDiscovery` when a role has no device.
    /// - Port and link errors from startup.
    pub async fn start(&mut self) -> PipelineResult<()> {
        self.state.transition(PipelineState::Starting)?;
        info!(mode = %self.mode(), "Starting translation pipeline");

        self.outgoing_counters = Arc::new(DirectionCounters::new());
        self.incoming_counters = Arc::new(DirectionCounters::new());
        self.last_link_stats.clear();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);

        for &direction in self.mode().directions() {
            if let Err(e) = self.start_direction(direction, shutdown_rx.clone()).await {
                error!(%direction, error = %e, "Pipeline start failed");
                if let Err(te) = self.state.transition(PipelineState::Error) {
                    debug!(error = %te, "State already moved on");
                }
                self.release().await;
                return Err(e);
            }
        }

        // A loop may already have failed and moved the state to Error
        if let Err(e) = self.state.transition(PipelineState::Running) {
            warn!(error = %e, "Direction failed during startup");
            self.release().await;
            return Err(e);
        }
        info!(mode = %self.mode(), "Translation pipeline running");
        Ok(())
    }

    async fn start_direction(
        &mut self,
        direction: Direction,
        shutdown: watch::Receiver<bool>,
    ) -> PipelineResult<()> {
        let pipeline = &self.config.pipeline;
        let audio = &self.config.audio;

        let (input_query, output_query, input_config) = match direction {
            Direction::Outgoing => (
                DeviceQuery::role(DeviceRole::Input).with_index(pipeline.mic_device),
                DeviceQuery::role(DeviceRole::Output)
                    .with_index(pipeline.virtual_output_device)
                    .virtual_device(),
                audio.microphone(),
            ),
            Direction::Incoming => (
                DeviceQuery::role(DeviceRole::Loopback).with_index(pipeline.loopback_device),
                DeviceQuery::role(DeviceRole::Output).with_index(pipeline.speaker_device),
                audio.loopback(),
            ),
        };

        let input_device = self.resolve(&input_query)?;
        let output_device = self.resolve(&output_query)?;
        info!(
            %direction,
            input = %input_device.name,
            output = %output_device.name,
            "Devices resolved"
        );

        let mut input = AudioInputPort::new(
            format!("{}-input", direction),
            input_config,
            Some(input_device),
            Arc::clone(&self.backend),
        );
        input.start()?;

        let mut output = AudioOutputPort::new(
            format!("{}-output", direction),
            audio.playback(),
            Some(output_device),
            Arc::clone(&self.backend),
        );
        output.start()?;

        let link = Arc::new(TranslationLink::new(
            direction.name(),
            self.config.link.session_setup(),
            self.config.link.link_options(),
            self.connector(direction),
        ));
        link.connect().await?;

        let ctx = LoopContext {
            direction,
            link: Arc::clone(&link),
            counters: Arc::clone(self.counters(direction)),
            state: Arc::clone(&self.state),
            shutdown,
        };

        let send_task = tokio::spawn(
            SendLoop {
                ctx: ctx.clone(),
                input,
                read_timeout: audio.read_timeout(),
                max_consecutive_failures: pipeline.max_consecutive_send_failures,
            }
            .run(),
        );
        let receive_task = tokio::spawn(
            ReceiveLoop {
                ctx,
                output,
                write_timeout: audio.write_timeout(),
            }
            .run(),
        );

        let runtime = DirectionRuntime {
            direction,
            link,
            send_task: Some(send_task),
            receive_task: Some(receive_task),
        };
        match direction {
            Direction::Outgoing => self.outgoing = Some(runtime),
            Direction::Incoming => self.incoming = Some(runtime),
        }

        info!(%direction, "Direction started");
        Ok(())
    }

    /// Explicit index first, then the role default or auto-discovery
    fn resolve(&self, query: &DeviceQuery) -> PipelineResult<DeviceHandle> {
        if let Some(device) = self.directory.resolve(query) {
            return Ok(device);
        }

        match query.index {
            Some(index) => Err(AudioError::InvalidDeviceIndex(index).into()),
            None => Err(PipelineError::DeviceDiscovery(format!(
                "no {} device found{}",
                match query.role {
                    Some(DeviceRole::Input) => "input",
                    Some(DeviceRole::Output) => "output",
                    Some(DeviceRole::Loopback) => "loopback",
                    None => "audio",
                },
                if query.prefer_virtual { " (virtual)" } else { "" }
            ))),
        }
    }

    /// Shut everything down; safe in any state, including a partial start
    ///
    /// Order: signal the loops, await them (outgoing send, outgoing
    /// receive, incoming send, incoming receive), drain and stop the
    /// outputs, stop the inputs, disconnect the links.
    pub async fn stop(&mut self) {
        let state = self.state.current();
        if state.is_stopped() {
            debug!("Pipeline already stopped");
            return;
        }

        info!(from = %state, "Stopping translation pipeline");
        if let Err(e) = self.state.transition(PipelineState::Stopping) {
            debug!(error = %e, "Forcing shutdown");
            self.state.force_set(PipelineState::Stopping);
        }

        self.release().await;

        self.state.force_set(PipelineState::Stopped);
        info!("Translation pipeline stopped");
    }

    /// Tear down every direction without touching the state
    async fn release(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }

        let mut runtimes: Vec<DirectionRuntime> =
            [self.outgoing.take(), self.incoming.take()].into_iter().flatten().collect();

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for runtime in &mut runtimes {
            if let Some(task) = runtime.send_task.take() {
                match task.await {
                    Ok(port) => inputs.push(port),
                    Err(e) => warn!(direction = %runtime.direction, error = %e, "Send task panicked"),
                }
            }
            if let Some(task) = runtime.receive_task.take() {
                match task.await {
                    Ok(port) => outputs.push(port),
                    Err(e) => warn!(direction = %runtime.direction, error = %e, "Receive task panicked"),
                }
            }
        }

        let drain_timeout = self.config.audio.drain_timeout();
        for output in &mut outputs {
            if output.is_running() {
                if let Err(e) = output.drain(drain_timeout).await {
                    debug!(port = %output.label(), error = %e, "Drain failed");
                }
            }
            output.stop();
        }
        for input in &mut inputs {
            input.stop();
        }
        for runtime in &runtimes {
            // Connection time is only known while the session is open
            let duration = runtime.link.stats().connection_duration_secs;
            runtime.link.disconnect().await;

            let mut stats = runtime.link.stats();
            stats.connection_duration_secs = duration;
            self.last_link_stats.insert(runtime.direction, stats);
        }
    }

    /// Counters of every direction the mode runs, plus link statistics
    ///
    /// After [`stop`](Self::stop) the link figures are those captured at
    /// release.
    pub fn stats(&self) -> PipelineStats {
        let mode = self.mode();
        let snapshot = |direction: Direction| {
            mode.runs(direction)
                .then(|| self.counters(direction).snapshot())
        };
        let outgoing = snapshot(Direction::Outgoing);
        let incoming = snapshot(Direction::Incoming);
        let totals = outgoing.unwrap_or_default() + incoming.unwrap_or_default();

        let link_stats = |direction: Direction| {
            self.runtime(direction)
                .map(|r| r.link.stats())
                .or_else(|| self.last_link_stats.get(&direction).cloned())
        };
        let (link, outgoing_link, incoming_link) = match mode {
            PipelineMode::Outgoing => (link_stats(Direction::Outgoing), None, None),
            PipelineMode::Incoming => (link_stats(Direction::Incoming), None, None),
            PipelineMode::Bidirectional => (
                None,
                link_stats(Direction::Outgoing),
                link_stats(Direction::Incoming),
            ),
        };

        PipelineStats {
            state: self.state(),
            mode,
            outgoing,
            incoming,
            totals,
            link,
            outgoing_link,
            incoming_link,
        }
    }

    /// Counters of one direction
    pub fn direction_stats(&self, direction: Direction) -> DirectionStats {
        self.counters(direction).snapshot()
    }
}

impl Drop for TranslationPipeline {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
    }
}
