//! Bridge facade.
//!
//! [`Bridge`] owns the session, dispatcher, reconciler and poller, and
//! exposes the camera operations as idempotent calls. Status reads never
//! touch the network; mutating calls wait at most one confirmation window.

use crate::dispatcher::{CommandClass, DispatchConfig, Dispatcher, Slot};
use crate::error::ClientError;
use crate::poller::{PollConfig, Poller};
use crate::reconciler::{Confirmation, Reconciler};
use crate::session::{InboundFrame, Session, SessionConfig, SessionEvent};
use crate::state::{CameraState, Field, RecordingState, StatusView, ZOOM_MIN};
use crate::stats::{BridgeStats, StatsSnapshot};
use gimbalcam_protocol::{
    Command, CommandSet, DeviceMessage, Frame, VideoMode, VideoModeCodes, ZoomLevel,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Zoom change applied by one increment or decrement.
pub const ZOOM_STEP: f32 = 1.0;

/// Largest difference between reported and requested zoom that still
/// confirms an absolute zoom change.
const ZOOM_TOLERANCE: f32 = 0.05;

const EVENT_CHANNEL_SIZE: usize = 256;

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Device host name or IP address.
    pub address: String,
    pub session: SessionConfig,
    pub dispatch: DispatchConfig,
    pub poll: PollConfig,
    pub commands: CommandSet,
    pub video_modes: VideoModeCodes,
}

impl BridgeConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            session: SessionConfig::default(),
            dispatch: DispatchConfig::default(),
            poll: PollConfig::default(),
            commands: CommandSet::default(),
            video_modes: VideoModeCodes::default(),
        }
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_commands(mut self, commands: CommandSet) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_video_modes(mut self, video_modes: VideoModeCodes) -> Self {
        self.video_modes = video_modes;
        self
    }
}

/// The camera bridge.
pub struct Bridge {
    session: Arc<Session>,
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Reconciler>,
    stats: Arc<BridgeStats>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Bridge {
    /// Starts the background tasks and returns the bridge.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: BridgeConfig) -> Self {
        let stats = Arc::new(BridgeStats::default());
        let session = Arc::new(Session::new(
            config.address.clone(),
            config.session,
            stats.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            session.clone(),
            config.commands,
            config.dispatch,
            stats.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(config.address, config.video_modes));
        let (shutdown_tx, _) = broadcast::channel(1);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let runner = session.clone();
        let session_shutdown = shutdown_tx.subscribe();
        let session_task = tokio::spawn(async move {
            runner.run(events_tx, session_shutdown).await;
        });

        let event_task = tokio::spawn(handle_events(
            events_rx,
            dispatcher.clone(),
            reconciler.clone(),
        ));

        let poller = Poller::new(dispatcher.clone(), reconciler.clone(), config.poll);
        let poll_task = tokio::spawn(poller.run(shutdown_tx.subscribe()));

        tracing::info!("Bridge started for device {}", session.address());

        Self {
            session,
            dispatcher,
            reconciler,
            stats,
            shutdown_tx,
            tasks: tokio::sync::Mutex::new(vec![session_task, event_task, poll_task]),
            closed: AtomicBool::new(false),
        }
    }

    /// Stops the background tasks and fails in-flight requests.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.dispatcher.reset_pending();
        tracing::info!("Bridge stopped");
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Returns the current camera state without touching the network.
    pub fn status(&self) -> CameraState {
        self.reconciler.snapshot()
    }

    /// Returns the status payload served to the dashboard.
    pub fn status_view(&self) -> StatusView {
        self.reconciler.snapshot().status_view()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<CameraState> {
        self.reconciler.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Points the bridge at a new device address.
    ///
    /// A live connection is dropped and in-flight commands fail with
    /// [`ClientError::ConnectionReset`].
    pub fn set_ip(&self, address: &str) -> Result<(), ClientError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ClientError::InvalidAddress(address.to_string()));
        }
        if address == self.session.address() {
            return Ok(());
        }

        tracing::info!("Retargeting bridge to {}", address);
        self.reconciler.set_address(address);
        self.session.retarget(address);
        self.dispatcher.reset_pending();
        Ok(())
    }

    // =========================================================================
    // Recording
    // =========================================================================

    pub async fn start_record(&self) -> Result<(), ClientError> {
        self.set_recording(true).await
    }

    pub async fn stop_record(&self) -> Result<(), ClientError> {
        self.set_recording(false).await
    }

    /// Drives recording to `on` with at most one toggle.
    async fn set_recording(&self, on: bool) -> Result<(), ClientError> {
        self.check_open()?;
        let _slot = self.dispatcher.reserve(CommandClass::Record)?;
        let state = self.check_connected()?;

        let current = match state.recording.as_known() {
            Some(current) => current,
            None => self.query_recording().await?,
        };
        if current == on {
            tracing::debug!("Recording already {}, nothing to do", on);
            return Ok(());
        }

        let target = if on {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        };
        let since = self.reconciler.mark_sent(Field::Record);
        // Never toggle on a socket other than the one `current` describes.
        self.dispatcher
            .send_on(&Command::ToggleRecord, state.connection)
            .await?;

        let outcome = self
            .confirm(Field::Record, since, Command::RequestGimbalInfo, |s| {
                s.recording == target
            })
            .await;

        match outcome {
            Confirmation::Confirmed => {
                tracing::info!("Recording {}", if on { "started" } else { "stopped" });
                self.reconciler.clear_error();
                Ok(())
            }
            Confirmation::Disconnected => Err(ClientError::ConnectionReset),
            Confirmation::Contradicted | Confirmation::Silent => {
                let err = ClientError::RecordStateUnconfirmed;
                tracing::warn!("Record toggle {:?}: {}", outcome, err);
                self.reconciler.record_unconfirmed(since, &err.to_string());
                Err(err)
            }
        }
    }

    /// Asks the device for its recording state.
    async fn query_recording(&self) -> Result<bool, ClientError> {
        let slot = self.dispatcher.reserve(CommandClass::Status)?;
        let frame = self.request(&slot, &Command::RequestGimbalInfo).await?;

        let recording = match DeviceMessage::parse(&frame, self.dispatcher.commands())? {
            DeviceMessage::GimbalInfo { record, .. } => RecordingState::from(record),
            _ => RecordingState::Unknown,
        };
        match recording {
            RecordingState::Idle => Ok(false),
            RecordingState::Recording => Ok(true),
            RecordingState::Error(fault) => {
                Err(ClientError::RecordingFault(fault.as_str().to_string()))
            }
            RecordingState::Unknown => Err(ClientError::RecordStateUnconfirmed),
        }
    }

    // =========================================================================
    // Photo
    // =========================================================================

    /// Triggers a still capture. The outcome arrives later as feedback.
    pub async fn trigger_photo(&self) -> Result<(), ClientError> {
        self.check_open()?;
        let _slot = self.dispatcher.reserve(CommandClass::Photo)?;
        self.check_connected()?;
        self.dispatcher.send(&Command::TakePhoto).await?;
        self.reconciler.clear_error();
        Ok(())
    }

    // =========================================================================
    // Zoom
    // =========================================================================

    pub async fn zoom_increment(&self) -> Result<f32, ClientError> {
        self.step_zoom(ZOOM_STEP).await
    }

    pub async fn zoom_decrement(&self) -> Result<f32, ClientError> {
        self.step_zoom(-ZOOM_STEP).await
    }

    /// Nudges zoom ahead of the device and lets telemetry correct it.
    async fn step_zoom(&self, delta: f32) -> Result<f32, ClientError> {
        self.check_open()?;
        let slot = self.dispatcher.reserve(CommandClass::Zoom)?;
        self.check_connected()?;
        self.ensure_zoom_range().await?;

        let (prev, target, since) = self.reconciler.nudge_zoom(delta);
        let level = ZoomLevel::from_factor(target)?;
        if let Err(e) = self.request(&slot, &Command::SetZoom(level)).await {
            self.reconciler.rollback_zoom(prev, since, &e.to_string());
            return Err(e);
        }

        if let Err(e) = self.dispatcher.send(&Command::RequestZoomLevel).await {
            tracing::debug!("Zoom readback not sent: {}", e);
        }
        Ok(target)
    }

    /// Sets an absolute zoom factor and waits for the device to report it.
    pub async fn set_absolute_zoom(&self, zoom: f32) -> Result<f32, ClientError> {
        self.check_open()?;
        if !zoom.is_finite() || zoom < ZOOM_MIN {
            return Err(ClientError::ZoomOutOfRange {
                requested: zoom,
                max: self.reconciler.snapshot().zoom_max,
            });
        }

        let slot = self.dispatcher.reserve(CommandClass::Zoom)?;
        self.check_connected()?;
        let max = self.ensure_zoom_range().await?;
        if zoom > max {
            return Err(ClientError::ZoomOutOfRange {
                requested: zoom,
                max,
            });
        }

        let level = ZoomLevel::from_factor(zoom)?;
        let target = level.factor();
        let (prev, since) = self.reconciler.provisional_zoom(target);
        if let Err(e) = self.request(&slot, &Command::SetZoom(level)).await {
            self.reconciler.rollback_zoom(prev, since, &e.to_string());
            return Err(e);
        }

        let outcome = self
            .confirm(Field::Zoom, since, Command::RequestZoomLevel, |s| {
                (s.zoom_current - target).abs() < ZOOM_TOLERANCE
            })
            .await;

        match outcome {
            Confirmation::Confirmed => {
                self.reconciler.clear_error();
                Ok(target)
            }
            Confirmation::Disconnected => {
                let err = ClientError::ConnectionReset;
                self.reconciler.rollback_zoom(prev, since, &err.to_string());
                Err(err)
            }
            Confirmation::Contradicted | Confirmation::Silent => {
                let err = ClientError::ZoomUnconfirmed;
                tracing::warn!("Zoom {} {:?}: {}", target, outcome, err);
                self.reconciler.rollback_zoom(prev, since, &err.to_string());
                Err(err)
            }
        }
    }

    /// Fetches zoom range and position once per connection.
    ///
    /// Returns the maximum zoom factor.
    async fn ensure_zoom_range(&self) -> Result<f32, ClientError> {
        let state = self.reconciler.snapshot();
        if state.zoom_ready {
            return Ok(state.zoom_max);
        }

        {
            let slot = self.dispatcher.reserve(CommandClass::ZoomRange)?;
            self.request(&slot, &Command::RequestZoomRange).await?;
        }
        {
            let slot = self.dispatcher.reserve(CommandClass::ZoomLevel)?;
            self.request(&slot, &Command::RequestZoomLevel).await?;
        }
        Ok(self.reconciler.snapshot().zoom_max)
    }

    // =========================================================================
    // Video mode
    // =========================================================================

    /// Switches the video output mode.
    ///
    /// Accepts `rgb`, `thermal` or `side_by_side`.
    pub async fn set_video_mode(&self, mode: &str) -> Result<VideoMode, ClientError> {
        self.check_open()?;
        let mode: VideoMode = mode.parse().map_err(ClientError::InvalidVideoMode)?;
        let code = self
            .reconciler
            .video_mode_codes()
            .code_for(mode)
            .ok_or_else(|| ClientError::InvalidVideoMode(mode.to_string()))?;

        let slot = self.dispatcher.reserve(CommandClass::VideoMode)?;
        self.check_connected()?;

        let (prev, since) = self.reconciler.provisional_video_mode(mode);
        if let Err(e) = self.request(&slot, &Command::SetVideoMode(code)).await {
            self.reconciler.rollback_video_mode(prev, since, &e.to_string());
            return Err(e);
        }

        let outcome = self
            .confirm(Field::VideoMode, since, Command::RequestVideoMode, |s| {
                s.video_mode == mode
            })
            .await;

        match outcome {
            Confirmation::Confirmed => {
                tracing::info!("Video mode switched to {}", mode);
                self.reconciler.clear_error();
                Ok(mode)
            }
            Confirmation::Disconnected => {
                let err = ClientError::ConnectionReset;
                self.reconciler.rollback_video_mode(prev, since, &err.to_string());
                Err(err)
            }
            Confirmation::Contradicted | Confirmation::Silent => {
                let err = ClientError::VideoModeUnconfirmed;
                tracing::warn!("Video mode {} {:?}: {}", mode, outcome, err);
                self.reconciler.rollback_video_mode(prev, since, &err.to_string());
                Err(err)
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn check_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ShuttingDown);
        }
        Ok(())
    }

    /// Returns the state of the live connection.
    ///
    /// Fails until the event loop has caught up with the session's current
    /// connection, so values left over from an earlier socket are never
    /// acted on.
    fn check_connected(&self) -> Result<CameraState, ClientError> {
        let state = self.reconciler.snapshot();
        if !state.connected
            || state.connection != self.session.connection()
            || !self.session.is_connected()
        {
            return Err(ClientError::NotConnected);
        }
        Ok(state)
    }

    /// Sends a request, recording failures in `last_error` and clearing it
    /// on a reply.
    async fn request(&self, slot: &Slot<'_>, command: &Command) -> Result<Frame, ClientError> {
        match self.dispatcher.request(slot, command).await {
            Ok(frame) => {
                self.reconciler.clear_error();
                Ok(frame)
            }
            Err(e) => {
                if matches!(
                    e,
                    ClientError::DeviceTimeout(_) | ClientError::Io(_) | ClientError::Protocol(_)
                ) {
                    self.reconciler.set_error(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Waits for telemetry to confirm a change, querying `probe` every
    /// confirm-poll interval meanwhile.
    async fn confirm<F>(&self, field: Field, since: u64, probe: Command, accept: F) -> Confirmation
    where
        F: Fn(&CameraState) -> bool,
    {
        let config = self.dispatcher.config();
        let wait = self
            .reconciler
            .wait_for(field, since, config.confirm_window, accept);
        tokio::pin!(wait);

        let start = tokio::time::Instant::now() + config.confirm_poll;
        let mut ticker = tokio::time::interval_at(start, config.confirm_poll);

        loop {
            tokio::select! {
                outcome = &mut wait => return outcome,
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatcher.send(&probe).await {
                        tracing::debug!("Confirmation probe not sent: {}", e);
                    }
                }
            }
        }
    }
}

/// Applies session events to the reconciler and wakes waiting requests.
async fn handle_events(
    mut events: mpsc::Receiver<SessionEvent>,
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Reconciler>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Connected {
                address,
                connection,
            } => {
                tracing::debug!("Session {} up for {}", connection, address);
                reconciler.on_connected(connection);
            }
            SessionEvent::ConnectFailed { reason, .. } => {
                reconciler.set_error(reason);
            }
            SessionEvent::Disconnected { reason } => {
                reconciler.on_disconnected(&reason);
                dispatcher.reset_pending();
            }
            SessionEvent::Frame(inbound) => on_frame(&dispatcher, &reconciler, inbound),
        }
    }
    tracing::debug!("Event loop stopped");
}

/// State is updated before the waiter wakes, so a resolved request always
/// observes its own reply.
fn on_frame(dispatcher: &Dispatcher, reconciler: &Reconciler, inbound: InboundFrame) {
    match DeviceMessage::parse(&inbound.frame, dispatcher.commands()) {
        Ok(DeviceMessage::Other { cmd_id, .. }) => {
            tracing::debug!("Ignoring frame with command 0x{:02X}", cmd_id);
        }
        Ok(message) => {
            reconciler.apply(&message, inbound.received_at);
        }
        Err(e) => {
            tracing::warn!("Malformed device frame: {}", e);
        }
    }
    dispatcher.resolve(&inbound.frame);
}
