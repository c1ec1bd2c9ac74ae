//! Authoritative camera state, fed by telemetry and command outcomes.
//!
//! Telemetry overwrites local assumptions unconditionally, except frames
//! received before the latest command send for the same field; those
//! describe the device as it was before the command and are dropped.

use crate::state::{CameraState, Field, RecordingState};
use chrono::Utc;
use gimbalcam_protocol::{DeviceMessage, Feedback, VideoMode, VideoModeCodes};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Outcome of waiting for telemetry to confirm a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Post-command telemetry matched the target.
    Confirmed,
    /// Post-command telemetry arrived but reported something else.
    Contradicted,
    /// No post-command telemetry arrived in the window.
    Silent,
    /// The connection dropped while waiting.
    Disconnected,
}

/// Owns the camera state; every mutation goes through here.
pub struct Reconciler {
    state: watch::Sender<CameraState>,
    codes: VideoModeCodes,
    sent_at: parking_lot::Mutex<HashMap<Field, Instant>>,
}

impl Reconciler {
    pub fn new(device_address: impl Into<String>, codes: VideoModeCodes) -> Self {
        let (state, _) = watch::channel(CameraState::new(device_address));
        Self {
            state,
            codes,
            sent_at: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> CameraState {
        self.state.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<CameraState> {
        self.state.subscribe()
    }

    pub fn video_mode_codes(&self) -> &VideoModeCodes {
        &self.codes
    }

    fn update(&self, f: impl FnOnce(&mut CameraState)) {
        self.state.send_modify(|state| {
            f(state);
            state.updated_at = Utc::now();
        });
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Session connection `connection` is up. Recording stays unknown until
    /// telemetry.
    pub fn on_connected(&self, connection: u64) {
        self.update(|s| {
            s.connected = true;
            s.connection = connection;
            s.take_error();
            s.recording = RecordingState::Unknown;
            s.zoom_ready = false;
        });
    }

    /// The socket dropped. Last known values are retained.
    pub fn on_disconnected(&self, reason: &str) {
        self.update(|s| {
            s.connected = false;
            s.record_error(reason);
        });
    }

    pub fn set_address(&self, address: &str) {
        self.update(|s| s.device_address = address.to_string());
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| s.record_error(message));
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|s| s.take_error());
    }

    /// Clears an error recorded before `instant`.
    pub fn clear_error_before(&self, instant: Instant) {
        self.state.send_if_modified(|s| match s.last_error_at {
            Some(at) if at < instant => s.take_error(),
            _ => false,
        });
    }

    // =========================================================================
    // Telemetry
    // =========================================================================

    fn is_stale(&self, field: Field, received_at: Instant) -> bool {
        self.sent_at
            .lock()
            .get(&field)
            .is_some_and(|sent| received_at < *sent)
    }

    /// Applies a device message received at `received_at`.
    ///
    /// Returns false when the message was stale or carried nothing to apply.
    pub fn apply(&self, message: &DeviceMessage, received_at: Instant) -> bool {
        match message {
            DeviceMessage::GimbalInfo { record, hdr_on } => {
                let hdr_on = *hdr_on;
                self.state.send_if_modified(|s| {
                    let changed = s.hdr_on != hdr_on;
                    s.hdr_on = hdr_on;
                    changed
                });
                self.apply_recording(RecordingState::from(*record), received_at)
            }
            DeviceMessage::Feedback(feedback) => self.apply_feedback(*feedback, received_at),
            DeviceMessage::ZoomLevel(level) => {
                if self.is_stale(Field::Zoom, received_at) {
                    tracing::debug!("Discarding stale zoom telemetry");
                    return false;
                }
                let factor = level.factor();
                self.update(|s| {
                    s.zoom_current = s.clamp_zoom(factor);
                    s.revisions.bump(Field::Zoom);
                });
                true
            }
            DeviceMessage::ZoomRange(level) => {
                let max = level.factor().max(crate::state::ZOOM_MIN);
                self.update(|s| {
                    s.zoom_max = max;
                    s.zoom_ready = true;
                    s.zoom_current = s.clamp_zoom(s.zoom_current);
                });
                true
            }
            DeviceMessage::VideoMode(code) => {
                if self.is_stale(Field::VideoMode, received_at) {
                    tracing::debug!("Discarding stale video mode telemetry");
                    return false;
                }
                let mode = self.codes.mode_for(*code);
                self.update(|s| {
                    s.video_mode = mode;
                    s.revisions.bump(Field::VideoMode);
                });
                true
            }
            DeviceMessage::ZoomAck
            | DeviceMessage::VideoModeAck
            | DeviceMessage::Other { .. } => false,
        }
    }

    fn apply_feedback(&self, feedback: Feedback, received_at: Instant) -> bool {
        self.update(|s| {
            s.last_feedback = Some(feedback);
            match feedback {
                Feedback::HdrOn => s.hdr_on = true,
                Feedback::HdrOff => s.hdr_on = false,
                Feedback::PhotoFailed => s.record_error("device reported photo capture failure"),
                Feedback::RecordFailed => s.record_error("device reported recording failure"),
                _ => {}
            }
        });
        match feedback {
            Feedback::RecordStarted => self.apply_recording(RecordingState::Recording, received_at),
            Feedback::RecordStopped => self.apply_recording(RecordingState::Idle, received_at),
            _ => true,
        }
    }

    fn apply_recording(&self, recording: RecordingState, received_at: Instant) -> bool {
        if self.is_stale(Field::Record, received_at) {
            tracing::debug!("Discarding stale recording telemetry");
            return false;
        }
        self.update(|s| {
            s.recording = recording;
            s.revisions.bump(Field::Record);
        });
        true
    }

    // =========================================================================
    // Command-side updates
    // =========================================================================

    /// Records that a command changing `field` is about to be sent.
    ///
    /// Returns the field's telemetry revision at that moment.
    pub fn mark_sent(&self, field: Field) -> u64 {
        self.sent_at.lock().insert(field, Instant::now());
        self.state.borrow().revisions.get(field)
    }

    /// Moves zoom by `delta` ahead of confirmation.
    ///
    /// Returns the previous value, the clamped target and the revision.
    pub fn nudge_zoom(&self, delta: f32) -> (f32, f32, u64) {
        let since = self.mark_sent(Field::Zoom);
        let mut prev = 0.0;
        let mut target = 0.0;
        self.update(|s| {
            prev = s.zoom_current;
            target = s.clamp_zoom(s.zoom_current + delta);
            s.zoom_current = target;
        });
        (prev, target, since)
    }

    /// Sets zoom ahead of confirmation. Returns the previous value and revision.
    pub fn provisional_zoom(&self, target: f32) -> (f32, u64) {
        let since = self.mark_sent(Field::Zoom);
        let mut prev = 0.0;
        self.update(|s| {
            prev = s.zoom_current;
            s.zoom_current = s.clamp_zoom(target);
        });
        (prev, since)
    }

    /// Sets the video mode ahead of confirmation.
    pub fn provisional_video_mode(&self, mode: VideoMode) -> (VideoMode, u64) {
        let since = self.mark_sent(Field::VideoMode);
        let mut prev = VideoMode::default();
        self.update(|s| {
            prev = s.video_mode;
            s.video_mode = mode;
        });
        (prev, since)
    }

    /// Restores zoom unless telemetry has reported since `since`.
    pub fn rollback_zoom(&self, prev: f32, since: u64, reason: &str) {
        self.update(|s| {
            if s.revisions.zoom == since {
                s.zoom_current = s.clamp_zoom(prev);
            }
            s.record_error(reason);
        });
    }

    /// Restores the video mode unless telemetry has reported since `since`.
    pub fn rollback_video_mode(&self, prev: VideoMode, since: u64, reason: &str) {
        self.update(|s| {
            if s.revisions.video_mode == since {
                s.video_mode = prev;
            }
            s.record_error(reason);
        });
    }

    /// A toggle went unconfirmed; forget the recording state unless
    /// telemetry has reported since `since`.
    pub fn record_unconfirmed(&self, since: u64, reason: &str) {
        self.update(|s| {
            if s.revisions.record == since {
                s.recording = RecordingState::Unknown;
            }
            s.record_error(reason);
        });
    }

    /// Waits up to `window` for telemetry newer than `since` that satisfies
    /// `accept`.
    pub async fn wait_for<F>(
        &self,
        field: Field,
        since: u64,
        window: Duration,
        accept: F,
    ) -> Confirmation
    where
        F: Fn(&CameraState) -> bool,
    {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(window, async {
            loop {
                {
                    let state = rx.borrow_and_update();
                    if !state.connected {
                        return Confirmation::Disconnected;
                    }
                    if state.revisions.get(field) > since && accept(&*state) {
                        return Confirmation::Confirmed;
                    }
                }
                if rx.changed().await.is_err() {
                    return Confirmation::Disconnected;
                }
            }
        })
        .await;

        match waited {
            Ok(outcome) => outcome,
            Err(_) if self.state.borrow().revisions.get(field) > since => {
                Confirmation::Contradicted
            }
            Err(_) => Confirmation::Silent,
        }
    }
}
