//! Camera state model and the status view surfaced to callers.

use chrono::{DateTime, Utc};
use gimbalcam_protocol::{Feedback, RecordStatus, VideoMode};
use serde::Serialize;
use std::time::Instant;

/// Lower bound of every zoom value.
pub const ZOOM_MIN: f32 = 1.0;

/// Why the device cannot record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFault {
    NoCard,
    CardError,
    Unrecognized(u8),
}

impl RecordFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordFault::NoCard => "no_tf_card",
            RecordFault::CardError => "tf_card_error",
            RecordFault::Unrecognized(_) => "record_fault",
        }
    }
}

/// Recording state as last confirmed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    Idle,
    Recording,
    Error(RecordFault),
    /// No telemetry since connect, or a toggle went unconfirmed.
    #[default]
    Unknown,
}

impl RecordingState {
    /// Returns the on/off value when the state is known.
    pub fn as_known(&self) -> Option<bool> {
        match self {
            RecordingState::Idle => Some(false),
            RecordingState::Recording => Some(true),
            RecordingState::Error(_) | RecordingState::Unknown => None,
        }
    }
}

impl From<RecordStatus> for RecordingState {
    fn from(status: RecordStatus) -> Self {
        match status {
            RecordStatus::Idle => RecordingState::Idle,
            RecordStatus::Recording => RecordingState::Recording,
            RecordStatus::NoCard => RecordingState::Error(RecordFault::NoCard),
            RecordStatus::CardError => RecordingState::Error(RecordFault::CardError),
            RecordStatus::Unrecognized(code) => {
                RecordingState::Error(RecordFault::Unrecognized(code))
            }
        }
    }
}

/// State fields that commands change and telemetry confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Record,
    Zoom,
    VideoMode,
}

/// Number of telemetry updates applied per field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revisions {
    pub record: u64,
    pub zoom: u64,
    pub video_mode: u64,
}

impl Revisions {
    pub fn get(&self, field: Field) -> u64 {
        match field {
            Field::Record => self.record,
            Field::Zoom => self.zoom,
            Field::VideoMode => self.video_mode,
        }
    }

    pub(crate) fn bump(&mut self, field: Field) {
        match field {
            Field::Record => self.record += 1,
            Field::Zoom => self.zoom += 1,
            Field::VideoMode => self.video_mode += 1,
        }
    }
}

/// In-memory model of the device.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraState {
    pub connected: bool,
    /// Session connection this state was reset for.
    pub connection: u64,
    pub recording: RecordingState,
    pub zoom_current: f32,
    pub zoom_max: f32,
    pub zoom_ready: bool,
    pub video_mode: VideoMode,
    pub hdr_on: bool,
    pub last_feedback: Option<Feedback>,
    pub last_error: Option<String>,
    pub last_error_at: Option<Instant>,
    pub device_address: String,
    pub updated_at: DateTime<Utc>,
    pub revisions: Revisions,
}

impl CameraState {
    pub fn new(device_address: impl Into<String>) -> Self {
        Self {
            connected: false,
            connection: 0,
            recording: RecordingState::Unknown,
            zoom_current: ZOOM_MIN,
            zoom_max: ZOOM_MIN,
            zoom_ready: false,
            video_mode: VideoMode::default(),
            hdr_on: false,
            last_feedback: None,
            last_error: None,
            last_error_at: None,
            device_address: device_address.into(),
            updated_at: Utc::now(),
            revisions: Revisions::default(),
        }
    }

    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.last_error_at = Some(Instant::now());
    }

    pub(crate) fn take_error(&mut self) -> bool {
        self.last_error_at = None;
        self.last_error.take().is_some()
    }

    /// Clamps a zoom factor into `[1.0, zoom_max]`.
    pub fn clamp_zoom(&self, factor: f32) -> f32 {
        factor.clamp(ZOOM_MIN, self.zoom_max.max(ZOOM_MIN))
    }

    /// Builds the payload served to the dashboard.
    pub fn status_view(&self) -> StatusView {
        let (record_text, unresolved) = match self.recording {
            RecordingState::Idle => ("idle", false),
            RecordingState::Recording => ("recording", false),
            RecordingState::Error(fault) => (fault.as_str(), false),
            RecordingState::Unknown => ("error", true),
        };
        StatusView {
            ip: self.device_address.clone(),
            connected: self.connected,
            last_error: self.last_error.clone(),
            record_text,
            record_stale: unresolved || !self.connected,
            zoom_current: self.zoom_current,
            zoom_max: self.zoom_max,
            zoom_ready: self.zoom_ready,
            video_mode: self.video_mode.as_str(),
            hdr_on: self.hdr_on,
            last_feedback: self.last_feedback.map(|f| f.as_str()),
            updated_at: self.updated_at,
        }
    }
}

/// Status payload surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub ip: String,
    pub connected: bool,
    pub last_error: Option<String>,
    pub record_text: &'static str,
    pub record_stale: bool,
    pub zoom_current: f32,
    pub zoom_max: f32,
    pub zoom_ready: bool,
    pub video_mode: &'static str,
    pub hdr_on: bool,
    pub last_feedback: Option<&'static str>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = CameraState::new("192.168.144.25");
        assert!(!state.connected);
        assert_eq!(state.recording, RecordingState::Unknown);
        assert!(!state.zoom_ready);
        assert_eq!(state.zoom_current, ZOOM_MIN);
    }

    #[test]
    fn test_unknown_reported_as_stale_error() {
        let mut state = CameraState::new("10.0.0.1");
        state.connected = true;
        let view = state.status_view();
        assert_eq!(view.record_text, "error");
        assert!(view.record_stale);

        state.recording = RecordingState::Recording;
        let view = state.status_view();
        assert_eq!(view.record_text, "recording");
        assert!(!view.record_stale);
    }

    #[test]
    fn test_disconnected_marks_stale() {
        let mut state = CameraState::new("10.0.0.1");
        state.recording = RecordingState::Recording;
        let view = state.status_view();
        assert!(!view.connected);
        assert_eq!(view.record_text, "recording");
        assert!(view.record_stale);
    }

    #[test]
    fn test_fault_text() {
        let state = RecordingState::from(RecordStatus::NoCard);
        assert_eq!(state, RecordingState::Error(RecordFault::NoCard));
        assert_eq!(state.as_known(), None);

        let mut camera = CameraState::new("10.0.0.1");
        camera.recording = state;
        assert_eq!(camera.status_view().record_text, "no_tf_card");
    }

    #[test]
    fn test_clamp_zoom() {
        let mut state = CameraState::new("10.0.0.1");
        assert_eq!(state.clamp_zoom(3.0), 1.0);
        state.zoom_max = 5.0;
        assert_eq!(state.clamp_zoom(6.0), 5.0);
        assert_eq!(state.clamp_zoom(0.2), 1.0);
        assert_eq!(state.clamp_zoom(2.5), 2.5);
    }

    #[test]
    fn test_status_view_serializes() {
        let state = CameraState::new("10.0.0.1");
        let json = serde_json::to_value(state.status_view()).unwrap();
        assert_eq!(json["ip"], "10.0.0.1");
        assert_eq!(json["video_mode"], "rgb");
        assert_eq!(json["zoom_ready"], false);
        assert!(json["last_error"].is_null());
        assert!(json["last_feedback"].is_null());
        assert_eq!(json["hdr_on"], false);
    }

    #[test]
    fn test_feedback_surfaced() {
        let mut state = CameraState::new("10.0.0.1");
        state.last_feedback = Some(Feedback::PhotoFailed);
        state.hdr_on = true;
        let view = state.status_view();
        assert_eq!(view.last_feedback, Some("photo_failed"));
        assert!(view.hdr_on);
    }

    #[test]
    fn test_error_timestamped() {
        let mut state = CameraState::new("10.0.0.1");
        state.record_error("read timeout");
        assert!(state.last_error_at.is_some());
        assert!(state.take_error());
        assert!(state.last_error.is_none());
        assert!(state.last_error_at.is_none());
        assert!(!state.take_error());
    }
}
