//! Logical commands and parsed device messages.
//!
//! Command identifiers and video mode codes are firmware-defined; both
//! tables are plain data so deployments can override them from
//! configuration without touching the framing code.

use crate::error::ProtocolError;
use crate::frame::{Frame, FrameCtrl};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Command identifier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSet {
    pub heartbeat: u8,
    pub gimbal_info: u8,
    pub function_feedback: u8,
    pub capture: u8,
    pub absolute_zoom: u8,
    pub video_mode_query: u8,
    pub video_mode_set: u8,
    pub zoom_range: u8,
    pub zoom_level: u8,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            heartbeat: 0x00,
            gimbal_info: 0x0A,
            function_feedback: 0x0B,
            capture: 0x0C,
            absolute_zoom: 0x0F,
            video_mode_query: 0x10,
            video_mode_set: 0x11,
            zoom_range: 0x16,
            zoom_level: 0x18,
        }
    }
}

/// Device codes for the selectable video modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoModeCodes {
    pub rgb: u8,
    pub thermal: u8,
    pub side_by_side: u8,
}

impl Default for VideoModeCodes {
    fn default() -> Self {
        Self {
            rgb: 3,
            thermal: 7,
            side_by_side: 0,
        }
    }
}

impl VideoModeCodes {
    /// Returns the device code for a selectable mode.
    pub fn code_for(&self, mode: VideoMode) -> Option<u8> {
        match mode {
            VideoMode::Rgb => Some(self.rgb),
            VideoMode::Thermal => Some(self.thermal),
            VideoMode::SideBySide => Some(self.side_by_side),
            VideoMode::Custom(_) => None,
        }
    }

    /// Maps a reported device code back to a mode.
    pub fn mode_for(&self, code: u8) -> VideoMode {
        if code == self.rgb {
            VideoMode::Rgb
        } else if code == self.thermal {
            VideoMode::Thermal
        } else if code == self.side_by_side {
            VideoMode::SideBySide
        } else {
            VideoMode::Custom(code)
        }
    }
}

/// Active video output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoMode {
    #[default]
    Rgb,
    Thermal,
    SideBySide,
    /// A device mode with no named preset.
    Custom(u8),
}

impl VideoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoMode::Rgb => "rgb",
            VideoMode::Thermal => "thermal",
            VideoMode::SideBySide => "side_by_side",
            VideoMode::Custom(_) => "custom",
        }
    }
}

impl fmt::Display for VideoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoMode {
    type Err = String;

    /// Parses one of the selectable presets; `custom` is report-only.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rgb" => Ok(VideoMode::Rgb),
            "thermal" => Ok(VideoMode::Thermal),
            "side_by_side" => Ok(VideoMode::SideBySide),
            other => Err(other.to_string()),
        }
    }
}

/// Zoom factor with one decimal of precision, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ZoomLevel {
    pub integer: u8,
    pub tenths: u8,
}

impl ZoomLevel {
    /// Rounds a factor to the nearest tenth.
    pub fn from_factor(factor: f32) -> Result<Self, ProtocolError> {
        if !factor.is_finite() || !(0.0..=255.9).contains(&factor) {
            return Err(ProtocolError::ZoomNotEncodable(factor));
        }
        let scaled = (factor * 10.0).round() as u16;
        Ok(Self {
            integer: (scaled / 10) as u8,
            tenths: (scaled % 10) as u8,
        })
    }

    pub fn factor(&self) -> f32 {
        self.integer as f32 + self.tenths.min(9) as f32 / 10.0
    }

    fn parse(cmd_id: u8, data: &[u8]) -> Result<Self, ProtocolError> {
        require(cmd_id, data, 2)?;
        Ok(Self {
            integer: data[0],
            tenths: data[1],
        })
    }
}

/// A logical command sent to the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Heartbeat,
    RequestGimbalInfo,
    TakePhoto,
    ToggleRecord,
    SetZoom(ZoomLevel),
    RequestZoomLevel,
    RequestZoomRange,
    RequestVideoMode,
    SetVideoMode(u8),
}

impl Command {
    /// Returns the wire identifier for this command.
    pub fn cmd_id(&self, ids: &CommandSet) -> u8 {
        match self {
            Command::Heartbeat => ids.heartbeat,
            Command::RequestGimbalInfo => ids.gimbal_info,
            Command::TakePhoto | Command::ToggleRecord => ids.capture,
            Command::SetZoom(_) => ids.absolute_zoom,
            Command::RequestZoomLevel => ids.zoom_level,
            Command::RequestZoomRange => ids.zoom_range,
            Command::RequestVideoMode => ids.video_mode_query,
            Command::SetVideoMode(_) => ids.video_mode_set,
        }
    }

    fn payload(&self) -> Bytes {
        match self {
            Command::Heartbeat => Bytes::from_static(&[0x00]),
            Command::TakePhoto => Bytes::from_static(&[0x00]),
            Command::ToggleRecord => Bytes::from_static(&[0x02]),
            Command::SetZoom(level) => Bytes::copy_from_slice(&[level.integer, level.tenths]),
            Command::SetVideoMode(code) => Bytes::copy_from_slice(&[*code]),
            Command::RequestGimbalInfo
            | Command::RequestZoomLevel
            | Command::RequestZoomRange
            | Command::RequestVideoMode => Bytes::new(),
        }
    }

    /// Returns whether this command only reads device state.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Command::RequestGimbalInfo
                | Command::RequestZoomLevel
                | Command::RequestZoomRange
                | Command::RequestVideoMode
        )
    }

    /// Builds the frame for this command.
    pub fn to_frame(&self, ids: &CommandSet, seq: u16) -> Frame {
        let ctrl = if self.is_query() {
            FrameCtrl::new()
        } else {
            FrameCtrl::new().with_need_ack()
        };
        Frame::new(self.cmd_id(ids), self.payload())
            .with_ctrl(ctrl)
            .with_seq(seq)
    }
}

/// Recording status reported in the gimbal info frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Idle,
    Recording,
    NoCard,
    CardError,
    Unrecognized(u8),
}

impl From<u8> for RecordStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => RecordStatus::Idle,
            1 => RecordStatus::Recording,
            2 => RecordStatus::NoCard,
            3 => RecordStatus::CardError,
            other => RecordStatus::Unrecognized(other),
        }
    }
}

/// Function feedback codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    PhotoOk,
    PhotoFailed,
    HdrOn,
    HdrOff,
    RecordFailed,
    RecordStarted,
    RecordStopped,
    Other(u8),
}

impl From<u8> for Feedback {
    fn from(value: u8) -> Self {
        match value {
            0 => Feedback::PhotoOk,
            1 => Feedback::PhotoFailed,
            2 => Feedback::HdrOn,
            3 => Feedback::HdrOff,
            4 => Feedback::RecordFailed,
            5 => Feedback::RecordStarted,
            6 => Feedback::RecordStopped,
            other => Feedback::Other(other),
        }
    }
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::PhotoOk => "photo_ok",
            Feedback::PhotoFailed => "photo_failed",
            Feedback::HdrOn => "hdr_on",
            Feedback::HdrOff => "hdr_off",
            Feedback::RecordFailed => "record_failed",
            Feedback::RecordStarted => "record_started",
            Feedback::RecordStopped => "record_stopped",
            Feedback::Other(_) => "other",
        }
    }
}

/// A message received from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    GimbalInfo { record: RecordStatus, hdr_on: bool },
    Feedback(Feedback),
    ZoomLevel(ZoomLevel),
    ZoomRange(ZoomLevel),
    VideoMode(u8),
    ZoomAck,
    VideoModeAck,
    Other { cmd_id: u8, payload: Bytes },
}

impl DeviceMessage {
    /// Parses a frame into a device message.
    pub fn parse(frame: &Frame, ids: &CommandSet) -> Result<Self, ProtocolError> {
        let id = frame.cmd_id;
        let data = frame.payload.as_ref();

        if id == ids.gimbal_info {
            require(id, data, 4)?;
            Ok(DeviceMessage::GimbalInfo {
                record: RecordStatus::from(data[3]),
                hdr_on: data[1] != 0,
            })
        } else if id == ids.function_feedback {
            require(id, data, 1)?;
            Ok(DeviceMessage::Feedback(Feedback::from(data[0])))
        } else if id == ids.zoom_level {
            Ok(DeviceMessage::ZoomLevel(ZoomLevel::parse(id, data)?))
        } else if id == ids.zoom_range {
            Ok(DeviceMessage::ZoomRange(ZoomLevel::parse(id, data)?))
        } else if id == ids.video_mode_query {
            require(id, data, 1)?;
            Ok(DeviceMessage::VideoMode(data[0]))
        } else if id == ids.absolute_zoom {
            Ok(DeviceMessage::ZoomAck)
        } else if id == ids.video_mode_set {
            Ok(DeviceMessage::VideoModeAck)
        } else {
            Ok(DeviceMessage::Other {
                cmd_id: id,
                payload: frame.payload.clone(),
            })
        }
    }
}

fn require(cmd_id: u8, data: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if data.len() < needed {
        return Err(ProtocolError::ShortPayload {
            cmd_id,
            needed,
            got: data.len(),
        });
    }
    Ok(())
}
