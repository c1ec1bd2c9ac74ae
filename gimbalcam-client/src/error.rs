//! Client error types.

use crate::dispatcher::CommandClass;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] gimbalcam_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection reset")]
    ConnectionReset,

    #[error("device did not answer {0} command")]
    DeviceTimeout(CommandClass),

    #[error("a {0} command is already pending")]
    CommandPending(CommandClass),

    #[error("recording state not confirmed by device")]
    RecordStateUnconfirmed,

    #[error("recording unavailable: {0}")]
    RecordingFault(String),

    #[error("zoom {requested} out of range [1.0, {max}]")]
    ZoomOutOfRange { requested: f32, max: f32 },

    #[error("zoom change not confirmed by device")]
    ZoomUnconfirmed,

    #[error("invalid video mode: {0}")]
    InvalidVideoMode(String),

    #[error("video mode change not confirmed by device")]
    VideoModeUnconfirmed,

    #[error("invalid device address: {0:?}")]
    InvalidAddress(String),

    #[error("bridge shutting down")]
    ShuttingDown,
}

impl ClientError {
    /// Returns a stable code identifying the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Io(_) => "IO_ERROR",
            ClientError::Protocol(_) => "PROTOCOL_ERROR",
            ClientError::NotConnected => "NOT_CONNECTED",
            ClientError::ConnectionReset => "CONNECTION_RESET",
            ClientError::DeviceTimeout(_) => "DEVICE_TIMEOUT",
            ClientError::CommandPending(_) => "COMMAND_PENDING",
            ClientError::RecordStateUnconfirmed => "RECORD_STATE_UNCONFIRMED",
            ClientError::RecordingFault(_) => "RECORDING_FAULT",
            ClientError::ZoomOutOfRange { .. } => "ZOOM_OUT_OF_RANGE",
            ClientError::ZoomUnconfirmed => "ZOOM_UNCONFIRMED",
            ClientError::InvalidVideoMode(_) => "INVALID_VIDEO_MODE",
            ClientError::VideoModeUnconfirmed => "VIDEO_MODE_UNCONFIRMED",
            ClientError::InvalidAddress(_) => "INVALID_ADDRESS",
            ClientError::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Returns whether the caller supplied bad input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            ClientError::ZoomOutOfRange { .. }
                | ClientError::InvalidVideoMode(_)
                | ClientError::InvalidAddress(_)
        )
    }

    /// Returns whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::NotConnected
                | ClientError::ConnectionReset
                | ClientError::DeviceTimeout(_)
                | ClientError::CommandPending(_)
                | ClientError::RecordStateUnconfirmed
                | ClientError::ZoomUnconfirmed
                | ClientError::VideoModeUnconfirmed
        )
    }
}
