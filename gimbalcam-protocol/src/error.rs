//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or message parsing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u16, max: u16 },

    #[error("payload too short for command {cmd_id:#04x}: need {needed} bytes, got {got}")]
    ShortPayload { cmd_id: u8, needed: usize, got: usize },

    #[error("zoom level out of encodable range: {0}")]
    ZoomNotEncodable(f32),
}

impl ProtocolError {
    /// Returns whether the decoder recovers from this error by resynchronizing.
    pub fn is_resync(&self) -> bool {
        matches!(
            self,
            ProtocolError::ChecksumMismatch { .. } | ProtocolError::FrameTooLarge { .. }
        )
    }
}
