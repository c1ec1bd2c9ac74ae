//! # gimbalcam-protocol
//!
//! Wire protocol for the gimbal camera control port.
//!
//! This crate provides:
//! - Binary framing with a two-byte marker, length prefix and CRC16 validation
//! - A resynchronizing stream decoder
//! - Logical commands and parsed device messages
//! - A configurable command-identifier table

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{crc16, Frame, FrameCtrl, FRAME_HEADER_SIZE, FRAME_MIN_SIZE, MARKER};
pub use message::{
    Command, CommandSet, DeviceMessage, Feedback, RecordStatus, VideoMode, VideoModeCodes,
    ZoomLevel,
};

/// Default TCP port of the camera control service.
pub const DEFAULT_PORT: u16 = 37260;

/// Maximum frame payload size accepted by the decoder.
pub const MAX_PAYLOAD_SIZE: u16 = 1024;
