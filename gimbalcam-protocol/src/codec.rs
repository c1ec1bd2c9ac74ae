//! Encoder and stream decoder for device frames.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::{Command, CommandSet};
use bytes::{Bytes, BytesMut};

/// Encodes logical commands into wire bytes.
pub struct Encoder;

impl Encoder {
    /// Encodes a command with the given sequence number.
    pub fn encode_command(
        command: &Command,
        ids: &CommandSet,
        seq: u16,
    ) -> Result<BytesMut, ProtocolError> {
        command.to_frame(ids, seq).encode()
    }

    /// Encodes a raw command identifier and payload.
    pub fn encode_raw(cmd_id: u8, payload: Bytes, seq: u16) -> Result<BytesMut, ProtocolError> {
        Frame::new(cmd_id, payload).with_seq(seq).encode()
    }
}

/// Buffers inbound bytes and splits them into frames.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// A resync error means one candidate was rejected; calling again
    /// continues scanning after it.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
