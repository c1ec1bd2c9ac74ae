//! Binary frame format of the camera control port.
//!
//! Frame layout (8 bytes header + payload + 2 bytes checksum), little-endian:
//!
//! ```text
//! +--------+--------+----------+---------+---------+---------+--------+
//! | marker |  ctrl  | data_len |   seq   | cmd_id  |  data   | crc16  |
//! | 2 bytes| 1 byte | 2 bytes  | 2 bytes | 1 byte  | data_len| 2 bytes|
//! +--------+--------+----------+---------+---------+---------+--------+
//! ```
//!
//! The checksum is CRC-16/XMODEM over every byte preceding it.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Marker bytes that open every frame.
pub const MARKER: [u8; 2] = [0x55, 0x66];

/// Size of the fixed frame header in bytes (2+1+2+2+1 = 8).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Smallest possible frame: header plus checksum, empty payload.
pub const FRAME_MIN_SIZE: usize = FRAME_HEADER_SIZE + 2;

/// Control byte bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCtrl(u8);

impl FrameCtrl {
    /// Sender expects an acknowledgement.
    pub const NEED_ACK: u8 = 1 << 0;
    /// Frame is an acknowledgement.
    pub const ACK_PACK: u8 = 1 << 1;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_need_ack(mut self) -> Self {
        self.0 |= Self::NEED_ACK;
        self
    }

    pub fn need_ack(&self) -> bool {
        self.0 & Self::NEED_ACK != 0
    }

    pub fn is_ack(&self) -> bool {
        self.0 & Self::ACK_PACK != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }
}

/// CRC-16/XMODEM (poly 0x1021, init 0x0000).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// A parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Control flags.
    pub ctrl: FrameCtrl,
    /// Sender sequence number.
    pub seq: u16,
    /// Command identifier.
    pub cmd_id: u8,
    /// Command data.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame requesting an acknowledgement.
    pub fn new(cmd_id: u8, payload: Bytes) -> Self {
        Self {
            ctrl: FrameCtrl::new().with_need_ack(),
            seq: 0,
            cmd_id,
            payload,
        }
    }

    pub fn with_seq(mut self, seq: u16) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_ctrl(mut self, ctrl: FrameCtrl) -> Self {
        self.ctrl = ctrl;
        self
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: self.payload.len().min(u16::MAX as usize) as u16,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_MIN_SIZE + self.payload.len());
        buf.put_slice(&MARKER);
        buf.put_u8(self.ctrl.bits());
        buf.put_u16_le(self.payload.len() as u16);
        buf.put_u16_le(self.seq);
        buf.put_u8(self.cmd_id);
        buf.put_slice(&self.payload);

        let crc = crc16(&buf);
        buf.put_u16_le(crc);

        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded, `Ok(None)`
    /// if more data is needed, or `Err` when the candidate frame at the front
    /// was rejected. Bytes ahead of the next marker are dropped; a rejected
    /// candidate costs exactly one byte so the next call rescans from the
    /// following position.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        match find_marker(buf) {
            Some(0) => {}
            Some(start) => buf.advance(start),
            None => {
                // Keep a trailing first marker byte, it may be half a marker.
                let keep = usize::from(buf.last() == Some(&MARKER[0]));
                let drop = buf.len() - keep;
                buf.advance(drop);
                return Ok(None);
            }
        }

        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let data_len = u16::from_le_bytes([buf[3], buf[4]]);
        if data_len > MAX_PAYLOAD_SIZE {
            buf.advance(1);
            return Err(ProtocolError::FrameTooLarge {
                size: data_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let total_len = FRAME_MIN_SIZE + data_len as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        let body_len = total_len - 2;
        let expected = u16::from_le_bytes([buf[body_len], buf[body_len + 1]]);
        let actual = crc16(&buf[..body_len]);
        if expected != actual {
            buf.advance(1);
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }

        let ctrl = FrameCtrl::from_bits(buf[2]);
        let seq = u16::from_le_bytes([buf[5], buf[6]]);
        let cmd_id = buf[7];

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(data_len as usize).freeze();
        buf.advance(2);

        Ok(Some(Self {
            ctrl,
            seq,
            cmd_id,
            payload,
        }))
    }
}

fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(MARKER.len()).position(|w| w == MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        // CRC-16/XMODEM check value
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn test_encode_layout() {
        let frame = Frame::new(0x0C, Bytes::from_static(&[0x02])).with_seq(0x0102);
        let encoded = frame.encode().unwrap();

        assert_eq!(encoded.len(), FRAME_MIN_SIZE + 1);
        assert_eq!(&encoded[0..2], &MARKER);
        assert_eq!(encoded[2], FrameCtrl::NEED_ACK);
        assert_eq!(&encoded[3..5], &[0x01, 0x00]);
        assert_eq!(&encoded[5..7], &[0x02, 0x01]);
        assert_eq!(encoded[7], 0x0C);
        assert_eq!(encoded[8], 0x02);

        let crc = crc16(&encoded[..9]);
        assert_eq!(&encoded[9..11], &crc.to_le_bytes());
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(0x18, Bytes::from_static(&[4, 5])).with_seq(7);
        let mut buf = frame.encode().unwrap();
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_frame() {
        let frame = Frame::new(0x0A, Bytes::new());
        let encoded = frame.encode().unwrap();

        let mut buf = BytesMut::from(&encoded[..5]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);

        let mut buf = BytesMut::from(&encoded[..encoded.len() - 1]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_checksum_mismatch_drops_one_byte() {
        let mut encoded = Frame::new(0x0A, Bytes::from_static(&[1, 2, 3]))
            .encode()
            .unwrap();
        let len = encoded.len();
        encoded[len - 1] ^= 0xFF;

        let before = encoded.len();
        let result = Frame::decode(&mut encoded);
        assert!(matches!(result, Err(ProtocolError::ChecksumMismatch { .. })));
        assert_eq!(encoded.len(), before - 1);
    }

    #[test]
    fn test_leading_garbage_skipped() {
        let frame = Frame::new(0x10, Bytes::from_static(&[3]));
        let mut buf = BytesMut::from(&b"\x00\x13\x37"[..]);
        buf.extend_from_slice(&frame.encode().unwrap());

        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.cmd_id, 0x10);
    }

    #[test]
    fn test_garbage_only_keeps_half_marker() {
        let mut buf = BytesMut::from(&b"\x01\x02\x55"[..]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], &[0x55]);

        buf.extend_from_slice(&[0x99]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = BytesMut::from(&b"\x55\x66\x01\xff\xff\x00\x00\x0a"[..]);
        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_encode_too_large() {
        let frame = Frame::new(0x01, Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE as usize + 1]));
        assert!(matches!(
            frame.encode(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_ctrl_flags() {
        let ctrl = FrameCtrl::new().with_need_ack();
        assert!(ctrl.need_ack());
        assert!(!ctrl.is_ack());
        assert!(FrameCtrl::from_bits(0x02).is_ack());
    }
}
