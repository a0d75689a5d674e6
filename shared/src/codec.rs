//! Length-prefixed framing for the control socket
//!
//! Every frame is:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf ControlEnvelope ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::ControlEnvelope;

/// Control frames are small; anything larger is a confused peer
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

const PREFIX_LEN: usize = 4;

/// Errors that can occur while framing control messages
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Invalid frame length prefix: {0}")]
    InvalidLength(u32),

    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// Encode a control envelope into a single length-prefixed frame
pub fn encode(frame: &ControlEnvelope) -> Result<Bytes, CodecError> {
    let body_len = frame.encoded_len();
    if body_len > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge(body_len));
    }

    let mut buf = BytesMut::with_capacity(PREFIX_LEN + body_len);
    buf.put_u32(body_len as u32);
    frame.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Try to take one complete frame off the front of `buf`
///
/// Returns `Ok(None)` and leaves `buf` untouched when more bytes are needed.
pub fn decode(buf: &mut BytesMut) -> Result<Option<ControlEnvelope>, CodecError> {
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }

    let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if body_len > MAX_FRAME_SIZE {
        return Err(CodecError::InvalidLength(body_len));
    }
    if buf.len() < PREFIX_LEN + body_len as usize {
        return Ok(None);
    }

    buf.advance(PREFIX_LEN);
    let body = buf.split_to(body_len as usize);
    Ok(Some(ControlEnvelope::decode(body)?))
}

/// Accumulates bytes read from a socket and yields whole frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Add freshly read bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Call repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<ControlEnvelope>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_envelope::Payload;
    use crate::StatusReport;

    fn status_frame() -> ControlEnvelope {
        ControlEnvelope::new(
            3,
            Payload::Status(StatusReport {
                device_id: "dev-1".into(),
                service_running: true,
                kiosk_active: true,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_length_prefix_matches_body() {
        let encoded = encode(&status_frame()).expect("encode failed");
        let prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(prefix as usize, encoded.len() - PREFIX_LEN);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let encoded = encode(&status_frame()).expect("encode failed");

        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded[..6]);
        assert!(decoder.decode_next().expect("decode error").is_none());
        assert_eq!(decoder.buffered(), 6);

        decoder.extend(&encoded[6..]);
        let decoded = decoder
            .decode_next()
            .expect("decode error")
            .expect("should have frame");
        assert_eq!(decoded.request_id, 3);
        match decoded.payload {
            Some(Payload::Status(report)) => {
                assert_eq!(report.device_id, "dev-1");
                assert!(report.kiosk_active);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode(&ControlEnvelope::status_request(1)).unwrap());
        decoder.extend(&encode(&ControlEnvelope::manual_restart(2)).unwrap());

        let first = decoder.decode_next().unwrap().unwrap();
        let second = decoder.decode_next().unwrap().unwrap();
        assert_eq!(first.request_id, 1);
        assert!(matches!(second.payload, Some(Payload::ManualRestart(_))));
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_SIZE + 1);
        buf.put_bytes(0, 16);

        assert!(matches!(decode(&mut buf), Err(CodecError::InvalidLength(_))));
    }
}
