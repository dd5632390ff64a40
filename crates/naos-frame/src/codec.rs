use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: version (1) + session (2) + endpoint (1) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// The only frame version understood by devices.
pub const VERSION: u8 = 1;

/// A message addressed to an endpoint within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The session this message belongs to (0 during handshake).
    pub session: u16,
    /// The endpoint this message is addressed to.
    pub endpoint: u8,
    /// The message payload.
    pub data: Bytes,
}

impl Message {
    /// Create a new message.
    pub fn new(session: u16, endpoint: u8, data: impl Into<Bytes>) -> Self {
        Self {
            session,
            endpoint,
            data: data.into(),
        }
    }

    /// The total wire size of this message (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }

    /// Encode this message into a standalone frame.
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.wire_size());
        encode_message(self.session, self.endpoint, &self.data, &mut dst);
        dst.freeze()
    }

    /// Decode a message from a complete frame.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        decode_message(frame)
    }
}

/// Encode a message into the wire format.
///
/// Wire format:
/// ```text
/// ┌─────────────┬──────────────┬─────────────┬──────────────┐
/// │ Version (1B)│ Session (2B) │ Endpoint    │ Payload      │
/// │ 0x01        │ LE           │ (1B)        │ (remaining)  │
/// └─────────────┴──────────────┴─────────────┴──────────────┘
/// ```
///
/// Frames are never split or concatenated by the transports, so the payload
/// length is implied by the frame length.
pub fn encode_message(session: u16, endpoint: u8, data: &[u8], dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE + data.len());
    dst.put_u8(VERSION);
    dst.put_u16_le(session);
    dst.put_u8(endpoint);
    dst.put_slice(data);
}

/// Decode a message from a complete frame.
pub fn decode_message(frame: &[u8]) -> Result<Message> {
    if frame.len() < HEADER_SIZE {
        return Err(FrameError::TooShort {
            len: frame.len(),
            min: HEADER_SIZE,
        });
    }

    if frame[0] != VERSION {
        return Err(FrameError::InvalidVersion(frame[0]));
    }

    let session = u16::from_le_bytes([frame[1], frame[2]]);
    let endpoint = frame[3];
    let data = Bytes::copy_from_slice(&frame[HEADER_SIZE..]);

    Ok(Message {
        session,
        endpoint,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let msg = Message::new(0x1234, 0x03, Bytes::from_static(b"hello, naos!"));
        let frame = msg.encode();

        assert_eq!(frame.len(), HEADER_SIZE + 12);
        assert_eq!(&frame[..4], &[1, 0x34, 0x12, 0x03]);

        let decoded = decode_message(&frame).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_header_only() {
        let decoded = decode_message(&[1, 7, 0, 0xFE]).unwrap();
        assert_eq!(decoded.session, 7);
        assert_eq!(decoded.endpoint, 0xFE);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn test_decode_too_short() {
        for len in 0..HEADER_SIZE {
            let frame = vec![1u8; len];
            let result = decode_message(&frame);
            assert_eq!(result, Err(FrameError::TooShort { len, min: 4 }));
        }
    }

    #[test]
    fn test_decode_invalid_version() {
        let result = decode_message(&[2, 0, 0, 0, 0xAA]);
        assert_eq!(result, Err(FrameError::InvalidVersion(2)));

        let result = decode_message(&[0, 0, 0, 0]);
        assert_eq!(result, Err(FrameError::InvalidVersion(0)));
    }

    #[test]
    fn test_encode_appends_to_buffer() {
        let mut buf = BytesMut::new();
        encode_message(1, 1, b"a", &mut buf);
        encode_message(2, 2, b"bc", &mut buf);
        assert_eq!(buf.as_ref(), &[1, 1, 0, 1, b'a', 1, 2, 0, 2, b'b', b'c']);
    }

    #[test]
    fn test_wire_size() {
        let msg = Message::new(0, 0, Bytes::from_static(b"test"));
        assert_eq!(msg.wire_size(), HEADER_SIZE + 4);
    }
}
