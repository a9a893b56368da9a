//! gRPC message framing: a 5-byte header (compression flag + big-endian length) in front of
//! each serialized message, carried across one or more HTTP/2 DATA frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const HEADER_SIZE: usize = 5;

/// Default ceiling on a single gRPC message's size, matching the common gRPC client/server
/// default.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrpcMessageHeader {
    pub compressed: bool,
    pub length: u32,
}

impl GrpcMessageHeader {
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            compressed: bytes[0] != 0,
            length: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
        }
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.put_u8(u8::from(self.compressed));
        out.put_u32(self.length);
    }
}

/// Wrap a single already-serialized message in its 5-byte gRPC frame header.
pub fn frame_message(payload: &[u8], compressed: bool) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    GrpcMessageHeader {
        compressed,
        length: payload.len() as u32,
    }
    .write(&mut out);
    out.extend_from_slice(payload);
    out.freeze()
}

/// Reassembles gRPC messages out of a byte stream that may split a message's frame header or
/// body across several HTTP/2 DATA frames, or pack several messages into one.
#[derive(Debug, Default)]
pub struct MessageReassembler {
    buffer: BytesMut,
    max_message_size: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ReassemblyError {
    #[error("gRPC message of {size} bytes exceeds the configured maximum of {max}")]
    MessageTooLarge { size: u32, max: usize },
}

impl MessageReassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_message_size,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop as many complete messages as the buffer currently holds.
    pub fn drain_complete(&mut self) -> Result<Vec<(bool, Bytes)>, ReassemblyError> {
        let mut out = Vec::new();
        loop {
            if self.buffer.len() < HEADER_SIZE {
                return Ok(out);
            }
            let mut header_bytes = [0u8; HEADER_SIZE];
            header_bytes.copy_from_slice(&self.buffer[..HEADER_SIZE]);
            let header = GrpcMessageHeader::decode(&header_bytes);
            if header.length as usize > self.max_message_size {
                return Err(ReassemblyError::MessageTooLarge {
                    size: header.length,
                    max: self.max_message_size,
                });
            }
            let total = HEADER_SIZE + header.length as usize;
            if self.buffer.len() < total {
                return Ok(out);
            }
            self.buffer.advance(HEADER_SIZE);
            let message = self.buffer.split_to(header.length as usize).freeze();
            out.push((header.compressed, message));
        }
    }

    pub fn has_pending_bytes(&self) -> bool {
        !self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_single_message() {
        let framed = frame_message(b"hello", false);
        let mut reassembler = MessageReassembler::new(4 * 1024 * 1024);
        reassembler.push(&framed);
        let messages = reassembler.drain_complete().unwrap();
        assert_eq!(messages, vec![(false, Bytes::from_static(b"hello"))]);
    }

    #[test]
    fn reassembles_across_partial_pushes() {
        let framed = frame_message(b"split across frames", true);
        let mut reassembler = MessageReassembler::new(4 * 1024 * 1024);
        reassembler.push(&framed[..3]);
        assert!(reassembler.drain_complete().unwrap().is_empty());
        reassembler.push(&framed[3..]);
        let messages = reassembler.drain_complete().unwrap();
        assert_eq!(messages, vec![(true, Bytes::from_static(b"split across frames"))]);
    }

    #[test]
    fn rejects_oversized_message() {
        let framed = frame_message(&[0u8; 100], false);
        let mut reassembler = MessageReassembler::new(10);
        reassembler.push(&framed);
        let err = reassembler.drain_complete().unwrap_err();
        assert!(matches!(err, ReassemblyError::MessageTooLarge { size: 100, max: 10 }));
    }

    #[test]
    fn drains_multiple_packed_messages() {
        let mut data = BytesMut::new();
        data.extend_from_slice(&frame_message(b"one", false));
        data.extend_from_slice(&frame_message(b"two", false));
        let mut reassembler = MessageReassembler::new(4 * 1024 * 1024);
        reassembler.push(&data);
        let messages = reassembler.drain_complete().unwrap();
        assert_eq!(
            messages,
            vec![
                (false, Bytes::from_static(b"one")),
                (false, Bytes::from_static(b"two")),
            ]
        );
    }
}
