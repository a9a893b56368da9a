//! Per-stream state machine and flow control windows (RFC 7540 §5, §6.9).
//!
//! A [`Stream`] tracks one HTTP/2 stream from the server's point of view: the client drives it
//! through HEADERS (request metadata) and DATA (gRPC-framed request messages), the server drives
//! it back through HEADERS (response metadata), DATA (response messages), and a final HEADERS
//! carrying `grpc-status` trailers. Server push is never used, so `RESERVED_*` states never
//! appear here.

use crate::error::{ErrorCode, FrameError, Http2Error};
use crate::frame::StreamId;
use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    HalfClosedRemote,
    HalfClosedLocal,
    Closed,
}

/// Accumulates HEADERS/CONTINUATION fragments until END_HEADERS arrives. RFC 7540 §4.3 forbids
/// any other frame type from being interleaved on the connection while a header block is open.
#[derive(Debug)]
struct HeaderBlockAssembly {
    buffer: BytesMut,
    end_stream: bool,
}

#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,
    state: StreamState,
    send_window: i64,
    recv_window: i64,
    assembly: Option<HeaderBlockAssembly>,
    reset_code: Option<ErrorCode>,
}

impl Stream {
    pub fn new(id: StreamId, initial_send_window: u32, initial_recv_window: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_window: initial_send_window as i64,
            recv_window: initial_recv_window as i64,
            assembly: None,
            reset_code: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    pub fn is_accepting_header_block(&self) -> bool {
        self.assembly.is_some()
    }

    pub fn recv_window(&self) -> i64 {
        self.recv_window
    }

    pub fn send_window(&self) -> i64 {
        self.send_window
    }

    pub fn reset_code(&self) -> Option<ErrorCode> {
        self.reset_code
    }

    /// First HEADERS frame on the stream: request metadata. Only valid from `Idle`. Returns the
    /// completed header block immediately when END_HEADERS was set on this same frame.
    pub fn receive_request_headers(
        &mut self,
        end_stream: bool,
        end_headers: bool,
        fragment: Bytes,
    ) -> Result<Option<(Bytes, bool)>, Http2Error> {
        if self.state != StreamState::Idle {
            return Err(Http2Error::StreamIdOutOfOrder);
        }
        self.state = if end_stream {
            StreamState::HalfClosedRemote
        } else {
            StreamState::Open
        };
        if end_headers {
            return Ok(Some((fragment, end_stream)));
        }
        let mut buffer = BytesMut::with_capacity(fragment.len());
        buffer.extend_from_slice(&fragment);
        self.assembly = Some(HeaderBlockAssembly { buffer, end_stream });
        Ok(None)
    }

    /// CONTINUATION frame extending an open header block. Returns the completed block once
    /// END_HEADERS arrives.
    pub fn receive_continuation(
        &mut self,
        end_headers: bool,
        fragment: Bytes,
    ) -> Result<Option<(Bytes, bool)>, Http2Error> {
        let assembly = self
            .assembly
            .as_mut()
            .ok_or(Http2Error::Frame(FrameError::UnexpectedContinuation))?;
        assembly.buffer.extend_from_slice(&fragment);
        if !end_headers {
            return Ok(None);
        }
        let assembly = self.assembly.take().expect("checked above");
        Ok(Some((assembly.buffer.freeze(), assembly.end_stream)))
    }

    /// Consume request DATA: enforce flow control and the stream's half-close state, and
    /// transition to `HalfClosedRemote`/`Closed` on END_STREAM.
    pub fn receive_data(&mut self, wire_length: u32, end_stream: bool, data: Bytes) -> Result<Bytes, Http2Error> {
        if !matches!(self.state, StreamState::Open | StreamState::HalfClosedLocal) {
            return Err(Http2Error::StreamIdOutOfOrder);
        }
        self.recv_window -= wire_length as i64;
        if self.recv_window < 0 {
            return Err(Http2Error::FlowControl);
        }
        if end_stream {
            self.state = match self.state {
                StreamState::Open => StreamState::HalfClosedRemote,
                StreamState::HalfClosedLocal => StreamState::Closed,
                other => other,
            };
        }
        Ok(data)
    }

    /// Replenish the receive window once the application has consumed buffered data — the
    /// connection driver still owes the peer a WINDOW_UPDATE for this amount.
    pub fn grant_recv_window(&mut self, n: u32) {
        self.recv_window += n as i64;
    }

    /// Apply a WINDOW_UPDATE frame (or a SETTINGS_INITIAL_WINDOW_SIZE delta) to the send side.
    /// RFC 7540 §6.9.1: the window must never exceed 2^31-1.
    pub fn apply_send_window_update(&mut self, increment: i64) -> Result<(), Http2Error> {
        self.send_window += increment;
        if self.send_window > i64::from(u32::MAX >> 1) {
            return Err(Http2Error::FlowControl);
        }
        Ok(())
    }

    pub fn charge_send_window(&mut self, n: u32) {
        self.send_window -= n as i64;
    }

    /// The server sent a HEADERS/DATA frame with END_STREAM: half-close (or fully close)
    /// locally.
    pub fn close_local(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    pub fn reset(&mut self, code: ErrorCode) {
        self.state = StreamState::Closed;
        self.reset_code = Some(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_then_response_closes_both_sides() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        let block = stream
            .receive_request_headers(false, true, Bytes::from_static(b"fake-header-block"))
            .unwrap();
        assert!(matches!(block, Some((_, false))));
        assert_eq!(stream.state(), StreamState::Open);

        stream
            .receive_data(5, true, Bytes::from_static(b"hello"))
            .unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);

        stream.close_local();
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(stream.is_closed());
    }

    #[test]
    fn continuation_assembles_header_block() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        assert!(stream
            .receive_request_headers(false, false, Bytes::from_static(b"part1-"))
            .unwrap()
            .is_none());
        assert!(stream.is_accepting_header_block());
        let (block, end_stream) = stream
            .receive_continuation(true, Bytes::from_static(b"part2"))
            .unwrap()
            .unwrap();
        assert_eq!(&block[..], b"part1-part2");
        assert!(!end_stream);
        assert!(!stream.is_accepting_header_block());
    }

    #[test]
    fn data_beyond_recv_window_is_a_flow_control_error() {
        let mut stream = Stream::new(1, 65_535, 10);
        stream
            .receive_request_headers(false, true, Bytes::new())
            .unwrap();
        let err = stream.receive_data(20, false, Bytes::from_static(b"0123456789012345678")).unwrap_err();
        assert!(matches!(err, Http2Error::FlowControl));
    }

    #[test]
    fn headers_out_of_order_is_rejected() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        stream
            .receive_request_headers(true, true, Bytes::new())
            .unwrap();
        let err = stream
            .receive_request_headers(true, true, Bytes::new())
            .unwrap_err();
        assert!(matches!(err, Http2Error::StreamIdOutOfOrder));
    }
}
