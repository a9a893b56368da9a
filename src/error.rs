use crate::frame::FrameType;
use num_derive::{FromPrimitive, ToPrimitive};
use thiserror::Error;

/// https://httpwg.org/specs/rfc7540.html#ErrorCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown frame type {0}")]
    UnknownType(u8),
    #[error("frame length {length} exceeds MAX_FRAME_SIZE {max}")]
    TooLarge { length: u32, max: u32 },
    #[error("payload shorter than the declared frame length")]
    PayloadTooShort,
    #[error("WINDOW_UPDATE increment must be in 1..=2^31-1, got {0}")]
    InvalidWindowIncrement(u32),
    #[error("SETTINGS payload length {0} is not a multiple of 6")]
    InvalidSettingsLength(usize),
    #[error("PING payload must be exactly 8 bytes, got {0}")]
    InvalidPingLength(usize),
    #[error("even-numbered client-initiated stream id {0}")]
    EvenClientStreamId(u32),
    #[error("{0:?} is not permitted on stream 0")]
    RequiresStream(FrameType),
    #[error("{0:?} is only permitted on stream 0")]
    RequiresConnection(FrameType),
    #[error("PUSH_PROMISE received but server push is disabled")]
    PushPromiseRejected,
    #[error("CONTINUATION received without a preceding HEADERS/PUSH_PROMISE")]
    UnexpectedContinuation,
    #[error("frame interleaved mid header block before END_HEADERS")]
    InterleavedFrame,
}

impl FrameError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FrameError::InvalidWindowIncrement(_) => ErrorCode::ProtocolError,
            FrameError::TooLarge { .. } => ErrorCode::FrameSizeError,
            FrameError::InvalidSettingsLength(_) => ErrorCode::FrameSizeError,
            FrameError::InvalidPingLength(_) => ErrorCode::FrameSizeError,
            _ => ErrorCode::ProtocolError,
        }
    }
}

#[derive(Debug, Error)]
pub enum HpackError {
    #[error("invalid index {0} into the static/dynamic header tables")]
    InvalidIndex(usize),
    #[error("truncated integer representation")]
    TruncatedInteger,
    #[error("integer representation overflowed")]
    IntegerOverflow,
    #[error("huffman sequence did not terminate in all-ones EOS padding")]
    HuffmanPadding,
    #[error("huffman bitstream did not resolve to a valid symbol")]
    InvalidHuffmanCode,
    #[error("truncated header block fragment")]
    Truncated,
    #[error("dynamic table size update of {requested} exceeds the SETTINGS maximum {max}")]
    TableSizeUpdateTooLarge { requested: usize, max: usize },
    #[error("dynamic table size update did not appear at the start of the header block")]
    MisplacedTableSizeUpdate,
}

/// Connection-level failure: always terminates the connection with a GOAWAY (or, for a
/// preface mismatch, with nothing at all).
#[derive(Debug, Error)]
pub enum Http2Error {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Hpack(#[from] HpackError),
    #[error("flow-control window exceeded")]
    FlowControl,
    #[error("too many concurrent streams")]
    StreamRefused,
    #[error("stream ids received out of order")]
    StreamIdOutOfOrder,
    #[error("client preface did not match the expected magic")]
    BadPreface,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Http2Error {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Http2Error::Frame(e) => e.error_code(),
            Http2Error::Hpack(_) => ErrorCode::CompressionError,
            Http2Error::FlowControl => ErrorCode::FlowControlError,
            Http2Error::StreamRefused => ErrorCode::RefusedStream,
            Http2Error::StreamIdOutOfOrder => ErrorCode::ProtocolError,
            Http2Error::BadPreface => ErrorCode::ProtocolError,
            Http2Error::Io(_) => ErrorCode::InternalError,
        }
    }
}
