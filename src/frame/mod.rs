//! Frame codec: the 9-byte frame header plus the ten typed payloads defined by
//! RFC 7540. `decode` turns a header + payload buffer into a typed [`Frame`]; `encode` does the
//! reverse. PUSH_PROMISE is parsed only so that receipt of one can be rejected — this server
//! never emits one.

mod flags;
mod settings;

pub use flags::{ContinuationFlags, DataFlags, HeadersFlags, PingFlags, PushPromiseFlags, SettingsFlags};
pub use settings::{
    local_defaults, peer_defaults, SettingsParameter, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE,
};

use crate::error::FrameError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

pub type StreamId = u32;

/// https://httpwg.org/specs/rfc7540.html#FrameTypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    ResetStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// The fixed 9-byte frame header, parsed ahead of the (variable-length) payload so the
/// connection driver knows how many more bytes to read.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
}

impl FrameHeader {
    pub const SIZE: usize = 9;

    pub fn decode(header: &[u8; Self::SIZE]) -> Self {
        let length = u32::from_be_bytes([0, header[0], header[1], header[2]]);
        let stream_id = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & !(1 << 31);
        Self {
            length,
            frame_type: header[3],
            flags: header[4],
            stream_id,
        }
    }

    fn write(&self, payload_len: usize, out: &mut BytesMut) {
        out.put_slice(&(payload_len as u32).to_be_bytes()[1..]);
        out.put_u8(self.frame_type);
        out.put_u8(self.flags);
        out.put_u32(self.stream_id & !(1 << 31));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Priority {
    pub dependency: StreamId,
    pub exclusive: bool,
    pub weight: u8,
}

#[derive(Debug, Clone)]
pub enum Frame {
    Data {
        stream_id: StreamId,
        end_stream: bool,
        /// Declared on-wire length, padding included — what flow control must charge against
        /// the receive window.
        wire_length: u32,
        data: Bytes,
    },
    Headers {
        stream_id: StreamId,
        end_stream: bool,
        end_headers: bool,
        priority: Option<Priority>,
        fragment: Bytes,
    },
    Priority {
        stream_id: StreamId,
        priority: Priority,
    },
    ResetStream {
        stream_id: StreamId,
        error_code: u32,
    },
    Settings {
        ack: bool,
        params: Vec<(SettingsParameter, u32)>,
    },
    PushPromise {
        stream_id: StreamId,
        promised_stream_id: StreamId,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    GoAway {
        last_stream_id: StreamId,
        error_code: u32,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: StreamId,
        increment: u32,
    },
    Continuation {
        stream_id: StreamId,
        end_headers: bool,
        fragment: Bytes,
    },
    /// A frame type this server doesn't know about. RFC 7540 §4.1 requires unknown types and
    /// flags to be ignored rather than rejected.
    Unknown {
        frame_type: u8,
        stream_id: StreamId,
    },
}

impl Frame {
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::ResetStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    /// Validate and parse a payload against an already-decoded header. `local_max_frame_size`
    /// is this endpoint's own SETTINGS_MAX_FRAME_SIZE (the limit the peer must respect).
    pub fn decode(
        header: FrameHeader,
        mut payload: Bytes,
        local_max_frame_size: u32,
    ) -> Result<Self, FrameError> {
        if header.length > local_max_frame_size {
            return Err(FrameError::TooLarge {
                length: header.length,
                max: local_max_frame_size,
            });
        }
        if payload.len() < header.length as usize {
            return Err(FrameError::PayloadTooShort);
        }

        let Some(frame_type) = FrameType::from_u8(header.frame_type) else {
            return Ok(Frame::Unknown {
                frame_type: header.frame_type,
                stream_id: header.stream_id,
            });
        };

        match frame_type {
            FrameType::Data => {
                if header.stream_id == 0 {
                    return Err(FrameError::RequiresStream(FrameType::Data));
                }
                let padded = header.flags & DataFlags::PADDED.bits() != 0;
                let data = strip_padding(&mut payload, padded)?;
                Ok(Frame::Data {
                    stream_id: header.stream_id,
                    end_stream: header.flags & DataFlags::END_STREAM.bits() != 0,
                    wire_length: header.length,
                    data,
                })
            }
            FrameType::Headers => {
                if header.stream_id == 0 {
                    return Err(FrameError::RequiresStream(FrameType::Headers));
                }
                if header.stream_id % 2 == 0 {
                    return Err(FrameError::EvenClientStreamId(header.stream_id));
                }
                let padded = header.flags & HeadersFlags::PADDED.bits() != 0;
                let mut data = strip_padding(&mut payload, padded)?;
                let priority = if header.flags & HeadersFlags::PRIORITY.bits() != 0 {
                    if data.len() < 5 {
                        return Err(FrameError::PayloadTooShort);
                    }
                    let raw = data.get_u32();
                    let weight = data.get_u8();
                    Some(Priority {
                        dependency: raw & !(1 << 31),
                        exclusive: raw & (1 << 31) != 0,
                        weight,
                    })
                } else {
                    None
                };
                Ok(Frame::Headers {
                    stream_id: header.stream_id,
                    end_stream: header.flags & HeadersFlags::END_STREAM.bits() != 0,
                    end_headers: header.flags & HeadersFlags::END_HEADERS.bits() != 0,
                    priority,
                    fragment: data,
                })
            }
            FrameType::Priority => {
                if header.stream_id == 0 {
                    return Err(FrameError::RequiresStream(FrameType::Priority));
                }
                if payload.len() < 5 {
                    return Err(FrameError::PayloadTooShort);
                }
                let raw = payload.get_u32();
                let weight = payload[0];
                Ok(Frame::Priority {
                    stream_id: header.stream_id,
                    priority: Priority {
                        dependency: raw & !(1 << 31),
                        exclusive: raw & (1 << 31) != 0,
                        weight,
                    },
                })
            }
            FrameType::ResetStream => {
                if header.stream_id == 0 {
                    return Err(FrameError::RequiresStream(FrameType::ResetStream));
                }
                if payload.len() < 4 {
                    return Err(FrameError::PayloadTooShort);
                }
                Ok(Frame::ResetStream {
                    stream_id: header.stream_id,
                    error_code: payload.get_u32(),
                })
            }
            FrameType::Settings => {
                if header.stream_id != 0 {
                    return Err(FrameError::RequiresConnection(FrameType::Settings));
                }
                if payload.len() % 6 != 0 {
                    return Err(FrameError::InvalidSettingsLength(payload.len()));
                }
                let ack = header.flags & SettingsFlags::ACK.bits() != 0;
                let mut params = Vec::with_capacity(payload.len() / 6);
                while payload.has_remaining() {
                    let id = payload.get_u16();
                    let value = payload.get_u32();
                    // unknown settings identifiers are ignored per RFC 7540 §6.5.2
                    if let Some(param) = SettingsParameter::from_u16(id) {
                        params.push((param, value));
                    }
                }
                Ok(Frame::Settings { ack, params })
            }
            FrameType::PushPromise => Err(FrameError::PushPromiseRejected),
            FrameType::Ping => {
                if header.stream_id != 0 {
                    return Err(FrameError::RequiresConnection(FrameType::Ping));
                }
                if payload.len() != 8 {
                    return Err(FrameError::InvalidPingLength(payload.len()));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload[..8]);
                Ok(Frame::Ping {
                    ack: header.flags & PingFlags::ACK.bits() != 0,
                    data,
                })
            }
            FrameType::GoAway => {
                if header.stream_id != 0 {
                    return Err(FrameError::RequiresConnection(FrameType::GoAway));
                }
                if payload.len() < 8 {
                    return Err(FrameError::PayloadTooShort);
                }
                let last_stream_id = payload.get_u32() & !(1 << 31);
                let error_code = payload.get_u32();
                Ok(Frame::GoAway {
                    last_stream_id,
                    error_code,
                    debug_data: payload,
                })
            }
            FrameType::WindowUpdate => {
                if payload.len() < 4 {
                    return Err(FrameError::PayloadTooShort);
                }
                let increment = payload.get_u32() & !(1 << 31);
                if increment == 0 {
                    return Err(FrameError::InvalidWindowIncrement(increment));
                }
                Ok(Frame::WindowUpdate {
                    stream_id: header.stream_id,
                    increment,
                })
            }
            FrameType::Continuation => {
                if header.stream_id == 0 {
                    return Err(FrameError::RequiresStream(FrameType::Continuation));
                }
                Ok(Frame::Continuation {
                    stream_id: header.stream_id,
                    end_headers: header.flags & ContinuationFlags::END_HEADERS.bits() != 0,
                    fragment: payload,
                })
            }
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(FrameHeader::SIZE + 32);
        out.resize(FrameHeader::SIZE, 0);
        let (frame_type, flags, stream_id) = match self {
            Frame::Data {
                stream_id,
                end_stream,
                data,
                ..
            } => {
                out.extend_from_slice(data);
                (
                    FrameType::Data,
                    if *end_stream { DataFlags::END_STREAM.bits() } else { 0 },
                    *stream_id,
                )
            }
            Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                fragment,
                ..
            } => {
                out.extend_from_slice(fragment);
                let mut flags = 0;
                if *end_stream {
                    flags |= HeadersFlags::END_STREAM.bits();
                }
                if *end_headers {
                    flags |= HeadersFlags::END_HEADERS.bits();
                }
                (FrameType::Headers, flags, *stream_id)
            }
            Frame::Priority { stream_id, priority } => {
                let raw = priority.dependency | if priority.exclusive { 1 << 31 } else { 0 };
                out.put_u32(raw);
                out.put_u8(priority.weight);
                (FrameType::Priority, 0, *stream_id)
            }
            Frame::ResetStream { stream_id, error_code } => {
                out.put_u32(*error_code);
                (FrameType::ResetStream, 0, *stream_id)
            }
            Frame::Settings { ack, params } => {
                for (param, value) in params {
                    out.put_u16(param.to_u16().expect("SettingsParameter fits u16"));
                    out.put_u32(*value);
                }
                (
                    FrameType::Settings,
                    if *ack { SettingsFlags::ACK.bits() } else { 0 },
                    0,
                )
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
            } => {
                out.put_u32(*promised_stream_id & !(1 << 31));
                (FrameType::PushPromise, PushPromiseFlags::END_HEADERS.bits(), *stream_id)
            }
            Frame::Ping { ack, data } => {
                out.extend_from_slice(data);
                (FrameType::Ping, if *ack { PingFlags::ACK.bits() } else { 0 }, 0)
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                out.put_u32(*last_stream_id & !(1 << 31));
                out.put_u32(*error_code);
                out.extend_from_slice(debug_data);
                (FrameType::GoAway, 0, 0)
            }
            Frame::WindowUpdate { stream_id, increment } => {
                out.put_u32(*increment & !(1 << 31));
                (FrameType::WindowUpdate, 0, *stream_id)
            }
            Frame::Continuation {
                stream_id,
                end_headers,
                fragment,
            } => {
                out.extend_from_slice(fragment);
                (
                    FrameType::Continuation,
                    if *end_headers { ContinuationFlags::END_HEADERS.bits() } else { 0 },
                    *stream_id,
                )
            }
            Frame::Unknown { .. } => {
                // never constructed for encoding; nothing to write beyond the header
                (FrameType::Data, 0, 0)
            }
        };

        let payload_len = out.len() - FrameHeader::SIZE;
        let header = FrameHeader {
            length: payload_len as u32,
            frame_type: frame_type.to_u8().expect("FrameType fits u8"),
            flags,
            stream_id,
        };
        let mut head = BytesMut::with_capacity(FrameHeader::SIZE);
        header.write(payload_len, &mut head);
        out[..FrameHeader::SIZE].copy_from_slice(&head);
        out
    }
}

fn strip_padding(payload: &mut Bytes, padded: bool) -> Result<Bytes, FrameError> {
    if !padded {
        return Ok(std::mem::take(payload));
    }
    if payload.is_empty() {
        return Err(FrameError::PayloadTooShort);
    }
    let pad_len = payload[0] as usize;
    payload.advance(1);
    if payload.len() < pad_len {
        return Err(FrameError::PayloadTooShort);
    }
    let content_len = payload.len() - pad_len;
    Ok(payload.split_to(content_len))
}
