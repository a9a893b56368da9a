//! gRPC semantics layered on top of the HTTP/2 transport: message framing, status codes, and
//! metadata.

pub mod framing;
pub mod metadata;
pub mod status;

pub use framing::{GrpcMessageHeader, MessageReassembler, ReassemblyError, DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE};
pub use metadata::{format_grpc_timeout, parse_grpc_timeout, Metadata};
pub use status::{Status, StatusCode};

/// The single `content-type` this server accepts/emits. Anything else is rejected before a
/// method is ever looked up.
pub const CONTENT_TYPE: &str = "application/grpc";

pub fn content_type_is_grpc(value: &[u8]) -> bool {
    value == CONTENT_TYPE.as_bytes() || value.starts_with(format!("{CONTENT_TYPE}+").as_bytes())
}
