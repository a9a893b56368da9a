//! The message codec boundary: this crate never inspects or requires a
//! particular serialization format. A [`Codec`] only tags the `grpc-encoding`/content-subtype a
//! service advertises; turning bytes into application types is left entirely to the handler.

pub trait Codec: Send + Sync + 'static {
    /// The gRPC content-type subtype, e.g. `proto` for `application/grpc+proto`. `None` means
    /// the bare `application/grpc` (this server's default).
    fn content_subtype(&self) -> Option<&'static str> {
        None
    }
}

/// The default codec: message bytes pass through unmodified. Most handlers built on this crate
/// bring their own protobuf/flatbuffers/etc. codec and never touch this type directly — it's
/// just what the dispatcher falls back to when a service registers none.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodec;

impl Codec for PassthroughCodec {}

/// A convenience codec for services that want JSON-over-gRPC instead of protobuf — useful for
/// debugging tools and the demo binary. Gated behind the `json` feature so the `serde` stack
/// isn't pulled in by default builds that don't want it.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn content_subtype(&self) -> Option<&'static str> {
        Some("json")
    }
}

#[cfg(feature = "json")]
impl JsonCodec {
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(value)
    }

    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
