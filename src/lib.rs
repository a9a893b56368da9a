#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation,
    clippy::too_many_lines,
)]

//! A gRPC server core: HTTP/2 transport, HPACK header compression, gRPC message framing, and a
//! service registry with an interceptor chain, sitting underneath caller-supplied message codecs
//! and handlers.

mod codec;
mod connection;
mod context;
mod dispatch;
mod error;
mod frame;
mod grpc;
#[cfg(feature = "json")]
mod health;
mod hpack;
mod interceptor;
#[cfg(feature = "json")]
mod reflection;
mod registry;
mod server;
mod stream;
mod streaming;
mod tls;

pub use bytes::Bytes;

pub use codec::{Codec, PassthroughCodec};
pub use context::ServerContext;
pub use dispatch::Handler;
pub use error::{ErrorCode, Http2Error};
pub use grpc::{Metadata, Status, StatusCode};
pub use interceptor::{Interceptor, InterceptorChain, Next};
pub use registry::{MethodDescriptor, MethodKind, ServiceDescriptor, ServiceRegistry};
pub use server::{Server, ServerBuilder, ServerOptions, ServerState};
pub use streaming::{RequestStream, ResponseSink};
pub use tls::{MinTlsVersion, TlsConfig, TlsConfigError, TlsMaterial};

// The built-in Health and Reflection services serialize their own request/response types with
// JsonCodec, so they're only available when the `json` feature — on by default — is enabled.
// User-registered services are free to use any codec regardless.
#[cfg(feature = "json")]
pub use codec::JsonCodec;
#[cfg(feature = "json")]
pub use health::{HealthService, ServingStatus};
#[cfg(feature = "json")]
pub use reflection::ReflectionService;
