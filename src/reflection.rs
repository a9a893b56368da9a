//! The built-in `grpc.reflection.v1alpha.ServerReflection` service. Message shapes
//! mirror the well-known reflection protocol (see `ServerReflectionRequest`/`Response` in
//! `tonic-reflection`'s generated code), expressed as plain serde types rather than generated
//! protobuf bindings, since this crate never parses `.proto` files itself. `FileByFilename`/
//! `FileContainingSymbol` are served straight out of whatever `FileDescriptor` bytes a caller
//! attached via `ServiceRegistry::set_file_descriptor`; a service with none registered answers
//! `NOT_FOUND` for those two methods rather than `UNIMPLEMENTED`.

use crate::codec::JsonCodec;
use crate::context::ServerContext;
use crate::dispatch::Handler;
use crate::grpc::{Status, StatusCode};
use crate::registry::{FileDescriptor, MethodKind, ServiceRegistry};
use crate::streaming::{RequestStream, ResponseSink};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum ServerReflectionRequest {
    FileByFilename { filename: String },
    FileContainingSymbol { symbol: String },
    ListServices,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum ServerReflectionResponse {
    ListServicesResponse { services: Vec<String> },
    FileDescriptorResponse { file_descriptor_proto: Vec<Vec<u8>> },
    ErrorResponse { code: i32, message: String },
}

/// Scan every registered service for one whose `FileDescriptor` satisfies `matches`.
fn find_file_descriptor(registry: &ServiceRegistry, matches: impl Fn(&ServiceDescriptorRef) -> bool) -> Option<FileDescriptor> {
    registry.service_names().into_iter().find_map(|name| {
        let descriptor = registry.service(&name)?;
        let file_descriptor = descriptor.file_descriptor.clone()?;
        matches(&ServiceDescriptorRef {
            name: &descriptor.name,
            file_descriptor: &file_descriptor,
        })
        .then_some(file_descriptor)
    })
}

struct ServiceDescriptorRef<'a> {
    name: &'a str,
    file_descriptor: &'a FileDescriptor,
}

pub struct ReflectionService {
    registry: Arc<ServiceRegistry>,
}

impl ReflectionService {
    pub fn new(registry: Arc<ServiceRegistry>) -> Arc<Self> {
        Arc::new(Self { registry })
    }

    pub fn register(self: &Arc<Self>, registry: &ServiceRegistry) {
        registry.register(
            "grpc.reflection.v1alpha.ServerReflection",
            "ServerReflectionInfo",
            MethodKind::BidiStreaming,
            Arc::new(InfoHandler { service: self.clone() }),
        );
    }
}

struct InfoHandler {
    service: Arc<ReflectionService>,
}

#[async_trait]
impl Handler for InfoHandler {
    async fn call(&self, _ctx: ServerContext, mut input: RequestStream, output: ResponseSink) -> Status {
        while let Some(message) = input.next().await {
            let response = match JsonCodec::decode::<ServerReflectionRequest>(&message) {
                Ok(ServerReflectionRequest::ListServices) => ServerReflectionResponse::ListServicesResponse {
                    services: self.service.registry.service_names(),
                },
                Ok(ServerReflectionRequest::FileByFilename { filename }) => {
                    match find_file_descriptor(&self.service.registry, |d| d.file_descriptor.filename == filename) {
                        Some(fd) => ServerReflectionResponse::FileDescriptorResponse {
                            file_descriptor_proto: vec![fd.proto],
                        },
                        None => ServerReflectionResponse::ErrorResponse {
                            code: StatusCode::NotFound as i32,
                            message: format!("no file descriptor registered under the name {filename}"),
                        },
                    }
                }
                Ok(ServerReflectionRequest::FileContainingSymbol { symbol }) => {
                    match find_file_descriptor(&self.service.registry, |d| {
                        symbol == d.name || symbol.starts_with(&format!("{}.", d.name))
                    }) {
                        Some(fd) => ServerReflectionResponse::FileDescriptorResponse {
                            file_descriptor_proto: vec![fd.proto],
                        },
                        None => ServerReflectionResponse::ErrorResponse {
                            code: StatusCode::NotFound as i32,
                            message: format!("no registered service exports the symbol {symbol}"),
                        },
                    }
                }
                Err(err) => ServerReflectionResponse::ErrorResponse {
                    code: StatusCode::InvalidArgument as i32,
                    message: err.to_string(),
                },
            };
            let Ok(bytes) = JsonCodec::encode(&response) else {
                return Status::internal("failed to encode ServerReflectionResponse");
            };
            if output.send(Bytes::from(bytes)).await.is_err() {
                return Status::cancelled("client disconnected");
            }
        }
        Status::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn call(&self, _ctx: ServerContext, _input: RequestStream, _output: ResponseSink) -> Status {
            Status::ok()
        }
    }

    #[tokio::test]
    async fn list_services_reports_registered_names() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register("echo.Echo", "Echo", MethodKind::Unary, Arc::new(Noop));
        let service = ReflectionService::new(registry);
        let handler = InfoHandler { service };

        let (input, tx) = RequestStream::channel(1);
        let (output, mut rx) = ResponseSink::channel(1);
        tx.send(Bytes::from(JsonCodec::encode(&ServerReflectionRequest::ListServices).unwrap()))
            .await
            .unwrap();
        drop(tx);

        let status = handler.call(ServerContext::for_test(), input, output).await;
        assert!(status.is_ok());
        let response: ServerReflectionResponse = JsonCodec::decode(&rx.recv().await.unwrap()).unwrap();
        match response {
            ServerReflectionResponse::ListServicesResponse { services } => {
                assert_eq!(services, vec!["echo.Echo".to_string()]);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    async fn send_and_receive(handler: &InfoHandler, request: &ServerReflectionRequest) -> ServerReflectionResponse {
        let (input, tx) = RequestStream::channel(1);
        let (output, mut rx) = ResponseSink::channel(1);
        tx.send(Bytes::from(JsonCodec::encode(request).unwrap())).await.unwrap();
        drop(tx);
        let status = handler.call(ServerContext::for_test(), input, output).await;
        assert!(status.is_ok());
        JsonCodec::decode(&rx.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn file_by_filename_serves_an_attached_descriptor() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register("echo.Echo", "Echo", MethodKind::Unary, Arc::new(Noop));
        registry.set_file_descriptor("echo.Echo", "echo.proto", vec![4, 5, 6]);
        let handler = InfoHandler { service: ReflectionService::new(registry) };

        let response = send_and_receive(
            &handler,
            &ServerReflectionRequest::FileByFilename { filename: "echo.proto".to_string() },
        )
        .await;
        match response {
            ServerReflectionResponse::FileDescriptorResponse { file_descriptor_proto } => {
                assert_eq!(file_descriptor_proto, vec![vec![4, 5, 6]]);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_containing_symbol_reports_not_found_when_nothing_matches() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register("echo.Echo", "Echo", MethodKind::Unary, Arc::new(Noop));
        let handler = InfoHandler { service: ReflectionService::new(registry) };

        let response = send_and_receive(
            &handler,
            &ServerReflectionRequest::FileContainingSymbol { symbol: "no.Such.Method".to_string() },
        )
        .await;
        match response {
            ServerReflectionResponse::ErrorResponse { code, .. } => {
                assert_eq!(code, StatusCode::NotFound as i32);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
