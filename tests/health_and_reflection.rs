//! The built-in Health and Reflection services, invoked the same way a real call would reach
//! them: registry lookup, then the interceptor chain, then the handler — never touching their
//! private request/response types directly.
#![cfg(feature = "json")]

use async_trait::async_trait;
use bytes::Bytes;
use grpc_core::{
    Handler, HealthService, InterceptorChain, MethodKind, ReflectionService, RequestStream, ResponseSink,
    ServerContext, ServiceRegistry, ServingStatus, Status,
};
use serde_json::json;
use std::sync::Arc;

struct Noop;

#[async_trait]
impl Handler for Noop {
    async fn call(&self, _ctx: ServerContext, _input: RequestStream, _output: ResponseSink) -> Status {
        Status::ok()
    }
}

async fn call(registry: &ServiceRegistry, path: &str, request: &serde_json::Value) -> (Status, Option<Bytes>) {
    let descriptor = registry.lookup(path).unwrap_or_else(|| panic!("{path} not registered"));
    let (input, input_tx) = RequestStream::channel(4);
    let (output, mut output_rx) = ResponseSink::channel(4);
    input_tx
        .send(Bytes::from(serde_json::to_vec(request).unwrap()))
        .await
        .unwrap();
    drop(input_tx);

    let status = InterceptorChain::empty()
        .run(descriptor.handler.clone(), ServerContext::for_test(), input, output)
        .await;
    let response = output_rx.recv().await;
    (status, response)
}

#[tokio::test]
async fn health_check_reports_serving_for_a_registered_service() {
    let registry = ServiceRegistry::new();
    let health = HealthService::new();
    health.set_serving_status("demo.Echo", ServingStatus::Serving);
    health.register(&registry);

    let (status, response) = call(&registry, "/grpc.health.v1.Health/Check", &json!({ "service": "demo.Echo" })).await;
    assert!(status.is_ok());
    let decoded: serde_json::Value = serde_json::from_slice(&response.unwrap()).unwrap();
    assert_eq!(decoded["status"], "Serving");
}

#[tokio::test]
async fn health_check_reports_service_unknown_for_an_unregistered_service() {
    let registry = ServiceRegistry::new();
    let health = HealthService::new();
    health.register(&registry);

    let (status, response) = call(&registry, "/grpc.health.v1.Health/Check", &json!({ "service": "no.Such" })).await;
    assert!(status.is_ok());
    let decoded: serde_json::Value = serde_json::from_slice(&response.unwrap()).unwrap();
    assert_eq!(decoded["status"], "ServiceUnknown");
}

#[tokio::test]
async fn health_check_with_empty_service_name_means_the_whole_server() {
    let registry = ServiceRegistry::new();
    let health = HealthService::new();
    health.register(&registry);

    let (status, response) = call(&registry, "/grpc.health.v1.Health/Check", &json!({ "service": "" })).await;
    assert!(status.is_ok());
    let decoded: serde_json::Value = serde_json::from_slice(&response.unwrap()).unwrap();
    assert_eq!(decoded["status"], "Serving");
}

#[tokio::test]
async fn reflection_list_services_sees_every_registered_service() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register("demo.Echo", "Echo", MethodKind::Unary, Arc::new(Noop));
    let reflection = ReflectionService::new(registry.clone());
    reflection.register(&registry);

    let (status, response) = call(
        &registry,
        "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
        &json!({ "kind": "ListServices" }),
    )
    .await;
    assert!(status.is_ok());
    let decoded: serde_json::Value = serde_json::from_slice(&response.unwrap()).unwrap();
    assert_eq!(decoded["kind"], "ListServicesResponse");
    assert_eq!(decoded["services"], json!(["demo.Echo"]));
}
