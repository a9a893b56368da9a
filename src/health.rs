//! The built-in `grpc.health.v1.Health` service: lets load balancers and orchestrators
//! probe whether this process, or one service within it, is ready to take traffic.

use crate::codec::JsonCodec;
use crate::context::ServerContext;
use crate::dispatch::Handler;
use crate::grpc::Status;
use crate::registry::{MethodKind, ServiceRegistry};
use crate::streaming::{RequestStream, ResponseSink};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServingStatus {
    Unknown,
    Serving,
    NotServing,
    /// Reported for a service name the registry has never heard of, rather than treated as an
    /// error — a watcher still gets notified if that service is registered later.
    ServiceUnknown,
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthCheckRequest {
    service: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthCheckResponse {
    status: ServingStatus,
}

/// Tracks per-service serving status and fans out changes to any in-flight `Watch` calls. The
/// empty service name (`""`) means "the server as a whole" per the health-checking convention.
pub struct HealthService {
    statuses: DashMap<String, watch::Sender<ServingStatus>>,
}

impl HealthService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            statuses: DashMap::new(),
        })
    }

    pub fn set_serving_status(&self, service: &str, status: ServingStatus) {
        match self.statuses.get(service) {
            Some(sender) => {
                sender.send_replace(status);
            }
            None => {
                self.statuses.insert(service.to_string(), watch::channel(status).0);
            }
        }
    }

    fn status_of(&self, service: &str) -> ServingStatus {
        if service.is_empty() {
            return ServingStatus::Serving;
        }
        self.statuses
            .get(service)
            .map(|entry| *entry.value().borrow())
            .unwrap_or(ServingStatus::ServiceUnknown)
    }

    pub fn register(self: &Arc<Self>, registry: &ServiceRegistry) {
        registry.register(
            "grpc.health.v1.Health",
            "Check",
            MethodKind::Unary,
            Arc::new(CheckHandler {
                service: self.clone(),
            }),
        );
        registry.register(
            "grpc.health.v1.Health",
            "Watch",
            MethodKind::ServerStreaming,
            Arc::new(WatchHandler {
                service: self.clone(),
            }),
        );
    }
}

struct CheckHandler {
    service: Arc<HealthService>,
}

#[async_trait]
impl Handler for CheckHandler {
    async fn call(&self, _ctx: ServerContext, mut input: RequestStream, output: ResponseSink) -> Status {
        let Some(message) = input.next().await else {
            return Status::invalid_argument("missing HealthCheckRequest");
        };
        let request: HealthCheckRequest = match JsonCodec::decode(&message) {
            Ok(request) => request,
            Err(err) => return Status::invalid_argument(err.to_string()),
        };
        let response = HealthCheckResponse {
            status: self.service.status_of(&request.service),
        };
        match JsonCodec::encode(&response) {
            Ok(bytes) => {
                if output.send(Bytes::from(bytes)).await.is_err() {
                    return Status::cancelled("client disconnected");
                }
                Status::ok()
            }
            Err(err) => Status::internal(err.to_string()),
        }
    }
}

struct WatchHandler {
    service: Arc<HealthService>,
}

#[async_trait]
impl Handler for WatchHandler {
    async fn call(&self, ctx: ServerContext, mut input: RequestStream, output: ResponseSink) -> Status {
        let Some(message) = input.next().await else {
            return Status::invalid_argument("missing HealthCheckRequest");
        };
        let request: HealthCheckRequest = match JsonCodec::decode(&message) {
            Ok(request) => request,
            Err(err) => return Status::invalid_argument(err.to_string()),
        };
        let mut watch_rx = self
            .service
            .statuses
            .entry(request.service.clone())
            .or_insert_with(|| watch::channel(ServingStatus::ServiceUnknown).0)
            .subscribe();

        loop {
            let response = HealthCheckResponse {
                status: *watch_rx.borrow(),
            };
            let bytes = match JsonCodec::encode(&response) {
                Ok(bytes) => Bytes::from(bytes),
                Err(err) => return Status::internal(err.to_string()),
            };
            if output.send(bytes).await.is_err() {
                return Status::cancelled("client disconnected");
            }
            tokio::select! {
                () = ctx.cancelled() => return Status::cancelled("watch cancelled"),
                changed = watch_rx.changed() => {
                    if changed.is_err() {
                        return Status::ok();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn check_reports_registered_service_status() {
        let service = HealthService::new();
        service.set_serving_status("echo.Echo", ServingStatus::Serving);
        let handler = CheckHandler { service: service.clone() };

        let (input, tx) = RequestStream::channel(1);
        let (output, mut rx) = ResponseSink::channel(1);
        tx.send(Bytes::from(JsonCodec::encode(&HealthCheckRequest {
            service: "echo.Echo".to_string(),
        }).unwrap()))
            .await
            .unwrap();

        let status = handler.call(ServerContext::for_test(), input, output).await;
        assert!(status.is_ok());
        let response: HealthCheckResponse = JsonCodec::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(response.status, ServingStatus::Serving);
    }

    #[tokio::test]
    async fn check_reports_service_unknown_for_an_unregistered_service() {
        let service = HealthService::new();
        let handler = CheckHandler { service };
        let (input, tx) = RequestStream::channel(1);
        let (output, mut rx) = ResponseSink::channel(1);
        tx.send(Bytes::from(JsonCodec::encode(&HealthCheckRequest {
            service: "no.Such".to_string(),
        }).unwrap()))
            .await
            .unwrap();
        let status = handler.call(ServerContext::for_test(), input, output).await;
        assert!(status.is_ok());
        let response: HealthCheckResponse = JsonCodec::decode(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(response.status, ServingStatus::ServiceUnknown);
    }
}
