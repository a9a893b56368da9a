//! Service/method registry: maps `/package.Service/Method` onto a registered
//! [`Handler`], looked up once per incoming request and shared read-only across every
//! connection the server is driving.

use crate::dispatch::Handler;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

#[derive(Clone)]
pub struct MethodDescriptor {
    pub service: String,
    pub method: String,
    pub kind: MethodKind,
    pub handler: Arc<dyn Handler>,
}

impl MethodDescriptor {
    /// The `:path` pseudo-header value a client sends to invoke this method.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("service", &self.service)
            .field("method", &self.method)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A registered service's serialized `FileDescriptorProto`, for reflection's `FileByFilename`/
/// `FileContainingSymbol` lookups. Opaque bytes — this crate never parses `.proto` files itself,
/// it just stores and returns what the caller registered.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub filename: String,
    pub proto: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub methods: Vec<(String, MethodKind)>,
    pub file_descriptor: Option<FileDescriptor>,
}

/// A read-mostly registry: built once at server construction and then looked up concurrently,
/// once per request, by every connection task the server is driving.
#[derive(Default)]
pub struct ServiceRegistry {
    methods: DashMap<String, MethodDescriptor>,
    services: DashMap<String, ServiceDescriptor>,
    /// Set while the owning server is anywhere outside `Stopped` — registration is a
    /// build-time concern, not something a running server should have to dispatch against
    /// half-registered.
    locked: AtomicBool,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub(crate) fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    pub fn register(&self, service: &str, method: &str, kind: MethodKind, handler: Arc<dyn Handler>) {
        if self.locked.load(Ordering::SeqCst) {
            log::warn!("ignoring registration of {service}/{method}: the server must be stopped to register services");
            return;
        }
        let descriptor = MethodDescriptor {
            service: service.to_string(),
            method: method.to_string(),
            kind,
            handler,
        };
        self.services
            .entry(service.to_string())
            .or_insert_with(|| ServiceDescriptor {
                name: service.to_string(),
                methods: Vec::new(),
                file_descriptor: None,
            })
            .methods
            .push((method.to_string(), kind));
        self.methods.insert(descriptor.path(), descriptor);
    }

    /// Attach a service's serialized `FileDescriptorProto` so reflection's `FileByFilename`/
    /// `FileContainingSymbol` can serve it. A no-op if `service` has no methods registered yet,
    /// or if the server isn't stopped.
    pub fn set_file_descriptor(&self, service: &str, filename: impl Into<String>, proto: Vec<u8>) {
        if self.locked.load(Ordering::SeqCst) {
            log::warn!("ignoring file descriptor registration for {service}: the server must be stopped to register services");
            return;
        }
        if let Some(mut entry) = self.services.get_mut(service) {
            entry.file_descriptor = Some(FileDescriptor {
                filename: filename.into(),
                proto,
            });
        }
    }

    /// Look up the method a client named in its `:path` pseudo-header.
    pub fn lookup(&self, path: &str) -> Option<MethodDescriptor> {
        self.methods.get(path).map(|entry| entry.value().clone())
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn service(&self, name: &str) -> Option<ServiceDescriptor> {
        self.services.get(name).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ServerContext;
    use crate::grpc::Status;
    use crate::streaming::{RequestStream, ResponseSink};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn call(&self, _ctx: ServerContext, mut input: RequestStream, output: ResponseSink) -> Status {
            while let Some(message) = input.next().await {
                if output.send(message).await.is_err() {
                    return Status::cancelled("client went away");
                }
            }
            Status::ok()
        }
    }

    #[test]
    fn registers_and_looks_up_by_path() {
        let registry = ServiceRegistry::new();
        registry.register("echo.Echo", "Echo", MethodKind::Unary, Arc::new(Echo));
        let found = registry.lookup("/echo.Echo/Echo").expect("method registered");
        assert_eq!(found.service, "echo.Echo");
        assert_eq!(found.kind, MethodKind::Unary);
        assert!(registry.lookup("/echo.Echo/Missing").is_none());
        assert_eq!(registry.service_names(), vec!["echo.Echo".to_string()]);
    }

    #[test]
    fn file_descriptor_attaches_to_an_already_registered_service() {
        let registry = ServiceRegistry::new();
        registry.register("echo.Echo", "Echo", MethodKind::Unary, Arc::new(Echo));
        registry.set_file_descriptor("echo.Echo", "echo.proto", vec![1, 2, 3]);
        let descriptor = registry.service("echo.Echo").unwrap().file_descriptor.unwrap();
        assert_eq!(descriptor.filename, "echo.proto");
        assert_eq!(descriptor.proto, vec![1, 2, 3]);

        registry.set_file_descriptor("no.Such", "ghost.proto", vec![9]);
        assert!(registry.service("no.Such").is_none());
    }

    #[test]
    fn registration_is_rejected_once_locked() {
        let registry = ServiceRegistry::new();
        registry.lock();
        registry.register("echo.Echo", "Echo", MethodKind::Unary, Arc::new(Echo));
        assert!(registry.service("echo.Echo").is_none());

        registry.unlock();
        registry.register("echo.Echo", "Echo", MethodKind::Unary, Arc::new(Echo));
        assert!(registry.service("echo.Echo").is_some());
    }

    #[tokio::test]
    async fn looked_up_handler_echoes_messages() {
        let registry = ServiceRegistry::new();
        registry.register("echo.Echo", "Echo", MethodKind::Unary, Arc::new(Echo));
        let descriptor = registry.lookup("/echo.Echo/Echo").unwrap();

        let (input, mut input_tx) = RequestStream::channel(4);
        let (output, mut output_rx) = ResponseSink::channel(4);
        input_tx.send(bytes::Bytes::from_static(b"ping")).await.unwrap();
        drop(input_tx);

        let status = descriptor.handler.call(ServerContext::for_test(), input, output).await;
        assert!(status.is_ok());
        assert_eq!(output_rx.recv().await, Some(bytes::Bytes::from_static(b"ping")));
    }
}
