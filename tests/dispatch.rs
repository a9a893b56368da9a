//! Black-box tests against the registry/interceptor/handler surface a service author actually
//! sees — no transport involved, no reaching into `connection.rs` internals.

use async_trait::async_trait;
use bytes::Bytes;
use grpc_core::{
    Handler, Interceptor, InterceptorChain, MethodKind, Next, RequestStream, ResponseSink, Server, ServerContext,
    ServiceRegistry, Status, StatusCode,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

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

struct AlwaysFails;

#[async_trait]
impl Handler for AlwaysFails {
    async fn call(&self, _ctx: ServerContext, _input: RequestStream, _output: ResponseSink) -> Status {
        Status::not_found("no such widget")
    }
}

/// A user-supplied interceptor, to prove the chain composes third-party ones with the built-ins.
struct CountingInterceptor {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Interceptor for CountingInterceptor {
    async fn call(&self, ctx: ServerContext, input: RequestStream, output: ResponseSink, next: Next) -> Status {
        self.calls.fetch_add(1, Ordering::SeqCst);
        next.call(ctx, input, output).await
    }
}

async fn invoke(registry: &ServiceRegistry, chain: &InterceptorChain, path: &str, message: &[u8]) -> (Status, Option<Bytes>) {
    let descriptor = registry.lookup(path).unwrap_or_else(|| panic!("{path} not registered"));
    let (input, input_tx) = RequestStream::channel(4);
    let (output, mut output_rx) = ResponseSink::channel(4);
    input_tx.send(Bytes::copy_from_slice(message)).await.unwrap();
    drop(input_tx);

    let status = chain
        .run(descriptor.handler.clone(), ServerContext::for_test(), input, output)
        .await;
    (status, output_rx.recv().await)
}

#[tokio::test]
async fn registered_handler_is_reachable_by_path() {
    let registry = ServiceRegistry::new();
    registry.register("echo.Echo", "Echo", MethodKind::Unary, Arc::new(Echo));

    let (status, message) = invoke(&registry, &InterceptorChain::empty(), "/echo.Echo/Echo", b"ping").await;
    assert!(status.is_ok());
    assert_eq!(message, Some(Bytes::from_static(b"ping")));
}

#[tokio::test]
async fn user_interceptor_runs_around_the_handler() {
    let registry = ServiceRegistry::new();
    registry.register("widgets.Widgets", "Get", MethodKind::Unary, Arc::new(AlwaysFails));
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = InterceptorChain::new(vec![Arc::new(CountingInterceptor { calls: calls.clone() })]);

    let (status, message) = invoke(&registry, &chain, "/widgets.Widgets/Get", b"id-1").await;
    assert_eq!(status.code, StatusCode::NotFound);
    assert!(message.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn builder_registers_into_the_same_registry_it_hands_out() {
    let mut builder = Server::builder();
    builder = builder.with_registry(|registry| {
        registry.register("echo.Echo", "Echo", MethodKind::Unary, Arc::new(Echo));
    });

    assert!(builder.registry().lookup("/echo.Echo/Echo").is_some());
    let handle = builder.registry_handle();
    handle.register("echo.Echo", "EchoTwice", MethodKind::Unary, Arc::new(Echo));
    assert!(builder.registry().lookup("/echo.Echo/EchoTwice").is_some());

    let server = builder.build().expect("no TLS configured, build should succeed");
    // no network I/O here; `build()` just freezes the registry/interceptors/options into a Server.
    drop(server);
}

#[tokio::test]
async fn service_names_reflect_every_registered_service() {
    let registry = ServiceRegistry::new();
    registry.register("echo.Echo", "Echo", MethodKind::Unary, Arc::new(Echo));
    registry.register("widgets.Widgets", "Get", MethodKind::Unary, Arc::new(AlwaysFails));

    let mut names = registry.service_names();
    names.sort();
    assert_eq!(names, vec!["echo.Echo".to_string(), "widgets.Widgets".to_string()]);
}
