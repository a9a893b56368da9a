//! The interceptor chain: cross-cutting middleware wrapped around every registered
//! method. Built-in interceptors cover logging, deadline enforcement, and panic recovery; a
//! server can add its own ahead of or behind those.

use crate::context::ServerContext;
use crate::dispatch::Handler;
use crate::grpc::Status;
use crate::streaming::{RequestStream, ResponseSink};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// The remainder of the chain (and, eventually, the handler itself) an interceptor delegates
/// to once it's done with its own work.
#[derive(Clone)]
pub struct Next {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    index: usize,
    handler: Arc<dyn Handler>,
}

impl Next {
    pub async fn call(self, ctx: ServerContext, input: RequestStream, output: ResponseSink) -> Status {
        match self.interceptors.get(self.index).cloned() {
            Some(interceptor) => {
                let next = Next {
                    interceptors: self.interceptors,
                    index: self.index + 1,
                    handler: self.handler,
                };
                interceptor.call(ctx, input, output, next).await
            }
            None => self.handler.call(ctx, input, output).await,
        }
    }
}

#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    async fn call(&self, ctx: ServerContext, input: RequestStream, output: ResponseSink, next: Next) -> Status;
}

/// An ordered stack of interceptors terminating in the method's own handler.
#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub async fn run(
        &self,
        handler: Arc<dyn Handler>,
        ctx: ServerContext,
        input: RequestStream,
        output: ResponseSink,
    ) -> Status {
        let next = Next {
            interceptors: self.interceptors.clone(),
            index: 0,
            handler,
        };
        next.call(ctx, input, output).await
    }
}

/// Logs when a call starts and how it finished.
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn call(&self, ctx: ServerContext, input: RequestStream, output: ResponseSink, next: Next) -> Status {
        let method = ctx.method().to_string();
        let start = Instant::now();
        log::debug!("{method}: call started");
        let status = next.call(ctx, input, output).await;
        if status.is_ok() {
            log::info!("{method}: finished in {:?}", start.elapsed());
        } else {
            log::warn!("{method}: finished in {:?} with {}", start.elapsed(), status);
        }
        status
    }
}

/// Turns an expired `grpc-timeout` deadline into `DEADLINE_EXCEEDED` instead of letting the
/// handler run forever.
pub struct TimeoutInterceptor;

#[async_trait]
impl Interceptor for TimeoutInterceptor {
    async fn call(&self, ctx: ServerContext, input: RequestStream, output: ResponseSink, next: Next) -> Status {
        let Some(remaining) = ctx.time_remaining() else {
            return next.call(ctx, input, output).await;
        };
        let cancel_ctx = ctx.clone();
        tokio::select! {
            status = next.call(ctx, input, output) => status,
            () = tokio::time::sleep(remaining) => {
                // The handler may have been detached into its own task (e.g. behind
                // `RecoveryInterceptor`'s `tokio::spawn`), so dropping this branch's future
                // doesn't stop it — flip the shared cancellation signal instead.
                cancel_ctx.cancel();
                Status::deadline_exceeded("deadline exceeded before the handler completed")
            }
        }
    }
}

/// Converts a handler panic into `INTERNAL` rather than tearing down the whole connection.
pub struct RecoveryInterceptor;

#[async_trait]
impl Interceptor for RecoveryInterceptor {
    async fn call(&self, ctx: ServerContext, input: RequestStream, output: ResponseSink, next: Next) -> Status {
        match tokio::spawn(next.call(ctx, input, output)).await {
            Ok(status) => status,
            Err(join_err) => {
                log::error!("handler panicked: {join_err}");
                Status::internal("handler panicked")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn call(&self, _ctx: ServerContext, mut input: RequestStream, output: ResponseSink) -> Status {
            while let Some(message) = input.next().await {
                let _ = output.send(message).await;
            }
            Status::ok()
        }
    }

    struct AlwaysPanics;

    #[async_trait]
    impl Handler for AlwaysPanics {
        async fn call(&self, _ctx: ServerContext, _input: RequestStream, _output: ResponseSink) -> Status {
            panic!("boom");
        }
    }

    struct WaitsForCancellation {
        observed: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl Handler for WaitsForCancellation {
        async fn call(&self, ctx: ServerContext, _input: RequestStream, _output: ResponseSink) -> Status {
            ctx.cancelled().await;
            self.observed.store(true, std::sync::atomic::Ordering::SeqCst);
            Status::ok()
        }
    }

    #[tokio::test]
    async fn chain_runs_interceptors_then_handler() {
        let chain = InterceptorChain::new(vec![Arc::new(LoggingInterceptor)]);
        let (input, tx) = RequestStream::channel(1);
        let (output, mut rx) = ResponseSink::channel(1);
        tx.send(Bytes::from_static(b"hi")).await.unwrap();
        drop(tx);
        let status = chain.run(Arc::new(Echo), ServerContext::for_test(), input, output).await;
        assert!(status.is_ok());
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"hi")));
    }

    #[tokio::test]
    async fn recovery_interceptor_converts_panic_to_internal_status() {
        let chain = InterceptorChain::new(vec![Arc::new(RecoveryInterceptor)]);
        let (input, _tx) = RequestStream::channel(1);
        let (output, _rx) = ResponseSink::channel(1);
        let status = chain
            .run(Arc::new(AlwaysPanics), ServerContext::for_test(), input, output)
            .await;
        assert_eq!(status.code, crate::grpc::StatusCode::Internal);
    }

    #[tokio::test]
    async fn timeout_interceptor_cancels_a_detached_handler_on_expiry() {
        use crate::grpc::Metadata;
        use std::time::Duration;
        use tokio::sync::watch;

        let observed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        // RecoveryInterceptor spawns the handler onto its own task, so dropping the losing
        // branch of TimeoutInterceptor's select! doesn't stop it by itself.
        let chain = InterceptorChain::new(vec![Arc::new(TimeoutInterceptor), Arc::new(RecoveryInterceptor)]);
        let (input, _tx) = RequestStream::channel(1);
        let (output, _rx) = ResponseSink::channel(1);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = ServerContext::new(
            "/a/b".to_string(),
            Metadata::new(),
            None,
            Some(Instant::now() + Duration::from_millis(20)),
            Arc::new(cancel_tx),
            cancel_rx,
        );

        let status = chain
            .run(Arc::new(WaitsForCancellation { observed: observed.clone() }), ctx, input, output)
            .await;
        assert_eq!(status.code, crate::grpc::StatusCode::DeadlineExceeded);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(observed.load(std::sync::atomic::Ordering::SeqCst));
    }
}
