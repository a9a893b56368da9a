//! Ties a looked-up method to the interceptor chain and, ultimately, its handler.

use crate::context::ServerContext;
use crate::grpc::{Status, StatusCode};
use crate::interceptor::InterceptorChain;
use crate::registry::MethodDescriptor;
use crate::streaming::{RequestStream, ResponseSink};
use async_trait::async_trait;

/// The single extension point every registered RPC implements, regardless of which of the four
/// streaming patterns it is: all four look the same to the dispatcher, since `RequestStream`
/// already abstracts over "one message" vs. "many".
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: ServerContext, input: RequestStream, output: ResponseSink) -> Status;
}

/// Run one call end to end: the interceptor chain, then the registered handler.
pub async fn dispatch(
    descriptor: &MethodDescriptor,
    chain: &InterceptorChain,
    ctx: ServerContext,
    input: RequestStream,
    output: ResponseSink,
) -> Status {
    chain.run(descriptor.handler.clone(), ctx, input, output).await
}

/// The status returned when a client's `:path` doesn't match any registered method.
pub fn method_not_found(path: &str) -> Status {
    Status::new(StatusCode::Unimplemented, format!("method not found: {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_method_is_unimplemented() {
        let status = method_not_found("/no.Such/Method");
        assert_eq!(status.code, StatusCode::Unimplemented);
    }
}
