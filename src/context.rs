//! Per-call context handed to handlers and interceptors: request metadata, peer
//! address, the call's deadline (from `grpc-timeout`), and a cancellation signal the connection
//! driver flips on RST_STREAM or a blown deadline.

use crate::grpc::Metadata;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

struct Inner {
    method: String,
    metadata: Metadata,
    peer: Option<SocketAddr>,
    deadline: Option<Instant>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancelled: watch::Receiver<bool>,
}

#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<Inner>,
}

impl ServerContext {
    pub fn new(
        method: String,
        metadata: Metadata,
        peer: Option<SocketAddr>,
        deadline: Option<Instant>,
        cancel_tx: Arc<watch::Sender<bool>>,
        cancelled: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                method,
                metadata,
                peer,
                deadline,
                cancel_tx,
                cancelled,
            }),
        }
    }

    /// A context with no deadline, no metadata, and a cancellation signal that never fires —
    /// for exercising handlers directly in tests.
    pub fn for_test() -> Self {
        let (tx, rx) = watch::channel(false);
        Self::new("/test.Test/Test".to_string(), Metadata::new(), None, None, Arc::new(tx), rx)
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn time_remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.inner.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.borrow()
    }

    /// Flip this call's cancellation signal. Shares the watch channel the connection driver
    /// itself flips on RST_STREAM or connection shutdown, so any interceptor or handler still
    /// holding a clone of this context observes the same signal regardless of who raised it.
    pub fn cancel(&self) {
        let _ = self.inner.cancel_tx.send(true);
    }

    /// Resolves once the connection driver cancels this call (RST_STREAM, deadline, or
    /// connection shutdown). Handlers select! this against their own work to stop promptly.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.cancelled.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellation_signal_wakes_waiters() {
        let (tx, rx) = watch::channel(false);
        let ctx = ServerContext::new("/a/b".into(), Metadata::new(), None, None, Arc::new(tx), rx);
        assert!(!ctx.is_cancelled());
        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.cancelled().await }
        });
        ctx.cancel();
        waiter.await.unwrap();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_is_visible_to_every_clone() {
        let (tx, rx) = watch::channel(false);
        let ctx = ServerContext::new("/a/b".into(), Metadata::new(), None, None, Arc::new(tx), rx);
        let clone = ctx.clone();
        clone.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn expired_deadline_is_detected() {
        let (tx, rx) = watch::channel(false);
        let past = Instant::now() - Duration::from_secs(1);
        let ctx = ServerContext::new("/a/b".into(), Metadata::new(), None, Some(past), Arc::new(tx), rx);
        assert!(ctx.is_expired());
    }
}
