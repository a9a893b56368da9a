//! Server lifecycle: bind, accept, drive each connection concurrently, and shut down.

use crate::connection::{self, ConnectionOptions};
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::registry::ServiceRegistry;
use crate::tls::{TlsConfig, TlsMaterial};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Where a [`Server`] sits in its own lifecycle. Service registration is only permitted while
/// `Stopped`; `serve()` walks `Stopped -> Starting -> Running -> Draining -> Stopping -> Stopped`
/// on a graceful shutdown, or straight to `Stopping` on a forceful one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Draining = 3,
    Stopping = 4,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Stopped,
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Draining,
            4 => ServerState::Stopping,
            other => unreachable!("invalid ServerState tag {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind_addr: SocketAddr,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_message_size: usize,
    pub keepalive_interval: Option<Duration>,
    pub keepalive_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        let defaults = ConnectionOptions::default();
        Self {
            bind_addr: "127.0.0.1:0".parse().expect("valid default bind addr"),
            max_concurrent_streams: defaults.max_concurrent_streams,
            initial_window_size: defaults.initial_window_size,
            max_message_size: defaults.max_message_size,
            keepalive_interval: defaults.keepalive_interval,
            keepalive_timeout: defaults.keepalive_timeout,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerOptions {
    fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            max_concurrent_streams: self.max_concurrent_streams,
            initial_window_size: self.initial_window_size,
            max_message_size: self.max_message_size,
            keepalive_interval: self.keepalive_interval,
            keepalive_timeout: self.keepalive_timeout,
        }
    }
}

/// Assembles a [`Server`] from a registry, interceptors, TLS material, and options.
///
/// `registry` is `Arc`-wrapped from the start (rather than only at `build()`) so built-in
/// services like Reflection, which need to hand out the list of registered services, can share
/// the exact registry the running server will dispatch against.
pub struct ServerBuilder {
    registry: Arc<ServiceRegistry>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    options: ServerOptions,
    tls: Option<TlsMaterial>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ServiceRegistry::new()),
            interceptors: Vec::new(),
            options: ServerOptions::default(),
            tls: None,
        }
    }

    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn tls(mut self, material: TlsMaterial) -> Self {
        self.tls = Some(material);
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// A handle on the same registry `build()` will use — for wiring up a service (like
    /// Reflection) that needs to hold onto the registry rather than just register into it once.
    pub fn registry_handle(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    /// Register a service's methods in the server's own registry before building, so built-in
    /// services (Health, Reflection) and user services can both be wired up with the same call.
    pub fn with_registry<F>(self, register: F) -> Self
    where
        F: FnOnce(&ServiceRegistry),
    {
        register(&self.registry);
        self
    }

    pub fn build(self) -> Result<Server, crate::tls::TlsConfigError> {
        let tls = match self.tls {
            Some(material) => Some((Arc::new(TlsConfig::load(&material)?), material)),
            None => None,
        };
        let (force_stop_tx, force_stop_rx) = watch::channel(false);
        Ok(Server {
            registry: self.registry,
            chain: InterceptorChain::new(self.interceptors),
            options: self.options,
            tls,
            state: AtomicU8::new(ServerState::Stopped as u8),
            force_stop_tx,
            force_stop_rx,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

enum Accept {
    Plain(TcpListener),
    Tls(TcpListener, Arc<TlsConfig>),
}

pub struct Server {
    registry: Arc<ServiceRegistry>,
    chain: InterceptorChain,
    options: ServerOptions,
    tls: Option<(Arc<TlsConfig>, TlsMaterial)>,
    state: AtomicU8,
    force_stop_tx: watch::Sender<bool>,
    force_stop_rx: watch::Receiver<bool>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Immediately close the listener and every in-flight connection, skipping the graceful
    /// drain. A no-op if `serve()` isn't currently running.
    pub fn stop_forceful(&self) {
        let _ = self.force_stop_tx.send(true);
    }

    /// Swap in freshly loaded certificate material without disturbing connections already
    /// mid-handshake; returns an error if this server wasn't built with TLS.
    pub fn reload_tls(&self, material: &TlsMaterial) -> Result<(), crate::tls::TlsConfigError> {
        match &self.tls {
            Some((config, _)) => config.reload(material),
            None => Err(crate::tls::TlsConfigError::NoCertificates {
                path: "server was built without TLS".to_string(),
            }),
        }
    }

    /// Bind and serve until `shutdown` resolves (graceful) or [`Server::stop_forceful`] is
    /// called. Graceful shutdown: stop accepting first, then let in-flight connections finish on
    /// their own up to `drain_timeout`, then let any that remain be dropped when this future
    /// returns. Forceful shutdown skips the drain and aborts every in-flight connection at once.
    pub async fn serve(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), std::io::Error> {
        self.set_state(ServerState::Starting);
        self.registry.lock();
        let _ = self.force_stop_tx.send(false);
        let mut force_stop = self.force_stop_rx.clone();

        let listener = TcpListener::bind(self.options.bind_addr).await?;
        let accept = match &self.tls {
            Some((config, _)) => Accept::Tls(listener, config.clone()),
            None => Accept::Plain(listener),
        };

        let mut connections = tokio::task::JoinSet::new();
        self.set_state(ServerState::Running);

        let mut forced = false;
        loop {
            tokio::select! {
                biased;

                changed = force_stop.changed() => {
                    if changed.is_ok() && *force_stop.borrow() {
                        forced = true;
                        break;
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                accepted = accept_one(&accept) => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            log::warn!("accept failed: {err}");
                            continue;
                        }
                    };
                    let registry = self.registry.clone();
                    let chain = self.chain.clone();
                    let conn_options = self.options.connection_options();
                    let conn_shutdown = shutdown.clone();
                    let tls_acceptor = match &accept {
                        Accept::Tls(_, config) => Some(config.acceptor()),
                        Accept::Plain(_) => None,
                    };

                    connections.spawn(async move {
                        let result = match tls_acceptor {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(tls_stream) => {
                                    connection::serve(tls_stream, Some(peer), registry, chain, conn_options, conn_shutdown).await
                                }
                                Err(err) => Err(crate::error::Http2Error::Io(err)),
                            },
                            None => connection::serve(stream, Some(peer), registry, chain, conn_options, conn_shutdown).await,
                        };
                        if let Err(err) = result {
                            log::debug!("connection from {peer} ended: {err}");
                        }
                    });
                }
            }
        }

        if forced {
            self.set_state(ServerState::Stopping);
            log::warn!("forceful stop requested: aborting in-flight connections without draining");
            connections.shutdown().await;
        } else {
            self.set_state(ServerState::Draining);
            log::info!("shutting down: draining in-flight connections");
            let drain = tokio::time::timeout(self.options.drain_timeout, async {
                while connections.join_next().await.is_some() {}
            });
            if drain.await.is_err() {
                log::warn!("drain_timeout elapsed with connections still in flight; abandoning them");
            }
            self.set_state(ServerState::Stopping);
        }
        self.registry.unlock();
        self.set_state(ServerState::Stopped);
        Ok(())
    }
}

async fn accept_one(accept: &Accept) -> std::io::Result<(tokio::net::TcpStream, SocketAddr)> {
    match accept {
        Accept::Plain(listener) | Accept::Tls(listener, _) => listener.accept().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ServerContext;
    use crate::dispatch::Handler;
    use crate::grpc::Status;
    use crate::registry::MethodKind;
    use crate::streaming::{RequestStream, ResponseSink};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn call(&self, _ctx: ServerContext, _input: RequestStream, _output: ResponseSink) -> Status {
            Status::ok()
        }
    }

    async fn wait_for_state(server: &Server, state: ServerState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while server.state() != state {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("server never reached {state:?}"));
    }

    #[tokio::test]
    async fn registration_is_gated_to_the_stopped_state() {
        let builder = Server::builder();
        let registry = builder.registry_handle();
        let server = Arc::new(builder.build().unwrap());
        assert_eq!(server.state(), ServerState::Stopped);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let serving = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(shutdown_rx).await })
        };
        wait_for_state(&server, ServerState::Running).await;

        registry.register("late.Service", "Method", MethodKind::Unary, Arc::new(Noop));
        assert!(registry.lookup("/late.Service/Method").is_none());

        shutdown_tx.send(true).unwrap();
        serving.await.unwrap().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);

        registry.register("late.Service", "Method", MethodKind::Unary, Arc::new(Noop));
        assert!(registry.lookup("/late.Service/Method").is_some());
    }

    #[tokio::test]
    async fn forceful_stop_skips_the_drain() {
        let server = Arc::new(Server::builder().build().unwrap());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let serving = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(shutdown_rx).await })
        };
        wait_for_state(&server, ServerState::Running).await;

        server.stop_forceful();
        serving.await.unwrap().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
