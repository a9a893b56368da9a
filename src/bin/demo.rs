//! Demo binary: stands up the server core with a toy `demo.Echo/Echo` service plus the built-in
//! Health and Reflection services. Flags use the `clap` 2.x builder idiom (`App`/`Arg`/`crate_version!`).

use clap::{crate_version, App, Arg};
use grpc_core::{Handler, MethodKind, RequestStream, ResponseSink, Server, ServerContext, ServerOptions, Status};
use std::sync::Arc;

#[cfg(feature = "json")]
use grpc_core::{HealthService, ReflectionService, ServingStatus};

struct EchoHandler;

#[async_trait::async_trait]
impl Handler for EchoHandler {
    async fn call(&self, _ctx: ServerContext, mut input: RequestStream, output: ResponseSink) -> Status {
        while let Some(message) = input.next().await {
            if output.send(message).await.is_err() {
                return Status::cancelled("client disconnected");
            }
        }
        Status::ok()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = App::new("grpc-demo")
        .version(crate_version!())
        .arg(Arg::with_name("host").long("host").takes_value(true).default_value("127.0.0.1"))
        .arg(Arg::with_name("port").long("port").takes_value(true).default_value("50051"))
        .arg(Arg::with_name("cert").long("cert").takes_value(true))
        .arg(Arg::with_name("key").long("key").takes_value(true))
        .get_matches();

    let host = matches.value_of("host").expect("has default");
    let port: u16 = matches.value_of("port").expect("has default").parse()?;
    let bind_addr = format!("{host}:{port}").parse()?;

    let mut builder = Server::builder().options(ServerOptions {
        bind_addr,
        ..ServerOptions::default()
    });

    builder = builder.with_registry(|registry| {
        registry.register("demo.Echo", "Echo", MethodKind::Unary, Arc::new(EchoHandler));
    });

    #[cfg(feature = "json")]
    {
        let health = HealthService::new();
        health.set_serving_status("demo.Echo", ServingStatus::Serving);
        builder = builder.with_registry(|registry| health.register(registry));

        let reflection = ReflectionService::new(builder.registry_handle());
        builder = builder.with_registry(|registry| reflection.register(registry));
    }

    if let (Some(cert), Some(key)) = (matches.value_of("cert"), matches.value_of("key")) {
        builder = builder.tls(grpc_core::TlsMaterial {
            cert_path: cert.into(),
            key_path: key.into(),
            client_ca_path: None,
            require_client_cert: false,
            min_version: grpc_core::MinTlsVersion::default(),
        });
    }

    let server = builder.build()?;
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    log::info!("listening on {bind_addr}");
    server.serve(shutdown_rx).await?;
    Ok(())
}
