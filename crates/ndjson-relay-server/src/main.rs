#![doc = include_str!("../README.md")]

use anyhow::Context;
use clap::Parser;
use ndjson_relay_core::store::RedisStore;
use ndjson_relay_server::server::{
    config::{CliArgs, ServerConfig},
    routes::router,
    service::handler::RelayService,
    telemetry::{TelemetryProviders, init_telemetry},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(config.debug)?;
    log_startup_info(&config);

    let store = RedisStore::connect(&config.redis)
        .await
        .with_context(|| format!("Redis at {} is unreachable", config.redis))?;
    tracing::info!("Connected to Redis at {}", store.target());

    let service = RelayService::new(Arc::new(store), &config);
    let app = router(service.clone());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!("Listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(service, providers))
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting relay server with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting relay server on {} (channel `{}`, idle limit {:?})",
            config.listen_addr,
            config.channel,
            config.relay.max_idle_time
        );
    }
}

async fn shutdown_signal(service: RelayService, providers: TelemetryProviders) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    service.shutdown().await;
    providers.shutdown();
}
