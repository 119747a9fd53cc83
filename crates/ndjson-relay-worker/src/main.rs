#![doc = include_str!("../README.md")]

mod config;
mod demo;
mod pool;

use anyhow::Context;
use clap::Parser;
use config::{CliArgs, WorkerConfig};
use demo::DemoHandler;
use futures::StreamExt;
use ndjson_relay_core::{
    producer::{ProcessOutcome, Producer},
    store::RedisStore,
};
use pool::manager::WorkerPool;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = WorkerConfig::try_from(args)?;

    init_logging(config.debug)?;
    log_startup_info(&config);

    let store = RedisStore::connect(&config.redis)
        .await
        .with_context(|| format!("Redis at {} is unreachable", config.redis))?;
    tracing::info!("Connected to Redis at {}", store.target());

    let producer = Producer::new(Arc::new(store), config.channel.clone(), config.sentinels.clone());
    let mut announcements = producer
        .subscribe()
        .await
        .with_context(|| format!("failed to subscribe to `{}`", config.channel))?;

    let shutdown_token = CancellationToken::new();
    let handler = Arc::new(DemoHandler::new(
        config.messages,
        config.min_delay,
        config.max_delay,
        shutdown_token.clone(),
    ));
    let pool = WorkerPool::spawn(
        config.workers,
        producer.clone(),
        handler,
        shutdown_token,
        config.shutdown_timeout,
    );
    tracing::info!(
        "Listening on channel `{}` with {} workers",
        producer.channel(),
        pool.len()
    );

    let result = serve(&pool, &mut announcements, config.loop_mode).await;

    pool.shutdown().await;
    tracing::info!("Worker shut down");
    result
}

/// Feeds announced metadata keys to the pool until a shutdown signal
/// arrives. Outside loop mode it returns once the first task is served.
async fn serve(
    pool: &WorkerPool,
    announcements: &mut ndjson_relay_core::store::Subscription,
    loop_mode: bool,
) -> anyhow::Result<()> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let key = tokio::select! {
            () = &mut shutdown => return Ok(()),
            key = announcements.next() => key,
        };
        let Some(key) = key else {
            anyhow::bail!("task subscription closed by the store");
        };
        tracing::debug!("Task announced: {key}");

        if loop_mode {
            // Dispatch waits for a free worker; a signal still wins.
            tokio::select! {
                () = &mut shutdown => return Ok(()),
                sent = pool.dispatch(key) => sent?,
            }
            continue;
        }

        return tokio::select! {
            () = &mut shutdown => Ok(()),
            outcome = pool.dispatch_and_wait(key) => match outcome? {
                ProcessOutcome::Finished { id, lines } => {
                    tracing::info!("Task {id} served ({lines} lines), exiting");
                    Ok(())
                }
                ProcessOutcome::Missing => {
                    tracing::info!("Announced task was already gone, exiting");
                    Ok(())
                }
                ProcessOutcome::Abandoned { id, lines } => {
                    tracing::info!("Task {id} ended by the relay after {lines} lines, exiting");
                    Ok(())
                }
            },
        };
    }
}

fn init_logging(debug: bool) -> anyhow::Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        )
        .try_init()?;
    Ok(())
}

fn log_startup_info(config: &WorkerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting worker with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting worker against {} ({} messages per task, loop: {})",
            config.redis,
            config.messages,
            config.loop_mode
        );
    }
}

async fn shutdown_signal() {
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
}
