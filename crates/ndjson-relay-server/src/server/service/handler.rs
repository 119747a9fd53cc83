//! Stream service: registers tasks and runs one relay per client stream.
//!
//! [`RelayService`] is the state shared by every HTTP request. Opening a
//! stream does four things in order:
//!
//! 1. Pings the store, so an unreachable store fails fast with no task left
//!    behind.
//! 2. Registers the task through the [`TaskRegistry`].
//! 3. Announces it through the [`DispatchNotifier`].
//! 4. Spawns a [`StreamRelay`] that feeds the response body and deletes the
//!    task's keys when the stream ends.
//!
//! ## Shutdown
//!
//! [`RelayService::shutdown`] refuses new streams, gives in-flight streams
//! `shutdown_timeout` to finish on their own, then cancels the rest through a
//! shared [`CancellationToken`] and waits for their cleanup.

use crate::server::{
    config::ServerConfig,
    error::ApiError,
    telemetry::{
        decrement_streams_inflight, increment_lines_forwarded, increment_requests,
        increment_stream_errors, increment_stream_timeouts, increment_streams_inflight,
        record_stream_duration,
    },
};
use bytes::Bytes;
use core::time::Duration;
use ndjson_relay_core::{
    DispatchNotifier, RelayConfig, RelayOutcome, RequestHeaders, StreamRelay, TaskKeys,
    TaskRegistry,
    store::{SharedStore, StoreError},
};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

// Upper bound on waiting for cancelled relays to release their keys.
const CANCEL_GRACE: Duration = Duration::from_secs(3);
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// A freshly opened stream: the task's identity plus the body to send.
#[derive(Debug)]
pub struct OpenedStream {
    pub keys: TaskKeys,
    pub body: ReceiverStream<Bytes>,
}

#[derive(Clone)]
pub struct RelayService {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn SharedStore>,
    registry: TaskRegistry,
    notifier: DispatchNotifier,
    relay_config: Arc<RelayConfig>,
    stream_buffer_size: usize,
    shutdown_timeout: Duration,
    shutdown_token: CancellationToken,
    accepting: AtomicBool,
    inflight: AtomicUsize,
}

impl RelayService {
    pub fn new(store: Arc<dyn SharedStore>, config: &ServerConfig) -> Self {
        let registry = TaskRegistry::new(store.clone(), config.key_scheme.clone(), config.task_ttl);
        let notifier = DispatchNotifier::new(store.clone(), config.channel.clone());

        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                notifier,
                relay_config: Arc::new(config.relay.clone()),
                stream_buffer_size: config.stream_buffer_size,
                shutdown_timeout: config.shutdown_timeout,
                shutdown_token: CancellationToken::new(),
                accepting: AtomicBool::new(true),
                inflight: AtomicUsize::new(0),
            }),
        }
    }

    /// Checks that the shared store answers.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.inner.store.ping().await
    }

    pub fn streams_inflight(&self) -> usize {
        self.inner.inflight.load(Ordering::Acquire)
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Registers a task for the request and starts relaying its output.
    ///
    /// # Errors
    ///
    /// - [`ApiError::ShuttingDown`] once [`RelayService::shutdown`] started.
    /// - [`ApiError::StoreUnavailable`] if the store cannot be pinged, the
    ///   task cannot be registered, or it cannot be announced. A task that was
    ///   registered but not announced is deleted again.
    pub async fn open_stream(
        &self,
        headers: RequestHeaders,
        body: String,
    ) -> Result<OpenedStream, ApiError> {
        if !self.is_accepting() {
            return Err(ApiError::ShuttingDown);
        }

        self.inner
            .store
            .ping()
            .await
            .map_err(|e| ApiError::StoreUnavailable(e.into()))?;

        let lease = self.inner.registry.create(headers, body).await?;
        if let Err(e) = self.inner.notifier.announce(lease.metadata_key()).await {
            if let Err(_e) = lease.release().await {
                tracing::warn!("Failed to remove unannounced task: {_e}");
            }
            return Err(e.into());
        }

        increment_requests();
        let guard = InflightGuard::new(self.inner.clone());
        let keys = lease.keys().clone();
        let (tx, rx) = mpsc::channel::<Bytes>(self.inner.stream_buffer_size);

        let relay = StreamRelay::new(
            lease,
            self.inner.store.clone(),
            self.inner.relay_config.clone(),
            self.inner.shutdown_token.clone(),
        );

        let fut = async move {
            let _guard = guard;
            let start = Instant::now();
            match relay.run(tx).await {
                Ok(report) => {
                    increment_lines_forwarded(report.lines_forwarded);
                    if report.outcome == RelayOutcome::TimedOut {
                        increment_stream_timeouts();
                    }
                    tracing::info!(
                        outcome = %report.outcome,
                        lines = report.lines_forwarded,
                        elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
                        "Stream closed"
                    );
                }
                Err(e) => {
                    increment_stream_errors();
                    tracing::error!("Stream failed: {e}");
                }
            }
            record_stream_duration(start.elapsed().as_secs_f64() * 1000.0);
        };
        let span = tracing::info_span!("relay", task = %keys.id);
        tokio::spawn(fut.instrument(span));

        Ok(OpenedStream {
            keys,
            body: ReceiverStream::new(rx),
        })
    }

    /// Gracefully shuts down all streams.
    ///
    /// - Stops accepting new streams.
    /// - Waits up to `shutdown_timeout` for in-flight streams to end.
    /// - Cancels the remaining relays, which release their task keys.
    /// - Waits (up to 3 seconds) for that cleanup to finish.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new requests ===
        tracing::info!("Refusing new streams");
        self.inner.accepting.store(false, Ordering::Release);

        // === Phase 1: Wait for in-flight streams to drain ===
        tracing::info!(
            "Draining in-flight streams ({} active)",
            self.streams_inflight()
        );
        if self.wait_for_drain(self.inner.shutdown_timeout).await {
            tracing::debug!("All in-flight streams drained successfully");
            return;
        }
        tracing::warn!(
            "Graceful drain timed out ({} streams still active)",
            self.streams_inflight()
        );

        // === Phase 2: Cancel any remaining work ===
        tracing::debug!("Cancelling remaining streams via shutdown token");
        self.inner.shutdown_token.cancel();

        // === Phase 3: Wait for cancelled relays to clean up ===
        if self.wait_for_drain(CANCEL_GRACE).await {
            tracing::info!("Stream shutdown complete");
        } else {
            tracing::warn!(
                "{} streams did not finish cleanup, their keys expire with the TTL",
                self.streams_inflight()
            );
        }
    }

    async fn wait_for_drain(&self, limit: Duration) -> bool {
        timeout(limit, async {
            while self.streams_inflight() > 0 {
                sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok()
    }
}

/// Counts a stream as in flight for as long as it lives, including when its
/// task panics.
struct InflightGuard {
    inner: Arc<Inner>,
}

impl InflightGuard {
    fn new(inner: Arc<Inner>) -> Self {
        inner.inflight.fetch_add(1, Ordering::AcqRel);
        increment_streams_inflight();
        Self { inner }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inner.inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
    }
}
