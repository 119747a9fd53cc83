//! Asynchronous worker pool for answering announced tasks.
//!
//! This module defines the [`WorkerPool`] struct, which spawns a set of
//! asynchronous workers and feeds them [`WorkRequest`]s using round-robin
//! scheduling. Shutdown is phased: workers first get a chance to finish the
//! task in hand, then a shared [`CancellationToken`] aborts whatever is left.

use super::{request::WorkRequest, worker::worker_loop};
use core::time::Duration;
use ndjson_relay_core::{
    Error, Result,
    producer::{ProcessOutcome, Producer, TaskHandler},
};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, timeout, timeout_at},
};
use tokio_util::sync::CancellationToken;

/// How long cancelled workers get to wind down before the pool stops
/// waiting for them.
const CANCEL_GRACE: Duration = Duration::from_secs(3);

/// A cooperative pool of asynchronous workers that process [`WorkRequest`]s.
pub struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    next_worker: AtomicUsize,
    accepting: AtomicBool,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawns `num_workers` workers sharing `producer` and `handler`.
    ///
    /// Each worker owns a channel with room for a single request, so a busy
    /// worker holds at most one task in reserve and dispatch waits for
    /// capacity instead of buffering announcements without bound.
    ///
    /// `shutdown_token` is cancelled when a graceful shutdown runs out of
    /// time. Handlers that can abort early should watch the same token.
    pub fn spawn(
        num_workers: usize,
        producer: Producer,
        handler: Arc<dyn TaskHandler>,
        shutdown_token: CancellationToken,
        shutdown_timeout: Duration,
    ) -> Self {
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(1);
            workers.push(tx);
            tokio::spawn(worker_loop(
                worker_id,
                rx,
                producer.clone(),
                handler.clone(),
                shutdown_token.clone(),
            ));
        }

        Self {
            workers,
            next_worker: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            shutdown_token,
            shutdown_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns the index of the next worker to receive work (round-robin).
    fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Sends a [`WorkRequest`] to the next worker in the pool, waiting while
    /// that worker's channel is full.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The pool is shutting down ([`Error::ServiceShutdown`]).
    /// - The worker's channel is closed ([`Error::ChannelError`]).
    pub async fn send_to_next_worker(&self, request: WorkRequest) -> Result<()> {
        if !self.accepting.load(Ordering::Acquire) || self.workers.is_empty() {
            return Err(Error::ServiceShutdown);
        }

        let worker_idx = self.next_worker_index();
        let worker = &self.workers[worker_idx];

        match worker.send(request).await {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::ChannelError {
                context: format!("Worker {worker_idx} channel closed"),
            }),
        }
    }

    /// Queues the task at `metadata_key` without waiting for its outcome.
    pub async fn dispatch(&self, metadata_key: String) -> Result<()> {
        self.send_to_next_worker(WorkRequest::Process {
            metadata_key,
            completion: None,
        })
        .await
    }

    /// Queues the task at `metadata_key` and waits until a worker has served
    /// it.
    pub async fn dispatch_and_wait(&self, metadata_key: String) -> Result<ProcessOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send_to_next_worker(WorkRequest::Process {
            metadata_key,
            completion: Some(tx),
        })
        .await?;
        rx.await.map_err(|_| Error::ChannelError {
            context: "worker dropped the task before finishing it".to_string(),
        })?
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Refuses new requests.
    /// - Sends a [`WorkRequest::Shutdown`] to each worker, queued behind the
    ///   task it is serving, and waits up to `shutdown_timeout` for every
    ///   acknowledgement.
    /// - Cancels the shared [`CancellationToken`] if any worker is still busy
    ///   and waits up to 3 more seconds for those workers to exit.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new requests ===
        tracing::info!("Refusing new tasks");
        self.accepting.store(false, Ordering::Release);

        // === Phase 1: Ask every worker to stop after its current task ===
        tracing::debug!(
            "Waiting up to {:?} for {} workers to finish",
            self.shutdown_timeout,
            self.workers.len()
        );
        let deadline = Instant::now() + self.shutdown_timeout;
        let acks = self.workers.iter().enumerate().map(|(i, worker)| async move {
            let (tx, rx) = oneshot::channel();
            if !matches!(
                timeout_at(deadline, worker.send(WorkRequest::Shutdown { response: tx })).await,
                Ok(Ok(()))
            ) {
                return worker.is_closed();
            }
            match timeout_at(deadline, rx).await {
                Ok(Ok(())) => {
                    tracing::trace!("Worker {i} shutdown acknowledged");
                    true
                }
                // The worker exited without answering.
                Ok(Err(_)) => true,
                Err(_) => false,
            }
        });
        let acknowledged = futures::future::join_all(acks).await;

        let busy: Vec<usize> = acknowledged
            .iter()
            .enumerate()
            .filter_map(|(i, done)| (!done).then_some(i))
            .collect();
        if busy.is_empty() {
            tracing::info!("Worker pool shutdown complete");
            return;
        }

        // === Phase 2: Cancel the tasks still running ===
        tracing::warn!(
            "Graceful shutdown timed out ({} workers still busy), cancelling",
            busy.len()
        );
        self.shutdown_token.cancel();

        let exits = busy.into_iter().map(|i| {
            let worker = &self.workers[i];
            async move {
                if timeout(CANCEL_GRACE, worker.closed()).await.is_err() {
                    tracing::warn!("Worker {i} shutdown timed out");
                }
            }
        });
        futures::future::join_all(exits).await;

        tracing::info!("Worker pool shutdown complete");
    }
}
