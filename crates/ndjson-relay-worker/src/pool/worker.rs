use super::request::WorkRequest;
use ndjson_relay_core::producer::{ProcessOutcome, Producer, TaskHandler};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Worker task responsible for processing [`WorkRequest`] messages.
///
/// Each worker shares the [`Producer`] and the handler with its siblings and
/// serves one task at a time. It runs until it receives
/// [`WorkRequest::Shutdown`], its channel closes, or `shutdown_token` is
/// cancelled.
///
/// # Arguments
///
/// - `worker_id`: Numeric identifier for this worker (used in logs).
/// - `rx`: Receiver through which [`WorkRequest`]s arrive.
/// - `producer`: Reads task records and appends the closing sentinel.
/// - `handler`: Produces the output lines of each task.
/// - `shutdown_token`: Cancelled when the pool gives up waiting for a
///   graceful stop. Requests still queued are dropped.
///
/// # Request Types
///
/// - [`WorkRequest::Process`]: Runs [`Producer::process`] for one metadata key.
/// - [`WorkRequest::Shutdown`]: Acknowledges and stops.
pub async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    producer: Producer,
    handler: Arc<dyn TaskHandler>,
    shutdown_token: CancellationToken,
) {
    tracing::trace!("Worker {worker_id} started");

    loop {
        let work = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => {
                tracing::debug!("Worker {worker_id} cancelled");
                break;
            }
            work = rx.recv() => work,
        };

        match work {
            Some(WorkRequest::Process {
                metadata_key,
                completion,
            }) => {
                let result = producer.process(&metadata_key, handler.as_ref()).await;
                match &result {
                    Ok(ProcessOutcome::Finished { id, lines }) => {
                        tracing::info!("Worker {worker_id} finished task {id} ({lines} lines)");
                    }
                    Ok(ProcessOutcome::Missing) => {
                        tracing::debug!("Worker {worker_id} skipped {metadata_key}: record gone");
                    }
                    Ok(ProcessOutcome::Abandoned { id, lines }) => {
                        tracing::info!("Worker {worker_id} dropped task {id} after {lines} lines: client gone");
                    }
                    Err(e) => {
                        tracing::warn!("Worker {worker_id} failed task {metadata_key}: {e}");
                    }
                }
                if let Some(completion) = completion {
                    // The dispatcher may have stopped waiting.
                    let _ = completion.send(result);
                }
            }
            Some(WorkRequest::Shutdown { response }) => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
            None => break,
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
