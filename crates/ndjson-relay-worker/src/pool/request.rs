use ndjson_relay_core::{Result, producer::ProcessOutcome};
use tokio::sync::oneshot;

/// A message sent from the pool to one worker.
#[derive(Debug)]
pub enum WorkRequest {
    /// Serve the task whose metadata record lives at `metadata_key`.
    ///
    /// If `completion` is set, the outcome is reported back through it.
    Process {
        metadata_key: String,
        completion: Option<oneshot::Sender<Result<ProcessOutcome>>>,
    },
    /// Stop after the current task and acknowledge.
    Shutdown { response: oneshot::Sender<()> },
}
