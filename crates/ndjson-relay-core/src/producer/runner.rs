use super::{OutputSink, TaskHandler};
use crate::relay::Sentinels;
use crate::store::{SharedStore, Subscription};
use crate::task::TaskRecord;
use crate::{Error, Result};
use std::sync::Arc;

/// Result of processing one announced task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The handler ran and the sentinel was appended.
    Finished { id: String, lines: u64 },
    /// The metadata record was gone (expired, or the client already left).
    Missing,
    /// The record vanished while the handler was running. Output written
    /// after that point was dropped and no sentinel was appended.
    Abandoned { id: String, lines: u64 },
}

/// The producer side of the protocol.
///
/// A producer subscribes to the dispatch channel, reads each announced
/// metadata record, and writes output only to the list named in that record.
#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn SharedStore>,
    channel: String,
    sentinels: Sentinels,
}

impl core::fmt::Debug for Producer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Producer")
            .field("channel", &self.channel)
            .field("sentinels", &self.sentinels)
            .finish_non_exhaustive()
    }
}

impl Producer {
    pub fn new(store: Arc<dyn SharedStore>, channel: impl Into<String>, sentinels: Sentinels) -> Self {
        Self {
            store,
            channel: channel.into(),
            sentinels,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscribes to the dispatch channel. Each item is a metadata key.
    pub async fn subscribe(&self) -> Result<Subscription> {
        Ok(self.store.subscribe(&self.channel).await?)
    }

    /// Reads the metadata record at `metadata_key`.
    ///
    /// Returns `Ok(None)` if the record no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedRecord`] if the record is not valid
    /// task JSON.
    pub async fn claim(&self, metadata_key: &str) -> Result<Option<TaskRecord>> {
        let Some(raw) = self.store.get(metadata_key).await? else {
            tracing::info!(key = %metadata_key, "task record missing, skipping");
            return Ok(None);
        };
        TaskRecord::from_json(metadata_key, &raw).map(Some)
    }

    /// Runs `handler` for the task at `metadata_key`, then appends exactly one
    /// sentinel to its output list.
    ///
    /// The sentinel is appended even if the handler fails, so the client's
    /// stream ends promptly instead of waiting for the idle timeout. The
    /// handler's error is returned afterwards.
    ///
    /// Every append first checks that the metadata record still exists. Once
    /// it is gone the relay has already cleaned up, so nothing more is written
    /// and the outcome is [`ProcessOutcome::Abandoned`].
    #[tracing::instrument(level = "debug", skip(self, handler))]
    pub async fn process<H>(&self, metadata_key: &str, handler: &H) -> Result<ProcessOutcome>
    where
        H: TaskHandler + ?Sized,
    {
        let Some(record) = self.claim(metadata_key).await? else {
            return Ok(ProcessOutcome::Missing);
        };

        let mut sink = OutputSink::new(
            self.store.clone(),
            metadata_key.to_string(),
            record.output_key.clone(),
            self.sentinels.clone(),
        );
        let handled = handler.handle(&record, &mut sink).await;
        let terminated = sink.finish().await?;
        let lines = sink.lines_emitted();

        if !terminated {
            match &handled {
                Ok(()) | Err(Error::TaskGone { .. }) => {}
                Err(e) => tracing::debug!(task = %record.id, "handler error after task vanished: {e}"),
            }
            tracing::info!(task = %record.id, lines, "task vanished mid-stream, output dropped");
            return Ok(ProcessOutcome::Abandoned {
                id: record.id,
                lines,
            });
        }

        if let Err(e) = handled {
            tracing::warn!(task = %record.id, lines, "handler failed: {e}");
            return Err(e);
        }

        tracing::debug!(task = %record.id, lines, "task finished");
        Ok(ProcessOutcome::Finished {
            id: record.id,
            lines,
        })
    }
}
