use crate::Result;
use crate::store::SharedStore;
use std::sync::Arc;

pub const DEFAULT_CHANNEL: &str = "ndjson_jobs";

/// Announces new tasks to producers.
///
/// Delivery is at-most-once: an announcement published while no producer is
/// subscribed is lost, and the relay's idle timeout is what the client sees.
#[derive(Clone)]
pub struct DispatchNotifier {
    store: Arc<dyn SharedStore>,
    channel: String,
}

impl core::fmt::Debug for DispatchNotifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatchNotifier")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl DispatchNotifier {
    pub fn new(store: Arc<dyn SharedStore>, channel: impl Into<String>) -> Self {
        Self {
            store,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publishes `metadata_key` on the dispatch channel and returns how many
    /// producers received it.
    pub async fn announce(&self, metadata_key: &str) -> Result<usize> {
        let receivers = self.store.publish(&self.channel, metadata_key).await?;
        if receivers == 0 {
            tracing::warn!(key = %metadata_key, channel = %self.channel, "no producer subscribed");
        } else {
            tracing::debug!(key = %metadata_key, receivers, "task announced");
        }
        Ok(receivers)
    }
}
