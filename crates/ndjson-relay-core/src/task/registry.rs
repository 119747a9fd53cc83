use super::{KeyScheme, RequestHeaders, TaskKeys, TaskRecord};
use crate::Result;
use crate::store::SharedStore;
use core::time::Duration;
use std::sync::Arc;

pub const DEFAULT_TASK_TTL: Duration = Duration::from_secs(600);

/// Creates and tears down per-task state in the shared store.
///
/// The registry is the only component that writes metadata records. A record
/// expires after `ttl` even if nobody cleans it up.
#[derive(Clone)]
pub struct TaskRegistry {
    store: Arc<dyn SharedStore>,
    scheme: KeyScheme,
    ttl: Duration,
}

impl core::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("scheme", &self.scheme)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn SharedStore>, scheme: KeyScheme, ttl: Duration) -> Self {
        Self { store, scheme, ttl }
    }

    pub fn scheme(&self) -> &KeyScheme {
        &self.scheme
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Registers a new task for the given request and returns a lease on its
    /// keys.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Store`] if the record could not be written. No
    /// task exists in that case.
    pub async fn create(&self, headers: RequestHeaders, body: String) -> Result<TaskLease> {
        let id = uuid::Uuid::new_v4().to_string();
        let keys = self.scheme.keys_for(&id);
        let record = TaskRecord::new(&keys, headers, body);
        let json = record.to_json()?;

        self.store
            .set_with_expiry(&keys.metadata_key, &json, self.ttl)
            .await?;
        tracing::debug!(task = %keys.id, key = %keys.metadata_key, "task registered");

        Ok(TaskLease {
            keys,
            registry: Some(self.clone()),
        })
    }

    /// Checks whether the task's metadata record is still present.
    pub async fn exists(&self, metadata_key: &str) -> Result<bool> {
        Ok(self.store.exists(metadata_key).await?)
    }

    /// Deletes both of a task's keys. Safe to call on keys that are already
    /// gone.
    pub async fn destroy(&self, metadata_key: &str, output_key: &str) -> Result<()> {
        let removed = self.store.delete(&[metadata_key, output_key]).await?;
        tracing::debug!(key = %metadata_key, removed, "task destroyed");
        Ok(())
    }
}

/// Scoped ownership of a task's two keys.
///
/// Call [`TaskLease::release`] to delete the keys. A lease dropped without
/// being released (a panicking relay, an aborted task) schedules the delete on
/// the current tokio runtime instead, so per-task state never outlives its
/// stream for longer than the record TTL.
#[derive(Debug)]
pub struct TaskLease {
    keys: TaskKeys,
    registry: Option<TaskRegistry>,
}

impl TaskLease {
    pub fn keys(&self) -> &TaskKeys {
        &self.keys
    }

    pub fn id(&self) -> &str {
        &self.keys.id
    }

    pub fn metadata_key(&self) -> &str {
        &self.keys.metadata_key
    }

    pub fn output_key(&self) -> &str {
        &self.keys.output_key
    }

    /// Checks the liveness signal of the leased task.
    pub async fn is_live(&self) -> Result<bool> {
        match &self.registry {
            Some(registry) => registry.exists(&self.keys.metadata_key).await,
            None => Ok(false),
        }
    }

    /// Deletes both keys. Consumes the lease so the delete runs exactly once.
    pub async fn release(mut self) -> Result<()> {
        match self.registry.take() {
            Some(registry) => {
                registry
                    .destroy(&self.keys.metadata_key, &self.keys.output_key)
                    .await
            }
            None => Ok(()),
        }
    }
}

impl Drop for TaskLease {
    fn drop(&mut self) {
        let Some(registry) = self.registry.take() else {
            return;
        };
        let keys = self.keys.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(task = %keys.id, "lease dropped unreleased, scheduling cleanup");
                handle.spawn(async move {
                    if let Err(e) = registry
                        .destroy(&keys.metadata_key, &keys.output_key)
                        .await
                    {
                        tracing::warn!(task = %keys.id, "deferred cleanup failed: {e}");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    task = %keys.id,
                    "lease dropped outside a runtime, keys expire with their TTL"
                );
            }
        }
    }
}
