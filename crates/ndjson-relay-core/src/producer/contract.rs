use crate::relay::Sentinels;
use crate::store::SharedStore;
use crate::task::TaskRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Work a producer performs for one task.
///
/// Implementations write their results through the [`OutputSink`]; they never
/// append the termination sentinel themselves. [`super::Producer::process`]
/// does that once `handle` returns, whether it succeeded or not.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &TaskRecord, sink: &mut OutputSink) -> Result<()>;
}

/// Appends NDJSON lines to one task's output list.
pub struct OutputSink {
    store: Arc<dyn SharedStore>,
    metadata_key: String,
    output_key: String,
    sentinels: Sentinels,
    lines_emitted: u64,
    abandoned: bool,
}

impl core::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OutputSink")
            .field("output_key", &self.output_key)
            .field("lines_emitted", &self.lines_emitted)
            .field("abandoned", &self.abandoned)
            .finish_non_exhaustive()
    }
}

impl OutputSink {
    pub(crate) fn new(
        store: Arc<dyn SharedStore>,
        metadata_key: String,
        output_key: String,
        sentinels: Sentinels,
    ) -> Self {
        Self {
            store,
            metadata_key,
            output_key,
            sentinels,
            lines_emitted: 0,
            abandoned: false,
        }
    }

    pub fn output_key(&self) -> &str {
        &self.output_key
    }

    /// Serializes `value` as one compact JSON line and appends it.
    pub async fn emit<T: Serialize + ?Sized + Sync>(&mut self, value: &T) -> Result<()> {
        let line = serde_json::to_string(value)?;
        self.emit_line(&line).await
    }

    /// Appends a pre-encoded line. Embedded line breaks are removed so the
    /// value stays one NDJSON record; blank lines are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedValue`] if the line is a termination
    /// sentinel, which would otherwise end the stream early.
    ///
    /// Returns [`Error::TaskGone`] once the task's metadata record is gone.
    /// Nothing is appended then, so a torn-down task's list is not recreated.
    pub async fn emit_line(&mut self, line: &str) -> Result<()> {
        let cleaned: String = line.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return Ok(());
        }
        if self.sentinels.contains(cleaned) {
            return Err(Error::ReservedValue(cleaned.to_string()));
        }

        self.ensure_live().await?;
        self.store.push_back(&self.output_key, cleaned).await?;
        self.lines_emitted += 1;
        Ok(())
    }

    /// `true` once a write found the task's metadata record missing.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    async fn ensure_live(&mut self) -> Result<()> {
        if !self.abandoned && self.store.exists(&self.metadata_key).await? {
            return Ok(());
        }
        self.abandoned = true;
        Err(Error::TaskGone {
            key: self.metadata_key.clone(),
        })
    }

    pub fn lines_emitted(&self) -> u64 {
        self.lines_emitted
    }

    /// Appends the primary sentinel, ending the task's output. Returns
    /// `false` without appending if the task is already gone.
    pub(crate) async fn finish(&mut self) -> Result<bool> {
        match self.ensure_live().await {
            Ok(()) => {}
            Err(Error::TaskGone { .. }) => return Ok(false),
            Err(e) => return Err(e),
        }
        self.store
            .push_back(&self.output_key, self.sentinels.primary())
            .await?;
        Ok(true)
    }
}
