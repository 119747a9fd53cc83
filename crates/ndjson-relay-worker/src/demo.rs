use async_trait::async_trait;
use chrono::Utc;
use core::time::Duration;
use ndjson_relay_core::{
    Error, Result, TaskRecord,
    producer::{OutputSink, TaskHandler},
};
use rand::Rng;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Answers every task with a fixed number of demo messages spaced by random
/// delays, followed by a completion summary.
///
/// Each message looks like
/// `{"message_id":1,"task":"<id>","timestamp":1700000000.123,"data":"Message 1 of 5","random":417}`
/// and the summary like
/// `{"status":"completed","task":"<id>","total_messages":5,"timestamp":1700000004.9}`.
#[derive(Debug, Clone)]
pub struct DemoHandler {
    messages: u32,
    min_delay: Duration,
    max_delay: Duration,
    shutdown: CancellationToken,
}

impl DemoHandler {
    pub fn new(
        messages: u32,
        min_delay: Duration,
        max_delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            messages,
            min_delay,
            max_delay: max_delay.max(min_delay),
            shutdown,
        }
    }

    fn next_delay(&self) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }
        let ms = rand::rng().random_range(self.min_delay.as_millis()..=self.max_delay.as_millis());
        Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))
    }

    async fn pause(&self) -> Result<()> {
        let delay = self.next_delay();
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(Error::Handler {
                reason: "worker shutting down".to_string(),
            }),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Seconds since the Unix epoch with sub-second precision.
fn unix_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[async_trait]
impl TaskHandler for DemoHandler {
    async fn handle(&self, task: &TaskRecord, sink: &mut OutputSink) -> Result<()> {
        tracing::debug!(task = %task.id, body_len = task.body.len(), "serving demo task");

        for i in 1..=self.messages {
            self.pause().await?;
            let random: u16 = rand::rng().random_range(100..=999);
            sink.emit(&json!({
                "message_id": i,
                "task": task.id,
                "timestamp": unix_seconds(),
                "data": format!("Message {i} of {}", self.messages),
                "random": random,
            }))
            .await?;
        }

        sink.emit(&json!({
            "status": "completed",
            "task": task.id,
            "total_messages": self.messages,
            "timestamp": unix_seconds(),
        }))
        .await
    }
}
