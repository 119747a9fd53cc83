use super::*;
use crate::relay::{Completion, RelayConfig, RelayOutcome, Sentinels, StreamRelay};
use crate::store::{MemoryStore, SharedStore};
use crate::task::{DEFAULT_CHANNEL, DispatchNotifier, KeyScheme, RequestHeaders, TaskRecord, TaskRegistry};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use core::time::Duration;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Echo;

#[async_trait]
impl TaskHandler for Echo {
    async fn handle(&self, task: &TaskRecord, sink: &mut OutputSink) -> Result<()> {
        sink.emit(&json!({ "body": task.body })).await?;
        sink.emit_line("{\"multi\":\n\"line\"}").await?;
        sink.emit_line("   ").await?;
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl TaskHandler for Failing {
    async fn handle(&self, _task: &TaskRecord, sink: &mut OutputSink) -> Result<()> {
        sink.emit(&json!({ "step": 1 })).await?;
        Err(Error::Handler {
            reason: "upstream exploded".to_string(),
        })
    }
}

struct Sneaky;

#[async_trait]
impl TaskHandler for Sneaky {
    async fn handle(&self, _task: &TaskRecord, sink: &mut OutputSink) -> Result<()> {
        sink.emit_line(" EOF ").await
    }
}

fn fixture() -> (Arc<MemoryStore>, TaskRegistry, Producer) {
    let store = Arc::new(MemoryStore::new());
    let registry = TaskRegistry::new(store.clone(), KeyScheme::default(), Duration::from_secs(600));
    let producer = Producer::new(store.clone(), DEFAULT_CHANNEL, Sentinels::default());
    (store, registry, producer)
}

async fn drain(store: &MemoryStore, key: &str) -> Vec<String> {
    let mut items = Vec::new();
    while let Some(item) = store.pop_front(key).await.unwrap() {
        items.push(item);
    }
    items
}

#[tokio::test]
async fn process_appends_lines_then_one_sentinel() {
    let (store, registry, producer) = fixture();
    let lease = registry
        .create(RequestHeaders::new(), "ping".to_string())
        .await
        .unwrap();

    let outcome = producer.process(lease.metadata_key(), &Echo).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Finished {
            id: lease.id().to_string(),
            lines: 2,
        }
    );
    assert_eq!(
        drain(&store, lease.output_key()).await,
        vec![
            r#"{"body":"ping"}"#.to_string(),
            r#"{"multi":"line"}"#.to_string(),
            "END-OF-FILE".to_string(),
        ]
    );
    lease.release().await.unwrap();
}

#[tokio::test]
async fn missing_record_is_skipped_without_output() {
    let (store, _registry, producer) = fixture();
    let outcome = producer.process("ndjson_task_gone", &Echo).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Missing);
    assert!(store.is_empty());
}

#[tokio::test]
async fn malformed_record_is_an_error() {
    let (store, _registry, producer) = fixture();
    store
        .set_with_expiry("ndjson_task_bad", "{not json", Duration::from_secs(60))
        .await
        .unwrap();

    let err = producer.claim("ndjson_task_bad").await.unwrap_err();
    assert!(matches!(err, Error::MalformedRecord { .. }));
}

#[tokio::test]
async fn handler_failure_still_terminates_output() {
    let (store, registry, producer) = fixture();
    let lease = registry
        .create(RequestHeaders::new(), String::new())
        .await
        .unwrap();

    let err = producer
        .process(lease.metadata_key(), &Failing)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Handler { .. }));
    assert_eq!(
        drain(&store, lease.output_key()).await,
        vec![r#"{"step":1}"#.to_string(), "END-OF-FILE".to_string()]
    );
    lease.release().await.unwrap();
}

#[tokio::test]
async fn sentinel_values_cannot_be_emitted_as_data() {
    let (store, registry, producer) = fixture();
    let lease = registry
        .create(RequestHeaders::new(), String::new())
        .await
        .unwrap();

    let err = producer
        .process(lease.metadata_key(), &Sneaky)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReservedValue(ref v) if v == "EOF"));
    assert_eq!(
        drain(&store, lease.output_key()).await,
        vec!["END-OF-FILE".to_string()]
    );
    lease.release().await.unwrap();
}

#[tokio::test]
async fn subscription_yields_announced_keys() {
    let (store, _registry, producer) = fixture();
    let notifier = DispatchNotifier::new(store.clone(), DEFAULT_CHANNEL);

    let mut keys = producer.subscribe().await.unwrap();
    notifier.announce("ndjson_task_a").await.unwrap();
    notifier.announce("ndjson_task_b").await.unwrap();

    assert_eq!(keys.next().await.as_deref(), Some("ndjson_task_a"));
    assert_eq!(keys.next().await.as_deref(), Some("ndjson_task_b"));
}

#[tokio::test(start_paused = true)]
async fn relay_streams_what_the_producer_writes() {
    let (store, registry, producer) = fixture();
    let notifier = DispatchNotifier::new(store.clone(), DEFAULT_CHANNEL);
    let mut announcements = producer.subscribe().await.unwrap();

    let worker = tokio::spawn(async move {
        let key = announcements.next().await.unwrap();
        producer.process(&key, &Echo).await.unwrap()
    });

    let lease = registry
        .create(RequestHeaders::new(), "hi".to_string())
        .await
        .unwrap();
    let keys = lease.keys().clone();
    notifier.announce(lease.metadata_key()).await.unwrap();

    let relay = StreamRelay::new(
        lease,
        store.clone(),
        Arc::new(RelayConfig::default()),
        CancellationToken::new(),
    );
    let (tx, mut rx) = mpsc::channel::<Bytes>(16);
    let report = relay.run(tx).await.unwrap();

    let mut out = Vec::new();
    while let Some(chunk) = rx.recv().await {
        out.extend_from_slice(&chunk);
    }
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "{\"body\":\"hi\"}\n{\"multi\":\"line\"}\n"
    );
    assert_eq!(report.outcome, RelayOutcome::Completed(Completion::Sentinel));
    assert!(matches!(
        worker.await.unwrap(),
        ProcessOutcome::Finished { lines: 2, .. }
    ));
    assert!(!store.exists(&keys.metadata_key).await.unwrap());
    assert!(!store.exists(&keys.output_key).await.unwrap());
}

/// Writes one line after `delay`.
struct Slow {
    delay: Duration,
}

#[async_trait]
impl TaskHandler for Slow {
    async fn handle(&self, task: &TaskRecord, sink: &mut OutputSink) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        sink.emit(&json!({ "late": task.id })).await
    }
}

#[tokio::test(start_paused = true)]
async fn late_output_does_not_recreate_a_timed_out_task() {
    let (store, registry, producer) = fixture();
    let lease = registry
        .create(RequestHeaders::new(), String::new())
        .await
        .unwrap();
    let keys = lease.keys().clone();

    let worker = {
        let key = keys.metadata_key.clone();
        tokio::spawn(async move {
            producer
                .process(&key, &Slow { delay: Duration::from_secs(2) })
                .await
        })
    };
    tokio::task::yield_now().await;

    let config = RelayConfig {
        poll_interval: Duration::from_millis(100),
        max_idle_time: Duration::from_millis(500),
        ..RelayConfig::default()
    };
    let relay = StreamRelay::new(lease, store.clone(), Arc::new(config), CancellationToken::new());
    let (tx, _rx) = mpsc::channel::<Bytes>(16);
    let report = relay.run(tx).await.unwrap();
    assert_eq!(report.outcome, RelayOutcome::TimedOut);

    let outcome = worker.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Abandoned {
            id: keys.id.clone(),
            lines: 0,
        }
    );

    tokio::time::advance(Duration::from_secs(100_000)).await;
    assert!(!store.exists(&keys.output_key).await.unwrap());
    assert!(store.is_empty());
}

/// Emits, then removes its own task record before emitting again.
struct Vanishing {
    store: Arc<MemoryStore>,
}

#[async_trait]
impl TaskHandler for Vanishing {
    async fn handle(&self, task: &TaskRecord, sink: &mut OutputSink) -> Result<()> {
        sink.emit_line("first").await?;
        self.store.delete(&[task.metadata_key.as_str()]).await?;
        let err = sink.emit_line("second").await.unwrap_err();
        assert!(matches!(err, Error::TaskGone { .. }));
        assert!(sink.is_abandoned());
        Err(err)
    }
}

#[tokio::test]
async fn record_removed_mid_task_stops_further_writes() {
    let (store, registry, producer) = fixture();
    let lease = registry
        .create(RequestHeaders::new(), String::new())
        .await
        .unwrap();

    let outcome = producer
        .process(
            lease.metadata_key(),
            &Vanishing {
                store: store.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Abandoned {
            id: lease.id().to_string(),
            lines: 1,
        }
    );
    // No sentinel after the record went away.
    assert_eq!(drain(&store, lease.output_key()).await, vec!["first".to_string()]);
    lease.release().await.unwrap();
}
