use super::manager::WorkerPool;
use async_trait::async_trait;
use core::time::Duration;
use ndjson_relay_core::{
    Error, Result, SharedStore, TaskLease, TaskRecord, TaskRegistry,
    producer::{OutputSink, ProcessOutcome, Producer, TaskHandler},
    relay::Sentinels,
    store::MemoryStore,
    task::{DEFAULT_TASK_TTL, KeyScheme, RequestHeaders},
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Emits one line after `delay`, or gives up when `shutdown` fires.
struct Sleepy {
    delay: Duration,
    shutdown: CancellationToken,
}

#[async_trait]
impl TaskHandler for Sleepy {
    async fn handle(&self, task: &TaskRecord, sink: &mut OutputSink) -> Result<()> {
        tokio::select! {
            () = self.shutdown.cancelled() => Err(Error::Handler {
                reason: "cancelled".to_string(),
            }),
            () = tokio::time::sleep(self.delay) => sink.emit_line(&task.id).await,
        }
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    registry: TaskRegistry,
    pool: WorkerPool,
    token: CancellationToken,
}

fn fixture(workers: usize, delay: Duration, shutdown_timeout: Duration) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let registry = TaskRegistry::new(store.clone(), KeyScheme::default(), DEFAULT_TASK_TTL);
    let token = CancellationToken::new();
    let producer = Producer::new(store.clone(), "ndjson_jobs", Sentinels::default());
    let handler = Arc::new(Sleepy {
        delay,
        shutdown: token.clone(),
    });
    let pool = WorkerPool::spawn(workers, producer, handler, token.clone(), shutdown_timeout);
    Fixture {
        store,
        registry,
        pool,
        token,
    }
}

async fn new_task(registry: &TaskRegistry) -> TaskLease {
    registry
        .create(RequestHeaders::default(), String::new())
        .await
        .unwrap()
}

async fn output(store: &MemoryStore, lease: &TaskLease) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line) = store.pop_front(lease.output_key()).await.unwrap() {
        lines.push(line);
    }
    lines
}

#[tokio::test(start_paused = true)]
async fn serves_tasks_concurrently() {
    let f = fixture(3, Duration::from_secs(1), Duration::from_secs(3));
    let mut leases = Vec::new();
    for _ in 0..3 {
        leases.push(new_task(&f.registry).await);
    }

    let started = tokio::time::Instant::now();
    let outcomes = futures::future::join_all(
        leases
            .iter()
            .map(|lease| f.pool.dispatch_and_wait(lease.metadata_key().to_string())),
    )
    .await;
    // Three one-second tasks on three workers finish together.
    assert!(started.elapsed() < Duration::from_millis(1500));

    for (lease, outcome) in leases.iter().zip(outcomes) {
        assert_eq!(
            outcome.unwrap(),
            ProcessOutcome::Finished {
                id: lease.id().to_string(),
                lines: 1
            }
        );
        assert_eq!(
            output(&f.store, lease).await,
            vec![lease.id().to_string(), "END-OF-FILE".to_string()]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn missing_record_is_skipped() {
    let f = fixture(1, Duration::ZERO, Duration::from_secs(3));
    let outcome = f
        .pool
        .dispatch_and_wait("ndjson_task_gone".to_string())
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::Missing);
    assert!(f.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_running_tasks_finish() {
    let f = fixture(2, Duration::from_secs(1), Duration::from_secs(3));
    let lease = new_task(&f.registry).await;
    f.pool
        .dispatch(lease.metadata_key().to_string())
        .await
        .unwrap();
    tokio::task::yield_now().await;

    f.pool.shutdown().await;
    assert!(!f.token.is_cancelled());
    assert_eq!(
        output(&f.store, &lease).await,
        vec![lease.id().to_string(), "END-OF-FILE".to_string()]
    );

    let late = f.pool.dispatch("ndjson_task_late".to_string()).await;
    assert!(matches!(late, Err(Error::ServiceShutdown)));
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_tasks_past_the_deadline() {
    let f = fixture(1, Duration::from_secs(60), Duration::from_secs(1));
    let lease = new_task(&f.registry).await;
    f.pool
        .dispatch(lease.metadata_key().to_string())
        .await
        .unwrap();
    tokio::task::yield_now().await;

    let started = tokio::time::Instant::now();
    f.pool.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(f.token.is_cancelled());
    // The aborted task still ends its client's stream.
    assert_eq!(output(&f.store, &lease).await, vec!["END-OF-FILE".to_string()]);
}
