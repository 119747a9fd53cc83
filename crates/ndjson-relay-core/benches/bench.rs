use core::{hint::black_box, time::Duration};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use ndjson_relay_core::{
    RelayConfig, RelayOutcome, StreamRelay,
    store::{MemoryStore, SharedStore},
    task::{KeyScheme, RequestHeaders, TaskRegistry},
};
use std::{sync::Arc, time::Instant};
use tokio::{runtime::Builder, sync::mpsc};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug)]
struct DrainBenchParams {
    lines_per_task: u64,
    concurrency: usize,
}

fn relay_drain_bench(c: &mut Criterion) {
    let lines_per_task_cases = [100, 1_000, 10_000];
    let concurrency_cases = [1, 8, 32];

    // Generate cartesian product of all param combinations
    let mut cases = Vec::new();
    for &lines_per_task in &lines_per_task_cases {
        for &concurrency in &concurrency_cases {
            cases.push(DrainBenchParams {
                lines_per_task,
                concurrency,
            });
        }
    }
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();

    // No per-line pause so the bench measures store and channel overhead.
    let config = Arc::new(RelayConfig {
        line_pause: Duration::ZERO,
        ..RelayConfig::default()
    });

    for params in &cases {
        let mut group = c.benchmark_group("relay/drain");
        group.throughput(Throughput::Elements(
            params.lines_per_task * params.concurrency as u64,
        ));

        group.bench_function(
            format!(
                "lines/{}/conc/{}",
                params.lines_per_task, params.concurrency
            ),
            |b| {
                b.to_async(&rt).iter_custom(|iters| {
                    let config = config.clone();
                    async move {
                        let mut total = Duration::ZERO;
                        for _ in 0..iters {
                            total += run_drain_bench(config.clone(), params).await;
                        }
                        total
                    }
                });
            },
        );

        group.finish();
    }
}

async fn run_drain_bench(config: Arc<RelayConfig>, params: &DrainBenchParams) -> Duration {
    let store = Arc::new(MemoryStore::new());
    let registry = TaskRegistry::new(store.clone(), KeyScheme::default(), Duration::from_secs(60));

    // Queue every task's output up front; only the relays are timed.
    let mut relays = Vec::with_capacity(params.concurrency);
    for _ in 0..params.concurrency {
        let lease = registry
            .create(RequestHeaders::new(), String::new())
            .await
            .unwrap();
        for i in 0..params.lines_per_task {
            store
                .push_back(lease.output_key(), &format!("{{\"n\":{i}}}"))
                .await
                .unwrap();
        }
        store.push_back(lease.output_key(), "EOF").await.unwrap();
        relays.push(StreamRelay::new(
            lease,
            store.clone(),
            config.clone(),
            CancellationToken::new(),
        ));
    }

    let start = Instant::now();
    let mut tasks = FuturesUnordered::new();
    for relay in relays {
        tasks.push(tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel(64);
            let reader = tokio::spawn(async move {
                let mut bytes = 0usize;
                while let Some(chunk) = rx.recv().await {
                    bytes += black_box(chunk).len();
                }
                bytes
            });
            let report = relay.run(tx).await.unwrap();
            assert!(matches!(report.outcome, RelayOutcome::Completed(_)));
            reader.await.unwrap()
        }));
    }

    // Wait for all tasks to complete
    while let Some(res) = tasks.next().await {
        black_box(res.unwrap());
    }
    start.elapsed()
}

criterion_group!(benches, relay_drain_bench);
criterion_main!(benches);
