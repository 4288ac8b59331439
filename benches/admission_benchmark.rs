use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use omnis_bouncer::config::BouncerConfig;
use omnis_bouncer::{AdmissionClient, Backend};
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build benchmark runtime")
}

fn client_with_capacity(capacity: i64) -> (AdmissionClient, Arc<dyn Backend>) {
    let backend: Arc<dyn Backend> = Arc::new(omnis_bouncer::backend::LocalBackend::new());
    let mut config = BouncerConfig::default();
    config.store_capacity = capacity;
    (
        AdmissionClient::with_backend(backend.clone(), config),
        backend,
    )
}

fn position_or_add_benchmark(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("position_or_add");
    group.throughput(Throughput::Elements(1));

    // Unbounded store: every call is a single SADD-equivalent, no queue walk.
    let (client, _backend) = client_with_capacity(-1);
    group.bench_function("store_admit_unique_ids", |b| {
        let mut i: u64 = 0;
        b.iter(|| {
            i += 1;
            let id = format!("id-{i}");
            rt.block_on(async { black_box(client.position_or_add(&id, 1_000).await.unwrap()) })
        })
    });

    // Same ID repeatedly: exercises the idempotent touch-and-refresh path.
    group.bench_function("store_touch_same_id", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(client.position_or_add("stable-id", 1_000).await.unwrap())
            })
        })
    });

    // Closed store: every call appends to the queue tail and reports a
    // growing position, the other half of the hot path.
    let (queue_client, _backend) = client_with_capacity(0);
    group.bench_function("queue_append_unique_ids", |b| {
        let mut i: u64 = 0;
        b.iter(|| {
            i += 1;
            let id = format!("queued-{i}");
            rt.block_on(async {
                black_box(queue_client.position_or_add(&id, 1_000).await.unwrap())
            })
        })
    });

    group.finish();
}

fn queue_timeout_benchmark(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("queue_timeout");

    // queue_timeout is the one O(n) script; measure its cost at a fixed
    // queue depth with nothing actually expired (worst case: full scan,
    // no evictions, full position-cache rebuild).
    for &depth in &[100usize, 1_000, 10_000] {
        let (client, backend) = client_with_capacity(0);
        rt.block_on(async {
            for i in 0..depth {
                client
                    .position_or_add(&format!("id-{i}"), 1_000)
                    .await
                    .unwrap();
            }
        });

        group.throughput(Throughput::Elements(depth as u64));
        group.bench_function(format!("scan_{depth}_no_evictions"), |b| {
            b.iter(|| rt.block_on(async { black_box(backend.queue_timeout(1_000).await.unwrap()) }))
        });
    }

    group.finish();
}

criterion_group!(benches, position_or_add_benchmark, queue_timeout_benchmark);
criterion_main!(benches);
