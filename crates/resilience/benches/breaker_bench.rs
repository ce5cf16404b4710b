use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use resilience::{Breaker, BreakerConfig, GuardedCaller};

fn bench_admit_closed(c: &mut Criterion) {
    let breaker = Breaker::new("bench.closed", BreakerConfig::default());

    c.bench_function("breaker/admit_closed", |b| {
        b.iter(|| breaker.admit());
    });
}

fn bench_record_cycle(c: &mut Criterion) {
    let breaker = Breaker::new(
        "bench.cycle",
        BreakerConfig {
            failure_threshold: usize::MAX,
            ..BreakerConfig::default()
        },
    );

    c.bench_function("breaker/failure_then_success", |b| {
        b.iter(|| {
            breaker.record_failure();
            breaker.record_success();
        });
    });
}

fn bench_guarded_call(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let caller = GuardedCaller::new(Arc::new(Breaker::new(
        "bench.guarded",
        BreakerConfig::default(),
    )));

    c.bench_function("guarded/call_success", |b| {
        b.iter(|| {
            rt.block_on(async {
                caller
                    .call(|| async { true }, || async { Ok::<_, ()>(1u64) }, || 0)
                    .await
                    .into_required()
                    .unwrap()
            })
        });
    });
}

criterion_group!(
    benches,
    bench_admit_closed,
    bench_record_cycle,
    bench_guarded_call
);
criterion_main!(benches);
