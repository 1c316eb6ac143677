//! Hot-path benchmarks: backoff computation, breaker admission and failure
//! classification. These run on every attempt, so they should stay in the
//! tens of nanoseconds.
//!
//! Run: `cargo bench --bench backoff_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use integrations_rpc::{classify, Backoff, CircuitBreaker, CircuitBreakerConfig, RawFailure, StatusCode};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff");
    let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10), 2.0, true);
    let mut rng = StdRng::seed_from_u64(42);

    for attempt in [0u32, 4, 16] {
        group.bench_with_input(BenchmarkId::new("jittered", attempt), &attempt, |b, &n| {
            b.iter(|| backoff.delay_with(black_box(n), &mut rng));
        });
        group.bench_with_input(BenchmarkId::new("raw", attempt), &attempt, |b, &n| {
            b.iter(|| backoff.raw_delay(black_box(n)));
        });
    }
    group.finish();
}

fn bench_breaker(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker");
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());

    group.bench_function("allow_and_record_success", |b| {
        b.iter(|| {
            if breaker.allow() {
                breaker.record_success();
            }
        });
    });
    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let unavailable = RawFailure::status(StatusCode::Unavailable, "upstream down");
    let throttled = RawFailure::status(StatusCode::ResourceExhausted, "slow down")
        .with_metadata("retry-after-ms", "250")
        .with_metadata("x-ratelimit-reset", "1700000000");
    let refused = RawFailure::io(std::io::ErrorKind::ConnectionRefused, "connection refused");

    group.bench_function("status", |b| b.iter(|| classify(black_box(&unavailable))));
    group.bench_function("rate_limited", |b| b.iter(|| classify(black_box(&throttled))));
    group.bench_function("io", |b| b.iter(|| classify(black_box(&refused))));
    group.finish();
}

criterion_group!(benches, bench_backoff, bench_breaker, bench_classify);
criterion_main!(benches);
