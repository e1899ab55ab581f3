use bloomguard::config::breaker::BreakerConfig;
use bloomguard::config::filter::FilterConfig;
use bloomguard::services::bloom::{BloomHasher, BloomParams};
use bloomguard::services::circuit_breaker::CircuitBreaker;
use bloomguard::services::storage::MemoryBitStore;
use bloomguard::DedupFilter;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn hashing_benchmarks(c: &mut Criterion) {
    let params = BloomParams::new(10_000_000, 0.001).unwrap();
    let hasher = BloomHasher::new(&params);
    c.bench_function("bloom_params", |b| {
        b.iter(|| BloomParams::new(black_box(10_000_000), black_box(0.001)))
    });
    c.bench_function("bloom_offsets", |b| {
        b.iter(|| hasher.offsets(black_box(b"order:2026-10-18:000042")))
    });
}

fn breaker_benchmarks(c: &mut Criterion) {
    let breaker = CircuitBreaker::default();
    c.bench_function("breaker_can_execute_closed", |b| {
        b.iter(|| black_box(breaker.can_execute()))
    });
    c.bench_function("breaker_record_success_closed", |b| {
        b.iter(|| breaker.record_success())
    });
}

fn check_and_set_benchmarks(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let filter = DedupFilter::new(
        FilterConfig {
            expected_items: 1_000_000,
            ..FilterConfig::default()
        },
        &BreakerConfig::default(),
        Arc::new(MemoryBitStore::new()),
        Duration::from_millis(50),
    )
    .unwrap();
    rt.block_on(filter.check_and_set("hot-key")).unwrap();

    c.bench_function("check_and_set_duplicate_memory", |b| {
        b.iter(|| rt.block_on(filter.check_and_set(black_box("hot-key"))))
    });
    let mut i = 0u64;
    c.bench_function("check_and_set_new_memory", |b| {
        b.iter(|| {
            i += 1;
            rt.block_on(filter.check_and_set(&format!("key-{}", i)))
        })
    });
}

criterion_group!(bloom, hashing_benchmarks, breaker_benchmarks, check_and_set_benchmarks);
criterion_main!(bloom);
