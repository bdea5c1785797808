//! Benchmarks for the LRU cache (component D): admission/eviction and hit
//! path cost under realistic byte budgets.
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fileengine::cache::Cache;

fn bench_put_with_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_put_with_eviction");
    for entry_size in [4 * 1024, 64 * 1024, 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*entry_size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entry_size), entry_size, |b, &entry_size| {
            let cache = Cache::new(entry_size * 16, 0.9);
            let bytes = vec![7u8; entry_size];
            let mut i = 0u64;
            b.iter(|| {
                let key = format!("obj/{i}");
                i += 1;
                black_box(cache.put(key, bytes.clone(), "default".to_string()).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_get_hit(c: &mut Criterion) {
    let cache = Cache::new(16 * 1024 * 1024, 0.9);
    cache.put("hot/object".to_string(), vec![9u8; 64 * 1024], "default".to_string()).unwrap();

    c.benchmark_group("cache_get").bench_function("hit", |b| {
        b.iter(|| {
            black_box(cache.get("hot/object"));
        });
    });
}

criterion_group!(benches, bench_put_with_eviction, bench_get_hit);
criterion_main!(benches);
