use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::time::Duration;

use adminkit_cache::{CacheConfig, ExpiringCache};
use adminkit_core::SystemClock;

fn permission_like_cache(max_size: usize) -> ExpiringCache<i64, Arc<Vec<String>>> {
    let config = CacheConfig::permissions()
        .with_max_size(max_size)
        .with_ttl(Duration::from_secs(300))
        .without_sweeper();
    ExpiringCache::with_clock(config, Arc::new(SystemClock)).expect("valid bench config")
}

fn codes() -> Arc<Vec<String>> {
    Arc::new(
        ["user.read", "user.write", "role.read", "menu.read", "org.read"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    )
}

fn bench_hit_path(c: &mut Criterion) {
    let cache = permission_like_cache(10_000);
    for user in 0..1_000 {
        cache.set(user, codes());
    }

    let mut group = c.benchmark_group("expiring_cache_get_hit");
    group.throughput(Throughput::Elements(1));
    group.bench_function("warm_1000_users", |b| {
        let mut user = 0i64;
        b.iter(|| {
            user = (user + 1) % 1_000;
            black_box(cache.get(&user));
        })
    });
    group.finish();
}

fn bench_insert_at_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("expiring_cache_set_evicting");
    for size in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let cache = permission_like_cache(size);
            for user in 0..size as i64 {
                cache.set(user, codes());
            }
            let mut next = size as i64;
            b.iter(|| {
                next += 1;
                cache.set(black_box(next), codes());
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_hit_path, bench_insert_at_capacity);
criterion_main!(benches);
