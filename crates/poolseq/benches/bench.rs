use core::{hint::black_box, time::Duration};
use criterion::{Criterion, SamplingMode, Throughput, criterion_group, criterion_main};
use futures::future::try_join_all;
use poolseq::{
    AllocatorConfig, MemoryCache, MemoryCounter, MemoryLock, Result, SequenceAllocator,
};
use std::{sync::Arc, time::Instant};
use tokio::runtime::Builder;

type MemoryAllocator = SequenceAllocator<MemoryCache, MemoryLock, MemoryCounter>;

// Number of IDs issued per benchmark iteration (split across tasks for the
// contended benchmarks).
const TOTAL_IDS: usize = 4096;

fn allocator_factory(pool_size: u64) -> impl Fn() -> MemoryAllocator + Copy {
    move || {
        let config = AllocatorConfig::new("bench", pool_size)
            .unwrap()
            .with_enabled(true)
            .with_lock_wait(Duration::from_secs(30));
        SequenceAllocator::new(
            config,
            MemoryCache::new(),
            MemoryLock::new(),
            MemoryCounter::new(0),
        )
    }
}

/// Benchmarks a single caller issuing ids back to back.
fn bench_allocator_sequential(
    c: &mut Criterion,
    group_name: &str,
    allocator_factory: impl Fn() -> MemoryAllocator + Copy,
) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();

        b.to_async(&rt).iter_custom(|iters| async move {
            let start = Instant::now();

            for _ in 0..iters {
                let allocator = allocator_factory();
                allocator.reconcile().await.unwrap();
                for _ in 0..TOTAL_IDS {
                    black_box(allocator.next_id().await.unwrap());
                }
            }

            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmarks many tasks sharing one allocator, all serialized on the
/// distributed lock.
fn bench_allocator_contended(
    c: &mut Criterion,
    group_name: &str,
    allocator_factory: impl Fn() -> MemoryAllocator + Copy,
) {
    let mut group = c.benchmark_group(group_name);
    group.sample_size(10);
    group.sampling_mode(SamplingMode::Flat);

    for num_tasks in [1, 2, 4, 8, 16, 32] {
        let ids_per_task = TOTAL_IDS / num_tasks;

        group.throughput(Throughput::Elements(TOTAL_IDS as u64));
        group.bench_function(format!("elems/{}/tasks/{}", TOTAL_IDS, num_tasks), |b| {
            let rt = Builder::new_multi_thread().enable_all().build().unwrap();

            b.to_async(&rt).iter_custom(move |iters| async move {
                let start = Instant::now();

                for _ in 0..iters {
                    let allocator = Arc::new(allocator_factory());
                    allocator.reconcile().await.unwrap();

                    let mut tasks: Vec<tokio::task::JoinHandle<Result<()>>> =
                        Vec::with_capacity(num_tasks);
                    for _ in 0..num_tasks {
                        let allocator = Arc::clone(&allocator);
                        tasks.push(tokio::spawn(async move {
                            for _ in 0..ids_per_task {
                                black_box(allocator.next_id().await?);
                            }
                            Ok(())
                        }));
                    }

                    for result in try_join_all(tasks).await.unwrap() {
                        result.unwrap();
                    }
                }

                start.elapsed()
            });
        });
    }

    group.finish();
}

/// Window refilled rarely; measures the lock and cache round trip.
fn benchmark_sequential_large_pool(c: &mut Criterion) {
    bench_allocator_sequential(c, "sequential/pool/10000", allocator_factory(10_000));
}

/// Window refilled on every call; adds a durable counter round trip per id.
fn benchmark_sequential_pool_of_one(c: &mut Criterion) {
    bench_allocator_sequential(c, "sequential/pool/1", allocator_factory(1));
}

fn benchmark_contended_large_pool(c: &mut Criterion) {
    bench_allocator_contended(c, "contended/pool/10000", allocator_factory(10_000));
}

fn benchmark_contended_small_pool(c: &mut Criterion) {
    bench_allocator_contended(c, "contended/pool/16", allocator_factory(16));
}

criterion_group!(
    benches,
    benchmark_sequential_large_pool,
    benchmark_sequential_pool_of_one,
    benchmark_contended_large_pool,
    benchmark_contended_small_pool,
);
criterion_main!(benches);
