//! Benchmarks for link queues and buffer recycling
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use tomoflow::pipeline::{Buffer, BufferPool, Dims, LinkQueue};

const FRAMES: u64 = 256;

fn bench_queue_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_handoff");
    group.throughput(Throughput::Elements(FRAMES));

    for capacity in [1usize, 4, 16] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let q = Arc::new(LinkQueue::bounded("bench", capacity));
                    let producer = {
                        let q = q.clone();
                        thread::spawn(move || {
                            for seq in 0..FRAMES {
                                let mut buffer = Buffer::new(Dims::d2(64, 64));
                                buffer.sequence = seq;
                                if q.push(buffer).is_err() {
                                    break;
                                }
                            }
                            q.close();
                        })
                    };
                    let mut count = 0u64;
                    while let Ok(Some(buffer)) = q.pop() {
                        count += black_box(buffer.sequence) & 1;
                    }
                    let _ = producer.join();
                    count
                });
            },
        );
    }

    group.finish();
}

fn bench_pool_recycling(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_pool");

    for side in [64usize, 512] {
        let dims = Dims::d2(side, side);
        group.throughput(Throughput::Bytes((side * side * 4) as u64));

        group.bench_with_input(BenchmarkId::new("acquire_recycle", side), &dims, |b, dims| {
            let pool = BufferPool::new(8);
            b.iter(|| {
                let buffer = pool.acquire(black_box(dims));
                pool.recycle(buffer);
            });
        });

        group.bench_with_input(BenchmarkId::new("allocate", side), &dims, |b, dims| {
            b.iter(|| black_box(Buffer::new(dims.clone())));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_queue_handoff, bench_pool_recycling);
criterion_main!(benches);
