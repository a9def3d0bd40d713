//! Basic benchmarks for the `chunk_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::num::NonZero;

use chunk_pool::{ChunkPool, TypedPool};
use criterion::{Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

type TestItem = usize;
const TEST_VALUE: TestItem = 1024;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_basic");

    group.bench_function("build_empty", |b| {
        b.iter(|| {
            drop(black_box(
                ChunkPool::builder().layout_of::<TestItem>().build(),
            ));
        });
    });

    group.bench_function("allocate_deallocate", |b| {
        let mut pool = ChunkPool::builder().layout_of::<TestItem>().build();

        b.iter(|| {
            let chunk = black_box(pool.allocate().expect("allocation failed"));
            // SAFETY: The chunk came from this pool and is freed exactly once.
            unsafe { pool.deallocate(chunk) };
        });
    });

    group.bench_function("allocate_one_block_worth", |b| {
        let chunks_per_block = NonZero::new(128).expect("non-zero");
        let mut chunks = Vec::with_capacity(chunks_per_block.get());

        b.iter(|| {
            let mut pool = ChunkPool::builder()
                .layout_of::<TestItem>()
                .chunks_per_block(chunks_per_block)
                .build();

            for _ in 0..chunks_per_block.get() {
                chunks.push(black_box(pool.allocate().expect("allocation failed")));
            }

            chunks.clear();
        });
    });

    group.bench_function("construct_destroy", |b| {
        let mut pool = TypedPool::<TestItem>::new();

        b.iter(|| {
            let item = black_box(
                pool.construct(black_box(TEST_VALUE))
                    .expect("allocation failed"),
            );
            // SAFETY: The item came from this pool and is destroyed exactly once.
            unsafe { pool.destroy(item) };
        });
    });

    group.finish();
}
