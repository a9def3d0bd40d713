//! Basic usage example for `ChunkPool`.
//!
//! This example demonstrates raw chunk allocation: bump allocation through a
//! block, the intrusive free list, and most-recently-freed-first reuse.
#![allow(
    clippy::print_stdout,
    reason = "example code prints its observations"
)]

use std::num::NonZero;

use chunk_pool::ChunkPool;

fn main() {
    // A pool of 12 byte chunks at alignment 4, ten chunks per block.
    let mut pool = ChunkPool::builder()
        .chunk_size(12)
        .chunk_alignment(4)
        .chunks_per_block(NonZero::new(10).expect("non-zero"))
        .build();

    println!(
        "Effective chunk size: {} bytes (requested 12)",
        pool.chunk_size()
    );

    // First-time allocations advance the bump cursor through the block.
    let first = pool.allocate().expect("allocation failed");
    let second = pool.allocate().expect("allocation failed");

    println!("Allocated two chunks, one block in use: {}", pool.block_count());

    // SAFETY: The chunk came from this pool and has not been freed before.
    unsafe { pool.deallocate(second) };
    // SAFETY: The chunk came from this pool and has not been freed before.
    unsafe { pool.deallocate(first) };

    // Freed chunks come back most-recently-freed first.
    let reused = pool.allocate().expect("allocation failed");
    assert_eq!(reused, first);

    println!("Reused the most recently freed chunk without touching new memory");

    // SAFETY: The chunk came from this pool and has not been freed before.
    unsafe { pool.deallocate(reused) };

    println!(
        "Done; {} chunks handed out, {} capacity retained",
        pool.len(),
        pool.capacity()
    );
}
