//! Typed pool example: a pool of small records.
//!
//! This example mirrors a common slab allocator workload: construct a batch
//! of equally sized records, tear them all down, then construct another
//! batch that reuses the same memory.
#![allow(
    clippy::print_stdout,
    reason = "example code prints its observations"
)]

use std::num::NonZero;

use chunk_pool::TypedPool;

#[derive(Debug)]
struct Point {
    x: i32,
    y: i32,
    z: i32,
}

fn main() {
    let mut pool = TypedPool::<Point>::builder()
        .chunks_per_block(NonZero::new(10).expect("non-zero"))
        .build();

    // Two blocks worth of points.
    let mut points = Vec::new();
    for _ in 0..20 {
        let point = pool
            .construct(Point { x: 10, y: 20, z: 30 })
            .expect("allocation failed");
        points.push(point);
    }

    println!(
        "Constructed {} points across {} blocks",
        pool.len(),
        pool.block_count()
    );

    for point in points.drain(..) {
        // SAFETY: The pointer targets a point we constructed above.
        let value = unsafe { point.as_ref() };
        assert_eq!((value.x, value.y, value.z), (10, 20, 30));

        // SAFETY: The pointer came from this pool and is destroyed exactly once.
        unsafe { pool.destroy(point) };
    }

    // The second batch reuses the first batch's chunks; no new block appears.
    for _ in 0..20 {
        let point = pool
            .construct(Point { x: 40, y: 50, z: 60 })
            .expect("allocation failed");
        points.push(point);
    }

    println!(
        "Reconstructed {} points, still {} blocks",
        pool.len(),
        pool.block_count()
    );

    for point in points.drain(..) {
        // SAFETY: The pointer came from this pool and is destroyed exactly once.
        unsafe { pool.destroy(point) };
    }

    println!("All points destroyed; destructor failures: {}", pool.destructor_failures());
}
