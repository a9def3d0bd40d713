//! A single-threaded fixed-size-chunk memory pool with an intrusive free list.
//!
//! This crate provides two layers for callers that repeatedly allocate and
//! free objects of one size class, such as node pools for trees, game
//! entities or parser tokens:
//!
//! - [`ChunkPool`]: the raw layer. Owns large contiguous memory blocks, hands
//!   out fixed-size untyped chunks by advancing a bump cursor through
//!   never-used memory, and reuses freed chunks through an intrusive free
//!   list threaded through the freed chunks themselves.
//! - [`TypedPool<T>`]: the typed layer. Wraps one [`ChunkPool`] sized and
//!   aligned for `T` and adds construction and destruction semantics, with a
//!   guaranteed-reclamation path when construction fails.
//!
//! # Key characteristics
//!
//! - **O(1) allocate and deallocate**: popping or pushing the free list and
//!   bumping the cursor are both constant time with no per-chunk bookkeeping
//!   storage.
//! - **Amortized block growth**: bulk memory is requested one block at a
//!   time; a block's chunks are carved out on demand.
//! - **Stable addresses**: chunks never move; blocks are never shrunk or
//!   compacted.
//! - **No construction-failure leaks**: a failed or panicking initializer
//!   returns its chunk to the pool before the error surfaces.
//! - **Single-threaded by design**: no locks, no atomics; pools are
//!   thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
//!
//! # Examples
//!
//! Typed usage:
//!
//! ```
//! use chunk_pool::TypedPool;
//!
//! let mut pool = TypedPool::<String>::new();
//!
//! let item = pool
//!     .construct("Hello, World!".to_string())
//!     .expect("allocation failed");
//!
//! // SAFETY: The pointer targets the value we just constructed and the pool
//! // creates no references of its own, so this cannot alias.
//! assert_eq!(unsafe { item.as_ref() }, "Hello, World!");
//!
//! // SAFETY: The pointer came from this pool and is destroyed exactly once.
//! unsafe { pool.destroy(item) };
//! ```
//!
//! Raw chunks:
//!
//! ```
//! use chunk_pool::ChunkPool;
//!
//! let mut pool = ChunkPool::builder()
//!     .chunk_size(12)
//!     .chunk_alignment(4)
//!     .build();
//!
//! let chunk = pool.allocate().expect("allocation failed");
//!
//! // Freed chunks are reused before any new memory is touched.
//! // SAFETY: The chunk came from this pool and has not been freed before.
//! unsafe { pool.deallocate(chunk) };
//! let reused = pool.allocate().expect("allocation failed");
//! assert_eq!(reused, chunk);
//! # // SAFETY: The chunk came from this pool and has not been freed before.
//! # unsafe { pool.deallocate(reused) };
//! ```

mod block;
mod builder;
mod drop_policy;
mod error;
mod pool;
mod typed;
mod typed_builder;

pub(crate) use block::*;
pub use builder::*;
pub use drop_policy::*;
pub use error::{ConstructError, Error};
pub(crate) use error::Result;
pub use pool::ChunkPool;
pub use typed::TypedPool;
pub use typed_builder::*;
