use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::pool::DEFAULT_CHUNKS_PER_BLOCK;
use crate::{ChunkPool, DropPolicy, TypedPool};

/// Builder for creating an instance of [`TypedPool<T>`].
///
/// The chunk size and alignment are always derived from `T`; only the block
/// capacity and drop policy can be configured.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use chunk_pool::{DropPolicy, TypedPool};
///
/// let pool = TypedPool::<u64>::builder()
///     .chunks_per_block(NonZero::new(32).expect("non-zero"))
///     .drop_policy(DropPolicy::MustNotLeakChunks)
///     .build();
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]) as
/// it contains mutable configuration state.
#[must_use]
pub struct TypedPoolBuilder<T> {
    chunks_per_block: NonZero<usize>,
    drop_policy: DropPolicy,

    _item: PhantomData<T>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> TypedPoolBuilder<T> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            chunks_per_block: DEFAULT_CHUNKS_PER_BLOCK,
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the number of chunks carved out of each block.
    #[inline]
    pub fn chunks_per_block(mut self, count: NonZero<usize>) -> Self {
        self.chunks_per_block = count;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how to
    /// treat values still alive when the pool is dropped.
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the typed pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    #[must_use]
    #[inline]
    pub fn build(self) -> TypedPool<T> {
        let pool = ChunkPool::builder()
            .layout_of::<T>()
            .chunks_per_block(self.chunks_per_block)
            .drop_policy(self.drop_policy)
            .build();

        TypedPool::new_inner(pool)
    }
}

impl<T> fmt::Debug for TypedPoolBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedPoolBuilder")
            .field("chunks_per_block", &self.chunks_per_block)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    // Test trait implementations.
    assert_impl_all!(TypedPoolBuilder<u64>: Send, std::fmt::Debug);
    assert_not_impl_any!(TypedPoolBuilder<u64>: Sync);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = TypedPoolBuilder::<u64>::new();
        assert_eq!(builder.chunks_per_block, DEFAULT_CHUNKS_PER_BLOCK);
        assert_eq!(builder.drop_policy, DropPolicy::default());
    }

    #[test]
    fn build_sizes_the_pool_for_the_item_type() {
        let pool = TypedPool::<u64>::builder()
            .chunks_per_block(NonZero::new(7).unwrap())
            .build();

        assert_eq!(pool.chunks_per_block().get(), 7);
        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    #[should_panic]
    fn zero_sized_item_type_panics() {
        _ = TypedPool::<()>::builder().build();
    }

    #[test]
    fn builder_can_cross_threads() {
        let builder = TypedPool::<u64>::builder();
        let handle = std::thread::spawn(move || builder.build());
        let _pool = handle.join().expect("thread completed successfully");
    }
}
