use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::pool::DEFAULT_CHUNKS_PER_BLOCK;
use crate::{ChunkPool, DropPolicy};

/// Builder for creating an instance of [`ChunkPool`].
///
/// [`ChunkPool`] requires a chunk size to be specified at construction time.
/// Provide it directly with `.chunk_size()` (optionally paired with
/// `.chunk_alignment()`), or derive both from a type or layout with
/// `.layout_of::<T>()` / `.layout()`.
///
/// The chunk size is mandatory, whereas other settings are optional.
///
/// # Examples
///
/// Using an explicit size and alignment:
///
/// ```
/// use chunk_pool::ChunkPool;
///
/// let pool = ChunkPool::builder()
///     .chunk_size(12)
///     .chunk_alignment(4)
///     .build();
/// ```
///
/// Using type-based sizing:
///
/// ```
/// use chunk_pool::ChunkPool;
///
/// let pool = ChunkPool::builder().layout_of::<u64>().build();
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred
/// between threads, but it is not thread-safe ([`Sync`]) as it contains
/// mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct ChunkPoolBuilder {
    chunk_size: Option<usize>,
    chunk_alignment: usize,
    chunks_per_block: NonZero<usize>,
    drop_policy: DropPolicy,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl ChunkPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            chunk_size: None,
            chunk_alignment: 1,
            chunks_per_block: DEFAULT_CHUNKS_PER_BLOCK,
            drop_policy: DropPolicy::default(),
            _not_sync: PhantomData,
        }
    }

    /// Sets the requested payload size of each chunk, in bytes.
    ///
    /// The pool may round this up: the effective chunk size is the smallest
    /// multiple of the chunk alignment that can hold both the payload and
    /// the intrusive free list link (one pointer).
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    #[inline]
    pub fn chunk_size(mut self, size: usize) -> Self {
        assert!(size > 0, "ChunkPool must have non-zero chunk size");
        self.chunk_size = Some(size);
        self
    }

    /// Sets the alignment of every chunk, in bytes. Defaults to 1.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two.
    #[inline]
    pub fn chunk_alignment(mut self, alignment: usize) -> Self {
        assert!(
            alignment.is_power_of_two(),
            "chunk alignment must be a power of two, got {alignment}"
        );
        self.chunk_alignment = alignment;
        self
    }

    /// Sets the chunk size and alignment from an existing memory layout.
    ///
    /// # Panics
    ///
    /// Panics if the layout has zero size.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use chunk_pool::ChunkPool;
    ///
    /// let layout = Layout::new::<u32>();
    /// let pool = ChunkPool::builder().layout(layout).build();
    /// ```
    #[inline]
    pub fn layout(self, layout: Layout) -> Self {
        self.chunk_size(layout.size()).chunk_alignment(layout.align())
    }

    /// Sets the chunk size and alignment to fit values of type `T`.
    ///
    /// This is a convenience method that automatically derives the layout
    /// for the given type.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_pool::ChunkPool;
    ///
    /// let pool = ChunkPool::builder().layout_of::<u64>().build();
    ///
    /// assert!(pool.chunk_size() >= size_of::<u64>());
    /// assert_eq!(pool.chunk_alignment(), align_of::<u64>());
    /// ```
    #[inline]
    pub fn layout_of<T>(self) -> Self {
        self.layout(Layout::new::<T>())
    }

    /// Sets the number of chunks carved out of each block.
    ///
    /// Larger blocks amortize the underlying bulk allocation over more
    /// chunks; smaller blocks waste less memory on pools that stay small.
    #[inline]
    pub fn chunks_per_block(mut self, count: NonZero<usize>) -> Self {
        self.chunks_per_block = count;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how to
    /// treat chunks still handed out when the pool is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_pool::{ChunkPool, DropPolicy};
    ///
    /// let pool = ChunkPool::builder()
    ///     .chunk_size(16)
    ///     .drop_policy(DropPolicy::MustNotLeakChunks)
    ///     .build();
    /// ```
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the chunk pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if no chunk size has been set using [`chunk_size`](Self::chunk_size),
    /// [`layout`](Self::layout) or [`layout_of`](Self::layout_of).
    #[must_use]
    #[inline]
    pub fn build(self) -> ChunkPool {
        let chunk_size = self.chunk_size.expect(
            "chunk size must be set using .chunk_size(), .layout() or .layout_of::<T>() before calling .build()",
        );

        ChunkPool::new_inner(
            chunk_size,
            self.chunk_alignment,
            self.chunks_per_block,
            self.drop_policy,
        )
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    // Test trait implementations.
    assert_impl_all!(ChunkPoolBuilder: Send, std::fmt::Debug);
    assert_not_impl_any!(ChunkPoolBuilder: Sync);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = ChunkPoolBuilder::new();
        assert!(builder.chunk_size.is_none());
        assert_eq!(builder.chunk_alignment, 1);
        assert_eq!(builder.chunks_per_block, DEFAULT_CHUNKS_PER_BLOCK);
        assert_eq!(builder.drop_policy, DropPolicy::default());
    }

    #[test]
    fn layout_sets_size_and_alignment() {
        let layout = Layout::new::<u64>();
        let builder = ChunkPoolBuilder::new().layout(layout);

        assert_eq!(builder.chunk_size, Some(layout.size()));
        assert_eq!(builder.chunk_alignment, layout.align());
    }

    #[test]
    fn layout_of_matches_explicit_layout() {
        let from_type = ChunkPoolBuilder::new().layout_of::<String>();
        let from_layout = ChunkPoolBuilder::new().layout(Layout::new::<String>());

        assert_eq!(from_type.chunk_size, from_layout.chunk_size);
        assert_eq!(from_type.chunk_alignment, from_layout.chunk_alignment);
    }

    #[test]
    #[should_panic]
    fn zero_chunk_size_panics() {
        _ = ChunkPoolBuilder::new().chunk_size(0);
    }

    #[test]
    #[should_panic]
    fn zero_alignment_panics() {
        _ = ChunkPoolBuilder::new().chunk_alignment(0);
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_alignment_panics() {
        _ = ChunkPoolBuilder::new().chunk_alignment(24);
    }

    #[test]
    #[should_panic]
    fn layout_of_zero_sized_type_panics() {
        _ = ChunkPoolBuilder::new().layout_of::<()>();
    }

    #[test]
    #[should_panic]
    fn build_without_chunk_size_panics() {
        _ = ChunkPoolBuilder::new().build();
    }

    #[test]
    fn settings_can_be_overridden() {
        let builder = ChunkPoolBuilder::new()
            .chunk_size(8)
            .chunk_size(24)
            .chunk_alignment(2)
            .chunk_alignment(16)
            .drop_policy(DropPolicy::MustNotLeakChunks)
            .drop_policy(DropPolicy::MayLeakChunks);

        assert_eq!(builder.chunk_size, Some(24));
        assert_eq!(builder.chunk_alignment, 16);
        assert_eq!(builder.drop_policy, DropPolicy::MayLeakChunks);
    }

    #[test]
    fn build_applies_configuration() {
        let pool = ChunkPoolBuilder::new()
            .chunk_size(12)
            .chunk_alignment(4)
            .chunks_per_block(NonZero::new(10).unwrap())
            .build();

        assert_eq!(pool.chunk_alignment(), 4);
        assert_eq!(pool.chunks_per_block().get(), 10);
        assert_eq!(pool.chunk_size() % 4, 0);
    }

    #[test]
    fn builder_can_cross_threads() {
        let builder = ChunkPoolBuilder::new().layout_of::<u64>();
        let handle = std::thread::spawn(move || builder.build());
        let _pool = handle.join().expect("thread completed successfully");
    }
}
