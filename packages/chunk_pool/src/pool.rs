use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;
use std::{ptr, thread};

use new_zealand::nz;

use crate::{Block, ChunkPoolBuilder, DropPolicy, Result};

/// Default number of chunks per block when the builder is not told otherwise.
///
/// In the future we may choose this dynamically, e.g. sizing blocks to match a
/// memory page. This is why the constant is not exposed in the public API.
#[cfg(not(miri))]
pub(crate) const DEFAULT_CHUNKS_PER_BLOCK: NonZero<usize> = nz!(128);

// Under Miri, we use a smaller block capacity because Miri test runtime scales
// by memory usage.
#[cfg(miri)]
pub(crate) const DEFAULT_CHUNKS_PER_BLOCK: NonZero<usize> = nz!(8);

/// A single-threaded pool of equally sized, untyped memory chunks.
///
/// The pool hands out fixed-size chunks faster than a general-purpose
/// allocator by amortizing allocation cost over large contiguous blocks and
/// reusing freed chunks through an intrusive free list: while a chunk is
/// free, its first machine word stores the address of the next free chunk.
///
/// First-time allocations are served by advancing a bump cursor through the
/// never-used tail of the newest block; freed chunks take priority and are
/// reused in most-recently-freed-first order. Blocks are only ever added,
/// never shrunk or compacted, and all of them are released when the pool is
/// dropped.
///
/// The pool never inspects chunk contents. If you need construction and
/// destruction semantics on top of the raw chunks, use
/// [`TypedPool<T>`][crate::TypedPool].
///
/// # Examples
///
/// ```
/// use chunk_pool::ChunkPool;
///
/// let mut pool = ChunkPool::builder()
///     .chunk_size(32)
///     .chunk_alignment(8)
///     .build();
///
/// let chunk = pool.allocate().expect("allocation failed");
///
/// // The chunk is ours until we return it.
/// assert_eq!(pool.len(), 1);
///
/// // SAFETY: The chunk came from this pool and has not been freed before.
/// unsafe { pool.deallocate(chunk) };
/// assert_eq!(pool.len(), 0);
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]): it
/// uses no internal synchronization, keeping the hot allocate/deallocate path
/// free of overhead. Share it across threads behind an external mutex or use
/// one pool per thread.
#[derive(Debug)]
pub struct ChunkPool {
    /// Effective chunk size and alignment after the sizing rule has been
    /// applied. The size is a multiple of the alignment, so it is also the
    /// stride between chunks within a block.
    chunk_layout: Layout,

    /// Number of chunks each block holds. Fixed at construction.
    chunks_per_block: NonZero<usize>,

    /// Layout of every block: `chunk_layout.size() * chunks_per_block` bytes
    /// at the chunk alignment. Computed once at construction.
    block_layout: Layout,

    /// Every block ever allocated, in allocation order. Only the newest block
    /// has never-used chunks; older blocks are fully carved up.
    blocks: Vec<Block>,

    /// Bump cursor: index of the next never-used chunk in the newest block.
    /// Equals `chunks_per_block` when the newest block is exhausted (and
    /// before the first block exists).
    next_chunk_index: usize,

    /// Head of the intrusive free list threaded through freed chunks. Takes
    /// priority over bump allocation.
    free_head: Option<NonNull<u8>>,

    /// Number of chunks currently handed out to callers.
    len: usize,

    /// What to do if chunks are still handed out when the pool is dropped.
    drop_policy: DropPolicy,
}

impl ChunkPool {
    /// Creates a builder for configuring and constructing a [`ChunkPool`].
    ///
    /// You must specify a chunk size, either directly via
    /// [`chunk_size()`][ChunkPoolBuilder::chunk_size] or through a layout via
    /// [`layout_of::<T>()`][ChunkPoolBuilder::layout_of], before calling
    /// `build()`.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_pool::ChunkPool;
    ///
    /// let pool = ChunkPool::builder()
    ///     .chunk_size(24)
    ///     .chunk_alignment(8)
    ///     .build();
    ///
    /// assert!(pool.is_empty());
    /// ```
    #[inline]
    pub fn builder() -> ChunkPoolBuilder {
        ChunkPoolBuilder::new()
    }

    /// Creates a new [`ChunkPool`] with the specified configuration.
    ///
    /// This method is used internally by the builder to construct the pool;
    /// it applies the sizing rule that turns the requested chunk size into
    /// the effective one.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero or `chunk_alignment` is not a power of
    /// two.
    #[must_use]
    pub(crate) fn new_inner(
        chunk_size: usize,
        chunk_alignment: usize,
        chunks_per_block: NonZero<usize>,
        drop_policy: DropPolicy,
    ) -> Self {
        assert!(chunk_size > 0, "ChunkPool must have non-zero chunk size");
        assert!(
            chunk_alignment.is_power_of_two(),
            "chunk alignment must be a power of two, got {chunk_alignment}"
        );

        // While free, every chunk hosts the free list link in its first
        // word, so it must be able to store one pointer.
        let base = chunk_size.max(size_of::<*mut u8>());

        // Smallest multiple of the alignment that can hold `base` bytes.
        let effective_size = base
            .div_ceil(chunk_alignment)
            .checked_mul(chunk_alignment)
            .expect("rounding the chunk size up to the alignment overflowed usize");

        let chunk_layout = Layout::from_size_align(effective_size, chunk_alignment)
            .expect("effective chunk size exceeds isize::MAX");

        let block_size = effective_size
            .checked_mul(chunks_per_block.get())
            .expect("block size calculation overflowed usize");

        let block_layout = Layout::from_size_align(block_size, chunk_alignment)
            .expect("block size exceeds isize::MAX");

        Self {
            chunk_layout,
            chunks_per_block,
            block_layout,
            blocks: Vec::new(),
            // No block exists yet; the first allocation grows the pool.
            next_chunk_index: chunks_per_block.get(),
            free_head: None,
            len: 0,
            drop_policy,
        }
    }

    /// The effective chunk size in bytes.
    ///
    /// This is the smallest multiple of the chunk alignment that is at least
    /// `max(pointer size, requested size)`, and may therefore be larger than
    /// the size requested at construction.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_pool::ChunkPool;
    ///
    /// let pool = ChunkPool::builder()
    ///     .chunk_size(12)
    ///     .chunk_alignment(4)
    ///     .build();
    ///
    /// assert_eq!(pool.chunk_size() % 4, 0);
    /// assert!(pool.chunk_size() >= 12);
    /// assert!(pool.chunk_size() >= size_of::<*mut u8>());
    /// ```
    #[must_use]
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_layout.size()
    }

    /// The chunk alignment in bytes. Every address returned by
    /// [`allocate()`][Self::allocate] is a multiple of this.
    #[must_use]
    #[inline]
    pub fn chunk_alignment(&self) -> usize {
        self.chunk_layout.align()
    }

    /// The number of chunks each block holds.
    #[must_use]
    #[inline]
    pub fn chunks_per_block(&self) -> NonZero<usize> {
        self.chunks_per_block
    }

    /// The number of chunks currently handed out to callers.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_pool::ChunkPool;
    ///
    /// let mut pool = ChunkPool::builder().chunk_size(16).build();
    /// assert_eq!(pool.len(), 0);
    ///
    /// let chunk = pool.allocate().expect("allocation failed");
    /// assert_eq!(pool.len(), 1);
    ///
    /// // SAFETY: The chunk came from this pool and has not been freed before.
    /// unsafe { pool.deallocate(chunk) };
    /// assert_eq!(pool.len(), 0);
    /// ```
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no chunks are currently handed out.
    ///
    /// An empty pool may still be holding block memory.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of chunks the pool can hand out without allocating another
    /// block.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        // Overflow here would imply capacity is greater than virtual memory.
        self.blocks.len().wrapping_mul(self.chunks_per_block.get())
    }

    /// The number of blocks the pool has allocated so far.
    ///
    /// Blocks are only ever added; the pool never shrinks.
    #[must_use]
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Hands out one chunk of [`chunk_size()`][Self::chunk_size] bytes,
    /// aligned to [`chunk_alignment()`][Self::chunk_alignment].
    ///
    /// Previously freed chunks are reused first, in most-recently-freed-first
    /// order, without touching new memory. Otherwise the chunk comes from the
    /// never-used tail of the newest block, and a new block is allocated only
    /// when that tail is exhausted.
    ///
    /// The chunk's contents are uninitialized. The chunk remains valid until
    /// it is passed to [`deallocate()`][Self::deallocate] or the pool is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockAllocation`][crate::Error::BlockAllocation] if a
    /// new block was needed and the system allocator refused to provide it.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_pool::ChunkPool;
    ///
    /// let mut pool = ChunkPool::builder()
    ///     .chunk_size(8)
    ///     .chunk_alignment(8)
    ///     .build();
    ///
    /// let chunk = pool.allocate().expect("allocation failed");
    ///
    /// // SAFETY: The chunk is ours, properly aligned and large enough for a u64.
    /// unsafe { chunk.cast::<u64>().write(42) };
    /// // SAFETY: We just wrote a u64 into the chunk.
    /// assert_eq!(unsafe { chunk.cast::<u64>().read() }, 42);
    ///
    /// // SAFETY: The chunk came from this pool and has not been freed before.
    /// unsafe { pool.deallocate(chunk) };
    /// ```
    pub fn allocate(&mut self) -> Result<NonNull<u8>> {
        if let Some(chunk) = self.free_head {
            // SAFETY: Every chunk in the free list was produced by this pool,
            // so it is valid for chunk_size() bytes and chunk_size() is at
            // least one pointer. deallocate() stored the next link in the
            // first word. The read is unaligned because the chunk alignment
            // may be smaller than the pointer alignment.
            let next = unsafe { chunk.as_ptr().cast::<*mut u8>().read_unaligned() };

            self.free_head = NonNull::new(next);

            // Cannot overflow: we cannot hand out more chunks than fit in
            // virtual memory.
            self.len = self.len.wrapping_add(1);

            return Ok(chunk);
        }

        if self.next_chunk_index >= self.chunks_per_block.get() {
            self.grow()?;
        }

        let block = self
            .blocks
            .last()
            .expect("grow() pushed a block, so at least one block exists");

        // Cannot overflow: the whole block was allocated in one piece, so
        // every chunk offset within it fits in usize.
        let offset = self.next_chunk_index.wrapping_mul(self.chunk_layout.size());

        // SAFETY: next_chunk_index < chunks_per_block, so the offset stays
        // within the block allocation. The block base carries the chunk
        // alignment and the stride is a multiple of it, so the chunk is
        // aligned as promised.
        let chunk = unsafe { block.base().byte_add(offset) };

        // Cannot overflow: bounded by chunks_per_block.
        self.next_chunk_index = self.next_chunk_index.wrapping_add(1);
        // Cannot overflow: see above.
        self.len = self.len.wrapping_add(1);

        Ok(chunk)
    }

    /// Returns a chunk to the pool, making it the first candidate for the
    /// next [`allocate()`][Self::allocate].
    ///
    /// The chunk's first word is overwritten with the free list link; the
    /// rest of its contents is left untouched but must be considered gone.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// 1. The chunk was returned by `allocate()` on this same pool.
    /// 2. The chunk has not already been deallocated since. Double-freeing
    ///    corrupts the free list; the pool does not detect it.
    /// 3. Nothing reads from or writes to the chunk after this call.
    pub unsafe fn deallocate(&mut self, chunk: NonNull<u8>) {
        debug_assert!(
            self.len > 0,
            "deallocate() called on a pool with no chunks handed out"
        );

        let next = self.free_head.map_or(ptr::null_mut(), NonNull::as_ptr);

        // SAFETY: The caller guarantees the chunk came from allocate() on
        // this pool, so it is valid for chunk_size() bytes, which is at
        // least one pointer. The write is unaligned because the chunk
        // alignment may be smaller than the pointer alignment.
        unsafe { chunk.as_ptr().cast::<*mut u8>().write_unaligned(next) };

        self.free_head = Some(chunk);

        // Cannot underflow per the caller contract, checked above in debug.
        self.len = self.len.wrapping_sub(1);
    }

    /// Allocates one more block and points the bump cursor at its first chunk.
    fn grow(&mut self) -> Result<()> {
        let block = Block::new(self.block_layout)?;

        self.blocks.push(block);
        self.next_chunk_index = 0;

        Ok(())
    }
}

impl Drop for ChunkPool {
    fn drop(&mut self) {
        let outstanding = self.len;

        // Release the storage first. Chunk contents are never inspected at
        // teardown; whoever constructed objects in them was responsible for
        // destroying them beforehand.
        self.free_head = None;
        self.blocks.clear();

        // If we are already panicking, we do not want to panic again because
        // that would simply obscure whatever the original panic was.
        if !thread::panicking() && matches!(self.drop_policy, DropPolicy::MustNotLeakChunks) {
            assert!(
                outstanding == 0,
                "dropped a ChunkPool with {outstanding} chunks still handed out - this is forbidden by DropPolicy::MustNotLeakChunks"
            );
        }
    }
}

// SAFETY: The pool's raw pointers all target memory it exclusively owns, and
// nothing in it is tied to the thread it was created on. All operations
// require `&mut self`, so Rust's borrowing rules serialize access.
unsafe impl Send for ChunkPool {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(ChunkPool: Send, std::fmt::Debug);
    assert_not_impl_any!(ChunkPool: Sync);

    fn pool(chunk_size: usize, chunk_alignment: usize, chunks_per_block: usize) -> ChunkPool {
        ChunkPool::builder()
            .chunk_size(chunk_size)
            .chunk_alignment(chunk_alignment)
            .chunks_per_block(NonZero::new(chunks_per_block).unwrap())
            .build()
    }

    #[test]
    fn effective_chunk_size_is_ceiling_to_multiple() {
        let pointer_size = size_of::<*mut u8>();

        for &(size, alignment) in &[
            (1_usize, 1_usize),
            (1, 8),
            (7, 2),
            (12, 4),
            (16, 16),
            (17, 16),
            (100, 32),
            (pointer_size, pointer_size),
        ] {
            let pool = pool(size, alignment, 4);
            let effective = pool.chunk_size();
            let base = size.max(pointer_size);

            // Smallest multiple of the alignment that is >= base.
            assert!(effective >= base, "size {size} align {alignment}");
            assert_eq!(effective % alignment, 0, "size {size} align {alignment}");
            assert!(
                effective - alignment < base,
                "size {size} align {alignment}: {effective} is not the smallest candidate"
            );
        }
    }

    #[test]
    fn chunk_12_align_4_keeps_exact_fit() {
        // On every platform where pointers are at most 12 bytes, a 12 byte
        // chunk at alignment 4 needs no padding at all.
        let pool = pool(12, 4, 10);
        assert_eq!(pool.chunk_size(), 12);
    }

    #[test]
    fn chunks_within_a_block_are_contiguous() {
        let mut pool = pool(16, 8, 4);

        let mut previous = pool.allocate().unwrap();
        for _ in 1..4 {
            let chunk = pool.allocate().unwrap();
            assert_eq!(
                chunk.as_ptr() as usize - previous.as_ptr() as usize,
                pool.chunk_size()
            );
            previous = chunk;
        }

        assert_eq!(pool.block_count(), 1);
    }

    #[test]
    fn allocations_are_aligned() {
        let mut pool = pool(24, 16, 8);

        for _ in 0..20 {
            let chunk = pool.allocate().unwrap();
            assert_eq!(chunk.as_ptr() as usize % 16, 0);
        }
    }

    #[test]
    fn new_block_appears_exactly_when_current_is_exhausted() {
        let mut pool = pool(8, 8, 4);
        assert_eq!(pool.block_count(), 0);

        for expected_blocks in 1..=3 {
            for _ in 0..4 {
                _ = pool.allocate().unwrap();
                assert_eq!(pool.block_count(), expected_blocks);
            }
        }

        // The 13th allocation triggers the fourth block.
        _ = pool.allocate().unwrap();
        assert_eq!(pool.block_count(), 4);
    }

    #[test]
    fn freed_chunks_are_reused_most_recently_freed_first() {
        let mut pool = pool(32, 8, 8);

        let chunks: Vec<_> = (0..8).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.block_count(), 1);

        for &chunk in &chunks {
            unsafe { pool.deallocate(chunk) };
        }

        // Reallocation pops the free list: last freed comes out first, and
        // no new block is touched.
        for &expected in chunks.iter().rev() {
            assert_eq!(pool.allocate().unwrap(), expected);
        }

        assert_eq!(pool.block_count(), 1);
    }

    #[test]
    fn free_list_takes_priority_over_bump_cursor() {
        let mut pool = pool(16, 8, 8);

        let first = pool.allocate().unwrap();
        _ = pool.allocate().unwrap();

        unsafe { pool.deallocate(first) };

        // The freed chunk is reused before the six untouched ones.
        assert_eq!(pool.allocate().unwrap(), first);
    }

    #[test]
    fn free_list_link_survives_sub_pointer_alignment() {
        // Alignment 1 with an odd chunk size forces the link word onto
        // unaligned addresses.
        let mut pool = pool(9, 1, 4);

        let chunks: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();

        for &chunk in &chunks {
            unsafe { pool.deallocate(chunk) };
        }

        for &expected in chunks.iter().rev() {
            assert_eq!(pool.allocate().unwrap(), expected);
        }
    }

    #[test]
    fn accounting_tracks_allocate_and_deallocate() {
        let mut pool = pool(16, 8, 4);

        assert_eq!(pool.len(), 0);
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 0);

        let first = pool.allocate().unwrap();
        let second = pool.allocate().unwrap();

        assert_eq!(pool.len(), 2);
        assert!(!pool.is_empty());
        assert_eq!(pool.capacity(), 4);

        unsafe { pool.deallocate(first) };
        assert_eq!(pool.len(), 1);

        unsafe { pool.deallocate(second) };
        assert_eq!(pool.len(), 0);
        assert!(pool.is_empty());

        // Capacity is retained for reuse.
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn teardown_releases_blocks_with_default_policy() {
        let mut pool = pool(64, 8, 4);

        // Chunks still handed out at drop are tolerated by default.
        _ = pool.allocate().unwrap();
        _ = pool.allocate().unwrap();

        drop(pool);
    }

    #[test]
    #[should_panic]
    fn must_not_leak_chunks_panics_on_outstanding_chunk() {
        let mut pool = ChunkPool::builder()
            .chunk_size(16)
            .drop_policy(DropPolicy::MustNotLeakChunks)
            .build();

        _ = pool.allocate().unwrap();

        drop(pool);
    }

    #[test]
    fn must_not_leak_chunks_accepts_clean_teardown() {
        let mut pool = ChunkPool::builder()
            .chunk_size(16)
            .drop_policy(DropPolicy::MustNotLeakChunks)
            .build();

        let chunk = pool.allocate().unwrap();
        unsafe { pool.deallocate(chunk) };

        drop(pool);
    }

    #[test]
    fn chunk_contents_survive_other_operations() {
        let mut pool = pool(8, 8, 2);

        let first = pool.allocate().unwrap();
        unsafe { first.cast::<u64>().write(0xDEAD_BEEF_DEAD_BEEF) };

        // Growing into a second block must not disturb the first chunk.
        for _ in 0..3 {
            _ = pool.allocate().unwrap();
        }
        assert_eq!(pool.block_count(), 2);

        assert_eq!(unsafe { first.cast::<u64>().read() }, 0xDEAD_BEEF_DEAD_BEEF);
    }
}
