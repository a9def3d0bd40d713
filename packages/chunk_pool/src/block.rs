use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::{Error, Result};

/// One bulk allocation subdivided into equally sized chunks.
///
/// The block does not know which of its chunks are in use; it only owns the
/// storage and releases it when dropped. Chunk bookkeeping lives in the pool.
#[derive(Debug)]
pub(crate) struct Block {
    /// First byte of the allocation. The block layout's alignment equals the
    /// chunk alignment, so chunk 0 starts here with no padding.
    base: NonNull<u8>,

    /// Layout used for the allocation; required again for deallocation.
    layout: Layout,
}

impl Block {
    /// Allocates a new block with the given layout.
    ///
    /// The layout must have non-zero size; the pool constructs it from a
    /// non-zero chunk size and a non-zero chunk count.
    pub(crate) fn new(layout: Layout) -> Result<Self> {
        debug_assert!(layout.size() > 0, "blocks are never zero-sized");

        // SAFETY: The layout has non-zero size, as asserted above.
        let base_ptr = unsafe { alloc(layout) };

        let base = NonNull::new(base_ptr).ok_or(Error::BlockAllocation {
            block_size: layout.size(),
        })?;

        Ok(Self { base, layout })
    }

    #[must_use]
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: base was returned by alloc() with this same layout in
        // new() and has not been deallocated since.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

// SAFETY: The block only owns its allocation and holds no references to
// thread-local state. What the chunks contain is the concern of whoever
// handed them out, not of the block.
unsafe impl Send for Block {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_is_aligned_to_layout() {
        let layout = Layout::from_size_align(256, 64).expect("valid layout");
        let block = Block::new(layout).expect("allocation failed");

        assert_eq!(block.base().as_ptr() as usize % 64, 0);
    }

    #[test]
    fn blocks_are_distinct_allocations() {
        let layout = Layout::from_size_align(128, 8).expect("valid layout");
        let first = Block::new(layout).expect("allocation failed");
        let second = Block::new(layout).expect("allocation failed");

        assert_ne!(first.base(), second.base());
    }
}
