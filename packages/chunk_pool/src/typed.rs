use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::num::NonZero;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::{fmt, ptr};

use crate::{ChunkPool, ConstructError, Error, TypedPoolBuilder};

/// A single-threaded pool of objects of one type, built on a [`ChunkPool`]
/// sized and aligned for `T`.
///
/// The pool adds construction and destruction semantics to the raw chunks:
/// [`construct()`][Self::construct] places a value into a chunk and returns a
/// typed pointer, [`destroy()`][Self::destroy] runs the value's destructor
/// and returns the chunk to the pool. A constructed value is on loan from the
/// pool until it is destroyed; the pool does not track which chunks hold live
/// values, so every constructed value must be destroyed by the caller before
/// the pool itself is dropped, or its destructor is silently skipped.
///
/// # Examples
///
/// ```
/// use chunk_pool::TypedPool;
///
/// let mut pool = TypedPool::<String>::new();
///
/// let item = pool
///     .construct("Hello, World!".to_string())
///     .expect("allocation failed");
///
/// // SAFETY: The pointer targets the value we just constructed and the pool
/// // creates no references to it, so a shared reference cannot alias.
/// assert_eq!(unsafe { item.as_ref() }, "Hello, World!");
///
/// // SAFETY: The pointer came from this pool and is destroyed exactly once.
/// unsafe { pool.destroy(item) };
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) when `T` is, but never thread-safe
/// ([`Sync`]): all operations take `&mut self` and use no synchronization.
pub struct TypedPool<T> {
    /// Backing chunk storage, sized with `Layout::new::<T>()`.
    pool: ChunkPool,

    /// Number of destructor panics swallowed by [`destroy()`][Self::destroy].
    destructor_failures: usize,

    _marker: PhantomData<T>,
}

impl<T> TypedPool<T> {
    /// Creates a new [`TypedPool`] with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_pool::TypedPool;
    ///
    /// let mut pool = TypedPool::<u64>::new();
    /// assert!(pool.is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`TypedPool`].
    ///
    /// Use this when you want to customize the pool beyond the defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::num::NonZero;
    ///
    /// use chunk_pool::TypedPool;
    ///
    /// let pool = TypedPool::<u64>::builder()
    ///     .chunks_per_block(NonZero::new(10).expect("non-zero"))
    ///     .build();
    /// ```
    pub fn builder() -> TypedPoolBuilder<T> {
        TypedPoolBuilder::new()
    }

    pub(crate) fn new_inner(pool: ChunkPool) -> Self {
        Self {
            pool,
            destructor_failures: 0,
            _marker: PhantomData,
        }
    }

    /// The number of values currently constructed and not yet destroyed.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Whether the pool currently holds no constructed values.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// The number of values the pool can hold without allocating another
    /// block.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// The number of blocks the backing pool has allocated so far.
    #[must_use]
    #[inline]
    pub fn block_count(&self) -> usize {
        self.pool.block_count()
    }

    /// The number of chunks each block holds.
    #[must_use]
    #[inline]
    pub fn chunks_per_block(&self) -> NonZero<usize> {
        self.pool.chunks_per_block()
    }

    /// The number of destructor panics that [`destroy()`][Self::destroy] has
    /// swallowed over the pool's lifetime.
    ///
    /// A panicking destructor is a contract violation by the stored type;
    /// this counter is the best-effort diagnostic for it.
    #[must_use]
    #[inline]
    pub fn destructor_failures(&self) -> usize {
        self.destructor_failures
    }

    /// Places a value into a chunk and returns a pointer to it.
    ///
    /// The value stays at that address until it is passed to
    /// [`destroy()`][Self::destroy]. The pool keeps no reference to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockAllocation`] if a new block was needed and the
    /// system allocator refused to provide it. The value is dropped in that
    /// case.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_pool::TypedPool;
    ///
    /// let mut pool = TypedPool::<u32>::new();
    ///
    /// let item = pool.construct(42).expect("allocation failed");
    ///
    /// // SAFETY: The pointer targets the value we just constructed.
    /// assert_eq!(unsafe { item.read() }, 42);
    ///
    /// // SAFETY: The pointer came from this pool and is destroyed exactly once.
    /// unsafe { pool.destroy(item) };
    /// ```
    pub fn construct(&mut self, value: T) -> Result<NonNull<T>, Error> {
        let chunk = self.pool.allocate()?;
        let item = chunk.cast::<T>();

        // SAFETY: The chunk holds at least size_of::<T>() bytes at
        // align_of::<T>() per the pool's sizing rule, and it is exclusively
        // ours until destroy() is called.
        unsafe { item.write(value) };

        Ok(item)
    }

    /// Constructs a value in place using a fallible initializer.
    ///
    /// The chunk is acquired first and the initializer writes into it. If
    /// the initializer returns an error or panics, the chunk is returned to
    /// the pool before the failure surfaces: a failed construction never
    /// leaks a chunk and never leaves a partially built value reachable.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructError::Pool`] if no chunk could be allocated and
    /// [`ConstructError::Construction`] with the initializer's error if
    /// initialization failed.
    ///
    /// # Safety
    ///
    /// When the initializer returns `Ok(())`, it must have written a valid
    /// `T` into the provided location.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_pool::TypedPool;
    ///
    /// let mut pool = TypedPool::<u32>::new();
    ///
    /// // SAFETY: The initializer fully initializes the value on success.
    /// let item = unsafe {
    ///     pool.construct_with(|uninit| {
    ///         uninit.write(7);
    ///         Ok::<(), String>(())
    ///     })
    /// }
    /// .expect("allocation and construction succeeded");
    ///
    /// // SAFETY: The pointer targets the value we just constructed.
    /// assert_eq!(unsafe { item.read() }, 7);
    ///
    /// // SAFETY: The pointer came from this pool and is destroyed exactly once.
    /// unsafe { pool.destroy(item) };
    /// ```
    pub unsafe fn construct_with<E>(
        &mut self,
        init: impl FnOnce(&mut MaybeUninit<T>) -> Result<(), E>,
    ) -> Result<NonNull<T>, ConstructError<E>> {
        let chunk = self.pool.allocate().map_err(ConstructError::Pool)?;

        // Returns the chunk to the pool if the initializer fails or unwinds.
        let mut guard = ReclaimGuard {
            pool: &mut self.pool,
            chunk: Some(chunk),
        };

        let mut uninit = chunk.cast::<MaybeUninit<T>>();

        // SAFETY: The chunk is sized and aligned for T and nothing else
        // references it, so viewing it as MaybeUninit<T> is always valid.
        let outcome = init(unsafe { uninit.as_mut() });

        match outcome {
            Ok(()) => {
                guard.disarm();
                Ok(chunk.cast::<T>())
            }
            Err(error) => {
                drop(guard);
                Err(ConstructError::Construction(error))
            }
        }
    }

    /// Runs the value's destructor and returns its chunk to the pool.
    ///
    /// The chunk is reclaimed unconditionally, even if the destructor
    /// panics: such a panic is swallowed and counted in
    /// [`destructor_failures()`][Self::destructor_failures] rather than
    /// propagated, because guaranteed reclamation outweighs surfacing a
    /// contract violation from a type whose destructor is expected to be
    /// panic-free.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// 1. The pointer was returned by [`construct()`][Self::construct] or
    ///    [`construct_with()`][Self::construct_with] on this same pool.
    /// 2. The value has not already been destroyed. Destroying twice without
    ///    an intervening construction is undefined behavior, not detected.
    /// 3. Nothing accesses the value after this call.
    pub unsafe fn destroy(&mut self, item: NonNull<T>) {
        // A panicking destructor must not prevent the chunk from returning
        // to the pool, so the unwind stops here.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: The caller guarantees the pointer targets a live T
            // constructed by this pool, so dropping it in place once is valid.
            unsafe { ptr::drop_in_place(item.as_ptr()) };
        }));

        if outcome.is_err() {
            // Cannot overflow: each failure corresponds to one destroyed
            // value, and those are bounded by the pool's traffic.
            self.destructor_failures = self.destructor_failures.wrapping_add(1);
        }

        // SAFETY: The caller guarantees the pointer came from a construction
        // on this pool and is not destroyed twice, so the chunk is returned
        // exactly once.
        unsafe { self.pool.deallocate(item.cast::<u8>()) };
    }
}

impl<T> Default for TypedPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedPool")
            .field("pool", &self.pool)
            .field("destructor_failures", &self.destructor_failures)
            .finish()
    }
}

/// Returns a freshly allocated chunk to the pool unless disarmed.
///
/// This is what guarantees the no-leak-on-failed-construction contract, also
/// when the initializer unwinds.
struct ReclaimGuard<'a> {
    pool: &'a mut ChunkPool,
    chunk: Option<NonNull<u8>>,
}

impl ReclaimGuard<'_> {
    fn disarm(&mut self) {
        self.chunk = None;
    }
}

impl Drop for ReclaimGuard<'_> {
    fn drop(&mut self) {
        if let Some(chunk) = self.chunk.take() {
            // SAFETY: The chunk was just allocated from this pool and was
            // never exposed to the caller, so returning it cannot double-free.
            unsafe { self.pool.deallocate(chunk) };
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::DropPolicy;

    assert_impl_all!(TypedPool<u64>: Send, std::fmt::Debug, Default);
    assert_not_impl_any!(TypedPool<u64>: Sync);
    assert_not_impl_any!(TypedPool<Rc<u64>>: Send);

    /// Test helper that tracks whether it has been dropped.
    struct DropTracker {
        dropped: Rc<Cell<bool>>,
    }

    impl DropTracker {
        fn new() -> (Self, Rc<Cell<bool>>) {
            let dropped = Rc::new(Cell::new(false));
            (
                Self {
                    dropped: Rc::clone(&dropped),
                },
                dropped,
            )
        }
    }

    impl Drop for DropTracker {
        fn drop(&mut self) {
            self.dropped.set(true);
        }
    }

    #[test]
    fn construct_read_mutate_destroy() {
        let mut pool = TypedPool::<String>::new();

        let item = pool.construct("chunk".to_string()).unwrap();

        unsafe {
            assert_eq!(item.as_ref(), "chunk");
            item.as_ptr().as_mut().unwrap().push_str("ed");
            assert_eq!(item.as_ref(), "chunked");
        }

        assert_eq!(pool.len(), 1);

        unsafe { pool.destroy(item) };
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn destroy_runs_the_destructor() {
        let mut pool = TypedPool::<DropTracker>::new();

        let (tracker, dropped) = DropTracker::new();
        let item = pool.construct(tracker).unwrap();

        assert!(!dropped.get());
        unsafe { pool.destroy(item) };
        assert!(dropped.get());
    }

    #[test]
    fn values_do_not_disturb_each_other() {
        let mut pool = TypedPool::<u64>::builder()
            .chunks_per_block(NonZero::new(3).unwrap())
            .build();

        let items: Vec<_> = (0..10_u64)
            .map(|value| pool.construct(value * 11).unwrap())
            .collect();

        for (index, item) in items.iter().enumerate() {
            assert_eq!(unsafe { item.read() }, index as u64 * 11);
        }

        for item in items {
            unsafe { pool.destroy(item) };
        }
    }

    #[test]
    fn construct_with_initializes_in_place() {
        let mut pool = TypedPool::<u32>::new();

        let item = unsafe {
            pool.construct_with(|uninit| {
                uninit.write(1234);
                Ok::<(), ()>(())
            })
        }
        .unwrap();

        assert_eq!(unsafe { item.read() }, 1234);
        unsafe { pool.destroy(item) };
    }

    #[test]
    fn failed_construction_reclaims_the_chunk() {
        let mut pool = TypedPool::<u32>::new();

        let attempted_address = Rc::new(Cell::new(ptr::null_mut::<u32>()));

        let address_capture = Rc::clone(&attempted_address);
        let result = unsafe {
            pool.construct_with(move |uninit| {
                address_capture.set(uninit.as_mut_ptr());
                Err::<(), &str>("refused")
            })
        };

        assert_eq!(result.unwrap_err().into_construction(), Some("refused"));
        assert_eq!(pool.len(), 0);

        // The reclaimed chunk is the first candidate for the next construction.
        let item = pool.construct(5).unwrap();
        assert_eq!(item.as_ptr(), attempted_address.get());

        unsafe { pool.destroy(item) };
    }

    #[test]
    fn panicking_initializer_reclaims_the_chunk() {
        let mut pool = TypedPool::<u32>::new();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            _ = unsafe {
                pool.construct_with(|_uninit| -> Result<(), ()> {
                    panic!("initializer exploded");
                })
            };
        }));

        assert!(outcome.is_err());
        assert_eq!(pool.len(), 0);

        // The pool remains usable and the chunk was not lost.
        let item = pool.construct(1).unwrap();
        assert_eq!(pool.len(), 1);
        unsafe { pool.destroy(item) };
    }

    #[test]
    fn destructor_panic_is_swallowed_and_counted() {
        struct ExplodingDrop {
            _value: u32,
        }

        impl Drop for ExplodingDrop {
            fn drop(&mut self) {
                panic!("destructor exploded");
            }
        }

        let mut pool = TypedPool::<ExplodingDrop>::new();

        let first = pool.construct(ExplodingDrop { _value: 1 }).unwrap();
        let first_address = first.as_ptr();

        // No panic escapes destroy().
        unsafe { pool.destroy(first) };

        assert_eq!(pool.destructor_failures(), 1);
        assert_eq!(pool.len(), 0);

        // The chunk was reclaimed despite the panic.
        let second = pool.construct(ExplodingDrop { _value: 2 }).unwrap();
        assert_eq!(second.as_ptr(), first_address);

        unsafe { pool.destroy(second) };
        assert_eq!(pool.destructor_failures(), 2);
    }

    #[test]
    fn teardown_skips_destructors_of_leaked_values() {
        let (tracker, dropped) = DropTracker::new();

        {
            let mut pool = TypedPool::<DropTracker>::new();
            _ = pool.construct(tracker).unwrap();

            // Deliberately not destroyed before the pool goes away.
        }

        // The block memory is gone but the destructor never ran.
        assert!(!dropped.get());
    }

    #[test]
    #[should_panic]
    fn must_not_leak_chunks_panics_on_live_value() {
        let mut pool = TypedPool::<u32>::builder()
            .drop_policy(DropPolicy::MustNotLeakChunks)
            .build();

        _ = pool.construct(9).unwrap();

        drop(pool);
    }

    /// The worked scenario: a 12 byte record at alignment 4, ten chunks per
    /// block, twenty constructions, full teardown, twenty more.
    #[test]
    fn two_block_scenario_reuses_all_addresses() {
        #[repr(C)]
        struct Record {
            x: i32,
            y: i32,
            z: i32,
        }

        let mut pool = TypedPool::<Record>::builder()
            .chunks_per_block(NonZero::new(10).unwrap())
            .build();

        let mut items = Vec::new();
        for index in 0..20 {
            let item = pool.construct(Record { x: 10, y: 20, z: 30 }).unwrap();
            items.push(item);

            // The first ten land in block one, the next ten in block two.
            assert_eq!(pool.block_count(), if index < 10 { 1 } else { 2 });
        }

        // Twenty distinct live records with the constructed values.
        let mut addresses: Vec<_> = items.iter().map(|item| item.as_ptr()).collect();
        addresses.sort_unstable();
        addresses.dedup();
        assert_eq!(addresses.len(), 20);

        for item in &items {
            let record = unsafe { item.as_ref() };
            assert_eq!((record.x, record.y, record.z), (10, 20, 30));
        }

        for item in items.drain(..) {
            unsafe { pool.destroy(item) };
        }
        assert!(pool.is_empty());

        // Reconstruction walks the free list: most recently destroyed first,
        // same twenty addresses, no third block.
        let reused: Vec<_> = (0..20)
            .map(|_| pool.construct(Record { x: 40, y: 50, z: 60 }).unwrap())
            .collect();

        let mut reused_addresses: Vec<_> = reused.iter().map(|item| item.as_ptr()).collect();
        reused_addresses.sort_unstable();
        reused_addresses.dedup();
        assert_eq!(reused_addresses.len(), 20);
        assert_eq!(reused_addresses, addresses);

        assert_eq!(pool.block_count(), 2);

        for item in &reused {
            let record = unsafe { item.as_ref() };
            assert_eq!((record.x, record.y, record.z), (40, 50, 60));
        }

        for item in reused {
            unsafe { pool.destroy(item) };
        }
    }

    #[test]
    fn destroyed_values_are_reused_most_recently_destroyed_first() {
        let mut pool = TypedPool::<u64>::builder()
            .chunks_per_block(NonZero::new(4).unwrap())
            .build();

        let items: Vec<_> = (0..4_u64).map(|value| pool.construct(value).unwrap()).collect();
        let addresses: Vec<_> = items.iter().map(|item| item.as_ptr()).collect();

        for item in items {
            unsafe { pool.destroy(item) };
        }

        for expected in addresses.iter().rev() {
            let item = pool.construct(0).unwrap();
            assert_eq!(item.as_ptr(), *expected);
        }
    }
}
