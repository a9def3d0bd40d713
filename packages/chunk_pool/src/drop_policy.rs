/// Determines how a pool treats chunks that are still handed out when the
/// pool itself is dropped.
///
/// The pool does not track which chunks hold live objects, so it can never run
/// destructors at teardown; it only releases the backing block memory. This
/// policy controls whether outstanding chunks are tolerated at that point.
///
/// # Examples
///
/// ```
/// use chunk_pool::{ChunkPool, DropPolicy};
///
/// // The drop policy is set at pool creation time.
/// let pool = ChunkPool::builder()
///     .chunk_size(16)
///     .drop_policy(DropPolicy::MustNotLeakChunks)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool releases all block memory even if chunks are still handed
    /// out. Destructors of any objects in those chunks are skipped. This is
    /// the default.
    #[default]
    MayLeakChunks,

    /// The pool will panic if chunks are still handed out when it is dropped.
    ///
    /// This may be valuable when the stored objects own external resources
    /// and silently skipping their destructors would be a bug worth
    /// surfacing loudly.
    MustNotLeakChunks,
}
