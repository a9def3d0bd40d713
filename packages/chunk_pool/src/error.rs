use thiserror::Error;

/// Errors that can occur when requesting memory from a pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The system allocator refused to provide a new memory block.
    ///
    /// The pool never retries internally; the caller may free other resources
    /// and retry the operation, or give up.
    #[error("failed to allocate a {block_size} byte memory block for the pool")]
    BlockAllocation {
        /// Size in bytes of the block that could not be allocated.
        block_size: usize,
    },
}

/// Errors that can occur when constructing an object in a
/// [`TypedPool`][crate::TypedPool].
///
/// Whichever variant is returned, the backing chunk has already been returned
/// to the pool by the time the error surfaces, so a failed construction never
/// leaks memory and a later construction may reuse the same chunk.
#[derive(Debug, Error)]
pub enum ConstructError<E> {
    /// A backing chunk could not be allocated.
    #[error(transparent)]
    Pool(#[from] Error),

    /// The initializer reported failure. The chunk it was writing into has
    /// been reclaimed and no partially built object remains reachable.
    #[error("object construction failed; the chunk was returned to the pool")]
    Construction(E),
}

impl<E> ConstructError<E> {
    /// Returns the initializer's error, if construction itself failed.
    pub fn into_construction(self) -> Option<E> {
        match self {
            Self::Pool(_) => None,
            Self::Construction(inner) => Some(inner),
        }
    }
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);
    assert_impl_all!(ConstructError<Error>: Send, Sync, Debug);

    #[test]
    fn block_allocation_is_error() {
        let error = Error::BlockAllocation { block_size: 4096 };

        // Verify it is a valid Error that can be used in Result context.
        let result: Result<()> = Err(error);
        assert!(result.is_err());
    }

    #[test]
    fn construct_error_exposes_initializer_error() {
        let error: ConstructError<&str> = ConstructError::Construction("bad input");
        assert_eq!(error.into_construction(), Some("bad input"));

        let error: ConstructError<&str> =
            ConstructError::Pool(Error::BlockAllocation { block_size: 64 });
        assert_eq!(error.into_construction(), None);
    }

    #[test]
    fn pool_error_converts_into_construct_error() {
        let error: ConstructError<&str> = Error::BlockAllocation { block_size: 64 }.into();
        assert!(matches!(error, ConstructError::Pool(_)));
    }
}
