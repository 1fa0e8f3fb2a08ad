//! Index errors.

use ember_storage::BufferError;
use thiserror::Error;

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur during hash index operations.
///
/// Capacity conditions (full index, absent key) are reported through the
/// boolean results of the operations themselves; errors here are the
/// buffer-pool failures underneath them.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The buffer pool failed underneath the index.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl IndexError {
    /// Returns true if retrying the operation may succeed (for example
    /// after other operations unpin pages).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Buffer(e) => e.is_retryable(),
        }
    }
}
