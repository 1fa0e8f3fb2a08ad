//! Buffer pool errors.

use std::io;

use ember_common::PageId;
use thiserror::Error;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer pool operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Every frame is pinned; nothing can be evicted.
    #[error("buffer pool exhausted, all frames are pinned")]
    PoolExhausted,

    /// The requested page is not resident in the pool.
    #[error("page {page_id} is not resident in the buffer pool")]
    PageNotResident {
        /// The page that was requested.
        page_id: PageId,
    },

    /// An operation was given the invalid page id sentinel.
    #[error("invalid page id")]
    InvalidPageId,

    /// I/O error from the disk manager. Fatal; never retried at this layer.
    #[error("I/O error: {source}")]
    Io {
        /// Underlying error.
        #[from]
        source: io::Error,
    },

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },
}

impl BufferError {
    /// Creates a page-not-resident error.
    pub fn not_resident(page_id: PageId) -> Self {
        Self::PageNotResident { page_id }
    }

    /// Returns true if the condition can clear on its own (callers may
    /// unpin pages and try again).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_is_retryable() {
        assert!(BufferError::PoolExhausted.is_retryable());
        assert!(!BufferError::not_resident(PageId::new(1)).is_retryable());
        let io_err = BufferError::from(io::Error::new(io::ErrorKind::Other, "disk gone"));
        assert!(!io_err.is_retryable());
    }
}
