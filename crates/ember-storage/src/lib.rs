//! # ember-storage
//!
//! Storage substrate for EmberDB: synchronous page I/O and a fixed-size
//! buffer pool with LRU eviction.
//!
//! The crate has three layers:
//!
//! - [`disk`]: the disk manager: synchronous page-granular file I/O
//! - [`buffer`]: frames, the LRU replacer, buffer pool instances, and the
//!   striped parallel buffer pool
//! - [`log`]: an opaque log manager handle, reserved for write-ahead
//!   logging

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod disk;
pub mod log;

pub use buffer::{
    BufferError, BufferPool, BufferPoolConfig, BufferPoolInstance, BufferPoolStats, BufferResult,
    Frame, FrameId, LruReplacer, ParallelBufferPool,
};
pub use disk::{DiskManager, FileDiskManager};
pub use log::LogManager;
