//! On-page layouts for the extendible hash index.
//!
//! Both page kinds are views over a raw page payload borrowed from the
//! buffer pool; nothing here allocates or owns page memory.

mod bucket;
mod directory;

pub use bucket::{bucket_array_size, BucketPage, BucketPageMut};
pub use directory::{DirectoryPage, DirectoryPageMut, DIRECTORY_ARRAY_SIZE, MAX_GLOBAL_DEPTH};
