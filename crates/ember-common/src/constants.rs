//! System-wide constants for EmberDB.

// =============================================================================
// Page geometry
// =============================================================================

/// Size of a disk page in bytes (4 KB).
///
/// Every page-structured type in the system (bucket pages, directory pages)
/// lays its fields out inside exactly this many bytes. It matches the common
/// OS page and SSD sector size.
pub const PAGE_SIZE: usize = 4 * 1024;

// =============================================================================
// Buffer pool defaults
// =============================================================================

/// Default number of frames per buffer pool instance.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Default number of instances in a parallel buffer pool.
pub const DEFAULT_NUM_INSTANCES: usize = 4;
