//! Buffer pool configuration.

use ember_common::constants::{DEFAULT_NUM_INSTANCES, DEFAULT_POOL_SIZE};
use ember_common::PAGE_SIZE;

/// Configuration for a buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames per instance.
    pub pool_size: usize,
    /// Number of instances in the parallel pool.
    pub num_instances: usize,
}

impl BufferPoolConfig {
    /// Creates a configuration with `pool_size` frames per instance and a
    /// single instance.
    #[must_use]
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            num_instances: 1,
        }
    }

    /// Sets the number of instances.
    #[must_use]
    pub fn with_instances(mut self, num_instances: usize) -> Self {
        self.num_instances = num_instances;
        self
    }

    /// Returns the total memory used by frame payloads.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.pool_size * self.num_instances * PAGE_SIZE
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.pool_size == 0 {
            return Err("pool_size must be > 0");
        }
        if self.num_instances == 0 {
            return Err("num_instances must be > 0");
        }
        Ok(())
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE).with_instances(DEFAULT_NUM_INSTANCES)
    }
}
