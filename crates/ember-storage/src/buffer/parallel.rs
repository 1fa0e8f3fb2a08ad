//! Parallel buffer pool.
//!
//! Shards pages across `N` independent buffer pool instances by
//! `page_id % N`. Each instance has its own mutex, page table, free list,
//! and replacer, so operations on pages owned by different instances never
//! contend.

use std::sync::Arc;

use ember_common::PageId;
use parking_lot::Mutex;
use tracing::trace;

use super::error::{BufferError, BufferResult};
use super::frame::Frame;
use super::instance::BufferPoolInstance;
use super::{BufferPool, BufferPoolStats};
use crate::disk::DiskManager;
use crate::log::LogManager;

/// A buffer pool striped over several instances.
pub struct ParallelBufferPool {
    instances: Vec<Arc<BufferPoolInstance>>,
    /// Where the next `new_page` starts probing; advances by one per call.
    start_index: Mutex<usize>,
    pool_size_per_instance: usize,
}

impl ParallelBufferPool {
    /// Creates a pool of `num_instances` instances with `pool_size` frames
    /// each.
    ///
    /// # Panics
    ///
    /// Panics if `num_instances` is zero.
    pub fn new(
        num_instances: usize,
        pool_size: usize,
        disk: Arc<dyn DiskManager>,
        log: Option<Arc<LogManager>>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");

        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolInstance::with_sharding(
                    pool_size,
                    num_instances as u32,
                    i as u32,
                    Arc::clone(&disk),
                    log.clone(),
                ))
            })
            .collect();

        Self {
            instances,
            start_index: Mutex::new(0),
            pool_size_per_instance: pool_size,
        }
    }

    /// Creates a pool from a configuration.
    pub fn with_config(
        config: &super::BufferPoolConfig,
        disk: Arc<dyn DiskManager>,
        log: Option<Arc<LogManager>>,
    ) -> BufferResult<Self> {
        config.validate().map_err(|message| BufferError::Config {
            message: message.to_string(),
        })?;
        Ok(Self::new(config.num_instances, config.pool_size, disk, log))
    }

    /// Returns the instance responsible for `page_id`.
    #[must_use]
    pub fn instance_for(&self, page_id: PageId) -> &Arc<BufferPoolInstance> {
        let idx = page_id.as_u32() as usize % self.instances.len();
        &self.instances[idx]
    }

    /// Returns the number of instances.
    #[must_use]
    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Allocates a new page, probing instances round-robin.
    ///
    /// Probing starts at a rotating index so allocation pressure spreads
    /// across instances; the index advances once per call whether or not
    /// the allocation succeeded.
    pub fn new_page(&self) -> BufferResult<Arc<Frame>> {
        let mut start = self.start_index.lock();
        let n = self.instances.len();

        let mut result = Err(BufferError::PoolExhausted);
        for offset in 0..n {
            let idx = (*start + offset) % n;
            match self.instances[idx].new_page() {
                Ok(frame) => {
                    trace!(instance = idx, page_id = %frame.page_id(), "allocated page");
                    result = Ok(frame);
                    break;
                }
                Err(e) if e.is_retryable() => continue,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        *start = (*start + 1) % n;
        result
    }

    /// Fetches `page_id` from its owning instance.
    pub fn fetch_page(&self, page_id: PageId) -> BufferResult<Arc<Frame>> {
        if !page_id.is_valid() {
            return Err(BufferError::InvalidPageId);
        }
        self.instance_for(page_id).fetch_page(page_id)
    }

    /// Unpins `page_id` on its owning instance.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        if !page_id.is_valid() {
            return false;
        }
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    /// Flushes `page_id` on its owning instance.
    pub fn flush_page(&self, page_id: PageId) -> BufferResult<()> {
        if !page_id.is_valid() {
            return Err(BufferError::InvalidPageId);
        }
        self.instance_for(page_id).flush_page(page_id)
    }

    /// Flushes every resident page of every instance.
    pub fn flush_all(&self) -> BufferResult<()> {
        for instance in &self.instances {
            instance.flush_all()?;
        }
        Ok(())
    }

    /// Deletes `page_id` on its owning instance.
    pub fn delete_page(&self, page_id: PageId) -> BufferResult<bool> {
        if !page_id.is_valid() {
            return Ok(true);
        }
        self.instance_for(page_id).delete_page(page_id)
    }

    /// Total frames across all instances.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.instances.len() * self.pool_size_per_instance
    }

    /// Aggregated counters across all instances.
    #[must_use]
    pub fn stats(&self) -> BufferPoolStats {
        let mut total = BufferPoolStats::default();
        for instance in &self.instances {
            let s = instance.stats();
            total.hits += s.hits;
            total.misses += s.misses;
            total.evictions += s.evictions;
            total.flushes += s.flushes;
            total.pinned_frames += s.pinned_frames;
            total.dirty_frames += s.dirty_frames;
        }
        total
    }
}

impl BufferPool for ParallelBufferPool {
    fn new_page(&self) -> BufferResult<Arc<Frame>> {
        ParallelBufferPool::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> BufferResult<Arc<Frame>> {
        ParallelBufferPool::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        ParallelBufferPool::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> BufferResult<()> {
        ParallelBufferPool::flush_page(self, page_id)
    }

    fn flush_all(&self) -> BufferResult<()> {
        ParallelBufferPool::flush_all(self)
    }

    fn delete_page(&self, page_id: PageId) -> BufferResult<bool> {
        ParallelBufferPool::delete_page(self, page_id)
    }

    fn pool_size(&self) -> usize {
        ParallelBufferPool::pool_size(self)
    }
}

impl std::fmt::Debug for ParallelBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelBufferPool")
            .field("num_instances", &self.instances.len())
            .field("pool_size_per_instance", &self.pool_size_per_instance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::FileDiskManager;
    use tempfile::TempDir;

    fn make_pool(num_instances: usize, pool_size: usize) -> (TempDir, ParallelBufferPool) {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(FileDiskManager::open(dir.path().join("test.db")).unwrap());
        (dir, ParallelBufferPool::new(num_instances, pool_size, disk, None))
    }

    #[test]
    fn allocated_pages_route_back_to_their_instance() {
        let (_dir, pool) = make_pool(4, 4);
        for _ in 0..12 {
            let frame = pool.new_page().unwrap();
            let page_id = frame.page_id();
            let instance = pool.instance_for(page_id);
            assert_eq!(
                page_id.as_u32() % 4,
                instance.instance_index(),
                "page {page_id} must live on its modulus instance"
            );
            assert!(pool.unpin_page(page_id, false));
        }
    }

    #[test]
    fn round_robin_spreads_allocations() {
        let (_dir, pool) = make_pool(3, 4);
        let mut seen = [0usize; 3];
        for _ in 0..6 {
            let frame = pool.new_page().unwrap();
            seen[frame.page_id().as_u32() as usize % 3] += 1;
            pool.unpin_page(frame.page_id(), false);
        }
        assert_eq!(seen, [2, 2, 2]);
    }

    #[test]
    fn allocation_falls_over_to_a_free_instance() {
        let (_dir, pool) = make_pool(2, 2);
        // Fill instance 0 and keep everything pinned.
        let mut pinned = Vec::new();
        for _ in 0..4 {
            pinned.push(pool.new_page().unwrap());
        }
        // All four frames pinned across two instances: exhausted.
        assert!(matches!(pool.new_page(), Err(BufferError::PoolExhausted)));

        // Free one page on whichever instance owns it; allocation recovers.
        let page_id = pinned.pop().unwrap().page_id();
        pool.unpin_page(page_id, false);
        assert!(pool.new_page().is_ok());
    }

    #[test]
    fn pool_size_is_the_sum_of_instances() {
        let (_dir, pool) = make_pool(5, 7);
        assert_eq!(pool.pool_size(), 35);
    }
}
