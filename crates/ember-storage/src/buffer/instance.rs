//! Buffer pool instance.
//!
//! A `BufferPoolInstance` owns a fixed array of frames and mirrors disk
//! pages into them, evicting least-recently-unpinned pages when the pool
//! is full. One coarse mutex guards the page table, the free list, and
//! page-id allocation; frame metadata transitions happen under it as well.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ember_common::PageId;
use parking_lot::Mutex;
use tracing::trace;

use super::error::{BufferError, BufferResult};
use super::frame::{Frame, FrameId};
use super::replacer::LruReplacer;
use super::{BufferPool, BufferPoolStats};
use crate::disk::DiskManager;
use crate::log::LogManager;

struct PoolState {
    /// Maps resident page ids to the frame holding them.
    page_table: HashMap<PageId, FrameId>,
    /// Frames with no resident page.
    free_list: VecDeque<FrameId>,
    /// Next page id in this instance's arithmetic progression.
    next_page_id: u32,
}

/// A single buffer pool instance.
///
/// When part of a parallel pool, each instance allocates page ids from its
/// own progression: `instance_index`, `instance_index + N`,
/// `instance_index + 2N`, ... so `page_id % N` always routes back to the
/// owning instance.
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    frames: Vec<Arc<Frame>>,
    state: Mutex<PoolState>,
    replacer: LruReplacer,
    disk: Arc<dyn DiskManager>,
    #[allow(dead_code)] // reserved for write-ahead logging
    log: Option<Arc<LogManager>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: AtomicU64,
    flush_count: AtomicU64,
}

impl BufferPoolInstance {
    /// Creates a standalone instance (not part of a parallel pool).
    pub fn new(
        pool_size: usize,
        disk: Arc<dyn DiskManager>,
        log: Option<Arc<LogManager>>,
    ) -> Self {
        Self::with_sharding(pool_size, 1, 0, disk, log)
    }

    /// Creates instance `instance_index` of `num_instances`.
    ///
    /// # Panics
    ///
    /// Panics if `num_instances` is zero or `instance_index` is out of
    /// range.
    pub fn with_sharding(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk: Arc<dyn DiskManager>,
        log: Option<Arc<LogManager>>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {instance_index} out of range for {num_instances} instances"
        );

        let frames = (0..pool_size)
            .map(|i| Arc::new(Frame::new(FrameId::new(i))))
            .collect();
        let free_list = (0..pool_size).map(FrameId::new).collect();

        Self {
            pool_size,
            num_instances,
            instance_index,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                next_page_id: instance_index,
            }),
            replacer: LruReplacer::new(pool_size),
            disk,
            log,
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
        }
    }

    /// Returns the number of frames in this instance.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns this instance's index within its parallel pool.
    #[must_use]
    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    /// Allocates a fresh page, pinned in a frame.
    ///
    /// The victim frame comes from the free list first, then from the
    /// replacer; a dirty victim is written back before reuse. The newly
    /// allocated page is read from disk after zeroing the frame; disk
    /// managers return zeros for unwritten pages, and this read is the
    /// contract that makes a new page start empty.
    pub fn new_page(&self) -> BufferResult<Arc<Frame>> {
        let mut state = self.state.lock();

        let frame_id = self
            .take_victim(&mut state)
            .ok_or(BufferError::PoolExhausted)?;
        let page_id = self.allocate_page(&mut state);

        self.load_into_frame(&mut state, frame_id, page_id, true)?;
        Ok(Arc::clone(&self.frames[frame_id.index()]))
    }

    /// Fetches page `page_id`, pinned in a frame.
    ///
    /// A resident page just gains a pin; otherwise a victim frame is
    /// recycled and the page is read from disk.
    pub fn fetch_page(&self, page_id: PageId) -> BufferResult<Arc<Frame>> {
        if !page_id.is_valid() {
            return Err(BufferError::InvalidPageId);
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.index()];
            frame.pin();
            self.replacer.pin(frame_id);
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(frame));
        }

        self.miss_count.fetch_add(1, Ordering::Relaxed);
        let frame_id = self
            .take_victim(&mut state)
            .ok_or(BufferError::PoolExhausted)?;

        self.load_into_frame(&mut state, frame_id, page_id, false)?;
        Ok(Arc::clone(&self.frames[frame_id.index()]))
    }

    /// Drops one pin from page `page_id`.
    ///
    /// `is_dirty` is OR-ed into the frame's dirty flag; an unpin can never
    /// clean a page. Returns false if the page is not resident or its pin
    /// count is already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.index()];

        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.pin_count() == 0 {
            return false;
        }
        if frame.unpin() == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes page `page_id` to disk and clears its dirty flag.
    ///
    /// The write is unconditional: clean pages are written too, so a flush
    /// always leaves the on-disk copy current.
    pub fn flush_page(&self, page_id: PageId) -> BufferResult<()> {
        let state = self.state.lock();
        self.flush_locked(&state, page_id)
    }

    /// Flushes every resident page.
    pub fn flush_all(&self) -> BufferResult<()> {
        let state = self.state.lock();
        let resident: Vec<PageId> = state.page_table.keys().copied().collect();
        for page_id in resident {
            self.flush_locked(&state, page_id)?;
        }
        Ok(())
    }

    /// Removes page `page_id` from the pool and deallocates it on disk.
    ///
    /// Returns true if the page was deleted or was not resident at all,
    /// false if it is pinned.
    pub fn delete_page(&self, page_id: PageId) -> BufferResult<bool> {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[frame_id.index()];
        if frame.is_pinned() {
            return Ok(false);
        }

        if frame.is_dirty() {
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)?;
            frame.set_dirty(false);
        }
        self.disk.deallocate_page(page_id);

        frame.reset();
        self.replacer.pin(frame_id);
        state.page_table.remove(&page_id);
        state.free_list.push_back(frame_id);
        Ok(true)
    }

    /// Returns a snapshot of the instance's counters.
    #[must_use]
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned = 0;
        let mut dirty = 0;
        for frame in &self.frames {
            if frame.is_pinned() {
                pinned += 1;
            }
            if frame.is_dirty() {
                dirty += 1;
            }
        }
        BufferPoolStats {
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            evictions: self.eviction_count.load(Ordering::Relaxed),
            flushes: self.flush_count.load(Ordering::Relaxed),
            pinned_frames: pinned,
            dirty_frames: dirty,
        }
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    fn allocate_page(&self, state: &mut PoolState) -> PageId {
        let id = state.next_page_id;
        state.next_page_id += self.num_instances;
        debug_assert_eq!(
            id % self.num_instances,
            self.instance_index,
            "allocated page must route back to this instance"
        );
        PageId::new(id)
    }

    /// Free list first, then the replacer.
    fn take_victim(&self, state: &mut PoolState) -> Option<FrameId> {
        state.free_list.pop_front().or_else(|| self.replacer.victim())
    }

    /// Repoints `frame_id` at `page_id`: writes back the old page if
    /// dirty, swaps the page-table entries, and reads the new page in.
    fn load_into_frame(
        &self,
        state: &mut PoolState,
        frame_id: FrameId,
        page_id: PageId,
        zero_first: bool,
    ) -> BufferResult<()> {
        let frame = &self.frames[frame_id.index()];
        let mut data = frame.write_data();

        let old_page_id = frame.page_id();
        if frame.is_dirty() {
            trace!(page_id = %old_page_id, "writing back dirty victim");
            self.disk.write_page(old_page_id, &data)?;
            frame.set_dirty(false);
        }
        if old_page_id.is_valid() {
            state.page_table.remove(&old_page_id);
            self.eviction_count.fetch_add(1, Ordering::Relaxed);
        }
        state.page_table.insert(page_id, frame_id);

        if zero_first {
            data.fill(0);
        }
        frame.set_page_id(page_id);
        frame.pin();
        self.disk.read_page(page_id, &mut data)?;
        drop(data);

        self.replacer.pin(frame_id);
        Ok(())
    }

    fn flush_locked(&self, state: &PoolState, page_id: PageId) -> BufferResult<()> {
        if !page_id.is_valid() {
            return Err(BufferError::InvalidPageId);
        }
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Err(BufferError::not_resident(page_id));
        };
        let frame = &self.frames[frame_id.index()];
        let data = frame.read_data();
        self.disk.write_page(page_id, &data)?;
        frame.set_dirty(false);
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl BufferPool for BufferPoolInstance {
    fn new_page(&self) -> BufferResult<Arc<Frame>> {
        BufferPoolInstance::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> BufferResult<Arc<Frame>> {
        BufferPoolInstance::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        BufferPoolInstance::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> BufferResult<()> {
        BufferPoolInstance::flush_page(self, page_id)
    }

    fn flush_all(&self) -> BufferResult<()> {
        BufferPoolInstance::flush_all(self)
    }

    fn delete_page(&self, page_id: PageId) -> BufferResult<bool> {
        BufferPoolInstance::delete_page(self, page_id)
    }

    fn pool_size(&self) -> usize {
        BufferPoolInstance::pool_size(self)
    }
}

impl std::fmt::Debug for BufferPoolInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BufferPoolInstance")
            .field("pool_size", &self.pool_size)
            .field("instance_index", &self.instance_index)
            .field("resident_pages", &state.page_table.len())
            .field("free_frames", &state.free_list.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::FileDiskManager;
    use tempfile::TempDir;

    fn make_pool(pool_size: usize) -> (TempDir, BufferPoolInstance) {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(FileDiskManager::open(dir.path().join("test.db")).unwrap());
        (dir, BufferPoolInstance::new(pool_size, disk, None))
    }

    #[test]
    fn page_ids_follow_the_instance_progression() {
        let dir = TempDir::new().unwrap();
        let disk = Arc::new(FileDiskManager::open(dir.path().join("test.db")).unwrap());
        let pool = BufferPoolInstance::with_sharding(8, 4, 3, disk, None);

        for expect in [3u32, 7, 11] {
            let frame = pool.new_page().unwrap();
            assert_eq!(frame.page_id(), PageId::new(expect));
            assert!(pool.unpin_page(frame.page_id(), false));
        }
    }

    #[test]
    fn new_page_pins_the_frame() {
        let (_dir, pool) = make_pool(4);
        let frame = pool.new_page().unwrap();
        assert_eq!(frame.pin_count(), 1);
        assert!(frame.read_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn unpin_twice_reports_failure() {
        let (_dir, pool) = make_pool(4);
        let frame = pool.new_page().unwrap();
        let page_id = frame.page_id();

        assert!(pool.unpin_page(page_id, false));
        assert!(!pool.unpin_page(page_id, false));
        assert!(!pool.unpin_page(PageId::new(999), false));
    }

    #[test]
    fn unpin_never_clears_dirty() {
        let (_dir, pool) = make_pool(4);
        let frame = pool.new_page().unwrap();
        let page_id = frame.page_id();

        pool.fetch_page(page_id).unwrap(); // second pin
        assert!(pool.unpin_page(page_id, true));
        assert!(frame.is_dirty());
        // A clean unpin afterwards must not clear the flag.
        assert!(pool.unpin_page(page_id, false));
        assert!(frame.is_dirty());
    }

    #[test]
    fn delete_page_semantics() {
        let (_dir, pool) = make_pool(4);
        let frame = pool.new_page().unwrap();
        let page_id = frame.page_id();

        // Pinned: refuse.
        assert!(!pool.delete_page(page_id).unwrap());

        assert!(pool.unpin_page(page_id, true));
        assert!(pool.delete_page(page_id).unwrap());
        // Not resident: vacuous success.
        assert!(pool.delete_page(page_id).unwrap());
        // The frame went back to the free list, so a new page succeeds
        // even after filling the other three frames.
        for _ in 0..4 {
            pool.new_page().unwrap();
        }
        assert!(matches!(
            pool.new_page(),
            Err(BufferError::PoolExhausted)
        ));
    }

    #[test]
    fn flush_writes_clean_pages_too() {
        let (_dir, pool) = make_pool(4);
        let frame = pool.new_page().unwrap();
        let page_id = frame.page_id();
        frame.write_data()[0] = 0x5A;

        // Never marked dirty, but flush must still write.
        pool.flush_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        // Evict by cycling the pool, then fetch back from disk.
        for _ in 0..4 {
            let f = pool.new_page().unwrap();
            pool.unpin_page(f.page_id(), false);
        }
        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.read_data()[0], 0x5A);
    }

    #[test]
    fn flush_of_absent_page_fails() {
        let (_dir, pool) = make_pool(2);
        assert!(matches!(
            pool.flush_page(PageId::new(123)),
            Err(BufferError::PageNotResident { .. })
        ));
        assert!(matches!(
            pool.flush_page(PageId::INVALID),
            Err(BufferError::InvalidPageId)
        ));
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let (_dir, pool) = make_pool(4);
        let frame = pool.new_page().unwrap();
        let page_id = frame.page_id();
        pool.fetch_page(page_id).unwrap();
        pool.unpin_page(page_id, false);
        pool.unpin_page(page_id, false);

        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.pinned_frames, 0);
    }
}
