//! Buffer frame - a slot in the buffer pool that holds one page.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use ember_common::{PageId, PAGE_SIZE};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Frame identifier - index into a buffer pool instance's frame array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

impl FrameId {
    /// Creates a new frame ID.
    #[inline]
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for FrameId {
    fn from(id: usize) -> Self {
        Self::new(id)
    }
}

/// A buffer frame holds a single page in memory.
///
/// Each frame has:
/// - A `PAGE_SIZE` data buffer behind a reader/writer lock, which is
///   the per-page latch the buffer pool exposes to its clients
/// - Metadata: resident page id, pin count, dirty flag
///
/// Pin count and dirty flag are atomics so readers never take the
/// instance mutex; all structural transitions (which page lives here)
/// happen under the owning instance's mutex.
pub struct Frame {
    frame_id: FrameId,
    data: RwLock<Box<[u8]>>,
    page_id: AtomicU32,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

impl Frame {
    /// Creates a new empty frame.
    pub(crate) fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            data: RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
            page_id: AtomicU32::new(PageId::INVALID.as_u32()),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    /// Returns the frame ID.
    #[inline]
    #[must_use]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID resident in this frame (`INVALID` if empty).
    #[inline]
    #[must_use]
    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_u32(), Ordering::Release);
    }

    /// Returns true if no page is resident in this frame.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.page_id().is_valid()
    }

    /// Returns the current pin count.
    #[inline]
    #[must_use]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Returns true if the frame is pinned.
    #[inline]
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Increments the pin count and returns the new value.
    #[inline]
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    #[inline]
    pub(crate) fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpinned frame with pin_count = 0");
        old - 1
    }

    /// Returns true if the page has been modified since its last write-back.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Acquires the page latch in read mode and returns the page bytes.
    #[inline]
    pub fn read_data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Acquires the page latch in write mode and returns the page bytes.
    #[inline]
    pub fn write_data(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    /// Resets the frame to the empty state. The payload is left as-is; it
    /// is overwritten before the frame is handed out again.
    pub(crate) fn reset(&self) {
        self.page_id
            .store(PageId::INVALID.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
