//! LRU replacement policy.
//!
//! The replacer tracks which frames are evictable. Membership follows pin
//! state: `unpin` adds a frame (it became evictable), `pin` removes it.
//! Recency is measured from the last `unpin`, so the victim is the frame
//! whose pin count has been zero the longest.
//!
//! All operations are O(1): a doubly-linked list keeps the recency order
//! and a hash map indexes frames to their list nodes.

use std::collections::HashMap;
use std::ptr::NonNull;

use parking_lot::Mutex;

use super::frame::FrameId;

struct Node {
    frame_id: FrameId,
    prev: Option<NonNull<Node>>,
    next: Option<NonNull<Node>>,
}

struct ReplacerInner {
    capacity: usize,
    map: HashMap<FrameId, NonNull<Node>>,
    /// Most recently unpinned end.
    head: Option<NonNull<Node>>,
    /// Least recently unpinned end; victims come from here.
    tail: Option<NonNull<Node>>,
}

// Safety: the raw node pointers are owned exclusively by this structure and
// only touched under the replacer mutex.
unsafe impl Send for ReplacerInner {}

impl ReplacerInner {
    fn push_front(&mut self, node: NonNull<Node>) {
        unsafe {
            (*node.as_ptr()).prev = None;
            (*node.as_ptr()).next = self.head;
            if let Some(head) = self.head {
                (*head.as_ptr()).prev = Some(node);
            }
            self.head = Some(node);
            if self.tail.is_none() {
                self.tail = Some(node);
            }
        }
    }

    fn unlink(&mut self, node: NonNull<Node>) {
        unsafe {
            let prev = (*node.as_ptr()).prev;
            let next = (*node.as_ptr()).next;
            match prev {
                Some(prev) => (*prev.as_ptr()).next = next,
                None => self.head = next,
            }
            match next {
                Some(next) => (*next.as_ptr()).prev = prev,
                None => self.tail = prev,
            }
        }
    }
}

impl Drop for ReplacerInner {
    fn drop(&mut self) {
        let mut current = self.head;
        while let Some(node) = current {
            unsafe {
                current = (*node.as_ptr()).next;
                drop(Box::from_raw(node.as_ptr()));
            }
        }
    }
}

/// LRU replacer with a fixed capacity.
///
/// A frame is present iff it is resident and has pin count zero. The
/// owning buffer pool instance calls [`pin`](Self::pin) when a frame
/// becomes unevictable and [`unpin`](Self::unpin) when its pin count
/// drops to zero.
pub struct LruReplacer {
    inner: Mutex<ReplacerInner>,
}

impl LruReplacer {
    /// Creates a replacer that tracks at most `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(ReplacerInner {
                capacity,
                map: HashMap::with_capacity(capacity),
                head: None,
                tail: None,
            }),
        }
    }

    /// Removes and returns the least recently unpinned frame.
    ///
    /// Returns `None` when no frame is evictable.
    pub fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let tail = inner.tail?;
        inner.unlink(tail);
        // Safety: the node was owned by the list; we just unlinked it.
        let node = unsafe { Box::from_raw(tail.as_ptr()) };
        inner.map.remove(&node.frame_id);
        Some(node.frame_id)
    }

    /// Marks `frame_id` unevictable, removing it if present. No-op otherwise.
    pub fn pin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(node) = inner.map.remove(&frame_id) {
            inner.unlink(node);
            unsafe { drop(Box::from_raw(node.as_ptr())) };
        }
    }

    /// Marks `frame_id` evictable, inserting it at the most-recent end.
    ///
    /// Idempotent: a frame already present keeps its position. A full
    /// replacer ignores the call.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(&frame_id) || inner.map.len() == inner.capacity {
            return;
        }
        let node = NonNull::from(Box::leak(Box::new(Node {
            frame_id,
            prev: None,
            next: None,
        })));
        inner.push_front(node);
        inner.map.insert(frame_id, node);
    }

    /// Returns the number of evictable frames.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().map.len()
    }
}

impl std::fmt::Debug for LruReplacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LruReplacer")
            .field("capacity", &inner.capacity)
            .field("size", &inner.map.len())
            .finish()
    }
}
