//! Hash table directory page.
//!
//! The directory is a single page holding `2^G` slots, where `G` is the
//! global depth. Each slot maps a hash prefix to a bucket page and records
//! that bucket's local depth.
//!
//! # Layout (little-endian, no padding between fields)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!    0      4   directory page id
//!    4      4   global depth
//!    8   2048   bucket page ids  (u32 x 512)
//! 2056    512   local depths     (u8  x 512)
//! ```

use ember_common::{PageId, PAGE_SIZE};

/// Upper bound on the global depth.
pub const MAX_GLOBAL_DEPTH: u32 = 9;

/// Number of directory slots reserved on the page (`2^MAX_GLOBAL_DEPTH`).
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_GLOBAL_DEPTH;

const PAGE_ID_OFFSET: usize = 0;
const GLOBAL_DEPTH_OFFSET: usize = 4;
const BUCKET_IDS_OFFSET: usize = 8;
const LOCAL_DEPTHS_OFFSET: usize = BUCKET_IDS_OFFSET + 4 * DIRECTORY_ARRAY_SIZE;
const DIRECTORY_BYTES: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

// The full directory must fit in one page.
const _: () = assert!(DIRECTORY_BYTES <= PAGE_SIZE);

/// Read-only view of a directory page.
pub struct DirectoryPage<'a> {
    data: &'a [u8],
}

impl<'a> DirectoryPage<'a> {
    /// Wraps a page payload.
    ///
    /// # Panics
    ///
    /// Panics if `data` is smaller than a page.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        assert!(
            data.len() >= PAGE_SIZE,
            "buffer too small for a directory page"
        );
        Self { data }
    }

    /// Returns the directory's own page id.
    #[must_use]
    pub fn page_id(&self) -> PageId {
        PageId::from_le_bytes(self.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4].try_into().unwrap())
    }

    /// Returns the global depth `G`.
    #[must_use]
    pub fn global_depth(&self) -> u32 {
        u32::from_le_bytes(
            self.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    /// Mask selecting the low `G` bits of a hash.
    #[must_use]
    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth()) - 1
    }

    /// Number of live directory slots (`2^G`).
    #[must_use]
    pub fn size(&self) -> usize {
        1 << self.global_depth()
    }

    /// Returns the bucket page id at `slot`.
    #[must_use]
    pub fn bucket_page_id(&self, slot: usize) -> PageId {
        debug_assert!(slot < DIRECTORY_ARRAY_SIZE);
        let offset = BUCKET_IDS_OFFSET + 4 * slot;
        PageId::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    /// Returns the local depth of the bucket at `slot`.
    #[must_use]
    pub fn local_depth(&self, slot: usize) -> u32 {
        debug_assert!(slot < DIRECTORY_ARRAY_SIZE);
        u32::from(self.data[LOCAL_DEPTHS_OFFSET + slot])
    }

    /// Mask selecting the low `L` bits of a hash, for the bucket at `slot`.
    #[must_use]
    pub fn local_depth_mask(&self, slot: usize) -> u32 {
        (1u32 << self.local_depth(slot)) - 1
    }

    /// Returns the slot that differs from `slot` only in bit `L - 1`.
    ///
    /// The local depth at `slot` must already reflect the split (`L >= 1`).
    #[must_use]
    pub fn split_image_index(&self, slot: usize) -> usize {
        let local_depth = self.local_depth(slot);
        debug_assert!(local_depth >= 1, "no split image below depth 1");
        slot ^ (1 << (local_depth - 1))
    }

    /// Returns true if the directory can halve: every local depth is
    /// strictly below the global depth.
    #[must_use]
    pub fn can_shrink(&self) -> bool {
        let global_depth = self.global_depth();
        (0..self.size()).all(|slot| self.local_depth(slot) < global_depth)
    }

    /// Checks the directory invariants, panicking on violation:
    ///
    /// - every local depth is at most the global depth
    /// - every slot holds a valid bucket page id
    /// - slots sharing a bucket page agree on its local depth, and a
    ///   bucket of depth `L` is referenced by exactly `2^(G - L)` slots
    ///   (buddy sharing)
    pub fn verify_integrity(&self) {
        use std::collections::HashMap;

        let global_depth = self.global_depth();
        assert!(global_depth <= MAX_GLOBAL_DEPTH);

        let mut seen: HashMap<PageId, (u32, usize)> = HashMap::new();
        for slot in 0..self.size() {
            let page_id = self.bucket_page_id(slot);
            let local_depth = self.local_depth(slot);
            assert!(page_id.is_valid(), "slot {slot} has no bucket page");
            assert!(
                local_depth <= global_depth,
                "slot {slot}: local depth {local_depth} exceeds global depth {global_depth}"
            );
            let entry = seen.entry(page_id).or_insert((local_depth, 0));
            assert_eq!(
                entry.0, local_depth,
                "bucket {page_id} referenced with differing local depths"
            );
            entry.1 += 1;
        }
        for (page_id, (local_depth, count)) in seen {
            assert_eq!(
                count,
                1 << (global_depth - local_depth),
                "bucket {page_id} at depth {local_depth} has the wrong number of referrers"
            );
        }
    }
}

/// Mutable view of a directory page.
pub struct DirectoryPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> DirectoryPageMut<'a> {
    /// Wraps a page payload mutably.
    ///
    /// # Panics
    ///
    /// Panics if `data` is smaller than a page.
    #[must_use]
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(
            data.len() >= PAGE_SIZE,
            "buffer too small for a directory page"
        );
        Self { data }
    }

    /// Read-only view of the same page.
    #[must_use]
    pub fn view(&self) -> DirectoryPage<'_> {
        DirectoryPage::new(self.data)
    }

    /// Records the directory's own page id.
    pub fn set_page_id(&mut self, page_id: PageId) {
        self.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4].copy_from_slice(&page_id.to_le_bytes());
    }

    fn set_global_depth(&mut self, depth: u32) {
        self.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&depth.to_le_bytes());
    }

    /// Doubles the directory: the new upper half mirrors the lower half,
    /// then the global depth increments.
    ///
    /// # Panics
    ///
    /// Panics if the directory is already at [`MAX_GLOBAL_DEPTH`].
    pub fn incr_global_depth(&mut self) {
        let view = self.view();
        let global_depth = view.global_depth();
        assert!(global_depth < MAX_GLOBAL_DEPTH, "directory cannot grow further");

        let size = view.size();
        for slot in 0..size {
            let page_id = self.view().bucket_page_id(slot);
            let local_depth = self.view().local_depth(slot);
            self.set_bucket_page_id(slot + size, page_id);
            self.set_local_depth(slot + size, local_depth);
        }
        self.set_global_depth(global_depth + 1);
    }

    /// Halves the directory by decrementing the global depth.
    ///
    /// # Panics
    ///
    /// Panics if the global depth is already zero.
    pub fn decr_global_depth(&mut self) {
        let global_depth = self.view().global_depth();
        assert!(global_depth > 0, "directory cannot shrink below depth 0");
        self.set_global_depth(global_depth - 1);
    }

    /// Points `slot` at `page_id`.
    pub fn set_bucket_page_id(&mut self, slot: usize, page_id: PageId) {
        debug_assert!(slot < DIRECTORY_ARRAY_SIZE);
        let offset = BUCKET_IDS_OFFSET + 4 * slot;
        self.data[offset..offset + 4].copy_from_slice(&page_id.to_le_bytes());
    }

    /// Sets the local depth recorded at `slot`.
    pub fn set_local_depth(&mut self, slot: usize, depth: u32) {
        debug_assert!(slot < DIRECTORY_ARRAY_SIZE);
        debug_assert!(depth <= MAX_GLOBAL_DEPTH);
        self.data[LOCAL_DEPTHS_OFFSET + slot] = depth as u8;
    }

    /// Increments the local depth at `slot`.
    pub fn incr_local_depth(&mut self, slot: usize) {
        let depth = self.view().local_depth(slot);
        self.set_local_depth(slot, depth + 1);
    }

    /// Decrements the local depth at `slot`.
    pub fn decr_local_depth(&mut self, slot: usize) {
        let depth = self.view().local_depth(slot);
        debug_assert!(depth > 0);
        self.set_local_depth(slot, depth - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn fresh_directory_is_depth_zero() {
        let data = page();
        let dir = DirectoryPage::new(&data);
        assert_eq!(dir.global_depth(), 0);
        assert_eq!(dir.size(), 1);
        assert_eq!(dir.global_depth_mask(), 0);
    }

    #[test]
    fn header_round_trip() {
        let mut data = page();
        let mut dir = DirectoryPageMut::new(&mut data);
        dir.set_page_id(PageId::new(11));
        dir.set_bucket_page_id(0, PageId::new(20));
        dir.set_local_depth(0, 0);

        let view = dir.view();
        assert_eq!(view.page_id(), PageId::new(11));
        assert_eq!(view.bucket_page_id(0), PageId::new(20));
    }

    #[test]
    fn growth_mirrors_the_lower_half() {
        let mut data = page();
        let mut dir = DirectoryPageMut::new(&mut data);
        dir.set_bucket_page_id(0, PageId::new(20));
        dir.set_local_depth(0, 0);

        dir.incr_global_depth();
        let view = dir.view();
        assert_eq!(view.global_depth(), 1);
        assert_eq!(view.size(), 2);
        assert_eq!(view.bucket_page_id(1), PageId::new(20));
        assert_eq!(view.local_depth(1), 0);

        view.verify_integrity();
    }

    #[test]
    fn split_image_flips_the_top_local_bit() {
        let mut data = page();
        let mut dir = DirectoryPageMut::new(&mut data);
        dir.set_local_depth(5, 3);
        assert_eq!(dir.view().split_image_index(5), 1); // 0b101 ^ 0b100
        dir.set_local_depth(2, 1);
        assert_eq!(dir.view().split_image_index(2), 3); // 0b10 ^ 0b01
    }

    #[test]
    fn shrink_requires_all_locals_below_global() {
        let mut data = page();
        let mut dir = DirectoryPageMut::new(&mut data);
        dir.set_bucket_page_id(0, PageId::new(20));
        dir.incr_global_depth();

        // Both halves at depth 0 < 1: shrinkable.
        assert!(dir.view().can_shrink());

        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        dir.set_bucket_page_id(1, PageId::new(21));
        assert!(!dir.view().can_shrink());

        dir.view().verify_integrity();
    }

    #[test]
    #[should_panic(expected = "differing local depths")]
    fn integrity_catches_depth_disagreement() {
        let mut data = page();
        let mut dir = DirectoryPageMut::new(&mut data);
        dir.set_bucket_page_id(0, PageId::new(20));
        dir.incr_global_depth();
        dir.set_local_depth(0, 1); // slot 1 still says 0 for the same page
        dir.view().verify_integrity();
    }
}
