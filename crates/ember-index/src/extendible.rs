//! Extendible hash table over buffer-pool pages.
//!
//! The table owns no page memory: the directory and every bucket live in
//! pages borrowed, pinned, from the buffer pool, and every operation
//! unpins what it fetched on every exit path.
//!
//! # Latching
//!
//! A table-wide reader/writer latch serializes structure changes against
//! everything else; per-bucket access goes through the frame's page latch:
//!
//! | operation          | table latch | bucket latch |
//! |--------------------|-------------|--------------|
//! | get                | read        | read         |
//! | insert (fast path) | read        | write        |
//! | insert -> split    | write       | write        |
//! | remove             | read        | write        |
//! | remove -> merge    | write       | read         |
//!
//! Latch upgrades are not atomic: the reader latch is released and the
//! writer latch acquired, so split and merge re-derive every page id and
//! re-check their preconditions from scratch.

use std::marker::PhantomData;
use std::sync::Arc;

use ember_common::{PageId, Storable, Transaction};
use ember_storage::{BufferPool, Frame};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::IndexResult;
use crate::hashing::{KeyComparator, KeyHasher, SipKeyHasher};
use crate::page::{BucketPage, BucketPageMut, DirectoryPage, DirectoryPageMut, MAX_GLOBAL_DEPTH};

/// Upper bound on any bucket's local depth; a bucket that is still full at
/// this depth can no longer split and the insert fails.
pub const MAX_BUCKET_DEPTH: u32 = MAX_GLOBAL_DEPTH;

/// A disk-backed extendible hash table.
///
/// Supports non-unique keys: `(key, value)` pairs are unique, a key may
/// map to many values.
pub struct ExtendibleHashTable<K, V, C, H = SipKeyHasher> {
    pool: Arc<dyn BufferPool>,
    comparator: C,
    hasher: H,
    /// Table-wide reader/writer latch.
    table_latch: RwLock<()>,
    /// Directory root; doubles as the bootstrap mutex.
    directory_page_id: Mutex<PageId>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, C, H> ExtendibleHashTable<K, V, C, H>
where
    K: Storable,
    V: Storable + PartialEq,
    C: KeyComparator<K>,
    H: KeyHasher<K>,
{
    /// Creates a hash table on top of `pool`.
    ///
    /// No pages are allocated until the first operation touches the
    /// directory.
    pub fn new(pool: Arc<dyn BufferPool>, comparator: C, hasher: H) -> Self {
        Self {
            pool,
            comparator,
            hasher,
            table_latch: RwLock::new(()),
            directory_page_id: Mutex::new(PageId::INVALID),
            _marker: PhantomData,
        }
    }

    fn hash(&self, key: &K) -> u32 {
        self.hasher.hash_key(key)
    }

    /// Fetches the directory page, creating it (plus the first bucket) on
    /// first use. Both bootstrap pages are unpinned dirty before the
    /// directory is fetched back for the caller.
    fn fetch_directory(&self) -> IndexResult<Arc<Frame>> {
        let directory_page_id = {
            let mut root = self.directory_page_id.lock();
            if !root.is_valid() {
                let dir_frame = self.pool.new_page()?;
                let dir_page_id = dir_frame.page_id();

                let bucket_frame = match self.pool.new_page() {
                    Ok(frame) => frame,
                    Err(e) => {
                        self.pool.unpin_page(dir_page_id, false);
                        return Err(e.into());
                    }
                };
                let bucket_page_id = bucket_frame.page_id();

                {
                    let mut data = dir_frame.write_data();
                    let mut directory = DirectoryPageMut::new(&mut data);
                    directory.set_page_id(dir_page_id);
                    directory.set_bucket_page_id(0, bucket_page_id);
                }
                // The bucket page is all zeros already: depth 0, empty.
                debug!(directory = %dir_page_id, bucket = %bucket_page_id, "bootstrapped directory");

                self.pool.unpin_page(dir_page_id, true);
                self.pool.unpin_page(bucket_page_id, true);
                *root = dir_page_id;
            }
            *root
        };

        Ok(self.pool.fetch_page(directory_page_id)?)
    }

    /// Returns every value stored under `key`.
    pub fn get_value(&self, _txn: &Transaction, key: &K) -> IndexResult<Vec<V>> {
        let _table = self.table_latch.read();

        let dir_frame = self.fetch_directory()?;
        let dir_page_id = dir_frame.page_id();
        let bucket_page_id = {
            let data = dir_frame.read_data();
            let directory = DirectoryPage::new(&data);
            directory.bucket_page_id((self.hash(key) & directory.global_depth_mask()) as usize)
        };

        let bucket_frame = match self.pool.fetch_page(bucket_page_id) {
            Ok(frame) => frame,
            Err(e) => {
                self.pool.unpin_page(dir_page_id, false);
                return Err(e.into());
            }
        };
        let values = {
            let data = bucket_frame.read_data();
            BucketPage::<K, V>::new(&data).get_value(key, &self.comparator)
        };

        self.pool.unpin_page(bucket_page_id, false);
        self.pool.unpin_page(dir_page_id, false);
        Ok(values)
    }

    /// Inserts `(key, value)`.
    ///
    /// Returns false if the exact pair is already present, or if the
    /// target bucket can no longer split (local depth at
    /// [`MAX_BUCKET_DEPTH`]).
    pub fn insert(&self, txn: &Transaction, key: &K, value: &V) -> IndexResult<bool> {
        {
            let _table = self.table_latch.read();

            let dir_frame = self.fetch_directory()?;
            let dir_page_id = dir_frame.page_id();
            let bucket_page_id = {
                let data = dir_frame.read_data();
                let directory = DirectoryPage::new(&data);
                directory.bucket_page_id((self.hash(key) & directory.global_depth_mask()) as usize)
            };

            let bucket_frame = match self.pool.fetch_page(bucket_page_id) {
                Ok(frame) => frame,
                Err(e) => {
                    self.pool.unpin_page(dir_page_id, false);
                    return Err(e.into());
                }
            };

            let fast_path = {
                let mut data = bucket_frame.write_data();
                let mut bucket = BucketPageMut::<K, V>::new(&mut data);
                if bucket.view().is_full() {
                    None
                } else {
                    Some(bucket.insert(key, value, &self.comparator))
                }
            };

            match fast_path {
                Some(inserted) => {
                    // Dirty only when something was written; a rejected
                    // duplicate leaves the page clean.
                    self.pool.unpin_page(bucket_page_id, inserted);
                    self.pool.unpin_page(dir_page_id, false);
                    return Ok(inserted);
                }
                None => {
                    self.pool.unpin_page(bucket_page_id, false);
                    self.pool.unpin_page(dir_page_id, false);
                }
            }
            // Bucket full: fall through to the split path, giving up the
            // reader latch first.
        }

        self.split_insert(txn, key, value)
    }

    /// Splits the overflowing bucket and retries the insert.
    ///
    /// Runs under the table writer latch. The fast path released all
    /// latches before calling here, so every page id and depth is derived
    /// again from the directory.
    fn split_insert(&self, txn: &Transaction, key: &K, value: &V) -> IndexResult<bool> {
        {
            let _table = self.table_latch.write();

            let dir_frame = self.fetch_directory()?;
            let dir_page_id = dir_frame.page_id();

            let (split_idx, local_depth, split_page_id) = {
                let data = dir_frame.read_data();
                let directory = DirectoryPage::new(&data);
                let idx = (self.hash(key) & directory.global_depth_mask()) as usize;
                (idx, directory.local_depth(idx), directory.bucket_page_id(idx))
            };

            if local_depth >= MAX_BUCKET_DEPTH {
                // The bucket cannot split further; the index is full for
                // this hash prefix.
                self.pool.unpin_page(dir_page_id, false);
                return Ok(false);
            }

            let split_frame = match self.pool.fetch_page(split_page_id) {
                Ok(frame) => frame,
                Err(e) => {
                    self.pool.unpin_page(dir_page_id, false);
                    return Err(e.into());
                }
            };
            // Allocate the image page before touching the directory so an
            // exhausted pool leaves the table unchanged.
            let image_frame = match self.pool.new_page() {
                Ok(frame) => frame,
                Err(e) => {
                    self.pool.unpin_page(split_page_id, false);
                    self.pool.unpin_page(dir_page_id, false);
                    return Err(e.into());
                }
            };
            let image_page_id = image_frame.page_id();

            {
                let mut dir_data = dir_frame.write_data();
                let mut directory = DirectoryPageMut::new(&mut dir_data);
                let mut split_data = split_frame.write_data();
                let mut image_data = image_frame.write_data();

                if local_depth == directory.view().global_depth() {
                    directory.incr_global_depth();
                }
                directory.incr_local_depth(split_idx);
                let new_depth = local_depth + 1;
                let image_idx = directory.view().split_image_index(split_idx);
                directory.set_local_depth(image_idx, new_depth);
                directory.set_bucket_page_id(image_idx, image_page_id);

                // Buddy propagation: every slot sharing the low `new_depth`
                // bits with either seed points at that seed's page. Walk
                // each residue class from its canonical low index.
                let stride = 1usize << new_depth;
                let size = directory.view().size();
                let mut slot = split_idx & (stride - 1);
                while slot < size {
                    directory.set_bucket_page_id(slot, split_page_id);
                    directory.set_local_depth(slot, new_depth);
                    slot += stride;
                }
                let mut slot = image_idx & (stride - 1);
                while slot < size {
                    directory.set_bucket_page_id(slot, image_page_id);
                    directory.set_local_depth(slot, new_depth);
                    slot += stride;
                }

                // Snapshot, clear, and redistribute through the directory
                // as it now stands.
                let mut split_bucket = BucketPageMut::<K, V>::new(&mut split_data);
                let mut image_bucket = BucketPageMut::<K, V>::new(&mut image_data);
                let entries = split_bucket.view().entries();
                split_bucket.reset();

                let mask = directory.view().local_depth_mask(split_idx);
                for (entry_key, entry_value) in &entries {
                    let target = (self.hash(entry_key) & mask) as usize;
                    let target_page_id = directory.view().bucket_page_id(target);
                    debug_assert!(
                        target_page_id == split_page_id || target_page_id == image_page_id,
                        "redistribution must route to one of the two split halves"
                    );
                    let inserted = if target_page_id == split_page_id {
                        split_bucket.insert(entry_key, entry_value, &self.comparator)
                    } else {
                        image_bucket.insert(entry_key, entry_value, &self.comparator)
                    };
                    debug_assert!(inserted, "redistributed entry must fit");
                }

                debug!(
                    split = %split_page_id,
                    image = %image_page_id,
                    depth = new_depth,
                    moved = entries.len(),
                    "split bucket"
                );
            }

            self.pool.unpin_page(split_page_id, true);
            self.pool.unpin_page(image_page_id, true);
            self.pool.unpin_page(dir_page_id, true);
        }

        // Retry from scratch: the key may still land in a full bucket (it
        // then splits again), and all latches were released above.
        self.insert(txn, key, value)
    }

    /// Removes `(key, value)`.
    ///
    /// Returns false if the pair is absent. If the bucket is left empty,
    /// attempts to merge it with its split image.
    pub fn remove(&self, txn: &Transaction, key: &K, value: &V) -> IndexResult<bool> {
        let (removed, now_empty) = {
            let _table = self.table_latch.read();

            let dir_frame = self.fetch_directory()?;
            let dir_page_id = dir_frame.page_id();
            let bucket_page_id = {
                let data = dir_frame.read_data();
                let directory = DirectoryPage::new(&data);
                directory.bucket_page_id((self.hash(key) & directory.global_depth_mask()) as usize)
            };

            let bucket_frame = match self.pool.fetch_page(bucket_page_id) {
                Ok(frame) => frame,
                Err(e) => {
                    self.pool.unpin_page(dir_page_id, false);
                    return Err(e.into());
                }
            };
            let (removed, now_empty) = {
                let mut data = bucket_frame.write_data();
                let mut bucket = BucketPageMut::<K, V>::new(&mut data);
                let removed = bucket.remove(key, value, &self.comparator);
                (removed, bucket.view().is_empty())
            };

            self.pool.unpin_page(bucket_page_id, removed);
            self.pool.unpin_page(dir_page_id, false);
            (removed, now_empty)
        };

        if now_empty {
            self.merge(txn, key, value)?;
        }
        Ok(removed)
    }

    /// Merges the (empty) bucket the key routes to into its split image.
    ///
    /// Runs under the table writer latch and re-derives everything; the
    /// merge silently aborts when
    ///
    /// - the bucket's local depth is zero,
    /// - its split image sits at a different local depth, or
    /// - the bucket is no longer empty (a concurrent insert won the race).
    fn merge(&self, _txn: &Transaction, key: &K, _value: &V) -> IndexResult<()> {
        let _table = self.table_latch.write();

        let dir_frame = self.fetch_directory()?;
        let dir_page_id = dir_frame.page_id();

        let candidate = {
            let data = dir_frame.read_data();
            let directory = DirectoryPage::new(&data);
            let target_idx = (self.hash(key) & directory.global_depth_mask()) as usize;
            let local_depth = directory.local_depth(target_idx);
            if local_depth == 0 {
                None
            } else {
                let image_idx = directory.split_image_index(target_idx);
                if directory.local_depth(image_idx) != local_depth {
                    None
                } else {
                    Some((target_idx, directory.bucket_page_id(target_idx), image_idx))
                }
            }
        };
        let Some((target_idx, target_page_id, image_idx)) = candidate else {
            self.pool.unpin_page(dir_page_id, false);
            return Ok(());
        };

        // Re-verify emptiness under the bucket's read latch.
        let target_frame = match self.pool.fetch_page(target_page_id) {
            Ok(frame) => frame,
            Err(e) => {
                self.pool.unpin_page(dir_page_id, false);
                return Err(e.into());
            }
        };
        let is_empty = {
            let data = target_frame.read_data();
            BucketPage::<K, V>::new(&data).is_empty()
        };
        self.pool.unpin_page(target_page_id, false);
        if !is_empty {
            self.pool.unpin_page(dir_page_id, false);
            return Ok(());
        }

        match self.pool.delete_page(target_page_id) {
            Ok(deleted) => {
                debug_assert!(deleted, "an empty unpinned bucket must be deletable");
            }
            Err(e) => {
                self.pool.unpin_page(dir_page_id, false);
                return Err(e.into());
            }
        }

        {
            let mut data = dir_frame.write_data();
            let mut directory = DirectoryPageMut::new(&mut data);

            let image_page_id = directory.view().bucket_page_id(image_idx);
            directory.set_bucket_page_id(target_idx, image_page_id);
            directory.decr_local_depth(target_idx);
            directory.decr_local_depth(image_idx);
            let new_depth = directory.view().local_depth(target_idx);

            // Everything that pointed at either half now points at the
            // surviving page.
            for slot in 0..directory.view().size() {
                let page_id = directory.view().bucket_page_id(slot);
                if page_id == target_page_id || page_id == image_page_id {
                    directory.set_bucket_page_id(slot, image_page_id);
                    directory.set_local_depth(slot, new_depth);
                }
            }

            let mut shrunk = 0;
            while directory.view().can_shrink() {
                directory.decr_global_depth();
                shrunk += 1;
            }
            debug!(
                merged = %target_page_id,
                into = %image_page_id,
                depth = new_depth,
                shrunk,
                "merged bucket"
            );
        }

        self.pool.unpin_page(dir_page_id, true);
        Ok(())
    }

    /// Returns the directory's global depth.
    pub fn global_depth(&self) -> IndexResult<u32> {
        let _table = self.table_latch.read();
        let dir_frame = self.fetch_directory()?;
        let depth = {
            let data = dir_frame.read_data();
            DirectoryPage::new(&data).global_depth()
        };
        self.pool.unpin_page(dir_frame.page_id(), false);
        Ok(depth)
    }

    /// Checks the directory invariants, panicking on violation.
    pub fn verify_integrity(&self) -> IndexResult<()> {
        let _table = self.table_latch.read();
        let dir_frame = self.fetch_directory()?;
        {
            let data = dir_frame.read_data();
            DirectoryPage::new(&data).verify_integrity();
        }
        self.pool.unpin_page(dir_frame.page_id(), false);
        Ok(())
    }
}

impl<K, V, C, H> std::fmt::Debug for ExtendibleHashTable<K, V, C, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendibleHashTable")
            .field("directory_page_id", &*self.directory_page_id.lock())
            .finish()
    }
}
