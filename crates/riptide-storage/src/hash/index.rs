//! Extendible hash index coordinator.
//!
//! Composes the directory and bucket page operations over the buffer pool
//! while obeying the two-tier latch protocol: the index latch guards the
//! directory structure and the validity of bucket page ids, per-bucket page
//! latches guard slot contents. Lock order is always index then bucket, and
//! no bucket latch is held across a page fetch.

use super::constants::MAX_DEPTH;
use super::page::{HashBucketPage, HashDirectoryPage};
use super::types::{KeyComparator, KeyHasher, OrdComparator, SlotCodec, Xxh3Hasher};
use crate::disk::DiskManager;
use log::debug;
use parking_lot::{Mutex, RwLock};
use riptide_buffer::{BufferFrame, BufferPool};
use riptide_common::page::PageId;
use riptide_common::{Result, RiptideError};
use std::marker::PhantomData;
use std::sync::Arc;

/// Outcome of one bucket-local insert attempt.
enum InsertAttempt {
    Inserted,
    Duplicate,
    Full,
}

/// Disk-resident extendible hash index.
///
/// Maps fixed-width keys to fixed-width values, supporting point lookup of
/// all values for a key, insertion with duplicate-pair rejection, and
/// removal of a specific (key, value) pair. Non-unique keys are supported;
/// a (key, value) pair is unique.
///
/// Thread-safe: readers take the index latch shared, writers exclusive.
pub struct ExtendibleHashIndex<K, V, C = OrdComparator, H = Xxh3Hasher> {
    /// Entry point; callers persist this (e.g. in a catalog).
    directory_page_id: PageId,
    /// File holding the directory and every bucket page.
    file_id: u32,
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    /// Guards the directory structure and bucket page id validity.
    table_latch: RwLock<()>,
    /// Serializes pool-miss I/O so an evicted dirty page reaches disk
    /// before any thread can re-read its page id from disk.
    io_latch: Mutex<()>,
    comparator: C,
    hasher: H,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C, H> ExtendibleHashIndex<K, V, C, H>
where
    K: SlotCodec,
    V: SlotCodec,
    C: KeyComparator<K>,
    H: KeyHasher<K>,
{
    /// Creates a fresh index in the given file.
    ///
    /// The directory starts at global depth 1 with both slots pointing at
    /// one empty bucket of local depth 0, so a split can always assume the
    /// directory is larger than one slot.
    pub fn create(
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
        file_id: u32,
        comparator: C,
        hasher: H,
    ) -> Result<Self> {
        let directory_page_id = disk.allocate_page(file_id)?;
        let first_bucket_id = disk.allocate_page(file_id)?;

        let index = Self {
            directory_page_id,
            file_id,
            disk,
            pool,
            table_latch: RwLock::new(()),
            io_latch: Mutex::new(()),
            comparator,
            hasher,
            _marker: PhantomData,
        };

        let dir_frame = index.pin_new_page(directory_page_id)?;
        {
            let mut dir = dir_frame.write_data();
            HashDirectoryPage::init(&mut dir[..], directory_page_id.page_num);
            HashDirectoryPage::incr_global_depth(&mut dir[..]);
            HashDirectoryPage::set_bucket_page_id(&mut dir[..], 0, first_bucket_id.page_num);
            HashDirectoryPage::set_bucket_page_id(&mut dir[..], 1, first_bucket_id.page_num);
        }
        index.pool.unpin_page(directory_page_id, true);

        // A zeroed page is a valid empty bucket; pin it once so the pool
        // knows about it.
        match index.pin_page(first_bucket_id) {
            Ok(_) => {
                index.pool.unpin_page(first_bucket_id, false);
            }
            Err(e) => return Err(e),
        }

        Ok(index)
    }

    /// Re-attaches to a persisted index by its directory page id.
    pub fn open(
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
        directory_page_id: PageId,
        comparator: C,
        hasher: H,
    ) -> Result<Self> {
        let index = Self {
            directory_page_id,
            file_id: directory_page_id.file_id,
            disk,
            pool,
            table_latch: RwLock::new(()),
            io_latch: Mutex::new(()),
            comparator,
            hasher,
            _marker: PhantomData,
        };

        let dir_frame = index.pin_page(directory_page_id)?;
        let stored = {
            let dir = dir_frame.read_data();
            HashDirectoryPage::page_id(&dir[..])
        };
        index.pool.unpin_page(directory_page_id, false);

        if stored != directory_page_id.page_num {
            return Err(RiptideError::PageCorrupted {
                page_id: directory_page_id,
                reason: "directory self page id mismatch".to_string(),
            });
        }

        Ok(index)
    }

    /// Returns the directory page id (the index's persistent entry point).
    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    /// Returns the current global depth.
    pub fn global_depth(&self) -> Result<u32> {
        let _guard = self.table_latch.read();
        let dir_frame = self.pin_page(self.directory_page_id)?;
        let depth = {
            let dir = dir_frame.read_data();
            HashDirectoryPage::global_depth(&dir[..])
        };
        self.pool.unpin_page(self.directory_page_id, false);
        Ok(depth)
    }

    /// Returns the local depth of the bucket a key currently maps to.
    pub fn local_depth(&self, key: &K) -> Result<u32> {
        let _guard = self.table_latch.read();
        let dir_frame = self.pin_page(self.directory_page_id)?;
        let depth = {
            let dir = dir_frame.read_data();
            let idx = self.dir_index(&dir[..], key);
            HashDirectoryPage::local_depth(&dir[..], idx)
        };
        self.pool.unpin_page(self.directory_page_id, false);
        Ok(depth)
    }

    /// Checks the directory invariants, panicking on violation.
    pub fn verify_integrity(&self) -> Result<()> {
        let _guard = self.table_latch.read();
        let dir_frame = self.pin_page(self.directory_page_id)?;
        {
            let dir = dir_frame.read_data();
            HashDirectoryPage::verify_integrity(&dir[..]);
        }
        self.pool.unpin_page(self.directory_page_id, false);
        Ok(())
    }

    /// Writes every dirty pooled page through to disk.
    pub fn flush(&self) -> Result<()> {
        let _guard = self.table_latch.read();
        self.pool.flush_all(|page_id, data| {
            let data: &[u8; riptide_common::PAGE_SIZE] = data
                .try_into()
                .map_err(|_| RiptideError::IoError("short page buffer".to_string()))?;
            self.disk.write_page(page_id, data)
        })?;
        self.disk.flush()
    }

    /// Appends every value stored under `key` to `result`.
    ///
    /// Returns Ok(true) if at least one value was appended.
    pub fn get_value(&self, key: &K, result: &mut Vec<V>) -> Result<bool> {
        let _guard = self.table_latch.read();

        let dir_frame = self.pin_page(self.directory_page_id)?;
        let bucket_page_id = {
            let dir = dir_frame.read_data();
            let idx = self.dir_index(&dir[..], key);
            self.page_id_for(HashDirectoryPage::bucket_page_id(&dir[..], idx))
        };

        let bucket_frame = match self.pin_page(bucket_page_id) {
            Ok(frame) => frame,
            Err(e) => {
                self.pool.unpin_page(self.directory_page_id, false);
                return Err(e);
            }
        };

        let found = {
            let bucket = bucket_frame.read_data();
            HashBucketPage::<K, V>::get_value(&bucket[..], key, &self.comparator, result)
        };

        self.pool.unpin_page(self.directory_page_id, false);
        self.pool.unpin_page(bucket_page_id, false);
        Ok(found)
    }

    /// Inserts a (key, value) pair.
    ///
    /// Returns Ok(false) when the exact pair is already present, or when
    /// the directory is exhausted and the target bucket cannot be split
    /// further. The two cases are deliberately indistinguishable to the
    /// caller.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool> {
        let _guard = self.table_latch.write();

        // A single split adds one level; keep splitting until the insert
        // lands or the directory cannot grow.
        loop {
            let dir_frame = self.pin_page(self.directory_page_id)?;
            let (idx, bucket_page_id) = {
                let dir = dir_frame.read_data();
                let idx = self.dir_index(&dir[..], key);
                (
                    idx,
                    self.page_id_for(HashDirectoryPage::bucket_page_id(&dir[..], idx)),
                )
            };

            let bucket_frame = match self.pin_page(bucket_page_id) {
                Ok(frame) => frame,
                Err(e) => {
                    self.pool.unpin_page(self.directory_page_id, false);
                    return Err(e);
                }
            };

            let attempt = {
                let mut bucket = bucket_frame.write_data();
                if HashBucketPage::<K, V>::insert(&mut bucket[..], key, value, &self.comparator) {
                    InsertAttempt::Inserted
                } else if HashBucketPage::<K, V>::contains(
                    &bucket[..],
                    key,
                    value,
                    &self.comparator,
                ) {
                    InsertAttempt::Duplicate
                } else {
                    InsertAttempt::Full
                }
            }; // bucket latch released before any structural work

            match attempt {
                InsertAttempt::Inserted => {
                    self.pool.unpin_page(self.directory_page_id, false);
                    self.pool.unpin_page(bucket_page_id, true);
                    return Ok(true);
                }
                InsertAttempt::Duplicate => {
                    self.pool.unpin_page(self.directory_page_id, false);
                    self.pool.unpin_page(bucket_page_id, false);
                    return Ok(false);
                }
                InsertAttempt::Full => {
                    // split_bucket unpins the directory and both buckets
                    if !self.split_bucket(dir_frame, bucket_frame, bucket_page_id, idx)? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Performs one level of bucket split.
    ///
    /// Takes over the caller's pins on the directory and the old bucket and
    /// releases them (plus the new bucket's) on every path. Returns
    /// Ok(false) if the directory is already at MAX_DEPTH and cannot
    /// address a new sibling.
    fn split_bucket(
        &self,
        dir_frame: &BufferFrame,
        old_frame: &BufferFrame,
        old_page_id: PageId,
        idx: usize,
    ) -> Result<bool> {
        let (local_depth, global_depth) = {
            let dir = dir_frame.read_data();
            (
                HashDirectoryPage::local_depth(&dir[..], idx),
                HashDirectoryPage::global_depth(&dir[..]),
            )
        };

        if local_depth == global_depth && global_depth == MAX_DEPTH {
            self.pool.unpin_page(self.directory_page_id, false);
            self.pool.unpin_page(old_page_id, false);
            return Ok(false);
        }

        // Allocate the sibling bucket before touching the directory so a
        // failed allocation leaves the index unchanged.
        let new_page_id = match self.disk.allocate_page(self.file_id) {
            Ok(page_id) => page_id,
            Err(e) => {
                self.pool.unpin_page(self.directory_page_id, false);
                self.pool.unpin_page(old_page_id, false);
                return Err(e);
            }
        };
        let new_frame = match self.pin_new_page(new_page_id) {
            Ok(frame) => frame,
            Err(e) => {
                self.pool.unpin_page(self.directory_page_id, false);
                self.pool.unpin_page(old_page_id, false);
                return Err(e);
            }
        };

        {
            let mut dir = dir_frame.write_data();
            if local_depth == global_depth {
                HashDirectoryPage::incr_global_depth(&mut dir[..]);
                debug!("directory grew to global depth {}", global_depth + 1);
            }

            // Raise the local depth of every slot in the old bucket's class,
            // then repoint the half that now selects the new bucket.
            let old_mask = (1u32 << local_depth) - 1;
            for slot in 0..HashDirectoryPage::size(&dir[..]) {
                if (slot as u32 & old_mask) == (idx as u32 & old_mask) {
                    HashDirectoryPage::incr_local_depth(&mut dir[..], slot);
                }
            }
            let new_idx = idx ^ (1usize << local_depth);
            HashDirectoryPage::separate_page_id(&mut dir[..], new_idx, new_page_id.page_num);
        }

        debug!(
            "split bucket {} at local depth {} into {}",
            old_page_id, local_depth, new_page_id
        );

        // Redistribute: drain the old bucket and reinsert every entry under
        // the updated directory. Each side receives at most a full bucket,
        // so the reinserts cannot fail.
        let drained = {
            let mut old = old_frame.write_data();
            HashBucketPage::<K, V>::drain(&mut old[..])
        };
        {
            let dir = dir_frame.read_data();
            let mut old_data = old_frame.write_data();
            let mut new_data = new_frame.write_data();
            for (entry_key, entry_value) in &drained {
                let slot = self.dir_index(&dir[..], entry_key);
                let target = HashDirectoryPage::bucket_page_id(&dir[..], slot);
                let reinserted = if target == new_page_id.page_num {
                    HashBucketPage::<K, V>::insert(
                        &mut new_data[..],
                        entry_key,
                        entry_value,
                        &self.comparator,
                    )
                } else {
                    HashBucketPage::<K, V>::insert(
                        &mut old_data[..],
                        entry_key,
                        entry_value,
                        &self.comparator,
                    )
                };
                debug_assert!(reinserted, "split redistribution overflowed a bucket");
            }
        }

        self.pool.unpin_page(self.directory_page_id, true);
        self.pool.unpin_page(old_page_id, true);
        self.pool.unpin_page(new_page_id, true);
        Ok(true)
    }

    /// Removes the given (key, value) pair.
    ///
    /// Returns Ok(false) if no matching pair exists. If the bucket empties
    /// and is split (local depth > 0), it merges with its sibling.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool> {
        let _guard = self.table_latch.write();

        let dir_frame = self.pin_page(self.directory_page_id)?;
        let (idx, bucket_page_id) = {
            let dir = dir_frame.read_data();
            let idx = self.dir_index(&dir[..], key);
            (
                idx,
                self.page_id_for(HashDirectoryPage::bucket_page_id(&dir[..], idx)),
            )
        };

        let bucket_frame = match self.pin_page(bucket_page_id) {
            Ok(frame) => frame,
            Err(e) => {
                self.pool.unpin_page(self.directory_page_id, false);
                return Err(e);
            }
        };

        let removed = {
            let mut bucket = bucket_frame.write_data();
            HashBucketPage::<K, V>::remove(&mut bucket[..], key, value, &self.comparator)
        };

        if !removed {
            self.pool.unpin_page(self.directory_page_id, false);
            self.pool.unpin_page(bucket_page_id, false);
            return Ok(false);
        }

        let (now_empty, local_depth) = {
            let bucket = bucket_frame.read_data();
            let dir = dir_frame.read_data();
            (
                HashBucketPage::<K, V>::is_empty(&bucket[..]),
                HashDirectoryPage::local_depth(&dir[..], idx),
            )
        };

        if now_empty && local_depth > 0 {
            // Bucket latch is already released; merge relies on the index
            // write latch alone.
            if let Err(e) = self.merge(key) {
                self.pool.unpin_page(self.directory_page_id, true);
                self.pool.unpin_page(bucket_page_id, true);
                return Err(e);
            }

            // If the merge retargeted this bucket's slots, the page is
            // unreachable and its frame can be handed back to the pool.
            let still_referenced = {
                let dir = dir_frame.read_data();
                (0..HashDirectoryPage::size(&dir[..]))
                    .any(|slot| HashDirectoryPage::bucket_page_id(&dir[..], slot) == bucket_page_id.page_num)
            };

            self.pool.unpin_page(self.directory_page_id, true);
            self.pool.unpin_page(bucket_page_id, true);
            if !still_referenced {
                self.pool.delete_page(bucket_page_id);
            }
        } else {
            self.pool.unpin_page(self.directory_page_id, false);
            self.pool.unpin_page(bucket_page_id, true);
        }

        Ok(true)
    }

    /// Merges the (empty) bucket for `key` into its sibling, cascading
    /// while the surviving bucket is itself empty. Bounded by the global
    /// depth.
    fn merge(&self, key: &K) -> Result<()> {
        loop {
            let dir_frame = self.pin_page(self.directory_page_id)?;

            let (idx, local_depth, sibling_idx, mergeable, page_num, sibling_page_num) = {
                let dir = dir_frame.read_data();
                let idx = self.dir_index(&dir[..], key);
                let local_depth = HashDirectoryPage::local_depth(&dir[..], idx);
                if local_depth == 0 {
                    (idx, 0, 0, false, 0, 0)
                } else {
                    let sibling_idx = idx ^ (1usize << (local_depth - 1));
                    let mergeable =
                        HashDirectoryPage::local_depth(&dir[..], sibling_idx) == local_depth;
                    (
                        idx,
                        local_depth,
                        sibling_idx,
                        mergeable,
                        HashDirectoryPage::bucket_page_id(&dir[..], idx),
                        HashDirectoryPage::bucket_page_id(&dir[..], sibling_idx),
                    )
                }
            };

            // Depths must match for a merge; an unsplit bucket has nothing
            // to merge with.
            if local_depth == 0 || !mergeable {
                self.pool.unpin_page(self.directory_page_id, false);
                return Ok(());
            }

            // Re-check emptiness under the bucket read latch.
            let page_id = self.page_id_for(page_num);
            let bucket_frame = match self.pin_page(page_id) {
                Ok(frame) => frame,
                Err(e) => {
                    self.pool.unpin_page(self.directory_page_id, false);
                    return Err(e);
                }
            };
            let empty = {
                let bucket = bucket_frame.read_data();
                HashBucketPage::<K, V>::is_empty(&bucket[..])
            };
            self.pool.unpin_page(page_id, false);

            if !empty {
                self.pool.unpin_page(self.directory_page_id, false);
                return Ok(());
            }

            {
                let mut dir = dir_frame.write_data();
                if local_depth == HashDirectoryPage::global_depth(&dir[..]) {
                    // The pair are the only two slots of their pattern
                    HashDirectoryPage::set_bucket_page_id(&mut dir[..], idx, sibling_page_num);
                    HashDirectoryPage::set_bucket_page_id(
                        &mut dir[..],
                        sibling_idx,
                        sibling_page_num,
                    );
                    HashDirectoryPage::decr_local_depth(&mut dir[..], idx);
                    HashDirectoryPage::decr_local_depth(&mut dir[..], sibling_idx);
                } else {
                    let mask = ((1u32 << local_depth) - 1) >> 1;
                    HashDirectoryPage::merge_page_id(&mut dir[..], idx, mask, sibling_page_num);
                }
            }

            debug!("merged bucket {} into {}", page_num, sibling_page_num);

            self.pool.unpin_page(self.directory_page_id, true);
            // Unreachable now; fails harmlessly if the caller still pins it
            self.pool.delete_page(page_id);

            // Loop: the surviving bucket may be empty too, in which case
            // the recomputed slot merges again at the next lower depth.
        }
    }

    /// Directory slot for a key under the current global depth mask.
    #[inline]
    fn dir_index(&self, dir: &[u8], key: &K) -> usize {
        let hash = self.hasher.hash(key) as u32;
        (hash & HashDirectoryPage::global_depth_mask(dir)) as usize
    }

    #[inline]
    fn page_id_for(&self, page_num: u32) -> PageId {
        PageId::new(self.file_id, page_num)
    }

    /// Fetches a page, loading it from disk on a pool miss. The returned
    /// frame is pinned; callers balance with exactly one unpin on every
    /// control-flow exit.
    ///
    /// The miss path runs under the I/O latch: a page evicted dirty here is
    /// on disk before any other miss can read that page id.
    fn pin_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(frame);
        }

        let _io = self.io_latch.lock();
        // Another miss may have loaded the page while we waited
        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(frame);
        }

        let data = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.pool.load_page(page_id, &data)?;
        if let Some(page) = evicted {
            if let Err(e) = self.disk.write_page(page.page_id, &page.data) {
                self.pool.unpin_page(page_id, false);
                return Err(e);
            }
        }
        Ok(frame)
    }

    /// Pins a freshly allocated page, writing back any evicted dirty page
    /// under the I/O latch.
    fn pin_new_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        let _io = self.io_latch.lock();
        let (frame, evicted) = self.pool.new_page(page_id)?;
        if let Some(page) = evicted {
            if let Err(e) = self.disk.write_page(page.page_id, &page.data) {
                self.pool.unpin_page(page_id, false);
                return Err(e);
            }
        }
        Ok(frame)
    }
}
