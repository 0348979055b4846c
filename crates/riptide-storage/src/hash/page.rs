//! Bucket and directory page implementations for the extendible hash index.
//!
//! Both page types are views over raw page bytes borrowed from a pinned
//! buffer frame, so every mutation happens in place under the frame's page
//! latch.
//!
//! Bucket page layout:
//! ```text
//! | occupied bitmap (ceil(B/8)) | readable bitmap (ceil(B/8)) | B x (key, value) |
//! ```
//!
//! Slot states:
//!
//! | Occupied | Readable | Meaning                         |
//! |----------|----------|---------------------------------|
//! |    0     |    0     | Empty (never used)              |
//! |    1     |    1     | Live entry                      |
//! |    1     |    0     | Tombstone (removed entry)       |
//!
//! Directory page layout:
//! ```text
//! | global_depth (4) | page_id (4) | lsn (8) | local_depths (512) | bucket_page_ids (2048) |
//! ```

use super::constants::{
    bucket_capacity, DIRECTORY_ARRAY_SIZE, DIR_BUCKET_PAGE_IDS_OFFSET, DIR_GLOBAL_DEPTH_OFFSET,
    DIR_LOCAL_DEPTHS_OFFSET, DIR_LSN_OFFSET, DIR_PAGE_ID_OFFSET, MAX_DEPTH,
};
use super::types::{KeyComparator, SlotCodec};
use riptide_common::page::Lsn;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::marker::PhantomData;

/// Bucket page holding up to `B` (key, value) slots with per-slot occupancy
/// and tombstone bits.
///
/// All operations are associated functions over a page-sized byte slice.
/// Slot scans are linear; `B` is derived from the page size and the encoded
/// key and value widths.
pub struct HashBucketPage<K, V> {
    _marker: PhantomData<(K, V)>,
}

impl<K: SlotCodec, V: SlotCodec> HashBucketPage<K, V> {
    /// Number of slots in one bucket page.
    pub fn capacity() -> usize {
        bucket_capacity(K::ENCODED_SIZE, V::ENCODED_SIZE)
    }

    #[inline]
    fn bitmap_len() -> usize {
        Self::capacity().div_ceil(8)
    }

    #[inline]
    fn slot_size() -> usize {
        K::ENCODED_SIZE + V::ENCODED_SIZE
    }

    #[inline]
    fn slot_offset(slot: usize) -> usize {
        2 * Self::bitmap_len() + slot * Self::slot_size()
    }

    #[inline]
    fn value_offset(slot: usize) -> usize {
        Self::slot_offset(slot) + K::ENCODED_SIZE
    }

    /// Returns true if the slot has ever held an entry.
    #[inline]
    pub fn is_occupied(data: &[u8], slot: usize) -> bool {
        data[slot / 8] & (1 << (slot % 8)) != 0
    }

    /// Returns true if the slot holds a live entry.
    #[inline]
    pub fn is_readable(data: &[u8], slot: usize) -> bool {
        data[Self::bitmap_len() + slot / 8] & (1 << (slot % 8)) != 0
    }

    #[inline]
    fn set_occupied(data: &mut [u8], slot: usize, bit: bool) {
        if bit {
            data[slot / 8] |= 1 << (slot % 8);
        } else {
            data[slot / 8] &= !(1 << (slot % 8));
        }
    }

    #[inline]
    fn set_readable(data: &mut [u8], slot: usize, bit: bool) {
        let base = Self::bitmap_len();
        if bit {
            data[base + slot / 8] |= 1 << (slot % 8);
        } else {
            data[base + slot / 8] &= !(1 << (slot % 8));
        }
    }

    /// Decodes the key stored in a slot.
    pub fn key_at(data: &[u8], slot: usize) -> K {
        K::decode(&data[Self::slot_offset(slot)..])
    }

    /// Decodes the value stored in a slot.
    pub fn value_at(data: &[u8], slot: usize) -> V {
        V::decode(&data[Self::value_offset(slot)..])
    }

    /// Number of live entries.
    pub fn len(data: &[u8]) -> usize {
        let base = Self::bitmap_len();
        data[base..2 * base]
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }

    /// Fullness is measured by live entries, not occupied slots.
    pub fn is_full(data: &[u8]) -> bool {
        Self::len(data) == Self::capacity()
    }

    /// A bucket full of tombstones is empty.
    pub fn is_empty(data: &[u8]) -> bool {
        Self::len(data) == 0
    }

    /// Appends every value stored under `key` to `result`.
    ///
    /// Returns true if at least one value was appended.
    pub fn get_value<C: KeyComparator<K>>(
        data: &[u8],
        key: &K,
        cmp: &C,
        result: &mut Vec<V>,
    ) -> bool {
        let mut found = false;
        for slot in 0..Self::capacity() {
            if Self::is_readable(data, slot)
                && cmp.compare(&Self::key_at(data, slot), key) == Ordering::Equal
            {
                result.push(Self::value_at(data, slot));
                found = true;
            }
        }
        found
    }

    /// Returns true if the exact (key, value) pair is live in this bucket.
    ///
    /// Used before escalating to a split, so a duplicate insert into a full
    /// bucket does not grow the directory.
    pub fn contains<C: KeyComparator<K>>(data: &[u8], key: &K, value: &V, cmp: &C) -> bool {
        let mut value_buf = vec![0u8; V::ENCODED_SIZE];
        value.encode(&mut value_buf);

        (0..Self::capacity()).any(|slot| {
            Self::is_readable(data, slot)
                && cmp.compare(&Self::key_at(data, slot), key) == Ordering::Equal
                && data[Self::value_offset(slot)..Self::value_offset(slot) + V::ENCODED_SIZE]
                    == value_buf[..]
        })
    }

    /// Inserts a (key, value) pair into the first free or tombstoned slot.
    ///
    /// Returns false if the exact pair is already live (keys equal under
    /// `cmp`, values bit-equal) or no slot is available.
    pub fn insert<C: KeyComparator<K>>(data: &mut [u8], key: &K, value: &V, cmp: &C) -> bool {
        let mut value_buf = vec![0u8; V::ENCODED_SIZE];
        value.encode(&mut value_buf);

        let mut free_slot = None;
        for slot in 0..Self::capacity() {
            if Self::is_readable(data, slot) {
                if cmp.compare(&Self::key_at(data, slot), key) == Ordering::Equal
                    && data[Self::value_offset(slot)..Self::value_offset(slot) + V::ENCODED_SIZE]
                        == value_buf[..]
                {
                    return false;
                }
            } else if free_slot.is_none() {
                free_slot = Some(slot);
            }
        }

        match free_slot {
            Some(slot) => {
                let offset = Self::slot_offset(slot);
                key.encode(&mut data[offset..offset + K::ENCODED_SIZE]);
                let value_off = Self::value_offset(slot);
                data[value_off..value_off + V::ENCODED_SIZE].copy_from_slice(&value_buf);
                Self::set_occupied(data, slot, true);
                Self::set_readable(data, slot, true);
                true
            }
            None => false,
        }
    }

    /// Removes the first live slot matching both key and value.
    ///
    /// Only the readable bit is cleared; the occupied bit remains as a
    /// tombstone. Returns true if a slot was cleared.
    pub fn remove<C: KeyComparator<K>>(data: &mut [u8], key: &K, value: &V, cmp: &C) -> bool {
        let mut value_buf = vec![0u8; V::ENCODED_SIZE];
        value.encode(&mut value_buf);

        for slot in 0..Self::capacity() {
            if Self::is_readable(data, slot)
                && cmp.compare(&Self::key_at(data, slot), key) == Ordering::Equal
                && data[Self::value_offset(slot)..Self::value_offset(slot) + V::ENCODED_SIZE]
                    == value_buf[..]
            {
                Self::set_readable(data, slot, false);
                return true;
            }
        }
        false
    }

    /// Drains the bucket: collects every live (key, value) pair and clears
    /// both bitmaps. Used by split to redistribute entries, which also
    /// compacts tombstones away.
    pub fn drain(data: &mut [u8]) -> Vec<(K, V)> {
        let mut entries = Vec::with_capacity(Self::len(data));
        for slot in 0..Self::capacity() {
            if Self::is_readable(data, slot) {
                entries.push((Self::key_at(data, slot), Self::value_at(data, slot)));
            }
        }
        data[..2 * Self::bitmap_len()].fill(0);
        entries
    }
}

/// Directory page mapping the low-order bits of a hash to a bucket page id.
///
/// Bucket page ids are page numbers within the index's file. Only the first
/// 2^global_depth slots are live.
pub struct HashDirectoryPage;

impl HashDirectoryPage {
    /// Initializes a directory: zero local depths, global depth 0, self
    /// page id recorded in the header.
    pub fn init(data: &mut [u8], page_num: u32) {
        data[DIR_GLOBAL_DEPTH_OFFSET..DIR_BUCKET_PAGE_IDS_OFFSET + 4 * DIRECTORY_ARRAY_SIZE]
            .fill(0);
        data[DIR_PAGE_ID_OFFSET..DIR_PAGE_ID_OFFSET + 4].copy_from_slice(&page_num.to_le_bytes());
    }

    /// Returns the directory's own page number.
    pub fn page_id(data: &[u8]) -> u32 {
        u32::from_le_bytes([
            data[DIR_PAGE_ID_OFFSET],
            data[DIR_PAGE_ID_OFFSET + 1],
            data[DIR_PAGE_ID_OFFSET + 2],
            data[DIR_PAGE_ID_OFFSET + 3],
        ])
    }

    /// Returns the log sequence number.
    pub fn lsn(data: &[u8]) -> Lsn {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[DIR_LSN_OFFSET..DIR_LSN_OFFSET + 8]);
        Lsn::from_le_bytes(bytes)
    }

    /// Sets the log sequence number.
    pub fn set_lsn(data: &mut [u8], lsn: Lsn) {
        data[DIR_LSN_OFFSET..DIR_LSN_OFFSET + 8].copy_from_slice(&lsn.to_le_bytes());
    }

    /// Returns the global depth.
    pub fn global_depth(data: &[u8]) -> u32 {
        u32::from_le_bytes([
            data[DIR_GLOBAL_DEPTH_OFFSET],
            data[DIR_GLOBAL_DEPTH_OFFSET + 1],
            data[DIR_GLOBAL_DEPTH_OFFSET + 2],
            data[DIR_GLOBAL_DEPTH_OFFSET + 3],
        ])
    }

    fn set_global_depth(data: &mut [u8], depth: u32) {
        data[DIR_GLOBAL_DEPTH_OFFSET..DIR_GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&depth.to_le_bytes());
    }

    /// Returns a mask of global_depth low-order 1 bits.
    pub fn global_depth_mask(data: &[u8]) -> u32 {
        (1 << Self::global_depth(data)) - 1
    }

    /// Number of live directory slots.
    pub fn size(data: &[u8]) -> usize {
        1 << Self::global_depth(data)
    }

    /// Doubles the live range: the upper half becomes a copy of the lower
    /// half (bucket page ids and local depths alike).
    ///
    /// Refuses (no-op, returns false) at MAX_DEPTH.
    pub fn incr_global_depth(data: &mut [u8]) -> bool {
        let depth = Self::global_depth(data);
        if depth >= MAX_DEPTH {
            return false;
        }
        let live = 1usize << depth;
        for i in 0..live {
            let page_id = Self::bucket_page_id(data, i);
            let local = Self::local_depth(data, i);
            Self::set_bucket_page_id(data, i + live, page_id);
            Self::set_local_depth(data, i + live, local as u8);
        }
        Self::set_global_depth(data, depth + 1);
        true
    }

    /// Returns the bucket page number at a directory slot.
    pub fn bucket_page_id(data: &[u8], slot: usize) -> u32 {
        let offset = DIR_BUCKET_PAGE_IDS_OFFSET + 4 * slot;
        u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ])
    }

    /// Sets the bucket page number at a directory slot.
    pub fn set_bucket_page_id(data: &mut [u8], slot: usize, page_num: u32) {
        let offset = DIR_BUCKET_PAGE_IDS_OFFSET + 4 * slot;
        data[offset..offset + 4].copy_from_slice(&page_num.to_le_bytes());
    }

    /// Returns the local depth of a directory slot.
    pub fn local_depth(data: &[u8], slot: usize) -> u32 {
        data[DIR_LOCAL_DEPTHS_OFFSET + slot] as u32
    }

    /// Sets the local depth of a directory slot.
    pub fn set_local_depth(data: &mut [u8], slot: usize, depth: u8) {
        data[DIR_LOCAL_DEPTHS_OFFSET + slot] = depth;
    }

    /// Increments the local depth of a single slot.
    pub fn incr_local_depth(data: &mut [u8], slot: usize) {
        data[DIR_LOCAL_DEPTHS_OFFSET + slot] += 1;
    }

    /// Decrements the local depth of a single slot.
    pub fn decr_local_depth(data: &mut [u8], slot: usize) {
        data[DIR_LOCAL_DEPTHS_OFFSET + slot] -= 1;
    }

    /// Returns a mask of local_depth(slot) low-order 1 bits.
    pub fn local_depth_mask(data: &[u8], slot: usize) -> u32 {
        (1 << Self::local_depth(data, slot)) - 1
    }

    /// Repoints every live slot whose hash prefix now selects the new
    /// bucket: each slot agreeing with `new_idx` in its lowest
    /// local_depth(new_idx) bits gets `new_page_num`.
    ///
    /// Called after the local depths of the split bucket's slot class have
    /// been raised.
    pub fn separate_page_id(data: &mut [u8], new_idx: usize, new_page_num: u32) {
        let mask = Self::local_depth_mask(data, new_idx);
        for slot in 0..Self::size(data) {
            if (slot as u32 & mask) == (new_idx as u32 & mask) {
                Self::set_bucket_page_id(data, slot, new_page_num);
            }
        }
    }

    /// Retargets every live slot with `(slot & mask) == (from_idx & mask)`
    /// at `merge_page_num` and decrements its local depth.
    ///
    /// `mask` is the mask of the decremented depth, so both halves of the
    /// merging pair collapse onto the surviving bucket.
    pub fn merge_page_id(data: &mut [u8], from_idx: usize, mask: u32, merge_page_num: u32) {
        for slot in 0..Self::size(data) {
            if (slot as u32 & mask) == (from_idx as u32 & mask) {
                Self::set_bucket_page_id(data, slot, merge_page_num);
                Self::decr_local_depth(data, slot);
            }
        }
    }

    /// Checks directory consistency, panicking on violation:
    ///
    /// - global depth within bounds, every live local depth <= global depth
    /// - slots sharing a bucket page id share a local depth and agree in
    ///   their low local_depth bits
    /// - every live bucket page is pointed to by exactly
    ///   2^(global_depth - local_depth) slots
    pub fn verify_integrity(data: &[u8]) {
        let global = Self::global_depth(data);
        assert!(global <= MAX_DEPTH, "global depth {} out of range", global);

        let live = Self::size(data);
        let mut groups: HashMap<u32, Vec<usize>> = HashMap::new();
        for slot in 0..live {
            let local = Self::local_depth(data, slot);
            assert!(
                local <= global,
                "slot {}: local depth {} exceeds global depth {}",
                slot,
                local,
                global
            );
            groups
                .entry(Self::bucket_page_id(data, slot))
                .or_default()
                .push(slot);
        }

        for (page_num, slots) in groups {
            let local = Self::local_depth(data, slots[0]);
            let mask = (1u32 << local) - 1;
            let pattern = slots[0] as u32 & mask;
            for &slot in &slots {
                assert_eq!(
                    Self::local_depth(data, slot),
                    local,
                    "bucket {}: slots at differing local depths",
                    page_num
                );
                assert_eq!(
                    slot as u32 & mask,
                    pattern,
                    "bucket {}: slot {} disagrees in low {} bits",
                    page_num,
                    slot,
                    local
                );
            }
            assert_eq!(
                slots.len() as u32,
                1 << (global - local),
                "bucket {}: pointer count mismatch at local depth {}",
                page_num,
                local
            );
        }
    }
}
