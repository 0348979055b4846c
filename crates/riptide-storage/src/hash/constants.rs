//! Sizing constants and layout offsets for the extendible hash index.

use riptide_common::page::PAGE_SIZE;

/// Maximum directory depth; the directory addresses at most 2^MAX_DEPTH
/// buckets.
pub const MAX_DEPTH: u32 = 9;

/// Number of directory slots. Only the first 2^global_depth are live.
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_DEPTH;

// Directory page layout:
// | global_depth (4) | page_id (4) | lsn (8) | local_depths (512) | bucket_page_ids (2048) |
pub(crate) const DIR_GLOBAL_DEPTH_OFFSET: usize = 0;
pub(crate) const DIR_PAGE_ID_OFFSET: usize = 4;
pub(crate) const DIR_LSN_OFFSET: usize = 8;
pub(crate) const DIR_LOCAL_DEPTHS_OFFSET: usize = 16;
pub(crate) const DIR_BUCKET_PAGE_IDS_OFFSET: usize =
    DIR_LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;
pub(crate) const DIR_END_OFFSET: usize = DIR_BUCKET_PAGE_IDS_OFFSET + 4 * DIRECTORY_ARRAY_SIZE;

const _: () = assert!(DIR_END_OFFSET <= PAGE_SIZE, "directory must fit in one page");

/// Returns the bucket slot count `B` for the given key and value widths:
/// the largest `B` such that two `B`-bit bitmaps plus `B` raw (key, value)
/// slots fit in one page.
pub fn bucket_capacity(key_size: usize, value_size: usize) -> usize {
    let slot_size = key_size + value_size;
    let mut capacity = PAGE_SIZE / slot_size;
    while 2 * capacity.div_ceil(8) + capacity * slot_size > PAGE_SIZE {
        capacity -= 1;
    }
    capacity
}
