//! Disk-resident extendible hash index.
//!
//! The index maps fixed-width keys to fixed-width values through two page
//! types managed by the buffer pool: a directory page translating hashed
//! keys into bucket page ids, and bucket pages holding the (key, value)
//! slots. Splits, directory doublings, and merges keep the directory
//! invariants under concurrent readers and writers.

pub mod constants;
pub mod index;
pub mod page;
pub mod types;

pub use constants::{bucket_capacity, DIRECTORY_ARRAY_SIZE, MAX_DEPTH};
pub use index::ExtendibleHashIndex;
pub use page::{HashBucketPage, HashDirectoryPage};
pub use types::{
    GenericKey, KeyComparator, KeyHasher, OrdComparator, RecordId, SlotCodec, Xxh3Hasher,
};
