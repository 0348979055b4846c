//! Storage engine for RiptideDB.
//!
//! This crate provides:
//! - Page-granular disk I/O (`DiskManager`)
//! - A disk-resident extendible hash index built on the buffer pool
//!   (`hash` module)

pub mod disk;
pub mod hash;

pub use disk::{DiskManager, DiskManagerConfig};
pub use hash::{
    ExtendibleHashIndex, GenericKey, HashBucketPage, HashDirectoryPage, KeyComparator, KeyHasher,
    OrdComparator, RecordId, SlotCodec, Xxh3Hasher,
};
