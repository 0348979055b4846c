//! Key/value codec, comparator, and hasher seams for the hash index.

use riptide_common::page::PageId;
use std::cmp::Ordering;
use xxhash_rust::xxh3::xxh3_64;

/// Fixed-width binary encoding for keys and values stored in bucket slots.
///
/// Every implementor occupies exactly `ENCODED_SIZE` bytes on the page.
/// Values are compared bit-wise on their encoded form for duplicate-pair
/// detection and removal.
pub trait SlotCodec: Copy + Send + Sync + 'static {
    /// Encoded width in bytes.
    const ENCODED_SIZE: usize;

    /// Writes the encoded form into `buf` (exactly `ENCODED_SIZE` bytes).
    fn encode(&self, buf: &mut [u8]);

    /// Reads a value back out of `buf`.
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! int_slot_codec {
    ($($ty:ty),*) => {
        $(
            impl SlotCodec for $ty {
                const ENCODED_SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode(&self, buf: &mut [u8]) {
                    buf[..Self::ENCODED_SIZE].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(buf: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(&buf[..Self::ENCODED_SIZE]);
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

int_slot_codec!(i32, u32, i64, u64);

/// Row locator stored as the value of a typical index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    /// Page holding the row.
    pub page_id: PageId,
    /// Slot within the page.
    pub slot: u16,
}

impl RecordId {
    /// Creates a new RecordId.
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.page_id, self.slot)
    }
}

impl SlotCodec for RecordId {
    const ENCODED_SIZE: usize = 10;

    fn encode(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.page_id.as_u64().to_le_bytes());
        buf[8..10].copy_from_slice(&self.slot.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        let mut packed = [0u8; 8];
        packed.copy_from_slice(&buf[..8]);
        Self {
            page_id: PageId::from_u64(u64::from_le_bytes(packed)),
            slot: u16::from_le_bytes([buf[8], buf[9]]),
        }
    }
}

/// Fixed-width byte-string key, zero-padded.
///
/// Useful where keys are short strings, and in tests where a wide key type
/// yields a small bucket capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenericKey<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    /// Builds a key from a byte slice, truncating or zero-padding to `N`.
    pub fn from_bytes(src: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        let len = src.len().min(N);
        bytes[..len].copy_from_slice(&src[..len]);
        Self { bytes }
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.bytes
    }
}

impl<const N: usize> SlotCodec for GenericKey<N> {
    const ENCODED_SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.bytes);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&buf[..N]);
        Self { bytes }
    }
}

/// Total order over keys. `compare(a, b) == Equal` iff the keys are equal.
pub trait KeyComparator<K>: Send + Sync {
    /// Compares two keys.
    fn compare(&self, a: &K, b: &K) -> Ordering;

    /// Returns true if the keys are equal under this order.
    #[inline]
    fn eq(&self, a: &K, b: &K) -> bool {
        self.compare(a, b) == Ordering::Equal
    }
}

/// Comparator delegating to the key's `Ord` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Hash function over keys; the index masks the low-order bits of the
/// 32-bit downcast to pick a directory slot.
pub trait KeyHasher<K>: Send + Sync {
    /// Hashes a key to 64 bits.
    fn hash(&self, key: &K) -> u64;
}

/// Default hasher: xxh3 over the encoded key bytes.
///
/// Deterministic across runs; `DefaultHasher` is not.
#[derive(Debug, Default, Clone, Copy)]
pub struct Xxh3Hasher;

impl<K: SlotCodec> KeyHasher<K> for Xxh3Hasher {
    fn hash(&self, key: &K) -> u64 {
        let mut stack = [0u8; 64];
        if K::ENCODED_SIZE <= stack.len() {
            key.encode(&mut stack[..K::ENCODED_SIZE]);
            xxh3_64(&stack[..K::ENCODED_SIZE])
        } else {
            let mut buf = vec![0u8; K::ENCODED_SIZE];
            key.encode(&mut buf);
            xxh3_64(&buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_codec_roundtrip() {
        let mut buf = [0u8; 8];

        42i32.encode(&mut buf);
        assert_eq!(i32::decode(&buf), 42);

        (-7i64).encode(&mut buf);
        assert_eq!(i64::decode(&buf), -7);

        u64::MAX.encode(&mut buf);
        assert_eq!(u64::decode(&buf), u64::MAX);
    }

    #[test]
    fn test_int_codec_sizes() {
        assert_eq!(<i32 as SlotCodec>::ENCODED_SIZE, 4);
        assert_eq!(<u64 as SlotCodec>::ENCODED_SIZE, 8);
    }

    #[test]
    fn test_record_id_codec_roundtrip() {
        let rid = RecordId::new(PageId::new(3, 77), 12);
        let mut buf = [0u8; 10];
        rid.encode(&mut buf);
        assert_eq!(RecordId::decode(&buf), rid);
    }

    #[test]
    fn test_record_id_display() {
        let rid = RecordId::new(PageId::new(1, 2), 3);
        assert_eq!(rid.to_string(), "1:2#3");
    }

    #[test]
    fn test_generic_key_roundtrip() {
        let key = GenericKey::<16>::from_bytes(b"hello");
        let mut buf = [0u8; 16];
        key.encode(&mut buf);
        assert_eq!(GenericKey::<16>::decode(&buf), key);
        assert_eq!(&buf[..5], b"hello");
        assert!(buf[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_generic_key_truncates() {
        let key = GenericKey::<4>::from_bytes(b"overlong");
        assert_eq!(key.as_bytes(), b"over");
    }

    #[test]
    fn test_generic_key_ordering() {
        let a = GenericKey::<8>::from_bytes(b"aaa");
        let b = GenericKey::<8>::from_bytes(b"bbb");
        assert!(a < b);
        assert_eq!(OrdComparator.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_ord_comparator() {
        let cmp = OrdComparator;
        assert_eq!(cmp.compare(&1i32, &2i32), Ordering::Less);
        assert_eq!(cmp.compare(&2i32, &2i32), Ordering::Equal);
        assert!(cmp.eq(&5u64, &5u64));
        assert!(!cmp.eq(&5u64, &6u64));
    }

    #[test]
    fn test_xxh3_hasher_deterministic() {
        let hasher = Xxh3Hasher;
        let h1 = KeyHasher::<u64>::hash(&hasher, &12345);
        let h2 = KeyHasher::<u64>::hash(&hasher, &12345);
        assert_eq!(h1, h2);

        let h3 = KeyHasher::<u64>::hash(&hasher, &12346);
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_xxh3_hasher_wide_key() {
        let hasher = Xxh3Hasher;
        let a = GenericKey::<128>::from_bytes(b"wide key a");
        let b = GenericKey::<128>::from_bytes(b"wide key b");
        assert_ne!(hasher.hash(&a), hasher.hash(&b));
        assert_eq!(hasher.hash(&a), hasher.hash(&a));
    }
}
