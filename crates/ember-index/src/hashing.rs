//! Key hashing and comparison seams.
//!
//! The hash table consumes both as traits so callers can plug in their own
//! hash function and collation. Defaults cover the common case: a seeded
//! SipHash over the key's page encoding, and `Ord`-based comparison.

use std::cmp::Ordering;
use std::hash::Hasher;
use std::marker::PhantomData;

use ember_common::Storable;
use siphasher::sip::SipHasher13;

/// Hashes keys for directory routing.
///
/// The full hash is 64 bits; extendible hashing consumes the low 32, so
/// implementations downcast.
pub trait KeyHasher<K>: Send + Sync {
    /// Returns the 32-bit hash of `key`.
    fn hash_key(&self, key: &K) -> u32;
}

// Fixed SipHash keys. The directory layout on disk depends on these values;
// changing them invalidates every persisted index.
const SIP_KEY_0: u64 = 0x656d_6265_7264_6231;
const SIP_KEY_1: u64 = 0x7061_6765_6861_7368;

/// Default hasher: seeded SipHash-1-3 over the key's fixed-size encoding.
///
/// Stable across processes and platforms, which a persistent index
/// requires.
#[derive(Debug, Clone, Copy, Default)]
pub struct SipKeyHasher;

impl<K: Storable> KeyHasher<K> for SipKeyHasher {
    fn hash_key(&self, key: &K) -> u32 {
        let mut buf = vec![0u8; K::ENCODED_SIZE];
        key.encode(&mut buf);
        let mut hasher = SipHasher13::new_with_keys(SIP_KEY_0, SIP_KEY_1);
        hasher.write(&buf);
        hasher.finish() as u32
    }
}

/// Compares keys for equality during bucket scans.
pub trait KeyComparator<K>: Send + Sync {
    /// Three-way comparison of `a` and `b`.
    fn compare(&self, a: &K, b: &K) -> Ordering;

    /// Returns true if `a` and `b` compare equal.
    #[inline]
    fn eq(&self, a: &K, b: &K) -> bool {
        self.compare(a, b) == Ordering::Equal
    }
}

/// Comparator for keys with a total order.
#[derive(Debug, Clone, Copy)]
pub struct OrdComparator<K>(PhantomData<fn() -> K>);

impl<K> OrdComparator<K> {
    /// Creates the comparator.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<K> Default for OrdComparator<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Send + Sync> KeyComparator<K> for OrdComparator<K> {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}
