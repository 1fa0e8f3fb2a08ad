//! Fixed-size on-page encoding.
//!
//! Bucket pages store `(key, value)` pairs packed directly into page bytes
//! with no per-entry framing, so every storable type must occupy a fixed
//! number of bytes. All encodings are little-endian.

use super::ids::{PageId, Rid};

/// A type that can be stored in a fixed number of bytes on a page.
///
/// Implementors must encode into exactly [`ENCODED_SIZE`](Self::ENCODED_SIZE)
/// bytes; page layouts are computed from that constant.
pub trait Storable: Copy + Send + Sync + 'static {
    /// Number of bytes the encoded form occupies.
    const ENCODED_SIZE: usize;

    /// Writes the encoded form into `buf`.
    ///
    /// `buf` is exactly [`ENCODED_SIZE`](Self::ENCODED_SIZE) bytes long.
    fn encode(&self, buf: &mut [u8]);

    /// Reads a value back from its encoded form.
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! storable_int {
    ($($ty:ty),*) => {
        $(
            impl Storable for $ty {
                const ENCODED_SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode(&self, buf: &mut [u8]) {
                    buf[..Self::ENCODED_SIZE].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(buf: &[u8]) -> Self {
                    <$ty>::from_le_bytes(buf[..Self::ENCODED_SIZE].try_into().unwrap())
                }
            }
        )*
    };
}

storable_int!(i32, u32, i64, u64);

impl Storable for Rid {
    const ENCODED_SIZE: usize = 8;

    #[inline]
    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
    }

    #[inline]
    fn decode(buf: &[u8]) -> Self {
        Self {
            page_id: PageId::from_le_bytes(buf[0..4].try_into().unwrap()),
            slot: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}
