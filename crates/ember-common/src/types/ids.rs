//! Core identifier types for EmberDB.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Page identifier - uniquely identifies a page on disk.
///
/// Page ids are 32 bits so a full extendible-hash directory (512 entries)
/// fits in a single 4 KB page together with its header and depth bytes.
///
/// # Example
///
/// ```rust
/// use ember_common::types::PageId;
///
/// let page = PageId::new(42);
/// assert_eq!(page.as_u32(), 42);
/// assert!(page.is_valid());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PageId(u32);

impl PageId {
    /// Invalid page ID, used as a sentinel for empty frames and an
    /// uninitialized directory.
    pub const INVALID: Self = Self(u32::MAX);

    /// Creates a new `PageId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks if this is a valid page ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Creates a `PageId` from little-endian bytes.
    #[inline]
    #[must_use]
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    /// Converts to little-endian bytes.
    #[inline]
    #[must_use]
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "PageId(INVALID)")
        } else {
            write!(f, "PageId({})", self.0)
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PageId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl From<PageId> for u32 {
    #[inline]
    fn from(id: PageId) -> Self {
        id.0
    }
}

/// Transaction identifier.
///
/// Index operations carry a transaction handle whose id is this type; the
/// storage substrate treats it as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnId(u64);

impl TxnId {
    /// Invalid transaction ID.
    pub const INVALID: Self = Self(u64::MAX);

    /// Creates a new `TxnId`.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this is a valid transaction ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Log sequence number.
///
/// The log manager is a handle only in this substrate; the LSN type exists
/// for the wiring that future write-ahead logging will use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Lsn(u64);

impl Lsn {
    /// Invalid LSN.
    pub const INVALID: Self = Self(u64::MAX);

    /// Creates a new `Lsn`.
    #[inline]
    #[must_use]
    pub const fn new(lsn: u64) -> Self {
        Self(lsn)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Record identifier - locates a tuple as (page, slot).
///
/// This is the canonical value type stored by the hash index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    /// Page holding the record.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot: u32,
}

impl Rid {
    /// Creates a new record identifier.
    #[inline]
    #[must_use]
    pub const fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}
