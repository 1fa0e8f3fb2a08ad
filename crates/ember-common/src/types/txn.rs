//! Opaque transaction handle.

use super::ids::TxnId;

/// A transaction handle threaded through index operations.
///
/// The storage substrate does not interpret it; it exists so index
/// operations have the signature the transaction layer above expects.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TxnId,
}

impl Transaction {
    /// Creates a transaction handle with the given id.
    #[must_use]
    pub const fn new(id: TxnId) -> Self {
        Self { id }
    }

    /// Returns the transaction id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> TxnId {
        self.id
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new(TxnId::INVALID)
    }
}
