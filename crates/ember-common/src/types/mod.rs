//! Core types shared across EmberDB crates.

mod ids;
mod storable;
mod txn;

pub use ids::{Lsn, PageId, Rid, TxnId};
pub use storable::Storable;
pub use txn::Transaction;
