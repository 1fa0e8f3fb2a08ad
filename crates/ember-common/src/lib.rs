//! # ember-common
//!
//! Common types and constants for EmberDB.
//!
//! This crate provides the foundational vocabulary shared by the storage
//! and index layers:
//!
//! - **Types**: core identifiers (`PageId`, `TxnId`, `Lsn`), the `Rid`
//!   record locator, the opaque `Transaction` handle
//! - **Codec**: the `Storable` trait for fixed-size on-page encoding
//! - **Constants**: page geometry and buffer-pool defaults

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::PAGE_SIZE;
pub use types::{Lsn, PageId, Rid, Storable, Transaction, TxnId};
