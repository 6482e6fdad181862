//! Clearnode storage layer
//!
//! A RocksDB `TransactionDB` with one column family per table and secondary
//! index families. Every state-changing operation runs inside one [`StoreTx`];
//! dropping a transaction without committing rolls it back.

pub mod error;
pub mod store;
pub mod keys;
pub mod tables;
pub mod testing;

pub use error::StoreError;
pub use store::{Store, StoreOptions, StoreTx};
