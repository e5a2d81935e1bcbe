//! Ordered key-value substrate for the process execution state store.
//!
//! Every state container in `flowstate-core` is written against the
//! [`KeyValueStore`] trait and the [`TypedColumn`] wrapper defined here, so the
//! same container code runs on the in-memory [`MemoryStore`], inside a
//! buffered [`Transaction`], or on RocksDB (feature `rocksdb`).
//!
//! Keys are fixed-width, order-preserving encodings (see [`key`]) so that the
//! byte order of a column family matches the numeric/temporal order the
//! containers scan in. Values are `bincode`-encoded serde types.

pub mod column;
pub mod column_family;
pub mod digest;
pub mod error;
pub mod key;
pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocks;
pub mod store;
pub mod transaction;

pub use column::{ConsistencyChecks, TypedColumn};
pub use column_family::ColumnFamily;
pub use error::DbError;
pub use key::DbKey;
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb")]
pub use rocks::{RocksDbConfig, RocksDbStore};
pub use store::{DbIter, KeyValueStore, WriteBatch, WriteOp};
pub use transaction::Transaction;

pub type Result<T> = std::result::Result<T, DbError>;
