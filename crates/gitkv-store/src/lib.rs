//! Reference and pack storage for gitkv.
//!
//! This crate maps git references and pack files onto the tables of a
//! key-value store reached through a [`Session`]:
//!
//! - [`RefStore`] keeps one row per reference in `refs` and offers
//!   compare-and-swap updates keyed on object id.
//! - [`PackStore`] keeps pack descriptors in `pack_desc` and pack file bytes
//!   in `pack_data`.
//!
//! Each repository lives in its own [`Keyspace`].

pub mod codec;
mod config;
mod error;
mod keyspace;
#[cfg(feature = "memory")]
mod memory;
mod object;
mod pack;
mod pack_store;
mod refs;
#[cfg(feature = "rocksdb-backend")]
mod rocksdb_session;
mod session;

pub use config::{CasMode, CommitOrder, StoreConfig, DEFAULT_FETCH_SIZE};
pub use error::{SessionError, SessionResult, StorageError};
pub use keyspace::{Keyspace, MAX_KEYSPACE_LEN};
#[cfg(feature = "memory")]
pub use memory::{MemorySession, SessionStats};
pub use object::{ObjectId, OBJECT_ID_LEN};
pub use pack::{ExtensionRegistry, PackDescription, PackExt, PackSource, MAX_EXTENSIONS};
pub use pack_store::{PackStore, PACK_DATA_TABLE, PACK_DESC_TABLE};
pub use refs::{validate_ref_name, Ref, RefKind, RefStore, RefTarget, MAX_SYMBOLIC_DEPTH, REFS_TABLE};
#[cfg(feature = "rocksdb-backend")]
pub use rocksdb_session::{RocksDbConfig, RocksDbSession, RocksDbStatsSnapshot};
pub use session::{
    Applied, ColumnType, Condition, Page, PagingState, Row, RowScan, Session, TableSchema, Value,
    KEY_COLUMN,
};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
