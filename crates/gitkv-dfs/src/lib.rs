//! DFS repository adapter for gitkv.
//!
//! Binds the key-value reference and pack stores of `gitkv-store` to the
//! storage contract a DFS-backed git implementation expects: a reference
//! database, an object database with pack read channels and write streams,
//! and a repository bundling both. [`RepositoryRegistry`] hands out one shared
//! repository per name.

mod channel;
mod error;
mod obj_db;
mod output;
mod ref_db;
mod registry;
mod repository;
mod traits;

pub use channel::BlobChannel;
pub use error::DfsError;
pub use obj_db::KvObjDatabase;
pub use output::PackOutputStream;
pub use ref_db::{KvRefDatabase, RefCache};
pub use registry::RepositoryRegistry;
pub use repository::{KvRepository, RepositoryDescription};
pub use traits::{DfsOutputStream, DfsRepository, ObjDatabase, ReadableChannel, RefDatabase};

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, DfsError>;
