//! Storage contract of a DFS-backed git repository.
//!
//! A version-control library drives these traits for every reference lookup
//! and update and for every pack file it opens, writes or commits. The
//! key-value implementations live in [`crate::ref_db`], [`crate::obj_db`] and
//! [`crate::repository`].

use crate::ref_db::RefCache;
use crate::repository::RepositoryDescription;
use crate::Result;
use gitkv_store::{PackDescription, PackExt, PackSource, Ref};
use std::io;

/// Random-access reader over one pack file.
pub trait ReadableChannel: io::Read + io::Seek + Send {
    /// Current read position.
    fn position(&self) -> u64;

    /// Moves the read position. Positions past the end are allowed.
    fn set_position(&mut self, position: u64) -> io::Result<()>;

    /// Total size of the file in bytes.
    fn size(&self) -> u64;

    /// Natural block size for aligned reads, or 0 if unknown.
    fn block_size(&self) -> usize;

    /// Whether the channel is still open.
    fn is_open(&self) -> bool;

    /// Closes the channel. Later reads fail.
    fn close(&mut self);
}

/// Writer for one pack file.
///
/// Bytes accumulate in memory until the stream is flushed or closed, which
/// writes the whole file to storage in one operation.
pub trait DfsOutputStream: io::Write + Send {
    /// Natural block size for aligned writes, or 0 if unknown.
    fn block_size(&self) -> usize {
        0
    }

    /// Reads back bytes written so far, starting at `position`.
    fn read_at(&self, position: u64, dst: &mut [u8]) -> io::Result<usize>;

    /// Finalizes the stream. Later writes fail.
    fn close(&mut self) -> io::Result<()>;
}

/// Reference half of the repository contract.
pub trait RefDatabase: Send + Sync {
    /// Reads one reference by exact name.
    fn exact_ref(&self, name: &str) -> Result<Option<Ref>>;

    /// Stores `new_ref` if the current value still matches `old_ref`.
    ///
    /// With no `old_ref` the reference must not exist yet.
    fn compare_and_put(&self, old_ref: Option<&Ref>, new_ref: &Ref) -> Result<bool>;

    /// Deletes the reference if the current value still matches `old_ref`.
    fn compare_and_remove(&self, old_ref: &Ref) -> Result<bool>;

    /// Reads every reference.
    fn scan_all_refs(&self) -> Result<RefCache>;
}

/// Pack half of the repository contract.
pub trait ObjDatabase: Send + Sync {
    /// Reader returned by [`ObjDatabase::open_file`].
    type Channel: ReadableChannel;

    /// Writer returned by [`ObjDatabase::write_file`].
    type Output: DfsOutputStream;

    /// Creates a descriptor for a pack about to be written.
    fn new_pack(&self, source: PackSource) -> Result<PackDescription>;

    /// Makes `descs` visible and retires `replaces`.
    fn commit_pack(&self, descs: &[PackDescription], replaces: &[PackDescription]) -> Result<()>;

    /// Discards the files of packs that will never be committed.
    fn rollback_pack(&self, descs: &[PackDescription]) -> Result<()>;

    /// Lists committed packs.
    fn list_packs(&self) -> Result<Vec<PackDescription>>;

    /// Opens one file of a pack for reading.
    fn open_file(&self, desc: &PackDescription, ext: PackExt) -> Result<Self::Channel>;

    /// Opens one file of a pack for writing.
    fn write_file(&self, desc: &PackDescription, ext: PackExt) -> Result<Self::Output>;
}

/// A repository made of a reference database and an object database.
pub trait DfsRepository: Send + Sync {
    type RefDb: RefDatabase;
    type ObjDb: ObjDatabase;

    fn description(&self) -> &RepositoryDescription;

    fn ref_database(&self) -> &Self::RefDb;

    fn obj_database(&self) -> &Self::ObjDb;
}
