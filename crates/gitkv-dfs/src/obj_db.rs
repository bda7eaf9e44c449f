//! Object database over the key-value pack store.

use crate::channel::BlobChannel;
use crate::output::PackOutputStream;
use crate::traits::ObjDatabase;
use crate::Result;
use gitkv_store::{PackDescription, PackExt, PackSource, PackStore};
use std::sync::Arc;

/// [`ObjDatabase`] backed by a [`PackStore`].
#[derive(Debug, Clone)]
pub struct KvObjDatabase {
    store: Arc<PackStore>,
}

impl KvObjDatabase {
    pub fn new(store: PackStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &PackStore {
        &self.store
    }
}

impl ObjDatabase for KvObjDatabase {
    type Channel = BlobChannel;
    type Output = PackOutputStream;

    fn new_pack(&self, source: PackSource) -> Result<PackDescription> {
        Ok(self.store.new_pack(source))
    }

    fn commit_pack(&self, descs: &[PackDescription], replaces: &[PackDescription]) -> Result<()> {
        self.store.commit(descs, replaces)?;
        Ok(())
    }

    fn rollback_pack(&self, descs: &[PackDescription]) -> Result<()> {
        for desc in descs {
            for ext in PackExt::values() {
                self.store.delete_file(desc, ext)?;
            }
            tracing::info!(keyspace = %self.store.keyspace(), pack = desc.name(), "rolled back pack");
        }
        Ok(())
    }

    fn list_packs(&self) -> Result<Vec<PackDescription>> {
        Ok(self.store.list_packs()?)
    }

    fn open_file(&self, desc: &PackDescription, ext: PackExt) -> Result<BlobChannel> {
        let data = self.store.read_file(desc, ext)?;
        Ok(BlobChannel::new(desc.file_name(ext), data))
    }

    fn write_file(&self, desc: &PackDescription, ext: PackExt) -> Result<PackOutputStream> {
        Ok(PackOutputStream::new(
            Arc::clone(&self.store),
            desc.clone(),
            ext,
        ))
    }
}
