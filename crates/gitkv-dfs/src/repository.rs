//! Key-value backed repository.

use crate::obj_db::KvObjDatabase;
use crate::ref_db::KvRefDatabase;
use crate::traits::DfsRepository;
use crate::Result;
use gitkv_store::{Keyspace, PackStore, RefStore, Session, StoreConfig};
use std::fmt;
use std::sync::Arc;

/// Identity of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryDescription {
    keyspace: Keyspace,
}

impl RepositoryDescription {
    pub fn new(keyspace: Keyspace) -> Self {
        Self { keyspace }
    }

    /// Repository name, which is also its keyspace.
    pub fn name(&self) -> &str {
        self.keyspace.as_str()
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }
}

impl fmt::Display for RepositoryDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repository {}", self.keyspace)
    }
}

/// A repository whose references and packs live in one keyspace.
#[derive(Debug)]
pub struct KvRepository {
    description: RepositoryDescription,
    refs: KvRefDatabase,
    objects: KvObjDatabase,
}

impl KvRepository {
    /// Opens the repository, provisioning its tables if needed.
    pub fn new(keyspace: Keyspace, session: Arc<dyn Session>, config: StoreConfig) -> Result<Self> {
        let refs = RefStore::new(keyspace.clone(), Arc::clone(&session), config.clone())?;
        let packs = PackStore::new(keyspace.clone(), session, config)?;
        tracing::info!(keyspace = %keyspace, "opened repository");
        Ok(Self {
            description: RepositoryDescription::new(keyspace),
            refs: KvRefDatabase::new(refs),
            objects: KvObjDatabase::new(packs),
        })
    }
}

impl DfsRepository for KvRepository {
    type RefDb = KvRefDatabase;
    type ObjDb = KvObjDatabase;

    fn description(&self) -> &RepositoryDescription {
        &self.description
    }

    fn ref_database(&self) -> &KvRefDatabase {
        &self.refs
    }

    fn obj_database(&self) -> &KvObjDatabase {
        &self.objects
    }
}
