//! Registry of open repositories.

use crate::repository::KvRepository;
use crate::Result;
use gitkv_store::{Keyspace, Session, StoreConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Create-or-get cache of repositories sharing one session.
///
/// Entries are created on first [`open`](Self::open) and never evicted.
pub struct RepositoryRegistry {
    session: Arc<dyn Session>,
    config: StoreConfig,
    repositories: RwLock<HashMap<Keyspace, Arc<KvRepository>>>,
}

impl RepositoryRegistry {
    pub fn new(session: Arc<dyn Session>, config: StoreConfig) -> Self {
        Self {
            session,
            config,
            repositories: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the repository called `name`, opening it on first use.
    ///
    /// The name must be a valid keyspace; an invalid name fails without
    /// touching the session.
    ///
    /// Provisioning runs without holding the registry lock. Concurrent first
    /// opens of one name may both provision, which is idempotent, and all
    /// of them get the instance that was registered first.
    pub fn open(&self, name: &str) -> Result<Arc<KvRepository>> {
        let keyspace = Keyspace::new(name)?;
        if let Some(repo) = self.repositories.read().get(&keyspace) {
            return Ok(Arc::clone(repo));
        }

        let repo = Arc::new(KvRepository::new(
            keyspace.clone(),
            Arc::clone(&self.session),
            self.config.clone(),
        )?);
        let mut repositories = self.repositories.write();
        Ok(Arc::clone(repositories.entry(keyspace).or_insert(repo)))
    }

    /// Returns the repository if it has already been opened.
    pub fn get(&self, name: &str) -> Option<Arc<KvRepository>> {
        let keyspace = Keyspace::new(name).ok()?;
        self.repositories.read().get(&keyspace).cloned()
    }

    /// Names of every opened repository, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .repositories
            .read()
            .keys()
            .map(|k| k.as_str().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.repositories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.read().is_empty()
    }
}

impl std::fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryRegistry")
            .field("config", &self.config)
            .field("repositories", &self.names())
            .finish_non_exhaustive()
    }
}
