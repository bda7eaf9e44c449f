//! Reference database over the key-value reference store.

use crate::traits::RefDatabase;
use crate::Result;
use gitkv_store::{Ref, RefStore};
use std::collections::BTreeMap;

/// Snapshot of every reference, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefCache {
    refs: BTreeMap<String, Ref>,
    symbolic: BTreeMap<String, Ref>,
}

impl RefCache {
    /// Builds a snapshot from references in any order.
    pub fn from_refs(refs: impl IntoIterator<Item = Ref>) -> Self {
        let mut cache = Self::default();
        for r in refs {
            if r.is_symbolic() {
                cache.symbolic.insert(r.name().to_string(), r.clone());
            }
            cache.refs.insert(r.name().to_string(), r);
        }
        cache
    }

    /// Looks up one reference.
    pub fn get(&self, name: &str) -> Option<&Ref> {
        self.refs.get(name)
    }

    /// All references in name order.
    pub fn refs(&self) -> impl Iterator<Item = &Ref> {
        self.refs.values()
    }

    /// Symbolic references in name order.
    pub fn symbolic(&self) -> impl Iterator<Item = &Ref> {
        self.symbolic.values()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// [`RefDatabase`] backed by a [`RefStore`].
#[derive(Debug)]
pub struct KvRefDatabase {
    store: RefStore,
}

impl KvRefDatabase {
    pub fn new(store: RefStore) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &RefStore {
        &self.store
    }
}

impl RefDatabase for KvRefDatabase {
    fn exact_ref(&self, name: &str) -> Result<Option<Ref>> {
        Ok(self.store.get(name)?)
    }

    fn compare_and_put(&self, old_ref: Option<&Ref>, new_ref: &Ref) -> Result<bool> {
        let name = new_ref.name();
        let updated = match old_ref {
            None => self.store.put_if_absent(name, new_ref)?.is_none(),
            Some(old_ref) => self.store.replace(name, old_ref, new_ref)?,
        };
        if !updated {
            tracing::debug!(keyspace = %self.store.keyspace(), name, "reference update rejected");
        }
        Ok(updated)
    }

    fn compare_and_remove(&self, old_ref: &Ref) -> Result<bool> {
        Ok(self.store.remove(old_ref.name(), old_ref)?)
    }

    fn scan_all_refs(&self) -> Result<RefCache> {
        let refs = self.store.values().collect::<gitkv_store::Result<Vec<_>>>()?;
        tracing::debug!(keyspace = %self.store.keyspace(), count = refs.len(), "scanned references");
        Ok(RefCache::from_refs(refs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitkv_store::ObjectId;

    #[test]
    fn test_cache_sorts_and_splits_symbolic() {
        let id = ObjectId::from_bytes([1; 20]);
        let cache = RefCache::from_refs(vec![
            Ref::unpeeled("refs/heads/z", id),
            Ref::symbolic("HEAD", "refs/heads/z"),
            Ref::unpeeled("refs/heads/a", id),
        ]);

        let names: Vec<&str> = cache.refs().map(|r| r.name()).collect();
        assert_eq!(names, vec!["HEAD", "refs/heads/a", "refs/heads/z"]);
        let symbolic: Vec<&str> = cache.symbolic().map(|r| r.name()).collect();
        assert_eq!(symbolic, vec!["HEAD"]);
        assert_eq!(cache.len(), 3);
        assert!(cache.get("refs/heads/a").is_some());
    }
}
