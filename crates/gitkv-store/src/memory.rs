//! In-memory session for tests and single-process use.

use crate::error::{SessionError, SessionResult};
use crate::session::{Applied, Condition, Page, PagingState, Row, Session, TableSchema};
use crate::Keyspace;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct Table {
    schema: TableSchema,
    rows: BTreeMap<String, Row>,
}

type Keyspaces = HashMap<Keyspace, HashMap<String, Table>>;

/// A thread-safe, in-memory [`Session`].
///
/// Every conditional operation runs under one write lock, so lightweight
/// transactions are linearizable.
#[derive(Debug, Default)]
pub struct MemorySession {
    keyspaces: RwLock<Keyspaces>,
    stats: MemoryStats,
}

#[derive(Debug, Default)]
struct MemoryStats {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    conditional: AtomicU64,
}

/// Snapshot of session operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Single-key selects and scan pages served.
    pub reads: u64,
    /// Unconditional inserts.
    pub writes: u64,
    /// Unconditional deletes.
    pub deletes: u64,
    /// Lightweight transactions attempted.
    pub conditional: u64,
}

impl MemorySession {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns operation counters.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            reads: self.stats.reads.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
            conditional: self.stats.conditional.load(Ordering::Relaxed),
        }
    }

    /// Returns true if the keyspace has been created.
    pub fn has_keyspace(&self, keyspace: &Keyspace) -> bool {
        self.keyspaces.read().contains_key(keyspace)
    }

    fn with_table<T>(
        &self,
        keyspace: &Keyspace,
        table: &str,
        f: impl FnOnce(&Table) -> SessionResult<T>,
    ) -> SessionResult<T> {
        let keyspaces = self.keyspaces.read();
        let t = lookup(&keyspaces, keyspace, table)?;
        f(t)
    }

    fn with_table_mut<T>(
        &self,
        keyspace: &Keyspace,
        table: &str,
        f: impl FnOnce(&mut Table) -> SessionResult<T>,
    ) -> SessionResult<T> {
        let mut keyspaces = self.keyspaces.write();
        let tables = keyspaces
            .get_mut(keyspace)
            .ok_or_else(|| SessionError::InvalidQuery(format!("keyspace {keyspace} does not exist")))?;
        let t = tables.get_mut(table).ok_or_else(|| {
            SessionError::InvalidQuery(format!("unconfigured table {keyspace}.{table}"))
        })?;
        f(t)
    }
}

fn lookup<'a>(keyspaces: &'a Keyspaces, keyspace: &Keyspace, table: &str) -> SessionResult<&'a Table> {
    keyspaces
        .get(keyspace)
        .ok_or_else(|| SessionError::InvalidQuery(format!("keyspace {keyspace} does not exist")))?
        .get(table)
        .ok_or_else(|| SessionError::InvalidQuery(format!("unconfigured table {keyspace}.{table}")))
}

impl Session for MemorySession {
    fn create_keyspace(&self, keyspace: &Keyspace) -> SessionResult<()> {
        self.keyspaces.write().entry(keyspace.clone()).or_default();
        Ok(())
    }

    fn create_table(&self, keyspace: &Keyspace, schema: &TableSchema) -> SessionResult<()> {
        let mut keyspaces = self.keyspaces.write();
        let tables = keyspaces
            .get_mut(keyspace)
            .ok_or_else(|| SessionError::InvalidQuery(format!("keyspace {keyspace} does not exist")))?;
        tables.entry(schema.name.clone()).or_insert_with(|| Table {
            schema: schema.clone(),
            rows: BTreeMap::new(),
        });
        Ok(())
    }

    fn select(&self, keyspace: &Keyspace, table: &str, key: &str) -> SessionResult<Vec<Row>> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        self.with_table(keyspace, table, |t| {
            Ok(t.rows.get(key).cloned().into_iter().collect())
        })
    }

    fn scan(
        &self,
        keyspace: &Keyspace,
        table: &str,
        paging: Option<&PagingState>,
        fetch_size: usize,
    ) -> SessionResult<Page> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        self.with_table(keyspace, table, |t| {
            let start = match paging {
                Some(state) => Bound::Excluded(state.last_key().to_string()),
                None => Bound::Unbounded,
            };
            let mut iter = t.rows.range((start, Bound::Unbounded));
            let rows: Vec<Row> = iter.by_ref().take(fetch_size).map(|(_, r)| r.clone()).collect();
            let next = match (iter.next(), rows.last()) {
                (Some(_), Some(last)) => Some(PagingState::after(last.key())),
                _ => None,
            };
            Ok(Page { rows, next })
        })
    }

    fn insert(&self, keyspace: &Keyspace, table: &str, row: Row) -> SessionResult<()> {
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        self.with_table_mut(keyspace, table, |t| {
            t.schema.validate(&row)?;
            t.rows.insert(row.key().to_string(), row);
            Ok(())
        })
    }

    fn delete(&self, keyspace: &Keyspace, table: &str, key: &str) -> SessionResult<()> {
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        self.with_table_mut(keyspace, table, |t| {
            t.rows.remove(key);
            Ok(())
        })
    }

    fn insert_if_not_exists(
        &self,
        keyspace: &Keyspace,
        table: &str,
        row: Row,
    ) -> SessionResult<Applied> {
        self.stats.conditional.fetch_add(1, Ordering::Relaxed);
        self.with_table_mut(keyspace, table, |t| {
            t.schema.validate(&row)?;
            if let Some(current) = t.rows.get(row.key()) {
                return Ok(Applied::no(Some(current.clone())));
            }
            t.rows.insert(row.key().to_string(), row);
            Ok(Applied::yes())
        })
    }

    fn update_if(
        &self,
        keyspace: &Keyspace,
        table: &str,
        row: Row,
        conditions: &[Condition],
    ) -> SessionResult<Applied> {
        self.stats.conditional.fetch_add(1, Ordering::Relaxed);
        self.with_table_mut(keyspace, table, |t| {
            t.schema.validate(&row)?;
            t.schema.validate_conditions(conditions)?;
            match t.rows.get(row.key()) {
                Some(current) if current.matches(conditions) => {
                    t.rows.insert(row.key().to_string(), row);
                    Ok(Applied::yes())
                }
                current => Ok(Applied::no(current.cloned())),
            }
        })
    }

    fn delete_if(
        &self,
        keyspace: &Keyspace,
        table: &str,
        key: &str,
        conditions: &[Condition],
    ) -> SessionResult<Applied> {
        self.stats.conditional.fetch_add(1, Ordering::Relaxed);
        self.with_table_mut(keyspace, table, |t| {
            t.schema.validate_conditions(conditions)?;
            match t.rows.get(key) {
                Some(current) if current.matches(conditions) => {
                    t.rows.remove(key);
                    Ok(Applied::yes())
                }
                current => Ok(Applied::no(current.cloned())),
            }
        })
    }
}
