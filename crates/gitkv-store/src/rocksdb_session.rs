//! RocksDB session.
//!
//! A durable single-node [`Session`]. Rows are stored as JSON in the `rows`
//! column family under `<keyspace>\0<table>\0<key>`; keyspace markers and
//! table schemas live in the `schema` column family. Every write takes one
//! process-local lock. RocksDB holds an exclusive lock on its directory, so
//! conditional writes are linearizable.

use crate::error::{SessionError, SessionResult};
use crate::session::{Applied, Condition, Page, PagingState, Row, Session, TableSchema};
use crate::Keyspace;
use parking_lot::{Mutex, RwLock};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const CF_ROWS: &str = "rows";
const CF_SCHEMA: &str = "schema";
const SEPARATOR: u8 = 0;

/// RocksDB session configuration.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory.
    pub path: PathBuf,

    /// Write buffer size in bytes.
    pub write_buffer_size: usize,

    /// Enable LZ4 compression.
    pub compression_enabled: bool,

    /// Sync the write-ahead log on every write.
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/gitkv"),
            write_buffer_size: 32 * 1024 * 1024, // 32 MB
            compression_enabled: true,
            sync_writes: false,
        }
    }
}

/// Durable [`Session`] over a local RocksDB database.
pub struct RocksDbSession {
    db: DB,
    config: RocksDbConfig,
    schemas: RwLock<HashMap<(Keyspace, String), TableSchema>>,
    write_lock: Mutex<()>,
    stats: RocksDbStats,
}

#[derive(Debug, Default)]
struct RocksDbStats {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

/// Snapshot of RocksDB session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RocksDbStatsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

fn db_err(e: rocksdb::Error) -> SessionError {
    SessionError::Io(std::io::Error::other(e.to_string()))
}

fn codec_err(e: serde_json::Error) -> SessionError {
    SessionError::Codec(e.to_string())
}

fn table_prefix(keyspace: &Keyspace, table: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(keyspace.as_str().len() + table.len() + 2);
    prefix.extend_from_slice(keyspace.as_str().as_bytes());
    prefix.push(SEPARATOR);
    prefix.extend_from_slice(table.as_bytes());
    prefix.push(SEPARATOR);
    prefix
}

fn row_key(keyspace: &Keyspace, table: &str, key: &str) -> Vec<u8> {
    let mut k = table_prefix(keyspace, table);
    k.extend_from_slice(key.as_bytes());
    k
}

fn keyspace_marker(keyspace: &Keyspace) -> Vec<u8> {
    keyspace.as_str().as_bytes().to_vec()
}

impl RocksDbSession {
    /// Opens or creates a database.
    pub fn open(config: RocksDbConfig) -> SessionResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        if config.compression_enabled {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_ROWS, opts.clone()),
            ColumnFamilyDescriptor::new(CF_SCHEMA, opts.clone()),
        ];
        let db = DB::open_cf_descriptors(&opts, &config.path, cfs).map_err(|e| {
            SessionError::Unavailable(format!("cannot open {}: {e}", config.path.display()))
        })?;
        tracing::info!(path = %config.path.display(), "opened rocksdb session");

        Ok(Self {
            db,
            config,
            schemas: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            stats: RocksDbStats::default(),
        })
    }

    /// Opens with default configuration at `path`.
    pub fn open_default<P: AsRef<Path>>(path: P) -> SessionResult<Self> {
        Self::open(RocksDbConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    /// Returns operation counters.
    pub fn stats(&self) -> RocksDbStatsSnapshot {
        RocksDbStatsSnapshot {
            reads: self.stats.reads.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
        }
    }

    /// Flushes memtables to disk.
    pub fn flush(&self) -> SessionResult<()> {
        self.db.flush_cf(self.rows_cf()?).map_err(db_err)
    }

    fn cf(&self, name: &str) -> SessionResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| SessionError::Unavailable(format!("missing column family {name}")))
    }

    fn rows_cf(&self) -> SessionResult<&ColumnFamily> {
        self.cf(CF_ROWS)
    }

    fn schema_cf(&self) -> SessionResult<&ColumnFamily> {
        self.cf(CF_SCHEMA)
    }

    fn write_options(&self) -> rocksdb::WriteOptions {
        let mut opts = rocksdb::WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn schema(&self, keyspace: &Keyspace, table: &str) -> SessionResult<TableSchema> {
        let cache_key = (keyspace.clone(), table.to_string());
        if let Some(schema) = self.schemas.read().get(&cache_key) {
            return Ok(schema.clone());
        }

        let stored = self
            .db
            .get_cf(self.schema_cf()?, table_prefix(keyspace, table))
            .map_err(db_err)?
            .ok_or_else(|| {
                SessionError::InvalidQuery(format!("unconfigured table {keyspace}.{table}"))
            })?;
        let schema: TableSchema = serde_json::from_slice(&stored).map_err(codec_err)?;
        self.schemas.write().insert(cache_key, schema.clone());
        Ok(schema)
    }

    fn load(&self, keyspace: &Keyspace, table: &str, key: &str) -> SessionResult<Option<Row>> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        match self
            .db
            .get_cf(self.rows_cf()?, row_key(keyspace, table, key))
            .map_err(db_err)?
        {
            Some(data) => Ok(Some(serde_json::from_slice(&data).map_err(codec_err)?)),
            None => Ok(None),
        }
    }

    fn store(&self, keyspace: &Keyspace, table: &str, row: &Row) -> SessionResult<()> {
        let data = serde_json::to_vec(row).map_err(codec_err)?;
        self.db
            .put_cf_opt(
                self.rows_cf()?,
                row_key(keyspace, table, row.key()),
                data,
                &self.write_options(),
            )
            .map_err(db_err)?;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn erase(&self, keyspace: &Keyspace, table: &str, key: &str) -> SessionResult<()> {
        self.db
            .delete_cf_opt(
                self.rows_cf()?,
                row_key(keyspace, table, key),
                &self.write_options(),
            )
            .map_err(db_err)?;
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Session for RocksDbSession {
    fn create_keyspace(&self, keyspace: &Keyspace) -> SessionResult<()> {
        let _guard = self.write_lock.lock();
        self.db
            .put_cf(self.schema_cf()?, keyspace_marker(keyspace), b"")
            .map_err(db_err)
    }

    fn create_table(&self, keyspace: &Keyspace, schema: &TableSchema) -> SessionResult<()> {
        let _guard = self.write_lock.lock();
        let schema_cf = self.schema_cf()?;
        if self
            .db
            .get_cf(schema_cf, keyspace_marker(keyspace))
            .map_err(db_err)?
            .is_none()
        {
            return Err(SessionError::InvalidQuery(format!(
                "keyspace {keyspace} does not exist"
            )));
        }

        let key = table_prefix(keyspace, &schema.name);
        if self.db.get_cf(schema_cf, &key).map_err(db_err)?.is_none() {
            let data = serde_json::to_vec(schema).map_err(codec_err)?;
            self.db.put_cf(schema_cf, &key, data).map_err(db_err)?;
            tracing::debug!(keyspace = %keyspace, table = %schema.name, "created table");
        }
        Ok(())
    }

    fn select(&self, keyspace: &Keyspace, table: &str, key: &str) -> SessionResult<Vec<Row>> {
        self.schema(keyspace, table)?;
        Ok(self.load(keyspace, table, key)?.into_iter().collect())
    }

    fn scan(
        &self,
        keyspace: &Keyspace,
        table: &str,
        paging: Option<&PagingState>,
        fetch_size: usize,
    ) -> SessionResult<Page> {
        self.schema(keyspace, table)?;
        self.stats.reads.fetch_add(1, Ordering::Relaxed);

        let prefix = table_prefix(keyspace, table);
        let (start, skip) = match paging {
            Some(state) => (row_key(keyspace, table, state.last_key()), true),
            None => (prefix.clone(), false),
        };

        let mut rows = Vec::with_capacity(fetch_size);
        let mut more = false;
        let iter = self
            .db
            .iterator_cf(self.rows_cf()?, IteratorMode::From(start.as_slice(), Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            if skip && key.as_ref() == start.as_slice() {
                continue;
            }
            if rows.len() == fetch_size {
                more = true;
                break;
            }
            rows.push(serde_json::from_slice::<Row>(&value).map_err(codec_err)?);
        }

        let next = match (more, rows.last()) {
            (true, Some(last)) => Some(PagingState::after(last.key())),
            _ => None,
        };
        Ok(Page { rows, next })
    }

    fn insert(&self, keyspace: &Keyspace, table: &str, row: Row) -> SessionResult<()> {
        self.schema(keyspace, table)?.validate(&row)?;
        let _guard = self.write_lock.lock();
        self.store(keyspace, table, &row)
    }

    fn delete(&self, keyspace: &Keyspace, table: &str, key: &str) -> SessionResult<()> {
        self.schema(keyspace, table)?;
        let _guard = self.write_lock.lock();
        self.erase(keyspace, table, key)
    }

    fn insert_if_not_exists(
        &self,
        keyspace: &Keyspace,
        table: &str,
        row: Row,
    ) -> SessionResult<Applied> {
        self.schema(keyspace, table)?.validate(&row)?;
        let _guard = self.write_lock.lock();
        if let Some(current) = self.load(keyspace, table, row.key())? {
            return Ok(Applied::no(Some(current)));
        }
        self.store(keyspace, table, &row)?;
        Ok(Applied::yes())
    }

    fn update_if(
        &self,
        keyspace: &Keyspace,
        table: &str,
        row: Row,
        conditions: &[Condition],
    ) -> SessionResult<Applied> {
        let schema = self.schema(keyspace, table)?;
        schema.validate(&row)?;
        schema.validate_conditions(conditions)?;
        let _guard = self.write_lock.lock();
        match self.load(keyspace, table, row.key())? {
            Some(current) if current.matches(conditions) => {
                self.store(keyspace, table, &row)?;
                Ok(Applied::yes())
            }
            current => Ok(Applied::no(current)),
        }
    }

    fn delete_if(
        &self,
        keyspace: &Keyspace,
        table: &str,
        key: &str,
        conditions: &[Condition],
    ) -> SessionResult<Applied> {
        self.schema(keyspace, table)?
            .validate_conditions(conditions)?;
        let _guard = self.write_lock.lock();
        match self.load(keyspace, table, key)? {
            Some(current) if current.matches(conditions) => {
                self.erase(keyspace, table, key)?;
                Ok(Applied::yes())
            }
            current => Ok(Applied::no(current)),
        }
    }
}

impl std::fmt::Debug for RocksDbSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbSession")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ColumnType;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RocksDbSession, Keyspace) {
        let dir = TempDir::new().unwrap();
        let session = RocksDbSession::open_default(dir.path()).unwrap();
        let ks = Keyspace::new("repo").unwrap();
        session.create_keyspace(&ks).unwrap();
        session
            .create_table(
                &ks,
                &TableSchema::new("pack_data").column("data", ColumnType::Blob),
            )
            .unwrap();
        (dir, session, ks)
    }

    #[test]
    fn test_blob_round_trip() {
        let (_dir, session, ks) = setup();
        let data = Bytes::from_static(b"\x00\xffPACK");
        session
            .insert(&ks, "pack_data", Row::new("p.pack").set("data", data.clone()))
            .unwrap();

        let rows = session.select(&ks, "pack_data", "p.pack").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].blob("data").unwrap(), &data);
        assert!(session.select(&ks, "pack_data", "p.idx").unwrap().is_empty());
    }

    #[test]
    fn test_unconfigured_table() {
        let (_dir, session, ks) = setup();
        assert!(matches!(
            session.select(&ks, "refs", "HEAD"),
            Err(SessionError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_scan_does_not_leak_across_tables() {
        let (_dir, session, ks) = setup();
        session
            .create_table(&ks, &TableSchema::new("pack_datb").column("data", ColumnType::Blob))
            .unwrap();
        for i in 0..5 {
            session
                .insert(&ks, "pack_data", Row::new(format!("k{i}")).set("data", Bytes::new()))
                .unwrap();
        }
        session
            .insert(&ks, "pack_datb", Row::new("other").set("data", Bytes::new()))
            .unwrap();

        let first = session.scan(&ks, "pack_data", None, 2).unwrap();
        assert_eq!(first.rows.len(), 2);
        let mut total = first.rows.len();
        let mut next = first.next;
        while let Some(state) = next {
            let page = session.scan(&ks, "pack_data", Some(&state), 2).unwrap();
            total += page.rows.len();
            next = page.next;
        }
        assert_eq!(total, 5);
    }

    #[test]
    fn test_schema_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let ks = Keyspace::new("repo").unwrap();
        {
            let session = RocksDbSession::open_default(dir.path()).unwrap();
            session.create_keyspace(&ks).unwrap();
            session
                .create_table(&ks, &TableSchema::new("t").column("v", ColumnType::Text))
                .unwrap();
            session.insert(&ks, "t", Row::new("a").set("v", "1")).unwrap();
        }

        let session = RocksDbSession::open_default(dir.path()).unwrap();
        let rows = session.select(&ks, "t", "a").unwrap();
        assert_eq!(rows[0].text("v").unwrap(), "1");
    }

    #[test]
    fn test_conditional_insert() {
        let (_dir, session, ks) = setup();
        let row = Row::new("x").set("data", Bytes::from_static(b"1"));
        assert!(session.insert_if_not_exists(&ks, "pack_data", row.clone()).unwrap().applied);
        let second = session
            .insert_if_not_exists(&ks, "pack_data", Row::new("x").set("data", Bytes::new()))
            .unwrap();
        assert!(!second.applied);
        assert_eq!(second.current, Some(row));
    }
}
