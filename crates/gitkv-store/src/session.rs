//! Store session contract.
//!
//! A [`Session`] is the narrow interface this crate needs from the backing
//! key-value store: idempotent schema provisioning, single-key reads, paged
//! scans, upserts, deletes, and the store's lightweight-transaction
//! primitives. Connection management, retry and authentication belong to the
//! session implementation, never to the stores built on top of it.

use crate::error::{SessionError, SessionResult};
use crate::{Keyspace, Result, StorageError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name of the primary key column in every table.
pub const KEY_COLUMN: &str = "name";

/// Column types understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    BigInt,
    /// UTF-8 text.
    Text,
    /// Opaque bytes.
    Blob,
    /// Map from text to 64-bit integer.
    TextBigIntMap,
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// UTF-8 text.
    Text(String),
    /// Opaque bytes, hex encoded when serialized.
    Blob(#[serde(with = "hex_blob")] Bytes),
    /// Map from text to 64-bit integer.
    TextBigIntMap(BTreeMap<String, i64>),
}

impl Value {
    /// Returns the column type of this value.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Int(_) => ColumnType::Int,
            Value::BigInt(_) => ColumnType::BigInt,
            Value::Text(_) => ColumnType::Text,
            Value::Blob(_) => ColumnType::Blob,
            Value::TextBigIntMap(_) => ColumnType::TextBigIntMap,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Blob(v)
    }
}

impl From<BTreeMap<String, i64>> for Value {
    fn from(v: BTreeMap<String, i64>) -> Self {
        Value::TextBigIntMap(v)
    }
}

mod hex_blob {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Table definition: a text primary key named [`KEY_COLUMN`] plus typed columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Non-key columns and their types.
    pub columns: BTreeMap<String, ColumnType>,
}

impl TableSchema {
    /// Creates a schema with no columns besides the key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Adds a column.
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.insert(name.into(), column_type);
        self
    }

    /// Checks a row against this schema.
    pub fn validate(&self, row: &Row) -> SessionResult<()> {
        for (column, value) in &row.columns {
            match self.columns.get(column) {
                None => {
                    return Err(SessionError::InvalidQuery(format!(
                        "undefined column {column} in table {}",
                        self.name
                    )))
                }
                Some(expected) if *expected != value.column_type() => {
                    return Err(SessionError::InvalidQuery(format!(
                        "type mismatch for {}.{column}: expected {expected:?}, got {:?}",
                        self.name,
                        value.column_type()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Checks that every condition names a known column.
    pub fn validate_conditions(&self, conditions: &[Condition]) -> SessionResult<()> {
        for condition in conditions {
            if !self.columns.contains_key(&condition.column) {
                return Err(SessionError::InvalidQuery(format!(
                    "undefined column {} in condition on table {}",
                    condition.column, self.name
                )));
            }
        }
        Ok(())
    }
}

/// A row: primary key plus column values. Missing columns read as null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    key: String,
    columns: BTreeMap<String, Value>,
}

impl Row {
    /// Creates an empty row for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Sets a column value.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    /// Returns the primary key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns a column value, if set.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Returns all column values.
    pub fn columns(&self) -> &BTreeMap<String, Value> {
        &self.columns
    }

    /// Builds conditions requiring every column of this row to be unchanged.
    pub fn as_conditions(&self) -> Vec<Condition> {
        self.columns
            .iter()
            .map(|(column, value)| Condition::equals(column.clone(), value.clone()))
            .collect()
    }

    /// Returns true if the row satisfies all conditions.
    pub fn matches(&self, conditions: &[Condition]) -> bool {
        conditions
            .iter()
            .all(|c| self.columns.get(&c.column) == Some(&c.value))
    }

    /// Reads a text column.
    pub fn text(&self, column: &str) -> Result<&str> {
        match self.require(column)? {
            Value::Text(v) => Ok(v),
            other => Err(self.mismatch(column, other)),
        }
    }

    /// Reads an int column.
    pub fn int(&self, column: &str) -> Result<i32> {
        match self.require(column)? {
            Value::Int(v) => Ok(*v),
            other => Err(self.mismatch(column, other)),
        }
    }

    /// Reads a bigint column.
    pub fn bigint(&self, column: &str) -> Result<i64> {
        match self.require(column)? {
            Value::BigInt(v) => Ok(*v),
            other => Err(self.mismatch(column, other)),
        }
    }

    /// Reads a blob column.
    pub fn blob(&self, column: &str) -> Result<&Bytes> {
        match self.require(column)? {
            Value::Blob(v) => Ok(v),
            other => Err(self.mismatch(column, other)),
        }
    }

    /// Reads a map column. An empty map is stored as null, so null reads as empty.
    pub fn text_bigint_map(&self, column: &str) -> Result<BTreeMap<String, i64>> {
        match self.columns.get(column) {
            None => Ok(BTreeMap::new()),
            Some(Value::TextBigIntMap(v)) => Ok(v.clone()),
            Some(other) => Err(self.mismatch(column, other)),
        }
    }

    fn require(&self, column: &str) -> Result<&Value> {
        self.columns.get(column).ok_or_else(|| {
            StorageError::inconsistent(format!("row {} has null column {column}", self.key))
        })
    }

    fn mismatch(&self, column: &str, value: &Value) -> StorageError {
        StorageError::inconsistent(format!(
            "row {} column {column} has unexpected type {:?}",
            self.key,
            value.column_type()
        ))
    }
}

/// Equality condition on one column, used by lightweight transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Column name.
    pub column: String,
    /// Required current value.
    pub value: Value,
}

impl Condition {
    /// Creates a `column = value` condition.
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Outcome of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Whether the write was applied.
    pub applied: bool,
    /// The current row when the write was not applied.
    pub current: Option<Row>,
}

impl Applied {
    /// A successful conditional write.
    pub fn yes() -> Self {
        Self {
            applied: true,
            current: None,
        }
    }

    /// A rejected conditional write with the row found in its place.
    pub fn no(current: Option<Row>) -> Self {
        Self {
            applied: false,
            current,
        }
    }
}

/// Opaque position of a paged scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingState(String);

impl PagingState {
    /// Creates a paging state resuming after `last_key`.
    pub fn after(last_key: impl Into<String>) -> Self {
        Self(last_key.into())
    }

    /// Returns the last key of the previous page.
    pub fn last_key(&self) -> &str {
        &self.0
    }
}

/// One page of a scan.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Rows in this page.
    pub rows: Vec<Row>,
    /// Where the next page starts, or `None` when the scan is exhausted.
    pub next: Option<PagingState>,
}

/// Connection to the backing key-value store.
///
/// All methods are blocking. Implementations must be safe for concurrent use.
pub trait Session: Send + Sync {
    /// Creates the keyspace if it does not already exist.
    fn create_keyspace(&self, keyspace: &Keyspace) -> SessionResult<()>;

    /// Creates the table if it does not already exist.
    fn create_table(&self, keyspace: &Keyspace, schema: &TableSchema) -> SessionResult<()>;

    /// Returns every row whose primary key equals `key`.
    fn select(&self, keyspace: &Keyspace, table: &str, key: &str) -> SessionResult<Vec<Row>>;

    /// Returns up to `fetch_size` rows following `paging`.
    fn scan(
        &self,
        keyspace: &Keyspace,
        table: &str,
        paging: Option<&PagingState>,
        fetch_size: usize,
    ) -> SessionResult<Page>;

    /// Writes a row, replacing any existing row with the same key.
    fn insert(&self, keyspace: &Keyspace, table: &str, row: Row) -> SessionResult<()>;

    /// Deletes the row for `key`. Deleting a missing row is not an error.
    fn delete(&self, keyspace: &Keyspace, table: &str, key: &str) -> SessionResult<()>;

    /// Writes the row only if no row with its key exists.
    fn insert_if_not_exists(
        &self,
        keyspace: &Keyspace,
        table: &str,
        row: Row,
    ) -> SessionResult<Applied>;

    /// Replaces the row only if it exists and satisfies every condition.
    fn update_if(
        &self,
        keyspace: &Keyspace,
        table: &str,
        row: Row,
        conditions: &[Condition],
    ) -> SessionResult<Applied>;

    /// Deletes the row only if it exists and satisfies every condition.
    fn delete_if(
        &self,
        keyspace: &Keyspace,
        table: &str,
        key: &str,
        conditions: &[Condition],
    ) -> SessionResult<Applied>;
}

impl<T: Session + ?Sized> Session for Arc<T> {
    fn create_keyspace(&self, keyspace: &Keyspace) -> SessionResult<()> {
        (**self).create_keyspace(keyspace)
    }

    fn create_table(&self, keyspace: &Keyspace, schema: &TableSchema) -> SessionResult<()> {
        (**self).create_table(keyspace, schema)
    }

    fn select(&self, keyspace: &Keyspace, table: &str, key: &str) -> SessionResult<Vec<Row>> {
        (**self).select(keyspace, table, key)
    }

    fn scan(
        &self,
        keyspace: &Keyspace,
        table: &str,
        paging: Option<&PagingState>,
        fetch_size: usize,
    ) -> SessionResult<Page> {
        (**self).scan(keyspace, table, paging, fetch_size)
    }

    fn insert(&self, keyspace: &Keyspace, table: &str, row: Row) -> SessionResult<()> {
        (**self).insert(keyspace, table, row)
    }

    fn delete(&self, keyspace: &Keyspace, table: &str, key: &str) -> SessionResult<()> {
        (**self).delete(keyspace, table, key)
    }

    fn insert_if_not_exists(
        &self,
        keyspace: &Keyspace,
        table: &str,
        row: Row,
    ) -> SessionResult<Applied> {
        (**self).insert_if_not_exists(keyspace, table, row)
    }

    fn update_if(
        &self,
        keyspace: &Keyspace,
        table: &str,
        row: Row,
        conditions: &[Condition],
    ) -> SessionResult<Applied> {
        (**self).update_if(keyspace, table, row, conditions)
    }

    fn delete_if(
        &self,
        keyspace: &Keyspace,
        table: &str,
        key: &str,
        conditions: &[Condition],
    ) -> SessionResult<Applied> {
        (**self).delete_if(keyspace, table, key, conditions)
    }
}

/// Lazily pages through a whole table.
///
/// Each call to [`Iterator::next`] that drains the current page fetches the
/// next one. A failed fetch is yielded once and ends the scan.
pub struct RowScan<'a> {
    session: &'a dyn Session,
    keyspace: &'a Keyspace,
    table: &'a str,
    fetch_size: usize,
    buffer: std::vec::IntoIter<Row>,
    paging: Option<PagingState>,
    exhausted: bool,
}

impl<'a> RowScan<'a> {
    /// Starts a scan at the beginning of `table`.
    pub fn new(
        session: &'a dyn Session,
        keyspace: &'a Keyspace,
        table: &'a str,
        fetch_size: usize,
    ) -> Self {
        Self {
            session,
            keyspace,
            table,
            fetch_size: fetch_size.max(1),
            buffer: Vec::new().into_iter(),
            paging: None,
            exhausted: false,
        }
    }
}

impl Iterator for RowScan<'_> {
    type Item = SessionResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffer.next() {
                return Some(Ok(row));
            }
            if self.exhausted {
                return None;
            }
            match self.session.scan(
                self.keyspace,
                self.table,
                self.paging.as_ref(),
                self.fetch_size,
            ) {
                Ok(page) => {
                    tracing::trace!(
                        keyspace = %self.keyspace,
                        table = self.table,
                        rows = page.rows.len(),
                        "fetched page"
                    );
                    self.exhausted = page.next.is_none();
                    self.paging = page.next;
                    self.buffer = page.rows.into_iter();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
