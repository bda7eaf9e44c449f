//! Pack descriptor and pack data storage.
//!
//! Descriptors live in `pack_desc`, one row per pack. Each file of a pack
//! lives in `pack_data` under the key `<pack-name>.<extension>`. Neither table
//! offers multi-row atomicity, so a commit is a sequence of row writes whose
//! order is chosen by [`CommitOrder`].

use crate::codec;
use crate::config::{CommitOrder, StoreConfig};
use crate::pack::{PackDescription, PackExt, PackSource};
use crate::session::{ColumnType, Row, RowScan, Session, TableSchema};
use crate::{Keyspace, Result, StorageError};
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Name of the pack descriptor table.
pub const PACK_DESC_TABLE: &str = "pack_desc";

/// Name of the pack data table.
pub const PACK_DATA_TABLE: &str = "pack_data";

const COL_SOURCE: &str = "source";
const COL_LAST_MODIFIED: &str = "last_modified";
const COL_SIZE_MAP: &str = "size_map";
const COL_OBJECT_COUNT: &str = "object_count";
const COL_DELTA_COUNT: &str = "delta_count";
const COL_EXTENSIONS: &str = "extensions";
const COL_INDEX_VERSION: &str = "index_version";
const COL_DATA: &str = "data";

/// Pack store backed by the `pack_desc` and `pack_data` tables.
pub struct PackStore {
    keyspace: Keyspace,
    session: Arc<dyn Session>,
    config: StoreConfig,
}

impl PackStore {
    /// Opens the store, creating the keyspace and tables if they do not exist.
    pub fn new(keyspace: Keyspace, session: Arc<dyn Session>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let store = Self {
            keyspace,
            session,
            config,
        };
        store.create_schema_if_not_exists()?;
        Ok(store)
    }

    /// Schema of the descriptor table.
    pub fn desc_schema() -> TableSchema {
        TableSchema::new(PACK_DESC_TABLE)
            .column(COL_SOURCE, ColumnType::Int)
            .column(COL_LAST_MODIFIED, ColumnType::BigInt)
            .column(COL_SIZE_MAP, ColumnType::TextBigIntMap)
            .column(COL_OBJECT_COUNT, ColumnType::BigInt)
            .column(COL_DELTA_COUNT, ColumnType::BigInt)
            .column(COL_EXTENSIONS, ColumnType::Int)
            .column(COL_INDEX_VERSION, ColumnType::Int)
    }

    /// Schema of the data table.
    pub fn data_schema() -> TableSchema {
        TableSchema::new(PACK_DATA_TABLE).column(COL_DATA, ColumnType::Blob)
    }

    /// Returns the keyspace this store writes to.
    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Generates a fresh pack name: `pack-<random id>-<SOURCE>`.
    ///
    /// Uniqueness rests on the random id; existing rows are not checked.
    pub fn new_pack_name(source: PackSource) -> String {
        format!("pack-{}-{}", uuid::Uuid::new_v4().simple(), source)
    }

    /// Creates an in-memory descriptor for a new pack. Nothing is written.
    pub fn new_pack(&self, source: PackSource) -> PackDescription {
        let mut desc = PackDescription::new(Self::new_pack_name(source), source);
        desc.set_last_modified(chrono::Utc::now().timestamp_millis());
        tracing::debug!(keyspace = %self.keyspace, pack = desc.name(), "new pack");
        desc
    }

    /// Upserts every descriptor, in order.
    ///
    /// All descriptors are validated before the first write. A failure midway
    /// leaves the earlier descriptors written.
    pub fn insert_desc(&self, descs: &[PackDescription]) -> Result<()> {
        let rows = descs
            .iter()
            .map(desc_to_row)
            .collect::<Result<Vec<_>>>()?;
        for row in rows {
            tracing::debug!(keyspace = %self.keyspace, pack = row.key(), "insert pack descriptor");
            self.session.insert(&self.keyspace, PACK_DESC_TABLE, row)?;
        }
        Ok(())
    }

    /// Deletes every descriptor by name. Missing names are ignored.
    pub fn remove_desc(&self, descs: &[PackDescription]) -> Result<()> {
        for desc in descs {
            tracing::debug!(keyspace = %self.keyspace, pack = desc.name(), "remove pack descriptor");
            self.session
                .delete(&self.keyspace, PACK_DESC_TABLE, desc.name())?;
        }
        Ok(())
    }

    /// Returns every committed descriptor. Order is unspecified.
    pub fn list_packs(&self) -> Result<Vec<PackDescription>> {
        RowScan::new(
            &*self.session,
            &self.keyspace,
            PACK_DESC_TABLE,
            self.config.fetch_size,
        )
        .map(|row| row_to_desc(&row?))
        .collect()
    }

    /// Makes `descs` durable and retires `replaces`.
    ///
    /// Ordering follows [`StoreConfig::commit_order`]. With
    /// [`CommitOrder::InsertThenRemove`] a name present in both sets is kept.
    pub fn commit(&self, descs: &[PackDescription], replaces: &[PackDescription]) -> Result<()> {
        for desc in descs {
            desc.validate()?;
        }
        match self.config.commit_order {
            CommitOrder::InsertThenRemove => {
                self.insert_desc(descs)?;
                let inserted: HashSet<&str> = descs.iter().map(|d| d.name()).collect();
                let retired: Vec<PackDescription> = replaces
                    .iter()
                    .filter(|d| !inserted.contains(d.name()))
                    .cloned()
                    .collect();
                self.remove_desc(&retired)?;
            }
            CommitOrder::RemoveThenInsert => {
                self.remove_desc(replaces)?;
                self.insert_desc(descs)?;
            }
        }
        tracing::info!(
            keyspace = %self.keyspace,
            inserted = descs.len(),
            replaced = replaces.len(),
            "committed packs"
        );
        Ok(())
    }

    /// Reads the bytes of one pack file.
    ///
    /// Fails with [`StorageError::NotFound`] if the file was never written.
    pub fn read_file(&self, desc: &PackDescription, ext: PackExt) -> Result<Bytes> {
        let name = desc.file_name(ext);
        let mut rows = self.session.select(&self.keyspace, PACK_DATA_TABLE, &name)?;
        match rows.len() {
            0 => Err(StorageError::NotFound(name)),
            1 => {
                let row = rows.remove(0);
                let data = row.blob(COL_DATA)?.clone();
                tracing::debug!(keyspace = %self.keyspace, file = %name, bytes = data.len(), "read pack file");
                Ok(data)
            }
            _ => Err(StorageError::inconsistent(format!(
                "multiple rows for a single file: {name}"
            ))),
        }
    }

    /// Writes the bytes of one pack file, replacing any previous content.
    pub fn write_file(&self, desc: &PackDescription, ext: PackExt, data: Bytes) -> Result<()> {
        let name = desc.file_name(ext);
        tracing::debug!(keyspace = %self.keyspace, file = %name, bytes = data.len(), "write pack file");
        self.session.insert(
            &self.keyspace,
            PACK_DATA_TABLE,
            Row::new(name).set(COL_DATA, data),
        )?;
        Ok(())
    }

    /// Deletes one pack file. Deleting a missing file is not an error.
    pub fn delete_file(&self, desc: &PackDescription, ext: PackExt) -> Result<()> {
        let name = desc.file_name(ext);
        tracing::debug!(keyspace = %self.keyspace, file = %name, "delete pack file");
        self.session.delete(&self.keyspace, PACK_DATA_TABLE, &name)?;
        Ok(())
    }

    fn create_schema_if_not_exists(&self) -> Result<()> {
        self.session.create_keyspace(&self.keyspace)?;
        self.session
            .create_table(&self.keyspace, &Self::desc_schema())?;
        self.session
            .create_table(&self.keyspace, &Self::data_schema())?;
        tracing::info!(keyspace = %self.keyspace, "pack schema ready");
        Ok(())
    }
}

impl fmt::Debug for PackStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackStore")
            .field("keyspace", &self.keyspace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn to_stored(name: &str, field: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        StorageError::invalid(format!("pack {name}: {field} {value} does not fit a bigint"))
    })
}

fn from_stored(name: &str, field: &str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| {
        StorageError::inconsistent(format!("pack {name}: negative {field} {value}"))
    })
}

fn desc_to_row(desc: &PackDescription) -> Result<Row> {
    desc.validate()?;
    let name = desc.name();

    let mut sizes = BTreeMap::new();
    for (extension, size) in codec::size_map(desc) {
        let stored = to_stored(name, "file size", size)?;
        sizes.insert(extension, stored);
    }

    // The bitmask column is a signed int; bit 31 maps onto the sign bit.
    #[allow(clippy::cast_possible_wrap)]
    let extensions = codec::extension_bits(desc) as i32;

    Ok(Row::new(name)
        .set(COL_SOURCE, desc.source().ordinal())
        .set(COL_LAST_MODIFIED, desc.last_modified())
        .set(COL_SIZE_MAP, sizes)
        .set(COL_OBJECT_COUNT, to_stored(name, "object count", desc.object_count())?)
        .set(COL_DELTA_COUNT, to_stored(name, "delta count", desc.delta_count())?)
        .set(COL_EXTENSIONS, extensions)
        .set(COL_INDEX_VERSION, desc.index_version()))
}

fn row_to_desc(row: &Row) -> Result<PackDescription> {
    let name = row.key();
    let source = PackSource::from_ordinal(row.int(COL_SOURCE)?)?;
    let mut desc = PackDescription::new(name, source);
    desc.set_last_modified(row.bigint(COL_LAST_MODIFIED)?);

    let mut sizes = BTreeMap::new();
    for (extension, size) in row.text_bigint_map(COL_SIZE_MAP)? {
        let size = from_stored(name, "file size", size)?;
        sizes.insert(extension, size);
    }
    codec::apply_size_map(&mut desc, &sizes)?;

    desc.set_object_count(from_stored(name, "object count", row.bigint(COL_OBJECT_COUNT)?)?);
    desc.set_delta_count(from_stored(name, "delta count", row.bigint(COL_DELTA_COUNT)?)?);

    #[allow(clippy::cast_sign_loss)]
    let bits = row.int(COL_EXTENSIONS)? as u32;
    codec::apply_extension_bits(&mut desc, bits);
    desc.set_index_version(row.int(COL_INDEX_VERSION)?);
    Ok(desc)
}
