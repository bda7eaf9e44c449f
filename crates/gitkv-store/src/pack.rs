//! Pack model: extension categories, pack sources and pack descriptors.

use crate::{Result, StorageError};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Maximum number of extension categories. The stored bitmask is 32 bits wide.
pub const MAX_EXTENSIONS: usize = 32;

const BUILTIN_EXTENSIONS: [&str; 5] = ["pack", "idx", "keep", "bitmap", "ref"];

static GLOBAL_REGISTRY: Lazy<ExtensionRegistry> = Lazy::new(ExtensionRegistry::new);

/// Append-only table of pack file extensions.
///
/// An extension's position in the table is its bit in the stored bitmask.
/// Positions never change once assigned. There is one table per process,
/// reached through [`ExtensionRegistry::global`], so a [`PackExt`] always
/// names an entry of that table:
///
/// ```compile_fail
/// let local = gitkv_store::ExtensionRegistry::new();
/// ```
#[derive(Debug)]
pub struct ExtensionRegistry {
    extensions: RwLock<Vec<Arc<str>>>,
}

impl ExtensionRegistry {
    /// Creates a registry holding only the built-in extensions.
    fn new() -> Self {
        Self {
            extensions: RwLock::new(BUILTIN_EXTENSIONS.iter().map(|e| Arc::from(*e)).collect()),
        }
    }

    /// Returns the process-wide registry.
    pub fn global() -> &'static ExtensionRegistry {
        &GLOBAL_REGISTRY
    }

    /// Finds a registered extension.
    pub fn lookup(&self, extension: &str) -> Option<PackExt> {
        position_of(&self.extensions.read(), extension)
    }

    /// Finds an extension, registering it at the next free position if unknown.
    pub fn lookup_or_register(&self, extension: &str) -> Result<PackExt> {
        if extension.is_empty() || extension.contains('.') {
            return Err(StorageError::invalid(format!(
                "invalid pack extension {extension:?}"
            )));
        }
        if let Some(ext) = self.lookup(extension) {
            return Ok(ext);
        }

        let mut extensions = self.extensions.write();
        // Another thread may have registered it between the two locks.
        if let Some(ext) = position_of(&extensions, extension) {
            return Ok(ext);
        }
        if extensions.len() >= MAX_EXTENSIONS {
            return Err(StorageError::inconsistent(format!(
                "cannot register pack extension {extension:?}: all {MAX_EXTENSIONS} bits in use"
            )));
        }
        extensions.push(Arc::from(extension));
        let ext = PackExt((extensions.len() - 1) as u8);
        tracing::info!(ext = extension, position = ext.0, "registered pack extension");
        Ok(ext)
    }

    /// Returns every registered extension in position order.
    pub fn values(&self) -> Vec<PackExt> {
        (0..self.extensions.read().len())
            .map(|pos| PackExt(pos as u8))
            .collect()
    }

    /// Number of registered extensions.
    pub fn len(&self) -> usize {
        self.extensions.read().len()
    }

    /// Returns true if nothing is registered. Never true in practice.
    pub fn is_empty(&self) -> bool {
        self.extensions.read().is_empty()
    }

    fn extension(&self, ext: PackExt) -> Option<Arc<str>> {
        self.extensions.read().get(ext.0 as usize).cloned()
    }
}

fn position_of(extensions: &[Arc<str>], extension: &str) -> Option<PackExt> {
    extensions
        .iter()
        .position(|e| e.as_ref() == extension)
        .map(|pos| PackExt(pos as u8))
}

/// A pack file extension category, identified by its registry position.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackExt(u8);

impl PackExt {
    /// The pack data file.
    pub const PACK: PackExt = PackExt(0);
    /// The pack index.
    pub const INDEX: PackExt = PackExt(1);
    /// Keep marker.
    pub const KEEP: PackExt = PackExt(2);
    /// Reachability bitmap index.
    pub const BITMAP_INDEX: PackExt = PackExt(3);
    /// Reference table.
    pub const REFTABLE: PackExt = PackExt(4);

    /// Finds a registered extension in the process-wide registry.
    pub fn lookup(extension: &str) -> Option<PackExt> {
        ExtensionRegistry::global().lookup(extension)
    }

    /// Finds or registers an extension in the process-wide registry.
    pub fn lookup_or_register(extension: &str) -> Result<PackExt> {
        ExtensionRegistry::global().lookup_or_register(extension)
    }

    /// Every extension in the process-wide registry.
    pub fn values() -> Vec<PackExt> {
        ExtensionRegistry::global().values()
    }

    /// Position in the registry.
    pub fn position(self) -> u32 {
        u32::from(self.0)
    }

    /// Bit in the stored extension bitmask.
    pub fn bit(self) -> u32 {
        1 << self.0
    }

    /// The extension string, such as `pack` or `idx`.
    pub fn extension(self) -> Arc<str> {
        ExtensionRegistry::global()
            .extension(self)
            .unwrap_or_else(|| Arc::from(format!("ext{}", self.0)))
    }
}

impl fmt::Display for PackExt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extension())
    }
}

impl fmt::Debug for PackExt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackExt({})", self.extension())
    }
}

/// Where a pack came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackSource {
    /// Written by an object inserter.
    Insert,
    /// Received from a push.
    Receive,
    /// Produced by compaction.
    Compact,
    /// Produced by garbage collection.
    Gc,
    /// Remaining objects after garbage collection.
    GcRest,
    /// Transaction objects kept by garbage collection.
    GcTxn,
    /// Unreachable objects set aside by garbage collection.
    UnreachableGarbage,
}

impl PackSource {
    /// All sources in ordinal order.
    pub const ALL: [PackSource; 7] = [
        PackSource::Insert,
        PackSource::Receive,
        PackSource::Compact,
        PackSource::Gc,
        PackSource::GcRest,
        PackSource::GcTxn,
        PackSource::UnreachableGarbage,
    ];

    /// Stored ordinal.
    pub fn ordinal(self) -> i32 {
        match self {
            PackSource::Insert => 0,
            PackSource::Receive => 1,
            PackSource::Compact => 2,
            PackSource::Gc => 3,
            PackSource::GcRest => 4,
            PackSource::GcTxn => 5,
            PackSource::UnreachableGarbage => 6,
        }
    }

    /// Parses a stored ordinal.
    pub fn from_ordinal(ordinal: i32) -> Result<Self> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or_else(|| StorageError::inconsistent(format!("unknown pack source: {ordinal}")))
    }

    /// Upper-case tag used in pack names.
    pub fn as_str(self) -> &'static str {
        match self {
            PackSource::Insert => "INSERT",
            PackSource::Receive => "RECEIVE",
            PackSource::Compact => "COMPACT",
            PackSource::Gc => "GC",
            PackSource::GcRest => "GC_REST",
            PackSource::GcTxn => "GC_TXN",
            PackSource::UnreachableGarbage => "UNREACHABLE_GARBAGE",
        }
    }
}

impl fmt::Display for PackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackSource {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StorageError::invalid(format!("unknown pack source: {s}")))
    }
}

/// Metadata for one pack.
///
/// Built in memory while a pack is written and made durable by a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackDescription {
    name: String,
    source: PackSource,
    last_modified: i64,
    sizes: BTreeMap<PackExt, u64>,
    extensions: BTreeSet<PackExt>,
    object_count: u64,
    delta_count: u64,
    index_version: i32,
}

impl PackDescription {
    /// Creates an empty descriptor.
    pub fn new(name: impl Into<String>, source: PackSource) -> Self {
        Self {
            name: name.into(),
            source,
            last_modified: 0,
            sizes: BTreeMap::new(),
            extensions: BTreeSet::new(),
            object_count: 0,
            delta_count: 0,
            index_version: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> PackSource {
        self.source
    }

    /// Last modification time in milliseconds since the Unix epoch.
    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    pub fn set_last_modified(&mut self, millis: i64) {
        self.last_modified = millis;
    }

    /// Last modification time as a UTC timestamp, if representable.
    pub fn last_modified_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.last_modified)
    }

    /// Recorded size of the file with extension `ext`, zero if unknown.
    pub fn file_size(&self, ext: PackExt) -> u64 {
        self.sizes.get(&ext).copied().unwrap_or(0)
    }

    pub fn set_file_size(&mut self, ext: PackExt, size: u64) {
        self.sizes.insert(ext, size);
    }

    /// Whether the file with extension `ext` is marked present.
    pub fn has_file_ext(&self, ext: PackExt) -> bool {
        self.extensions.contains(&ext)
    }

    pub fn add_file_ext(&mut self, ext: PackExt) {
        self.extensions.insert(ext);
    }

    /// Records a written file: sets its size and marks it present when non-empty.
    pub fn record_file(&mut self, ext: PackExt, size: u64) {
        self.set_file_size(ext, size);
        if size > 0 {
            self.add_file_ext(ext);
        }
    }

    /// Extensions marked present, in position order.
    pub fn file_exts(&self) -> impl Iterator<Item = PackExt> + '_ {
        self.extensions.iter().copied()
    }

    /// Recorded sizes, including zero sizes, in position order.
    pub fn file_sizes(&self) -> impl Iterator<Item = (PackExt, u64)> + '_ {
        self.sizes.iter().map(|(ext, size)| (*ext, *size))
    }

    /// Name of the blob holding the file with extension `ext`.
    pub fn file_name(&self, ext: PackExt) -> String {
        format!("{}.{}", self.name, ext.extension())
    }

    pub fn object_count(&self) -> u64 {
        self.object_count
    }

    pub fn set_object_count(&mut self, count: u64) {
        self.object_count = count;
    }

    pub fn delta_count(&self) -> u64 {
        self.delta_count
    }

    pub fn set_delta_count(&mut self, count: u64) {
        self.delta_count = count;
    }

    pub fn index_version(&self) -> i32 {
        self.index_version
    }

    pub fn set_index_version(&mut self, version: i32) {
        self.index_version = version;
    }

    /// Checks that the present extensions are exactly those with a positive size.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StorageError::invalid("pack name is empty"));
        }
        let sized: BTreeSet<PackExt> = self
            .sizes
            .iter()
            .filter(|(_, size)| **size > 0)
            .map(|(ext, _)| *ext)
            .collect();
        if sized != self.extensions {
            return Err(StorageError::invalid(format!(
                "pack {}: extensions {:?} do not match sized files {:?}",
                self.name, self.extensions, sized
            )));
        }
        Ok(())
    }
}

impl fmt::Display for PackDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_positions() {
        assert_eq!(PackExt::lookup("pack"), Some(PackExt::PACK));
        assert_eq!(PackExt::lookup("idx"), Some(PackExt::INDEX));
        assert_eq!(PackExt::lookup("keep"), Some(PackExt::KEEP));
        assert_eq!(PackExt::lookup("bitmap"), Some(PackExt::BITMAP_INDEX));
        assert_eq!(PackExt::lookup("ref"), Some(PackExt::REFTABLE));
        assert_eq!(PackExt::PACK.bit(), 1);
        assert_eq!(PackExt::INDEX.bit(), 2);
        assert_eq!(PackExt::BITMAP_INDEX.bit(), 8);
        assert_eq!(PackExt::INDEX.to_string(), "idx");
    }

    #[test]
    fn test_register_is_append_only() {
        let registry = ExtensionRegistry::new();
        let rev = registry.lookup_or_register("rev").unwrap();
        assert_eq!(rev.position(), 5);
        assert_eq!(registry.lookup_or_register("rev").unwrap(), rev);
        assert_eq!(registry.lookup("pack"), Some(PackExt::PACK));
        assert_eq!(registry.values().len(), 6);
    }

    #[test]
    fn test_registered_extension_keeps_its_name() {
        let ext = PackExt::lookup_or_register("commit_graph").unwrap();
        assert_eq!(ext.extension().as_ref(), "commit_graph");
        assert_eq!(ext.to_string(), "commit_graph");
        assert_eq!(ExtensionRegistry::global().lookup("commit_graph"), Some(ext));
        assert!(PackExt::values().contains(&ext));
    }

    #[test]
    fn test_registry_exhaustion_is_inconsistent() {
        let registry = ExtensionRegistry::new();
        for i in registry.len()..MAX_EXTENSIONS {
            registry.lookup_or_register(&format!("x{i}")).unwrap();
        }
        assert_eq!(registry.len(), MAX_EXTENSIONS);

        let err = registry.lookup_or_register("overflow").unwrap_err();
        assert!(err.is_inconsistent());
        // Known extensions still resolve.
        assert!(registry.lookup_or_register("x31").is_ok());
    }

    #[test]
    fn test_invalid_extension_is_rejected() {
        let registry = ExtensionRegistry::new();
        assert!(matches!(
            registry.lookup_or_register(""),
            Err(StorageError::InvalidInput(_))
        ));
        assert!(registry.lookup_or_register("a.b").is_err());
    }

    #[test]
    fn test_source_ordinals() {
        for (i, source) in PackSource::ALL.iter().enumerate() {
            assert_eq!(source.ordinal(), i as i32);
            assert_eq!(PackSource::from_ordinal(i as i32).unwrap(), *source);
        }
        assert!(PackSource::from_ordinal(7).unwrap_err().is_inconsistent());
        assert!(PackSource::from_ordinal(-1).is_err());
        assert_eq!("gc_rest".parse::<PackSource>().unwrap(), PackSource::GcRest);
    }

    #[test]
    fn test_description_files() {
        let mut desc = PackDescription::new("pack-abc-INSERT", PackSource::Insert);
        desc.record_file(PackExt::PACK, 100);
        desc.record_file(PackExt::KEEP, 0);

        assert_eq!(desc.file_name(PackExt::INDEX), "pack-abc-INSERT.idx");
        assert_eq!(desc.file_size(PackExt::PACK), 100);
        assert!(desc.has_file_ext(PackExt::PACK));
        assert!(!desc.has_file_ext(PackExt::KEEP));
        assert!(desc.validate().is_ok());

        desc.add_file_ext(PackExt::INDEX);
        assert!(matches!(desc.validate(), Err(StorageError::InvalidInput(_))));
    }

    #[test]
    fn test_last_modified_at() {
        let mut desc = PackDescription::new("p", PackSource::Gc);
        desc.set_last_modified(1_700_000_000_000);
        let at = desc.last_modified_at().unwrap();
        assert_eq!(at.timestamp_millis(), 1_700_000_000_000);
    }
}
