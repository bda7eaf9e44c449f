//! Git reference storage.
//!
//! References live in the `refs` table of a repository's keyspace, one row
//! per reference name. The store gives map semantics (get, enumerate,
//! put-if-absent, replace, remove) where the conditional operations compare
//! references by object id.
//!
//! How the conditional operations are made safe depends on
//! [`CasMode`]: with [`CasMode::Conditional`] every write is a lightweight
//! transaction and exactly one racing writer wins. With
//! [`CasMode::ReadThenWrite`] the store reads, compares and then writes
//! blindly, so two racing writers can both succeed and the later physical
//! write wins. That mode exists for stores without conditional writes.

use crate::config::{CasMode, StoreConfig};
use crate::session::{ColumnType, Row, RowScan, Session, TableSchema};
use crate::{Keyspace, ObjectId, Result, StorageError};
use std::fmt;
use std::sync::Arc;

/// Name of the references table.
pub const REFS_TABLE: &str = "refs";

/// Maximum number of symbolic hops followed when resolving a reference.
pub const MAX_SYMBOLIC_DEPTH: usize = 5;

const COL_TYPE: &str = "type";
const COL_VALUE: &str = "value";
const COL_AUX_VALUE: &str = "aux_value";

/// Storage kind of a reference, encoded as a small integer in the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Points at another reference by name.
    Symbolic,
    /// Peeled reference to a non-tag object.
    PeeledNonTag,
    /// Peeled reference to an annotated tag, carrying the peeled target.
    PeeledTag,
    /// Reference whose peeled value is unknown.
    Unpeeled,
}

impl RefKind {
    /// Returns the stored type code.
    pub fn code(self) -> i32 {
        match self {
            RefKind::Symbolic => 1,
            RefKind::PeeledNonTag => 2,
            RefKind::PeeledTag => 3,
            RefKind::Unpeeled => 4,
        }
    }

    /// Parses a stored type code.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(RefKind::Symbolic),
            2 => Ok(RefKind::PeeledNonTag),
            3 => Ok(RefKind::PeeledTag),
            4 => Ok(RefKind::Unpeeled),
            other => Err(StorageError::inconsistent(format!(
                "unhandled reference type: {other}"
            ))),
        }
    }
}

/// What a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// An object whose peeled value is unknown.
    Unpeeled(ObjectId),
    /// A non-tag object; peeling yields nothing further.
    PeeledNonTag(ObjectId),
    /// An annotated tag and the object it peels to.
    PeeledTag {
        /// The tag object.
        id: ObjectId,
        /// The object the tag ultimately points at.
        peeled: ObjectId,
    },
    /// Another reference, resolved when read.
    Symbolic {
        /// Name of the target reference.
        target: String,
        /// The target as resolved at read time, or `None` if it does not exist.
        resolved: Option<Box<Ref>>,
    },
}

/// A named git reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    name: String,
    target: RefTarget,
}

impl Ref {
    /// Creates an unpeeled reference.
    pub fn unpeeled(name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Unpeeled(id),
        }
    }

    /// Creates a peeled reference to a non-tag object.
    pub fn peeled_non_tag(name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::PeeledNonTag(id),
        }
    }

    /// Creates a peeled reference to an annotated tag.
    pub fn peeled_tag(name: impl Into<String>, id: ObjectId, peeled: ObjectId) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::PeeledTag { id, peeled },
        }
    }

    /// Creates a symbolic reference whose target is not resolved.
    pub fn symbolic(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Symbolic {
                target: target.into(),
                resolved: None,
            },
        }
    }

    /// Creates a symbolic reference pointing at an existing reference.
    pub fn symbolic_to(name: impl Into<String>, target: Ref) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Symbolic {
                target: target.name.clone(),
                resolved: Some(Box::new(target)),
            },
        }
    }

    /// Returns the reference name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the target.
    pub fn target(&self) -> &RefTarget {
        &self.target
    }

    /// Returns the storage kind.
    pub fn kind(&self) -> RefKind {
        match self.target {
            RefTarget::Unpeeled(_) => RefKind::Unpeeled,
            RefTarget::PeeledNonTag(_) => RefKind::PeeledNonTag,
            RefTarget::PeeledTag { .. } => RefKind::PeeledTag,
            RefTarget::Symbolic { .. } => RefKind::Symbolic,
        }
    }

    /// Returns true for symbolic references.
    pub fn is_symbolic(&self) -> bool {
        matches!(self.target, RefTarget::Symbolic { .. })
    }

    /// Returns true if the peeled value is known.
    pub fn is_peeled(&self) -> bool {
        match &self.target {
            RefTarget::PeeledNonTag(_) | RefTarget::PeeledTag { .. } => true,
            RefTarget::Unpeeled(_) => false,
            RefTarget::Symbolic { resolved, .. } => {
                resolved.as_ref().is_some_and(|r| r.is_peeled())
            }
        }
    }

    /// Returns the target name of a symbolic reference.
    pub fn symbolic_target(&self) -> Option<&str> {
        match &self.target {
            RefTarget::Symbolic { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Follows resolved symbolic targets down to the last reference.
    pub fn leaf(&self) -> &Ref {
        match &self.target {
            RefTarget::Symbolic {
                resolved: Some(target),
                ..
            } => target.leaf(),
            _ => self,
        }
    }

    /// Returns the object id, following symbolic targets.
    ///
    /// Unresolved symbolic references have no object id.
    pub fn object_id(&self) -> Option<ObjectId> {
        match &self.target {
            RefTarget::Unpeeled(id) | RefTarget::PeeledNonTag(id) => Some(*id),
            RefTarget::PeeledTag { id, .. } => Some(*id),
            RefTarget::Symbolic { resolved, .. } => resolved.as_ref().and_then(|r| r.object_id()),
        }
    }

    /// Returns the peeled object id of an annotated tag, following symbolic targets.
    pub fn peeled_object_id(&self) -> Option<ObjectId> {
        match &self.leaf().target {
            RefTarget::PeeledTag { peeled, .. } => Some(*peeled),
            _ => None,
        }
    }

    /// Compares two references by object id.
    ///
    /// Equal when both have no object id, or both have the same one. A
    /// reference with an id never equals one without.
    pub fn has_same_object_id(&self, other: &Ref) -> bool {
        self.object_id() == other.object_id()
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            RefTarget::Symbolic { target, .. } => write!(f, "{} -> {}", self.name, target),
            RefTarget::PeeledTag { id, peeled } => {
                write!(f, "{} {} (peeled {})", id, self.name, peeled)
            }
            RefTarget::Unpeeled(id) | RefTarget::PeeledNonTag(id) => {
                write!(f, "{} {}", id, self.name)
            }
        }
    }
}

/// Checks that `name` is usable as a reference name.
pub fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StorageError::invalid("reference name is empty"));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(StorageError::invalid(format!(
            "reference name {name:?} starts or ends with '/'"
        )));
    }
    if name.contains("..") || name.contains("//") {
        return Err(StorageError::invalid(format!(
            "reference name {name:?} contains an empty or parent component"
        )));
    }
    if name.chars().any(|c| c.is_control() || c == ' ') {
        return Err(StorageError::invalid(format!(
            "reference name {name:?} contains whitespace or control characters"
        )));
    }
    Ok(())
}

/// Reference store backed by the `refs` table.
pub struct RefStore {
    keyspace: Keyspace,
    session: Arc<dyn Session>,
    config: StoreConfig,
}

impl RefStore {
    /// Opens the store, creating the keyspace and table if they do not exist.
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

    /// Returns the schema of the references table.
    pub fn schema() -> TableSchema {
        TableSchema::new(REFS_TABLE)
            .column(COL_TYPE, ColumnType::Int)
            .column(COL_VALUE, ColumnType::Text)
            .column(COL_AUX_VALUE, ColumnType::Text)
    }

    /// Returns the keyspace this store writes to.
    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Returns the reference mapped to `name`, if any.
    ///
    /// Symbolic references are resolved against the store at read time.
    pub fn get(&self, name: &str) -> Result<Option<Ref>> {
        validate_ref_name(name)?;
        self.resolve(name, 0)
    }

    /// Iterates over every reference in the store.
    ///
    /// Rows are fetched lazily one page at a time. Order is unspecified.
    /// Calling again starts a fresh scan.
    pub fn values(&self) -> impl Iterator<Item = Result<Ref>> + '_ {
        RowScan::new(
            &*self.session,
            &self.keyspace,
            REFS_TABLE,
            self.config.fetch_size,
        )
        .map(move |row| {
            row.map_err(StorageError::from)
                .and_then(|row| self.row_to_ref(&row, 0))
        })
    }

    /// Maps `name` to `new_ref` unless a reference already exists.
    ///
    /// Returns the existing reference without writing, or `None` after writing.
    pub fn put_if_absent(&self, name: &str, new_ref: &Ref) -> Result<Option<Ref>> {
        check_update(name, new_ref)?;
        tracing::debug!(keyspace = %self.keyspace, name, "put_if_absent");

        match self.config.cas_mode {
            CasMode::ReadThenWrite => {
                let current = self.resolve(name, 0)?;
                if current.is_none() {
                    self.put_row(ref_to_row(name, new_ref))?;
                }
                Ok(current)
            }
            CasMode::Conditional => {
                let outcome = self.session.insert_if_not_exists(
                    &self.keyspace,
                    REFS_TABLE,
                    ref_to_row(name, new_ref),
                )?;
                if outcome.applied {
                    return Ok(None);
                }
                match outcome.current {
                    Some(row) => self.row_to_ref(&row, 0).map(Some),
                    None => Err(StorageError::inconsistent(format!(
                        "conditional insert of {name} rejected without a current row"
                    ))),
                }
            }
        }
    }

    /// Replaces the reference only if the stored one has the same object id as `expected`.
    pub fn replace(&self, name: &str, expected: &Ref, new_ref: &Ref) -> Result<bool> {
        check_update(name, new_ref)?;
        tracing::debug!(keyspace = %self.keyspace, name, "replace");

        let Some(row) = self.fetch_row(name)? else {
            return Ok(false);
        };
        let current = self.stored_ref(&row)?;
        if !current.has_same_object_id(expected) {
            return Ok(false);
        }

        match self.config.cas_mode {
            CasMode::ReadThenWrite => {
                self.put_row(ref_to_row(name, new_ref))?;
                Ok(true)
            }
            CasMode::Conditional => {
                let outcome = self.session.update_if(
                    &self.keyspace,
                    REFS_TABLE,
                    ref_to_row(name, new_ref),
                    &row.as_conditions(),
                )?;
                if !outcome.applied {
                    tracing::warn!(keyspace = %self.keyspace, name, "reference changed during replace");
                }
                Ok(outcome.applied)
            }
        }
    }

    /// Removes the reference only if the stored one has the same object id as `expected`.
    pub fn remove(&self, name: &str, expected: &Ref) -> Result<bool> {
        validate_ref_name(name)?;
        tracing::debug!(keyspace = %self.keyspace, name, "remove");

        let Some(row) = self.fetch_row(name)? else {
            return Ok(false);
        };
        let current = self.stored_ref(&row)?;
        if !current.has_same_object_id(expected) {
            return Ok(false);
        }

        match self.config.cas_mode {
            CasMode::ReadThenWrite => {
                self.session.delete(&self.keyspace, REFS_TABLE, name)?;
                Ok(true)
            }
            CasMode::Conditional => {
                let outcome = self.session.delete_if(
                    &self.keyspace,
                    REFS_TABLE,
                    name,
                    &row.as_conditions(),
                )?;
                if !outcome.applied {
                    tracing::warn!(keyspace = %self.keyspace, name, "reference changed during remove");
                }
                Ok(outcome.applied)
            }
        }
    }

    fn create_schema_if_not_exists(&self) -> Result<()> {
        self.session.create_keyspace(&self.keyspace)?;
        self.session.create_table(&self.keyspace, &Self::schema())?;
        tracing::info!(keyspace = %self.keyspace, table = REFS_TABLE, "reference schema ready");
        Ok(())
    }

    fn resolve(&self, name: &str, depth: usize) -> Result<Option<Ref>> {
        self.fetch_row(name)?
            .map(|row| self.row_to_ref(&row, depth))
            .transpose()
    }

    fn fetch_row(&self, name: &str) -> Result<Option<Row>> {
        let mut rows = self.session.select(&self.keyspace, REFS_TABLE, name)?;
        if rows.len() > 1 {
            return Err(StorageError::inconsistent(format!(
                "multiple rows for a single ref: {name}"
            )));
        }
        Ok(rows.pop())
    }

    fn put_row(&self, row: Row) -> Result<()> {
        self.session.insert(&self.keyspace, REFS_TABLE, row)?;
        Ok(())
    }

    /// Decodes the row read by `replace` and `remove`.
    ///
    /// A symbolic row whose chain cannot be resolved (too deep, cyclic or
    /// broken further down) decodes as unresolved, so it can still be
    /// repaired. Errors in the row itself are still reported.
    fn stored_ref(&self, row: &Row) -> Result<Ref> {
        if RefKind::from_code(row.int(COL_TYPE)?)? != RefKind::Symbolic {
            return self.row_to_ref(row, 0);
        }
        let target = row.text(COL_VALUE)?;
        match self.row_to_ref(row, 0) {
            Err(e) if e.is_inconsistent() => {
                tracing::warn!(keyspace = %self.keyspace, name = row.key(), target, error = %e, "treating unresolvable symbolic reference as unresolved");
                Ok(Ref::symbolic(row.key(), target))
            }
            other => other,
        }
    }

    fn row_to_ref(&self, row: &Row, depth: usize) -> Result<Ref> {
        let name = row.key();
        let kind = RefKind::from_code(row.int(COL_TYPE)?)?;
        let value = row.text(COL_VALUE)?;

        match kind {
            RefKind::Symbolic => {
                if depth >= MAX_SYMBOLIC_DEPTH {
                    return Err(StorageError::inconsistent(format!(
                        "symbolic reference {name} exceeds {MAX_SYMBOLIC_DEPTH} levels"
                    )));
                }
                let resolved = self.resolve(value, depth + 1)?;
                if resolved.is_none() {
                    tracing::warn!(keyspace = %self.keyspace, name, target = value, "symbolic target unresolved");
                }
                Ok(Ref {
                    name: name.to_string(),
                    target: RefTarget::Symbolic {
                        target: value.to_string(),
                        resolved: resolved.map(Box::new),
                    },
                })
            }
            RefKind::PeeledNonTag => Ok(Ref::peeled_non_tag(name, stored_id(name, value)?)),
            RefKind::PeeledTag => {
                let peeled = stored_id(name, row.text(COL_AUX_VALUE)?)?;
                Ok(Ref::peeled_tag(name, stored_id(name, value)?, peeled))
            }
            RefKind::Unpeeled => Ok(Ref::unpeeled(name, stored_id(name, value)?)),
        }
    }
}

impl fmt::Debug for RefStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefStore")
            .field("keyspace", &self.keyspace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn check_update(name: &str, new_ref: &Ref) -> Result<()> {
    validate_ref_name(name)?;
    if new_ref.name() != name {
        return Err(StorageError::invalid(format!(
            "reference {} cannot be stored under {name}",
            new_ref.name()
        )));
    }
    if let Some(target) = new_ref.symbolic_target() {
        validate_ref_name(target)?;
    }
    Ok(())
}

fn stored_id(name: &str, hex: &str) -> Result<ObjectId> {
    ObjectId::from_hex(hex).map_err(|e| {
        StorageError::inconsistent(format!("reference {name} holds a malformed object id: {e}"))
    })
}

fn ref_to_row(name: &str, r: &Ref) -> Row {
    let row = Row::new(name).set(COL_TYPE, r.kind().code());
    match &r.target {
        RefTarget::Symbolic { target, .. } => row
            .set(COL_VALUE, target.as_str())
            .set(COL_AUX_VALUE, ""),
        RefTarget::Unpeeled(id) | RefTarget::PeeledNonTag(id) => row
            .set(COL_VALUE, id.to_hex())
            .set(COL_AUX_VALUE, ""),
        RefTarget::PeeledTag { id, peeled } => row
            .set(COL_VALUE, id.to_hex())
            .set(COL_AUX_VALUE, peeled.to_hex()),
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::memory::MemorySession;

    fn id(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    fn open(mode: CasMode) -> (Arc<MemorySession>, RefStore) {
        let session = Arc::new(MemorySession::new());
        let store = RefStore::new(
            Keyspace::new("refs_test").unwrap(),
            session.clone(),
            StoreConfig::default().with_cas_mode(mode),
        )
        .unwrap();
        (session, store)
    }

    #[test]
    fn test_kind_codes() {
        for kind in [
            RefKind::Symbolic,
            RefKind::PeeledNonTag,
            RefKind::PeeledTag,
            RefKind::Unpeeled,
        ] {
            assert_eq!(RefKind::from_code(kind.code()).unwrap(), kind);
        }
        assert!(RefKind::from_code(0).unwrap_err().is_inconsistent());
        assert!(RefKind::from_code(5).unwrap_err().is_inconsistent());
    }

    #[test]
    fn test_object_id_equality() {
        let a = Ref::unpeeled("refs/heads/a", id(1));
        let b = Ref::peeled_non_tag("refs/heads/b", id(1));
        let c = Ref::unpeeled("refs/heads/c", id(2));
        let dangling = Ref::symbolic("HEAD", "refs/heads/missing");
        let other_dangling = Ref::symbolic("HEAD2", "refs/heads/gone");

        assert!(a.has_same_object_id(&b));
        assert!(!a.has_same_object_id(&c));
        assert!(dangling.has_same_object_id(&other_dangling));
        assert!(!a.has_same_object_id(&dangling));
        assert!(!dangling.has_same_object_id(&a));
    }

    #[test]
    fn test_symbolic_follows_leaf() {
        let main = Ref::peeled_tag("refs/tags/v1", id(3), id(4));
        let head = Ref::symbolic_to("HEAD", main.clone());
        assert_eq!(head.object_id(), Some(id(3)));
        assert_eq!(head.peeled_object_id(), Some(id(4)));
        assert_eq!(head.leaf(), &main);
        assert_eq!(head.symbolic_target(), Some("refs/tags/v1"));
        assert!(head.is_peeled());
    }

    #[test]
    fn test_validate_ref_name() {
        assert!(validate_ref_name("refs/heads/main").is_ok());
        assert!(validate_ref_name("HEAD").is_ok());
        for bad in ["", "/refs", "refs/", "refs/../x", "refs//x", "a b", "a\u{7}b"] {
            assert!(validate_ref_name(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_stored_row_encoding() {
        let (session, store) = open(CasMode::Conditional);
        let tag = Ref::peeled_tag("refs/tags/v1", id(1), id(2));
        store.put_if_absent(tag.name(), &tag).unwrap();

        let rows = session
            .select(store.keyspace(), REFS_TABLE, "refs/tags/v1")
            .unwrap();
        assert_eq!(rows[0].int("type").unwrap(), 3);
        assert_eq!(rows[0].text("value").unwrap(), id(1).to_hex());
        assert_eq!(rows[0].text("aux_value").unwrap(), id(2).to_hex());
    }

    #[test]
    fn test_unknown_type_tag_is_inconsistent() {
        let (session, store) = open(CasMode::Conditional);
        session
            .insert(
                store.keyspace(),
                REFS_TABLE,
                Row::new("refs/heads/odd")
                    .set("type", 9)
                    .set("value", id(1).to_hex())
                    .set("aux_value", ""),
            )
            .unwrap();

        let err = store.get("refs/heads/odd").unwrap_err();
        assert!(err.is_inconsistent());
    }

    #[test]
    fn test_malformed_stored_id_is_inconsistent() {
        let (session, store) = open(CasMode::Conditional);
        session
            .insert(
                store.keyspace(),
                REFS_TABLE,
                Row::new("refs/heads/bad")
                    .set("type", 4)
                    .set("value", "not-an-id")
                    .set("aux_value", ""),
            )
            .unwrap();
        assert!(store.get("refs/heads/bad").unwrap_err().is_inconsistent());
    }

    #[test]
    fn test_symbolic_cycle_is_inconsistent() {
        let (_session, store) = open(CasMode::Conditional);
        store
            .put_if_absent("refs/heads/a", &Ref::symbolic("refs/heads/a", "refs/heads/b"))
            .unwrap();
        store
            .put_if_absent("refs/heads/b", &Ref::symbolic("refs/heads/b", "refs/heads/a"))
            .unwrap();

        assert!(store.get("refs/heads/a").unwrap_err().is_inconsistent());
    }

    #[test]
    fn test_name_mismatch_is_rejected_before_store_access() {
        let (session, store) = open(CasMode::Conditional);
        let before = session.stats();
        let err = store
            .put_if_absent("refs/heads/a", &Ref::unpeeled("refs/heads/b", id(1)))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
        assert_eq!(session.stats(), before);
    }
}
