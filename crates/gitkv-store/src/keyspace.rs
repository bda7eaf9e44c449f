//! Keyspace identifiers.

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum keyspace identifier length accepted by the store.
pub const MAX_KEYSPACE_LEN: usize = 48;

/// A validated keyspace name. One keyspace isolates one repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Keyspace(String);

impl Keyspace {
    /// Validates `name` as a keyspace identifier.
    ///
    /// Accepts 1 to 48 ASCII letters, digits or underscores.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(StorageError::invalid("keyspace name is empty"));
        }
        if name.len() > MAX_KEYSPACE_LEN {
            return Err(StorageError::invalid(format!(
                "keyspace name exceeds {MAX_KEYSPACE_LEN} characters: {name}"
            )));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        {
            return Err(StorageError::invalid(format!(
                "keyspace name {name:?} contains invalid character {c:?}"
            )));
        }
        Ok(Self(name))
    }

    /// Returns the keyspace name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Keyspace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Keyspace {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Keyspace> for String {
    fn from(keyspace: Keyspace) -> Self {
        keyspace.0
    }
}
