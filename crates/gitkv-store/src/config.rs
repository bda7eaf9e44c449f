//! Store configuration.

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};

/// Default number of rows fetched per scan page.
pub const DEFAULT_FETCH_SIZE: usize = 100;

/// How compare-and-swap operations on references are carried out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CasMode {
    /// Use the store's lightweight transactions. Exactly one racing writer wins.
    #[default]
    Conditional,
    /// Read, compare, then write unconditionally.
    ///
    /// Two racing writers can both observe the expected value and both write;
    /// the later physical write wins silently.
    ReadThenWrite,
}

/// Order of the two halves of a pack commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitOrder {
    /// Insert new descriptors, then remove the replaced ones.
    ///
    /// Listers may briefly see both; they never see neither.
    #[default]
    InsertThenRemove,
    /// Remove replaced descriptors, then insert the new ones.
    ///
    /// Listers never see both, but may briefly see neither.
    RemoveThenInsert,
}

/// Configuration shared by the reference and pack stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreConfig {
    /// Rows fetched per page when scanning a table.
    pub fetch_size: usize,
    /// Compare-and-swap strategy for references.
    pub cas_mode: CasMode,
    /// Ordering of pack commits.
    pub commit_order: CommitOrder,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
            cas_mode: CasMode::default(),
            commit_order: CommitOrder::default(),
        }
    }
}

impl StoreConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_size == 0 {
            return Err(StorageError::invalid("fetch-size must be greater than zero"));
        }
        Ok(())
    }

    /// Sets the compare-and-swap strategy.
    pub fn with_cas_mode(mut self, cas_mode: CasMode) -> Self {
        self.cas_mode = cas_mode;
        self
    }

    /// Sets the pack commit ordering.
    pub fn with_commit_order(mut self, commit_order: CommitOrder) -> Self {
        self.commit_order = commit_order;
        self
    }

    /// Sets the scan page size.
    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.fetch_size, 100);
        assert_eq!(config.cas_mode, CasMode::Conditional);
        assert_eq!(config.commit_order, CommitOrder::InsertThenRemove);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"cas-mode":"read-then-write"}"#).unwrap();
        assert_eq!(config.cas_mode, CasMode::ReadThenWrite);
        assert_eq!(config.fetch_size, DEFAULT_FETCH_SIZE);
    }

    #[test]
    fn test_zero_fetch_size_is_invalid() {
        let config = StoreConfig::default().with_fetch_size(0);
        assert!(matches!(config.validate(), Err(StorageError::InvalidInput(_))));
    }
}
