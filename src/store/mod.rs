//! Durable key/value storage for retype
//!
//! The engine only needs a narrow put/get/delete/list contract from its
//! storage layer, expressed by the [`DurableStore`] trait. [`SledStore`] is the
//! bundled implementation, backed by sled as the embedded database.
//!
//! Uses a single sled tree (`records`) with namespaced keys:
//! - `element/<id>`: element records
//! - `rollback/op/<id>` and `rollback/state/<id>`: rollback bookkeeping
//! - `operation/<id>`: archived operation results

use sled::{Db, Tree};
use std::path::Path;

pub mod element;
pub mod error;
pub mod types;

pub use element::{Element, ElementRepository, PropertyValue};
pub use error::StoreError;
pub use types::{Namespace, RecordKey};

/// Behavioral contract required from the storage collaborator
///
/// Blobs are opaque to the store. Single-writer-per-key is assumed by callers,
/// not enforced by implementations.
pub trait DurableStore: Send + Sync {
    /// Insert or replace the blob stored under `key`
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the write fails.
    fn put(&self, key: &str, blob: &[u8]) -> Result<(), StoreError>;

    /// Fetch the blob stored under `key`
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the read fails.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete `key`, returning whether it existed
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the delete fails.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// List all keys starting with `prefix`, in key order
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if iteration fails or a key is not valid UTF-8.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Sled-backed [`DurableStore`]
pub struct SledStore {
    db: Db,
    records: Tree,
}

impl SledStore {
    /// Opens or creates a store at the specified path
    ///
    /// # Examples
    /// ```no_run
    /// use retype::store::SledStore;
    /// let store = SledStore::open("my_store").unwrap();
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the database cannot be opened or the record tree cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Opens a store that lives only as long as the returned value
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the temporary database cannot be created.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let records = db.open_tree("records")?;
        Ok(Self { db, records })
    }

    /// Get the number of records in the store
    #[must_use]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Flush all pending writes to disk
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the flush operation fails.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Clear all records
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if clearing the record tree fails.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.records.clear()?;
        Ok(())
    }
}

impl DurableStore for SledStore {
    fn put(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.records.insert(key.as_bytes(), blob)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.records.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(key.as_bytes())?.is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.records
            .scan_prefix(prefix.as_bytes())
            .map(|entry| {
                let (key, _) = entry?;
                String::from_utf8(key.to_vec())
                    .map_err(|e| StoreError::SerializeError(format!("Invalid UTF-8 in key: {e}")))
            })
            .collect()
    }
}

impl Drop for SledStore {
    fn drop(&mut self) {
        // Best-effort flush; callers needing durability call flush() explicitly.
        let _ = self.db.flush();
    }
}
