//! Key and blob helpers for the durable store
//!
//! Every record lives under a namespaced string key (`element/<id>`,
//! `rollback/op/<id>`, ...). [`RecordKey`] keeps the namespace and the id
//! together so callers never format keys by hand, and [`encode`]/[`decode`]
//! give every module the same blob encoding.
//!
//! # Examples
//!
//! ```
//! use retype::store::types::{Namespace, RecordKey};
//!
//! let key = RecordKey::new(Namespace::Element, "e-42");
//! assert_eq!(key.as_str(), "element/e-42");
//! assert_eq!(RecordKey::parse(Namespace::Element, key.as_str()), Some("e-42"));
//! ```

use super::error::StoreError;
use serde::{Serialize, de::DeserializeOwned};

/// Logical record families sharing one store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Element records being converted
    Element,
    /// Immutable rollback operation (metadata + steps)
    RollbackOperation,
    /// Mutable rollback execution state
    RollbackState,
    /// Archived terminal bulk operation results
    Operation,
}

impl Namespace {
    /// Key prefix including the trailing separator
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Element => "element/",
            Self::RollbackOperation => "rollback/op/",
            Self::RollbackState => "rollback/state/",
            Self::Operation => "operation/",
        }
    }
}

/// A namespaced store key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(namespace: Namespace, id: &str) -> Self {
        Self(format!("{}{id}", namespace.prefix()))
    }

    /// Strip the namespace prefix from a raw key, if it belongs to `namespace`
    #[must_use]
    pub fn parse(namespace: Namespace, raw: &str) -> Option<&str> {
        raw.strip_prefix(namespace.prefix())
            .filter(|id| !id.is_empty())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encode a value into an opaque blob
///
/// # Errors
///
/// Returns `StoreError::EncodeError` if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serde::encode_to_vec(value, bincode::config::standard())?)
}

/// Decode a blob produced by [`encode`]
///
/// # Errors
///
/// Returns `StoreError::DecodeError` if the blob is not a valid encoding of `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _): (T, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;
