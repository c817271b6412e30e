//! Type catalog files
//!
//! A catalog declares the known types and the registered conversion rules in
//! one TOML or JSON document:
//!
//! ```toml
//! [[types]]
//! id = "text"
//!
//! [[types]]
//! id = "heading"
//! parent = "text"
//!
//! [[rules]]
//! from_type = "text"
//! to_type = "quote"
//! strategy = "direct"
//! preservation_level = "compatible"
//! cost = 0.5
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{InMemoryTypeRegistry, RegistryError, TypeDefinition, TypeRegistry};
use crate::conversion::ConversionRule;

/// Types and rules loaded from a catalog document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub types: Vec<TypeDefinition>,
    #[serde(default)]
    pub rules: Vec<ConversionRule>,
}

impl Catalog {
    /// Load a catalog, picking the format from the file extension (`.json` or TOML)
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    /// # Errors
    ///
    /// Returns `RegistryError::InvalidCatalog` if the document is not valid TOML.
    pub fn from_toml(content: &str) -> Result<Self, RegistryError> {
        toml::from_str(content).map_err(|e| RegistryError::InvalidCatalog(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns `RegistryError::InvalidCatalog` if the document is not valid JSON.
    pub fn from_json(content: &str) -> Result<Self, RegistryError> {
        serde_json::from_str(content).map_err(|e| RegistryError::InvalidCatalog(e.to_string()))
    }

    /// Build a registry, registering parents before their children regardless
    /// of declaration order
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if a parent is never declared or the hierarchy has a cycle.
    pub fn registry(&self) -> Result<InMemoryTypeRegistry, RegistryError> {
        let registry = InMemoryTypeRegistry::new();
        let mut pending: Vec<TypeDefinition> = self.types.clone();

        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for definition in pending {
                match registry.register(definition.clone()) {
                    Ok(()) => {}
                    Err(RegistryError::UnknownParent(_, _)) => deferred.push(definition),
                    Err(e) => return Err(e),
                }
            }
            if deferred.len() == before {
                let first = &deferred[0];
                return Err(RegistryError::UnknownParent(
                    first.id.clone(),
                    first.parent.clone().unwrap_or_default(),
                ));
            }
            pending = deferred;
        }

        for rule in &self.rules {
            for endpoint in [&rule.from_type, &rule.to_type] {
                if registry.get_type(endpoint).is_none() {
                    return Err(RegistryError::InvalidCatalog(format!(
                        "rule {} -> {} references unknown type '{endpoint}'",
                        rule.from_type, rule.to_type
                    )));
                }
            }
        }

        Ok(registry)
    }
}
