//! Type registry collaborator
//!
//! The engine only asks the registry three questions: does a type exist, what
//! is its definition, and what types are there. Types may declare a parent,
//! which forms the generalization hierarchy used by the conversion resolver:
//! - moving from `heading` to its ancestor `text` is a generalization
//! - moving from `text` to its descendant `heading` is a specialization

use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod catalog;

pub use catalog::Catalog;

/// Schema-level description of an element type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Declared parent in the type hierarchy
    #[serde(default)]
    pub parent: Option<String>,
    /// Property names elements of this type are expected to carry
    #[serde(default)]
    pub fields: Vec<String>,
}

impl TypeDefinition {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            parent: None,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }
}

/// Registry-specific errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Type '{0}' declares unknown parent '{1}'")]
    UnknownParent(String, String),

    #[error("Type '{0}' cannot be its own ancestor")]
    Cycle(String),

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read-only contract the engine consumes
pub trait TypeRegistry: Send + Sync {
    fn type_exists(&self, id: &str) -> bool;

    fn get_type(&self, id: &str) -> Option<TypeDefinition>;

    fn list_types(&self) -> Vec<TypeDefinition>;

    /// Ancestors of `id`, nearest first
    fn ancestors(&self, id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([id.to_string()]);
        let mut current = self.get_type(id).and_then(|t| t.parent);
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                break;
            }
            current = self.get_type(&parent).and_then(|t| t.parent);
            chain.push(parent);
        }
        chain
    }

    /// Whether `ancestor` appears in the parent chain of `descendant`
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        self.ancestors(descendant).iter().any(|a| a == ancestor)
    }
}

/// Thread-safe in-process [`TypeRegistry`]
#[derive(Debug, Default)]
pub struct InMemoryTypeRegistry {
    types: RwLock<BTreeMap<String, TypeDefinition>>,
}

impl InMemoryTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from definitions, parents before children
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if a definition references an unregistered parent.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = TypeDefinition>,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    /// Register or replace a type definition
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownParent` if the parent is not registered and
    /// `RegistryError::Cycle` if the definition would make the type its own ancestor.
    pub fn register(&self, definition: TypeDefinition) -> Result<(), RegistryError> {
        let mut types = self.types.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = &definition.parent {
            if parent == &definition.id {
                return Err(RegistryError::Cycle(definition.id));
            }
            if !types.contains_key(parent) {
                return Err(RegistryError::UnknownParent(
                    definition.id.clone(),
                    parent.clone(),
                ));
            }
            let mut cursor = types.get(parent).and_then(|t| t.parent.clone());
            while let Some(next) = cursor {
                if next == definition.id {
                    return Err(RegistryError::Cycle(definition.id));
                }
                cursor = types.get(&next).and_then(|t| t.parent.clone());
            }
        }
        types.insert(definition.id.clone(), definition);
        Ok(())
    }

    /// Direct and indirect children of `id`
    #[must_use]
    pub fn descendants(&self, id: &str) -> Vec<String> {
        self.list_types()
            .into_iter()
            .filter(|t| self.is_ancestor(id, &t.id))
            .map(|t| t.id)
            .collect()
    }
}

impl TypeRegistry for InMemoryTypeRegistry {
    fn type_exists(&self, id: &str) -> bool {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    fn get_type(&self, id: &str) -> Option<TypeDefinition> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn list_types(&self) -> Vec<TypeDefinition> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InMemoryTypeRegistry {
        InMemoryTypeRegistry::from_definitions([
            TypeDefinition::new("block"),
            TypeDefinition::new("text").with_parent("block"),
            TypeDefinition::new("heading").with_parent("text"),
            TypeDefinition::new("image").with_parent("block"),
        ])
        .unwrap()
    }

    #[test]
    fn test_type_exists_and_list() {
        let registry = sample();
        assert!(registry.type_exists("text"));
        assert!(!registry.type_exists("video"));
        assert_eq!(registry.list_types().len(), 4);
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let registry = sample();
        assert_eq!(registry.ancestors("heading"), vec!["text", "block"]);
        assert!(registry.ancestors("block").is_empty());
        assert!(registry.ancestors("unknown").is_empty());
    }

    #[test]
    fn test_is_ancestor() {
        let registry = sample();
        assert!(registry.is_ancestor("block", "heading"));
        assert!(!registry.is_ancestor("heading", "block"));
        assert!(!registry.is_ancestor("image", "heading"));
    }

    #[test]
    fn test_descendants() {
        let registry = sample();
        let mut found = registry.descendants("block");
        found.sort();
        assert_eq!(found, vec!["heading", "image", "text"]);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let registry = InMemoryTypeRegistry::new();
        let err = registry
            .register(TypeDefinition::new("text").with_parent("block"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownParent(_, _)));
    }

    #[test]
    fn test_cycle_rejected() {
        let registry = sample();
        let err = registry
            .register(TypeDefinition::new("block").with_parent("heading"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Cycle(_)));
        assert!(registry.get_type("block").unwrap().parent.is_none());
    }
}
