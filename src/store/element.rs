//! Element records and the repository that converts them
//!
//! An [`Element`] is the unit the bulk engine converts: an id, the type it
//! currently has and its typed properties. [`ElementRepository`] persists
//! elements through a [`DurableStore`] and implements the three contracts the
//! engine needs from an element backend: loading ([`ElementSource`]),
//! converting ([`Mutator`]) and restoring snapshots ([`RollbackApplier`]).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::types::{Namespace, RecordKey, decode, encode};
use super::{DurableStore, StoreError};
use crate::engine::{ElementSource, MutationError, Mutator, OperationItem};
use crate::rollback::{RollbackApplier, RollbackStep};

/// Metadata key recording the type an element had before its last conversion
pub const PREVIOUS_TYPE_KEY: &str = "retype.previous_type";

/// A typed property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
            Value::String(s) => Self::Text(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Map(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// A stored element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    pub type_id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Element {
    /// Create an element with no properties
    #[must_use]
    pub fn new(id: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
            properties: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Builder-style property setter
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Element persistence on top of a [`DurableStore`]
#[derive(Clone)]
pub struct ElementRepository {
    store: Arc<dyn DurableStore>,
}

impl ElementRepository {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Insert or replace an element
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if encoding or the write fails.
    pub fn insert(&self, element: &Element) -> Result<(), StoreError> {
        let key = RecordKey::new(Namespace::Element, &element.id);
        self.store.put(key.as_str(), &encode(element)?)
    }

    /// Fetch an element by id
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the read or decoding fails.
    pub fn get(&self, element_id: &str) -> Result<Option<Element>, StoreError> {
        let key = RecordKey::new(Namespace::Element, element_id);
        self.store
            .get(key.as_str())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Remove an element, returning whether it existed
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the delete fails.
    pub fn remove(&self, element_id: &str) -> Result<bool, StoreError> {
        self.store
            .delete(RecordKey::new(Namespace::Element, element_id).as_str())
    }

    /// All stored element ids, in key order
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if listing fails.
    pub fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .list(Namespace::Element.prefix())?
            .iter()
            .filter_map(|raw| RecordKey::parse(Namespace::Element, raw).map(String::from))
            .collect())
    }

    /// Ids of all elements currently of type `type_id`
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if listing or decoding fails.
    pub fn ids_of_type(&self, type_id: &str) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        for id in self.list_ids()? {
            if let Some(element) = self.get(&id)?
                && element.type_id == type_id
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

impl ElementSource for ElementRepository {
    fn load(&self, element_id: &str) -> Result<Option<Element>, StoreError> {
        self.get(element_id)
    }
}

impl Mutator for ElementRepository {
    fn apply(&self, item: &OperationItem) -> Result<(), MutationError> {
        let mut element = self
            .get(&item.element_id)?
            .ok_or_else(|| MutationError::MissingElement(item.element_id.clone()))?;

        if element.type_id != item.current_type {
            return Err(MutationError::TypeChanged {
                element_id: item.element_id.clone(),
                expected: item.current_type.clone(),
                found: element.type_id,
            });
        }

        if item.current_type != item.target_type {
            let path = item.conversion_path.as_ref().ok_or_else(|| {
                MutationError::NoConversionPath {
                    from: item.current_type.clone(),
                    to: item.target_type.clone(),
                }
            })?;

            for step in &path.steps {
                apply_mapping(&mut element.properties, &step.data_mapping);
            }
            element
                .metadata
                .insert(PREVIOUS_TYPE_KEY.to_string(), item.current_type.clone());
        }

        element.type_id.clone_from(&item.target_type);
        self.insert(&element)?;
        Ok(())
    }
}

impl RollbackApplier for ElementRepository {
    fn restore(&self, step: &RollbackStep) -> Result<(), MutationError> {
        let original: Element = decode(&step.original_state)?;
        if original.id != step.target_id {
            return Err(MutationError::Rejected(format!(
                "snapshot for '{}' does not belong to '{}'",
                original.id, step.target_id
            )));
        }
        self.insert(&original)?;
        Ok(())
    }
}

/// Move properties according to a rule's field mapping
///
/// An empty destination drops the source property.
fn apply_mapping(
    properties: &mut BTreeMap<String, PropertyValue>,
    mapping: &BTreeMap<String, String>,
) {
    let mut moved = Vec::new();
    for (source, destination) in mapping {
        if let Some(value) = properties.remove(source)
            && !destination.is_empty()
        {
            moved.push((destination.clone(), value));
        }
    }
    properties.extend(moved);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{ConversionPath, ConversionRule};
    use crate::store::SledStore;

    fn repository() -> ElementRepository {
        ElementRepository::new(Arc::new(SledStore::temporary().unwrap()))
    }

    fn item(element: &Element, target: &str, path: Option<ConversionPath>) -> OperationItem {
        OperationItem {
            element_id: element.id.clone(),
            current_type: element.type_id.clone(),
            target_type: target.to_string(),
            properties: element.properties.clone(),
            metadata: element.metadata.clone(),
            conversion_path: path,
            validation_result: None,
        }
    }

    #[test]
    fn test_property_value_from_json() {
        let json = serde_json::json!({"n": 3, "f": 1.5, "s": "x", "l": [true, null]});
        let value = PropertyValue::from(json);
        let PropertyValue::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(map["n"], PropertyValue::Int(3));
        assert_eq!(map["f"], PropertyValue::Float(1.5));
        assert_eq!(map["s"], PropertyValue::Text("x".into()));
        assert_eq!(
            map["l"],
            PropertyValue::List(vec![PropertyValue::Bool(true), PropertyValue::Null])
        );
    }

    #[test]
    fn test_insert_get_list() {
        let repo = repository();
        repo.insert(&Element::new("b", "text")).unwrap();
        repo.insert(&Element::new("a", "title")).unwrap();

        assert_eq!(repo.list_ids().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(repo.get("a").unwrap().unwrap().type_id, "title");
        assert_eq!(repo.ids_of_type("text").unwrap(), vec!["b".to_string()]);
        assert!(repo.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_apply_renames_mapped_properties() {
        let repo = repository();
        let element = Element::new("e1", "text").with_property("body", "hello");
        repo.insert(&element).unwrap();

        let mut rule = ConversionRule::direct("text", "title", 0.5);
        rule.data_mapping.insert("body".into(), "heading".into());
        let path = ConversionPath::from_steps("text", "title", vec![rule]);

        repo.apply(&item(&element, "title", Some(path))).unwrap();

        let converted = repo.get("e1").unwrap().unwrap();
        assert_eq!(converted.type_id, "title");
        assert_eq!(converted.properties["heading"], PropertyValue::Text("hello".into()));
        assert!(!converted.properties.contains_key("body"));
        assert_eq!(converted.metadata[PREVIOUS_TYPE_KEY], "text");
    }

    #[test]
    fn test_apply_without_path_fails() {
        let repo = repository();
        let element = Element::new("e1", "text");
        repo.insert(&element).unwrap();

        let err = repo.apply(&item(&element, "title", None)).unwrap_err();
        assert!(matches!(err, MutationError::NoConversionPath { .. }));
        assert_eq!(repo.get("e1").unwrap().unwrap().type_id, "text");
    }

    #[test]
    fn test_apply_detects_concurrent_type_change() {
        let repo = repository();
        let element = Element::new("e1", "text");
        repo.insert(&Element::new("e1", "quote")).unwrap();

        let err = repo.apply(&item(&element, "text", None)).unwrap_err();
        assert!(matches!(err, MutationError::TypeChanged { .. }));
    }

    #[test]
    fn test_restore_writes_snapshot_back() {
        let repo = repository();
        let original = Element::new("e1", "text").with_property("body", "hello");
        repo.insert(&Element::new("e1", "title")).unwrap();

        let step = RollbackStep::new("e1", encode(&original).unwrap(), Vec::new());
        repo.restore(&step).unwrap();

        assert_eq!(repo.get("e1").unwrap().unwrap(), original);
    }

    #[test]
    fn test_restore_rejects_foreign_snapshot() {
        let repo = repository();
        let step = RollbackStep::new("e2", encode(&Element::new("e1", "text")).unwrap(), Vec::new());
        assert!(matches!(repo.restore(&step), Err(MutationError::Rejected(_))));
    }
}
