//! Conversion rules and paths between element types
//!
//! A [`ConversionRule`] describes one registered way to turn type A into type
//! B. A [`ConversionPath`] is an ordered chain of rules with aggregate cost,
//! warnings and safety; paths are produced by the
//! [`ConversionPathResolver`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod resolver;

pub use resolver::{ConversionPathResolver, MAX_PATH_COST};

/// How a rule performs its conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStrategy {
    #[default]
    Direct,
    Hierarchical,
    Transform,
    Manual,
}

/// Data-fidelity guarantee of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreservationLevel {
    Strict,
    #[default]
    Compatible,
    Lossy,
    Destructive,
}

impl PreservationLevel {
    /// Fraction of data expected to be lost by one step at this level
    #[must_use]
    pub const fn estimated_loss(self) -> f64 {
        match self {
            Self::Strict => 0.0,
            Self::Compatible => 0.05,
            Self::Lossy => 0.25,
            Self::Destructive => 1.0,
        }
    }
}

const fn default_cost() -> f64 {
    1.0
}

const fn default_reversible() -> bool {
    true
}

/// A registered conversion from one type to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRule {
    pub from_type: String,
    pub to_type: String,
    #[serde(default)]
    pub strategy: ConversionStrategy,
    #[serde(default)]
    pub preservation_level: PreservationLevel,
    /// Property renames applied by this step; an empty target drops the property
    #[serde(default)]
    pub data_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default = "default_reversible")]
    pub reversible: bool,
    #[serde(default = "default_cost")]
    pub cost: f64,
}

impl ConversionRule {
    /// A compatible, reversible direct rule with no data mapping
    #[must_use]
    pub fn direct(from: &str, to: &str, cost: f64) -> Self {
        Self {
            from_type: from.to_string(),
            to_type: to.to_string(),
            strategy: ConversionStrategy::Direct,
            preservation_level: PreservationLevel::Compatible,
            data_mapping: BTreeMap::new(),
            warnings: Vec::new(),
            reversible: true,
            cost,
        }
    }

    #[must_use]
    pub const fn with_preservation(mut self, level: PreservationLevel) -> Self {
        self.preservation_level = level;
        self
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    #[must_use]
    pub fn touches(&self, type_id: &str) -> bool {
        self.from_type == type_id || self.to_type == type_id
    }
}

/// An ordered chain of rules turning `from_type` into `to_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionPath {
    pub from_type: String,
    pub to_type: String,
    pub steps: Vec<ConversionRule>,
    pub total_cost: f64,
    pub total_warnings: Vec<String>,
    pub is_safe: bool,
    pub estimated_data_loss: f64,
}

impl ConversionPath {
    /// Zero-cost, empty, safe path from a type to itself
    #[must_use]
    pub fn identity(type_id: &str) -> Self {
        Self::from_steps(type_id, type_id, Vec::new())
    }

    /// Aggregate cost, warnings, safety and loss over `steps`
    #[must_use]
    pub fn from_steps(from: &str, to: &str, steps: Vec<ConversionRule>) -> Self {
        let total_cost = steps.iter().map(|s| s.cost).sum::<f64>().max(0.0);
        let total_warnings = steps.iter().flat_map(|s| s.warnings.iter().cloned()).collect();
        let is_safe = steps
            .iter()
            .all(|s| s.preservation_level != PreservationLevel::Destructive);
        let retained: f64 = steps
            .iter()
            .map(|s| 1.0 - s.preservation_level.estimated_loss())
            .product();

        Self {
            from_type: from.to_string(),
            to_type: to.to_string(),
            steps,
            total_cost,
            total_warnings,
            is_safe,
            estimated_data_loss: (1.0 - retained).clamp(0.0, 1.0),
        }
    }

    /// Whether every step can be reversed
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        self.steps.iter().all(|s| s.reversible)
    }

    /// Whether any step goes through `type_id`
    #[must_use]
    pub fn touches(&self, type_id: &str) -> bool {
        self.from_type == type_id
            || self.to_type == type_id
            || self.steps.iter().any(|s| s.touches(type_id))
    }
}

/// Conversion-specific errors
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Rule {from} -> {to} has invalid cost {cost}: costs must be finite and non-negative")]
    InvalidCost { from: String, to: String, cost: f64 },

    #[error("Rule {0} -> {0} converts a type to itself")]
    SelfConversion(String),
}
