//! Conversion validation

use std::sync::Arc;

use super::ValidationResult;
use crate::conversion::ConversionPathResolver;
use crate::registry::TypeRegistry;

/// Decides whether one element may be converted
pub trait ValidationEngine: Send + Sync {
    fn validate_conversion(&self, element_id: &str, from: &str, to: &str) -> ValidationResult;
}

/// Validates through the type registry and the conversion path resolver
///
/// A conversion is valid when both types are known and a path exists. Paths
/// with a destructive step are rejected unless `allow_destructive` is set;
/// path warnings are passed through.
pub struct PathValidator {
    registry: Arc<dyn TypeRegistry>,
    resolver: Arc<ConversionPathResolver>,
    allow_destructive: bool,
}

impl PathValidator {
    pub fn new(registry: Arc<dyn TypeRegistry>, resolver: Arc<ConversionPathResolver>) -> Self {
        Self {
            registry,
            resolver,
            allow_destructive: false,
        }
    }

    #[must_use]
    pub const fn allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = allow;
        self
    }
}

impl ValidationEngine for PathValidator {
    fn validate_conversion(&self, element_id: &str, from: &str, to: &str) -> ValidationResult {
        if !self.registry.type_exists(from) {
            return ValidationResult::invalid(format!("unknown source type '{from}'"));
        }
        if !self.registry.type_exists(to) {
            return ValidationResult::invalid(format!("unknown target type '{to}'"));
        }

        let Some(path) = self.resolver.resolve(from, to) else {
            tracing::debug!(element_id, from, to, "No conversion path");
            return ValidationResult::invalid(format!("no conversion path from '{from}' to '{to}'"));
        };

        if !path.is_safe && !self.allow_destructive {
            return ValidationResult::invalid(format!(
                "conversion from '{from}' to '{to}' is destructive"
            ))
            .with_warnings(path.total_warnings);
        }

        ValidationResult::valid().with_warnings(path.total_warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{ConversionRule, PreservationLevel};
    use crate::registry::{InMemoryTypeRegistry, TypeDefinition};

    fn validator() -> PathValidator {
        let registry: Arc<dyn TypeRegistry> = Arc::new(
            InMemoryTypeRegistry::from_definitions(
                ["text", "title", "image", "code"].map(TypeDefinition::new),
            )
            .unwrap(),
        );
        let resolver = Arc::new(ConversionPathResolver::new(registry.clone()));
        resolver
            .register_rule(ConversionRule::direct("text", "title", 0.5).with_warning("length limit"))
            .unwrap();
        resolver
            .register_rule(
                ConversionRule::direct("code", "text", 1.0)
                    .with_preservation(PreservationLevel::Destructive),
            )
            .unwrap();
        PathValidator::new(registry, resolver)
    }

    #[test]
    fn test_valid_conversion_carries_warnings() {
        let result = validator().validate_conversion("e1", "text", "title");
        assert!(result.is_valid);
        assert_eq!(result.warnings, vec!["length limit".to_string()]);
    }

    #[test]
    fn test_missing_path_is_invalid() {
        let result = validator().validate_conversion("e1", "image", "title");
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("no conversion path"));
    }

    #[test]
    fn test_unknown_types_are_invalid() {
        let result = validator().validate_conversion("e1", "video", "title");
        assert!(result.errors[0].contains("unknown source type"));
    }

    #[test]
    fn test_destructive_paths() {
        assert!(!validator().validate_conversion("e1", "code", "text").is_valid);
        let permissive = validator().allow_destructive(true);
        assert!(permissive.validate_conversion("e1", "code", "text").is_valid);
    }
}
