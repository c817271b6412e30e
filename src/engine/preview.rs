//! Expected impact of a bulk operation, computed before anything is mutated

use serde::{Deserialize, Serialize};

use super::OperationItem;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactPreview {
    pub total_items: usize,
    /// Items with a conversion path
    pub convertible: usize,
    /// Items with no conversion path
    pub unconvertible: usize,
    /// Items already of the target type
    pub unchanged: usize,
    /// Items whose path contains a destructive step
    pub unsafe_conversions: usize,
    /// Items whose path contains an irreversible step
    pub irreversible: usize,
    /// Mean path cost over convertible items
    pub mean_path_cost: f64,
    pub max_estimated_data_loss: f64,
    /// Distinct path warnings
    pub warnings: Vec<String>,
}

impl ImpactPreview {
    #[must_use]
    pub fn from_items(items: &[OperationItem]) -> Self {
        let mut preview = Self {
            total_items: items.len(),
            ..Self::default()
        };
        let mut total_cost = 0.0;

        for item in items {
            let Some(path) = &item.conversion_path else {
                preview.unconvertible += 1;
                continue;
            };
            preview.convertible += 1;
            if path.steps.is_empty() {
                preview.unchanged += 1;
            }
            if !path.is_safe {
                preview.unsafe_conversions += 1;
            }
            if !path.is_reversible() {
                preview.irreversible += 1;
            }
            total_cost += path.total_cost;
            preview.max_estimated_data_loss = preview.max_estimated_data_loss.max(path.estimated_data_loss);
            for warning in &path.total_warnings {
                if !preview.warnings.contains(warning) {
                    preview.warnings.push(warning.clone());
                }
            }
        }

        if preview.convertible > 0 {
            preview.mean_path_cost = total_cost / preview.convertible as f64;
        }
        preview
    }

    #[must_use]
    pub fn has_risk(&self) -> bool {
        self.unsafe_conversions > 0 || self.unconvertible > 0 || self.max_estimated_data_loss > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{ConversionPath, ConversionRule, PreservationLevel};
    use std::collections::BTreeMap;

    fn item(id: &str, path: Option<ConversionPath>) -> OperationItem {
        OperationItem {
            element_id: id.into(),
            current_type: "text".into(),
            target_type: "title".into(),
            properties: BTreeMap::new(),
            metadata: BTreeMap::new(),
            conversion_path: path,
            validation_result: None,
        }
    }

    #[test]
    fn test_preview_counts() {
        let cheap = ConversionPath::from_steps(
            "text",
            "title",
            vec![ConversionRule::direct("text", "title", 1.0).with_warning("drops styling")],
        );
        let destructive = ConversionPath::from_steps(
            "text",
            "title",
            vec![
                ConversionRule::direct("text", "title", 3.0)
                    .with_preservation(PreservationLevel::Destructive),
            ],
        );
        let items = vec![
            item("a", Some(cheap.clone())),
            item("b", Some(cheap)),
            item("c", Some(destructive)),
            item("d", None),
            item("e", Some(ConversionPath::identity("title"))),
        ];

        let preview = ImpactPreview::from_items(&items);
        assert_eq!(preview.total_items, 5);
        assert_eq!(preview.convertible, 4);
        assert_eq!(preview.unconvertible, 1);
        assert_eq!(preview.unchanged, 1);
        assert_eq!(preview.unsafe_conversions, 1);
        assert!((preview.mean_path_cost - 5.0 / 4.0).abs() < 1e-9);
        assert!((preview.max_estimated_data_loss - 1.0).abs() < 1e-9);
        assert_eq!(preview.warnings, vec!["drops styling".to_string()]);
        assert!(preview.has_risk());
    }

    #[test]
    fn test_empty_preview() {
        let preview = ImpactPreview::from_items(&[]);
        assert_eq!(preview.mean_path_cost, 0.0);
        assert!(!preview.has_risk());
    }
}
