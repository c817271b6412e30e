//! `import`: load elements from a file into the store

use std::collections::BTreeMap;
use std::path::Path;

use colored::Colorize;
use serde::Deserialize;

use super::{Context, Result};
use crate::cli::InputFormat;
use crate::store::{Element, PropertyValue};
use crate::RetypeError;

/// Import elements from `input`, returning how many were stored
///
/// Elements whose type is not in the catalog are imported with a warning.
///
/// # Errors
///
/// Returns `RetypeError::InvalidInput` if the file cannot be read or parsed,
/// or a storage error if an element cannot be written.
pub fn execute(ctx: &Context, input: &Path, format: InputFormat, delimiter: char) -> Result<usize> {
    let content = std::fs::read_to_string(input).map_err(|e| {
        RetypeError::InvalidInput(format!("Failed to read {}: {}", input.display(), e))
    })?;

    let elements = match resolve_format(format, input) {
        InputFormat::Json => parse_json(&content)?,
        InputFormat::Csv => parse_csv(&content, delimiter)?,
        InputFormat::Text | InputFormat::Auto => parse_plaintext(&content)?,
    };

    let mut unknown = 0;
    for element in &elements {
        if !ctx.registry.type_exists(&element.type_id) {
            unknown += 1;
            tracing::warn!(element_id = %element.id, type_id = %element.type_id, "Importing element of unknown type");
        }
        ctx.elements.insert(element)?;
    }

    tracing::info!(imported = elements.len(), unknown_types = unknown, "Import finished");
    if !ctx.quiet {
        println!("{} {} element(s)", "Imported".green().bold(), elements.len());
        if unknown > 0 {
            println!(
                "{}",
                format!("Warning: {unknown} element(s) have a type missing from the catalog").yellow()
            );
        }
    }
    Ok(elements.len())
}

fn resolve_format(format: InputFormat, input: &Path) -> InputFormat {
    if format != InputFormat::Auto {
        return format;
    }
    match input
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => InputFormat::Json,
        Some("csv") => InputFormat::Csv,
        _ => InputFormat::Text,
    }
}

/// Parse `id type` lines; blank lines and `#` comments are ignored
///
/// # Errors
///
/// Returns `RetypeError::InvalidInput` for a line without both fields.
pub fn parse_plaintext(content: &str) -> Result<Vec<Element>> {
    let mut elements = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        if parts.len() != 2 {
            return Err(RetypeError::InvalidInput(format!(
                "Invalid format at line {}: expected 'id type'",
                i + 1
            )));
        }
        elements.push(Element::new(parts[0], parts[1]));
    }
    Ok(elements)
}

/// Parse `id,type[,key=value...]` records
///
/// # Errors
///
/// Returns `RetypeError::InvalidInput` for malformed records.
pub fn parse_csv(content: &str, delimiter: char) -> Result<Vec<Element>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return Err(RetypeError::InvalidInput(
            "Invalid CSV: content appears to be JSON\nHint: Use '--format json'.".to_string(),
        ));
    }
    let delimiter = u8::try_from(delimiter)
        .map_err(|_| RetypeError::InvalidInput(format!("Delimiter '{delimiter}' is not ASCII")))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .delimiter(delimiter)
        .from_reader(content.as_bytes());

    let mut elements = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result
            .map_err(|e| RetypeError::InvalidInput(format!("Invalid CSV at record {}: {}", i + 1, e)))?;
        let field = |n: usize| record.get(n).map(str::trim).filter(|s| !s.is_empty());
        let (Some(id), Some(type_id)) = (field(0), field(1)) else {
            return Err(RetypeError::InvalidInput(format!(
                "Invalid CSV at record {}: expected 'id,type'",
                i + 1
            )));
        };

        let mut element = Element::new(id, type_id);
        for property in record.iter().skip(2).map(str::trim).filter(|s| !s.is_empty()) {
            let Some((key, value)) = property.split_once('=') else {
                return Err(RetypeError::InvalidInput(format!(
                    "Invalid CSV at record {}: property '{property}' is not 'key=value'",
                    i + 1
                )));
            };
            element = element.with_property(key.trim(), value.trim());
        }
        elements.push(element);
    }
    Ok(elements)
}

/// Parse an array of `{"id", "type", "properties", "metadata"}` objects
///
/// # Errors
///
/// Returns `RetypeError::InvalidInput` if the document is not such an array.
pub fn parse_json(content: &str) -> Result<Vec<Element>> {
    #[derive(Deserialize)]
    struct JsonElement {
        id: String,
        #[serde(rename = "type")]
        type_id: String,
        #[serde(default)]
        properties: BTreeMap<String, serde_json::Value>,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    }

    let parsed: Vec<JsonElement> = serde_json::from_str(content).map_err(|e| {
        let hint = if content.trim_start().starts_with(['[', '{']) {
            ""
        } else {
            "\nHint: The file may be CSV or plain text. Use '--format csv' or '--format text'."
        };
        RetypeError::InvalidInput(format!("Invalid JSON: {e}{hint}"))
    })?;

    Ok(parsed
        .into_iter()
        .map(|je| Element {
            id: je.id,
            type_id: je.type_id,
            properties: je
                .properties
                .into_iter()
                .map(|(k, v)| (k, PropertyValue::from(v)))
                .collect(),
            metadata: je.metadata,
        })
        .collect())
}
