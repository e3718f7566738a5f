//! # Field Mapping
//!
//! Projects a source record onto target field names, then runs the profile's
//! transformations over the projected fields.
//!
//! ```text
//! source record              mapping                 target fields
//! ─────────────              ───────                 ─────────────
//! full_name: "jane"   ──►  full_name → name   ──►   name:  "JANE"   (FORMAT)
//! bal_cents: 1250     ──►  bal_cents → balance ──►  balance: 12.5   (CALCULATION)
//! ```
//!
//! A mapped source field that is absent from the record is left out of the
//! target fields. Only rules that can produce a value from nothing
//! (ENRICHMENT, CONDITIONAL) run on an absent field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::transform::DataTransformation;
use crate::types::{EntityRecord, Fields};

/// One source-field → target-field pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        FieldMapping {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Swaps source and target.
    pub fn inverted(&self) -> Self {
        FieldMapping {
            source: self.target.clone(),
            target: self.source.clone(),
        }
    }
}

/// Inverts a whole mapping, preserving order.
pub fn invert(mapping: &[FieldMapping]) -> Vec<FieldMapping> {
    mapping.iter().map(FieldMapping::inverted).collect()
}

/// Maps `record` through `mapping`, then applies `transformations` in order.
pub fn map_record(
    record: &EntityRecord,
    mapping: &[FieldMapping],
    transformations: &[DataTransformation],
) -> CoreResult<Fields> {
    let mut fields = Fields::new();

    for pair in mapping {
        if let Some(value) = record.fields.get(&pair.source) {
            fields.insert(pair.target.clone(), value.clone());
        }
    }

    for transformation in transformations {
        let apply = |value: Value| {
            transformation
                .apply(value)
                .map_err(|source| CoreError::Transform {
                    entity_id: record.id.clone(),
                    source,
                })
        };

        match fields.remove(&transformation.field) {
            Some(current) => {
                fields.insert(transformation.field.clone(), apply(current)?);
            }
            None if transformation.rule.fills_missing() => {
                let next = apply(Value::Null)?;
                if !next.is_null() {
                    fields.insert(transformation.field.clone(), next);
                }
            }
            None => {}
        }
    }

    Ok(fields)
}
