//! # Data Transformations
//!
//! Declarative rules applied to one target field after field mapping.
//!
//! ## Rule Kinds
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Transformation Rules                               │
//! │                                                                         │
//! │  FORMAT       "  jane doe " ──► "JANE DOE"      (uppercase, trim, ...)  │
//! │  CALCULATION  1250          ──► 12.5            (divide by 100)         │
//! │  LOOKUP       "NY"          ──► "New York"      (table + default)       │
//! │  CONDITIONAL  null          ──► "unknown"       (when / then / else)    │
//! │  ENRICHMENT   <missing>     ──► "EUR"           (constant fill-in)      │
//! │                                                                         │
//! │  Rules are pure: output depends only on the input value and the rule.  │
//! │  Rules run in declared list order, nothing else.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::TransformError;

/// Largest precision a `fixed_decimals` format accepts.
pub const MAX_FIXED_DECIMALS: usize = 20;

// =============================================================================
// Data Transformation
// =============================================================================

/// One transformation applied to a single target field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransformation {
    /// Rule identifier, used in logs and errors.
    pub rule_id: String,

    /// Target field the rule applies to.
    pub field: String,

    /// The rule and its typed parameters.
    pub rule: TransformRule,
}

/// Closed set of rule kinds with their parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformRule {
    Format {
        format: FormatStyle,
    },
    Calculation {
        op: CalcOp,
        operand: f64,
    },
    Lookup {
        table: BTreeMap<String, Value>,
        #[serde(default)]
        default: Option<Value>,
    },
    Conditional {
        when: Condition,
        then: Value,
        /// Value used when the condition does not hold. Keeps the input if unset.
        #[serde(default)]
        otherwise: Option<Value>,
    },
    Enrichment {
        value: Value,
        /// Only fill the field when it is missing or null.
        #[serde(default)]
        only_if_missing: bool,
    },
}

/// String formatting styles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatStyle {
    Uppercase,
    Lowercase,
    Trim,
    /// Replaces every `{value}` in the template with the input.
    Template { template: String },
    /// Renders a number with a fixed number of decimals.
    FixedDecimals { decimals: usize },
}

/// Arithmetic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalcOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// Predicates for conditional rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Equals(Value),
    NotEquals(Value),
    IsNull,
    GreaterThan(f64),
    LessThan(f64),
}

impl TransformRule {
    /// Whether the rule can produce a value for a field the record lacks.
    pub fn fills_missing(&self) -> bool {
        matches!(
            self,
            TransformRule::Enrichment { .. } | TransformRule::Conditional { .. }
        )
    }
}

impl Condition {
    fn holds(&self, value: &Value) -> bool {
        match self {
            Condition::Equals(expected) => value == expected,
            Condition::NotEquals(expected) => value != expected,
            Condition::IsNull => value.is_null(),
            Condition::GreaterThan(bound) => as_f64(value).is_some_and(|n| n > *bound),
            Condition::LessThan(bound) => as_f64(value).is_some_and(|n| n < *bound),
        }
    }
}

impl DataTransformation {
    /// Applies the rule to `value`, returning the new value.
    pub fn apply(&self, value: Value) -> Result<Value, TransformError> {
        match &self.rule {
            TransformRule::Format { format } => self.apply_format(format, value),

            TransformRule::Calculation { op, operand } => {
                let input = as_f64(&value).ok_or_else(|| self.mismatch("number", &value))?;
                let result = match op {
                    CalcOp::Add => input + operand,
                    CalcOp::Subtract => input - operand,
                    CalcOp::Multiply => input * operand,
                    CalcOp::Divide => {
                        if *operand == 0.0 {
                            return Err(TransformError::DivisionByZero {
                                rule_id: self.rule_id.clone(),
                                field: self.field.clone(),
                            });
                        }
                        input / operand
                    }
                };
                self.number(result)
            }

            TransformRule::Lookup { table, default } => {
                let key = lookup_key(&value);
                match table.get(&key) {
                    Some(found) => Ok(found.clone()),
                    None => default.clone().ok_or(TransformError::LookupMiss {
                        rule_id: self.rule_id.clone(),
                        field: self.field.clone(),
                        key,
                    }),
                }
            }

            TransformRule::Conditional {
                when,
                then,
                otherwise,
            } => {
                if when.holds(&value) {
                    Ok(then.clone())
                } else {
                    Ok(otherwise.clone().unwrap_or(value))
                }
            }

            TransformRule::Enrichment {
                value: fill,
                only_if_missing,
            } => {
                if *only_if_missing && !value.is_null() {
                    Ok(value)
                } else {
                    Ok(fill.clone())
                }
            }
        }
    }

    fn apply_format(&self, format: &FormatStyle, value: Value) -> Result<Value, TransformError> {
        if value.is_null() {
            return Ok(value);
        }

        match format {
            FormatStyle::Uppercase => Ok(Value::String(self.text(&value)?.to_uppercase())),
            FormatStyle::Lowercase => Ok(Value::String(self.text(&value)?.to_lowercase())),
            FormatStyle::Trim => Ok(Value::String(self.text(&value)?.trim().to_string())),
            FormatStyle::Template { template } => {
                let rendered = match &value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Ok(Value::String(template.replace("{value}", &rendered)))
            }
            FormatStyle::FixedDecimals { decimals } => {
                if *decimals > MAX_FIXED_DECIMALS {
                    return Err(TransformError::InvalidParameter {
                        rule_id: self.rule_id.clone(),
                        field: self.field.clone(),
                        reason: format!("decimals must be at most {MAX_FIXED_DECIMALS}"),
                    });
                }
                let n = as_f64(&value).ok_or_else(|| self.mismatch("number", &value))?;
                Ok(Value::String(format!("{:.*}", decimals, n)))
            }
        }
    }

    fn text<'a>(&self, value: &'a Value) -> Result<&'a str, TransformError> {
        value.as_str().ok_or_else(|| self.mismatch("string", value))
    }

    fn number(&self, n: f64) -> Result<Value, TransformError> {
        if !n.is_finite() {
            return Err(TransformError::NonFinite {
                rule_id: self.rule_id.clone(),
                field: self.field.clone(),
            });
        }
        // Integral results stay integers so `10` does not turn into `10.0`.
        if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            return Ok(Value::Number(Number::from(n as i64)));
        }
        Number::from_f64(n)
            .map(Value::Number)
            .ok_or(TransformError::NonFinite {
                rule_id: self.rule_id.clone(),
                field: self.field.clone(),
            })
    }

    fn mismatch(&self, expected: &'static str, actual: &Value) -> TransformError {
        TransformError::TypeMismatch {
            rule_id: self.rule_id.clone(),
            field: self.field.clone(),
            expected,
            actual: json_type(actual).to_string(),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Reads a number, accepting numeric strings.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lookup_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
