//! # Error Types
//!
//! Domain-specific error types for francis-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  francis-core errors (this file)                                       │
//! │  ├── CoreError        - Domain rule violations (state machine, etc.)   │
//! │  ├── TransformError   - A transformation rule could not be applied     │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  francis-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  francis-sync errors (separate crate)                                  │
//! │  └── SyncError        - What callers of the engine see                 │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → caller                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::operation::OperationStatus;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An operation was asked to make a transition its state machine forbids.
    ///
    /// ## Allowed Transitions
    /// ```text
    /// PENDING ──► RUNNING ──► SUCCESS
    ///    │           │   └──► ERROR ──► PENDING (retry only)
    ///    └───────────┴──────► CANCELLED
    /// ```
    #[error("Invalid operation transition for {operation_id}: {from} -> {to}")]
    InvalidTransition {
        operation_id: String,
        from: OperationStatus,
        to: OperationStatus,
    },

    /// A transformation failed for a record.
    #[error("Transformation failed for record {entity_id}: {source}")]
    Transform {
        entity_id: String,
        #[source]
        source: TransformError,
    },

    /// Input validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Transform Error
// =============================================================================

/// Errors raised while applying a [`crate::transform::DataTransformation`].
#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    /// The rule expects a different JSON type.
    #[error("Rule '{rule_id}' on '{field}' expects {expected}, got {actual}")]
    TypeMismatch {
        rule_id: String,
        field: String,
        expected: &'static str,
        actual: String,
    },

    /// Division by zero in a calculation rule.
    #[error("Rule '{rule_id}' on '{field}' divides by zero")]
    DivisionByZero { rule_id: String, field: String },

    /// A lookup rule found no entry and has no default.
    #[error("Rule '{rule_id}' on '{field}' has no lookup entry for {key}")]
    LookupMiss {
        rule_id: String,
        field: String,
        key: String,
    },

    /// A calculation produced a value JSON cannot represent (NaN, infinity).
    #[error("Rule '{rule_id}' on '{field}' produced a non-finite number")]
    NonFinite { rule_id: String, field: String },

    /// A rule parameter is outside its accepted range.
    #[error("Rule '{rule_id}' on '{field}' is misconfigured: {reason}")]
    InvalidParameter {
        rule_id: String,
        field: String,
        reason: String,
    },
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field exceeds maximum length.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Field has an invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A field name appears more than once where it must be unique.
    #[error("{field} contains duplicate entry '{value}'")]
    Duplicate { field: String, value: String },
}
