//! # Conflict Ledger & Resolver
//!
//! Field-level conflicts detected during bidirectional syncs, and the pure
//! policy that decides what happens to them.
//!
//! ## Resolution Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Conflict Resolution Policy                          │
//! │                                                                         │
//! │  profile.conflict_resolution        ledger entry           value written│
//! │  ───────────────────────────        ────────────           ─────────────│
//! │  SOURCE_WINS                        ACCEPTED_SOURCE (now)  source       │
//! │  TARGET_WINS                        ACCEPTED_TARGET (now)  target       │
//! │  MERGE + rule for field             MERGED (now)           merged       │
//! │  MERGE without rule ─┐                                                  │
//! │  MANUAL ─────────────┴──────────►  resolution = null      target       │
//! │                                     (awaits resolve())                  │
//! │                                                                         │
//! │  Every conflict is recorded for audit, even auto-resolved ones.        │
//! │  A conflict is never an error and never aborts an operation.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Resolution is write-once: the first resolution wins and later calls are
//! ignored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{ConflictStrategy, EntityRecord, EntityType, Fields};

/// `resolved_by` recorded for policy auto-resolutions.
pub const SYSTEM_RESOLVER: &str = "system";

/// Field name used for whole-record conflicts.
pub const WHOLE_RECORD: &str = "*";

// =============================================================================
// Conflict Types
// =============================================================================

/// Kind of disagreement between source and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// Both sides have the field with different values.
    ValueMismatch,
    /// The source deleted a record the target still has.
    DeletedRecord,
    /// The target record exists but lacks the mapped field.
    SchemaChange,
}

/// Terminal resolution of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictResolution {
    AcceptedSource,
    AcceptedTarget,
    Merged,
    Manual,
}

// =============================================================================
// Sync Conflict
// =============================================================================

/// One field-level mismatch recorded on an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: String,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub field: String,
    pub source_value: Value,
    pub target_value: Value,
    pub conflict_type: ConflictType,
    pub resolution: Option<ConflictResolution>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub detected_at: DateTime<Utc>,
}

impl SyncConflict {
    /// Creates an unresolved conflict.
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        field: impl Into<String>,
        source_value: Value,
        target_value: Value,
        conflict_type: ConflictType,
        detected_at: DateTime<Utc>,
    ) -> Self {
        SyncConflict {
            id: Uuid::new_v4().to_string(),
            entity_id: entity_id.into(),
            entity_type,
            field: field.into(),
            source_value,
            target_value,
            conflict_type,
            resolution: None,
            resolved_at: None,
            resolved_by: None,
            detected_at,
        }
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Sets the resolution if none exists yet.
    ///
    /// Returns `false` (and changes nothing) when already resolved.
    pub fn resolve(
        &mut self,
        resolution: ConflictResolution,
        resolved_by: impl Into<String>,
        at: DateTime<Utc>,
    ) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.resolution = Some(resolution);
        self.resolved_by = Some(resolved_by.into());
        self.resolved_at = Some(at);
        true
    }
}

// =============================================================================
// Merge Rules
// =============================================================================

/// Field-specific merge rule used by [`ConflictStrategy::Merge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum MergeRule {
    PreferSource,
    PreferTarget,
    /// Source unless it is null or an empty string.
    PreferNonEmpty,
    /// Joins two strings, skipping the target if it already ends with the source.
    Concatenate { separator: String },
    NumericMax,
    NumericMin,
}

impl MergeRule {
    /// Merges two values. `None` means the rule does not apply to these values.
    pub fn merge(&self, source: &Value, target: &Value) -> Option<Value> {
        match self {
            MergeRule::PreferSource => Some(source.clone()),
            MergeRule::PreferTarget => Some(target.clone()),
            MergeRule::PreferNonEmpty => {
                let empty = source.is_null() || source.as_str().is_some_and(str::is_empty);
                Some(if empty { target.clone() } else { source.clone() })
            }
            MergeRule::Concatenate { separator } => {
                let (s, t) = (source.as_str()?, target.as_str()?);
                if t.ends_with(s) {
                    Some(target.clone())
                } else {
                    Some(Value::String(format!("{t}{separator}{s}")))
                }
            }
            MergeRule::NumericMax | MergeRule::NumericMin => {
                let (s, t) = (source.as_f64()?, target.as_f64()?);
                let pick_source = match self {
                    MergeRule::NumericMax => s >= t,
                    _ => s <= t,
                };
                Some(if pick_source { source.clone() } else { target.clone() })
            }
        }
    }
}

// =============================================================================
// Detection
// =============================================================================

/// Compares mapped source fields with the pre-existing target record.
///
/// A missing target record is a create, not a conflict.
pub fn detect_conflicts(
    entity_type: EntityType,
    source: &EntityRecord,
    mapped: &Fields,
    existing: Option<&EntityRecord>,
    now: DateTime<Utc>,
) -> Vec<SyncConflict> {
    let Some(existing) = existing else {
        return Vec::new();
    };

    if source.deleted {
        if existing.deleted {
            return Vec::new();
        }
        return vec![SyncConflict::new(
            &source.id,
            entity_type,
            WHOLE_RECORD,
            Value::Null,
            Value::Object(existing.fields.clone()),
            ConflictType::DeletedRecord,
            now,
        )];
    }

    mapped
        .iter()
        .filter_map(|(field, value)| match existing.fields.get(field) {
            Some(current) if current == value => None,
            Some(current) => Some(SyncConflict::new(
                &source.id,
                entity_type,
                field,
                value.clone(),
                current.clone(),
                ConflictType::ValueMismatch,
                now,
            )),
            None if value.is_null() => None,
            None => Some(SyncConflict::new(
                &source.id,
                entity_type,
                field,
                value.clone(),
                Value::Null,
                ConflictType::SchemaChange,
                now,
            )),
        })
        .collect()
}

// =============================================================================
// Resolver
// =============================================================================

/// Outcome of applying the profile policy to one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictDecision {
    /// Resolution to record immediately; `None` leaves the conflict pending.
    pub resolution: Option<ConflictResolution>,
    /// Value to write for the field.
    pub value: Value,
}

/// Applies `strategy` (and `merge_rules` for MERGE) to `conflict`.
pub fn decide(
    strategy: ConflictStrategy,
    merge_rules: &BTreeMap<String, MergeRule>,
    conflict: &SyncConflict,
) -> ConflictDecision {
    let pending = ConflictDecision {
        resolution: None,
        value: conflict.target_value.clone(),
    };

    match strategy {
        ConflictStrategy::SourceWins => ConflictDecision {
            resolution: Some(ConflictResolution::AcceptedSource),
            value: conflict.source_value.clone(),
        },
        ConflictStrategy::TargetWins => ConflictDecision {
            resolution: Some(ConflictResolution::AcceptedTarget),
            value: conflict.target_value.clone(),
        },
        ConflictStrategy::Merge => merge_rules
            .get(&conflict.field)
            .and_then(|rule| rule.merge(&conflict.source_value, &conflict.target_value))
            .map(|value| ConflictDecision {
                resolution: Some(ConflictResolution::Merged),
                value,
            })
            .unwrap_or(pending),
        ConflictStrategy::Manual => pending,
    }
}
