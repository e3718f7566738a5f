//! # Sync Executor
//!
//! Runs one attempt of one operation: pull pages, map, transform, detect
//! conflicts, write.
//!
//! ## Passes by Direction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Executor Passes                                 │
//! │                                                                         │
//! │  SOURCE_TO_TARGET   source ──map+transform──► target                   │
//! │  TARGET_TO_SOURCE   target ──inverted map───► source                   │
//! │  BIDIRECTIONAL      source ──map+transform──► target                   │
//! │                     then target ──inverted──► source (create only)     │
//! │                                                                         │
//! │  Per page:    cancelled? ─► stop      fetch error ─► attempt fails    │
//! │  Per record:  cancelled? ─► stop      record error ─► recordsError++  │
//! │                                                                         │
//! │  Conflicts are only detected for BIDIRECTIONAL profiles and never      │
//! │  fail the attempt.                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use francis_core::conflict::{decide, detect_conflicts, SYSTEM_RESOLVER};
use francis_core::mapping::{invert, map_record};
use francis_core::{
    ConflictResolution, ConflictType, DataTransformation, EntityRecord, FieldMapping, Fields,
    OperationDirection, OperationType, SyncOperation, SyncProfile,
};

use crate::error::SyncResult;
use crate::provider::DataProvider;

/// How an attempt ended without an attempt-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Every page was processed.
    Completed,
    /// The cancellation flag was observed.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Written,
    Deleted,
    /// Tombstone with nothing to delete.
    Absent,
    /// Deletion held back by a conflict.
    Retained,
    /// Create-only pass found the record already present.
    Skipped,
}

impl RecordOutcome {
    fn message(&self) -> &'static str {
        match self {
            RecordOutcome::Written => "Record written",
            RecordOutcome::Deleted => "Record deleted",
            RecordOutcome::Absent => "Record already absent",
            RecordOutcome::Retained => "Deletion retained pending conflict resolution",
            RecordOutcome::Skipped => "Record skipped",
        }
    }
}

struct Pass<'a> {
    from_api: &'a str,
    to_api: &'a str,
    mapping: Vec<FieldMapping>,
    transformations: &'a [DataTransformation],
    detect_conflicts: bool,
    create_only: bool,
    since: Option<DateTime<Utc>>,
}

/// Executes operations against a [`DataProvider`].
pub struct Executor {
    provider: Arc<dyn DataProvider>,
    batch_size: usize,
}

impl Executor {
    pub fn new(provider: Arc<dyn DataProvider>, batch_size: usize) -> Self {
        Executor {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    /// Runs one attempt of `op` for `profile`.
    ///
    /// `op` must be RUNNING. Counters, conflicts and logs are updated in place;
    /// the status transition is left to the caller.
    pub async fn run(
        &self,
        profile: &SyncProfile,
        op: &mut SyncOperation,
        cancel: &AtomicBool,
    ) -> SyncResult<ExecutionOutcome> {
        let since = match op.operation_type {
            OperationType::Incremental => profile.last_sync,
            _ => None,
        };

        info!(
            operation_id = %op.id,
            profile_id = %profile.id,
            direction = ?op.direction,
            since = ?since,
            "Executing sync attempt"
        );

        let forward = Pass {
            from_api: &profile.source_api,
            to_api: &profile.target_api,
            mapping: profile.field_mapping.clone(),
            transformations: &profile.transformations,
            detect_conflicts: profile.is_bidirectional(),
            create_only: false,
            since,
        };
        let reverse = Pass {
            from_api: &profile.target_api,
            to_api: &profile.source_api,
            mapping: invert(&profile.field_mapping),
            transformations: &[],
            detect_conflicts: profile.is_bidirectional(),
            create_only: false,
            since,
        };

        match op.direction {
            OperationDirection::SourceToTarget => self.run_pass(profile, &forward, op, cancel).await,
            OperationDirection::TargetToSource => self.run_pass(profile, &reverse, op, cancel).await,
            OperationDirection::Bidirectional => {
                if self.run_pass(profile, &forward, op, cancel).await? == ExecutionOutcome::Cancelled {
                    return Ok(ExecutionOutcome::Cancelled);
                }
                let backfill = Pass {
                    detect_conflicts: false,
                    create_only: true,
                    ..reverse
                };
                self.run_pass(profile, &backfill, op, cancel).await
            }
        }
    }

    async fn run_pass(
        &self,
        profile: &SyncProfile,
        pass: &Pass<'_>,
        op: &mut SyncOperation,
        cancel: &AtomicBool,
    ) -> SyncResult<ExecutionOutcome> {
        let mut cursor: Option<String> = None;

        loop {
            if cancel.load(Ordering::SeqCst) {
                return Ok(ExecutionOutcome::Cancelled);
            }

            let page = self
                .provider
                .fetch_batch(
                    pass.from_api,
                    profile.entity_type,
                    cursor.as_deref(),
                    self.batch_size,
                    pass.since,
                )
                .await?;

            debug!(
                operation_id = %op.id,
                from = pass.from_api,
                to = pass.to_api,
                count = page.records.len(),
                "Fetched page"
            );

            for record in &page.records {
                if cancel.load(Ordering::SeqCst) {
                    return Ok(ExecutionOutcome::Cancelled);
                }

                match self.sync_record(profile, pass, op, record).await {
                    Ok(RecordOutcome::Skipped) => {}
                    Ok(outcome) => op.record_success(&record.id, outcome.message()),
                    Err(e) => op.record_error(&record.id, format!("Record failed: {e}")),
                }
            }

            match page.next_cursor {
                Some(next) if !page.records.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(ExecutionOutcome::Completed)
    }

    async fn sync_record(
        &self,
        profile: &SyncProfile,
        pass: &Pass<'_>,
        op: &mut SyncOperation,
        record: &EntityRecord,
    ) -> SyncResult<RecordOutcome> {
        let entity_type = profile.entity_type;

        if pass.create_only {
            if record.deleted {
                return Ok(RecordOutcome::Skipped);
            }
            let present = self
                .provider
                .fetch_record(pass.to_api, entity_type, &record.id)
                .await?
                .is_some_and(|r| !r.deleted);
            if present {
                return Ok(RecordOutcome::Skipped);
            }
            let mapped = map_record(record, &pass.mapping, pass.transformations)?;
            self.provider
                .write_record(pass.to_api, entity_type, &record.id, &mapped)
                .await?;
            return Ok(RecordOutcome::Written);
        }

        if record.deleted {
            return self.sync_tombstone(profile, pass, op, record).await;
        }

        let mut mapped = map_record(record, &pass.mapping, pass.transformations)?;

        if pass.detect_conflicts {
            let existing = self
                .provider
                .fetch_record(pass.to_api, entity_type, &record.id)
                .await?
                .filter(|r| !r.deleted);
            self.apply_conflicts(profile, op, record, &mut mapped, existing.as_ref());
        }

        self.provider
            .write_record(pass.to_api, entity_type, &record.id, &mapped)
            .await?;
        Ok(RecordOutcome::Written)
    }

    async fn sync_tombstone(
        &self,
        profile: &SyncProfile,
        pass: &Pass<'_>,
        op: &mut SyncOperation,
        record: &EntityRecord,
    ) -> SyncResult<RecordOutcome> {
        let entity_type = profile.entity_type;
        let existing = self
            .provider
            .fetch_record(pass.to_api, entity_type, &record.id)
            .await?
            .filter(|r| !r.deleted);

        let Some(existing) = existing else {
            return Ok(RecordOutcome::Absent);
        };

        if pass.detect_conflicts {
            let now = Utc::now();
            let mut delete = false;
            for mut conflict in detect_conflicts(entity_type, record, &Fields::new(), Some(&existing), now) {
                let decision = decide(profile.conflict_resolution, &profile.merge_rules, &conflict);
                if let Some(resolution) = decision.resolution {
                    conflict.resolve(resolution, SYSTEM_RESOLVER, now);
                    delete = resolution == ConflictResolution::AcceptedSource;
                }
                op.add_conflict(conflict);
            }
            if !delete {
                return Ok(RecordOutcome::Retained);
            }
        }

        self.provider
            .delete_record(pass.to_api, entity_type, &record.id)
            .await?;
        Ok(RecordOutcome::Deleted)
    }

    /// Records conflicts against `existing` and rewrites `mapped` per policy.
    fn apply_conflicts(
        &self,
        profile: &SyncProfile,
        op: &mut SyncOperation,
        record: &EntityRecord,
        mapped: &mut Fields,
        existing: Option<&EntityRecord>,
    ) {
        let now = Utc::now();

        for mut conflict in detect_conflicts(profile.entity_type, record, mapped, existing, now) {
            let decision = decide(profile.conflict_resolution, &profile.merge_rules, &conflict);

            match decision.resolution {
                Some(resolution) => {
                    conflict.resolve(resolution, SYSTEM_RESOLVER, now);
                    mapped.insert(conflict.field.clone(), decision.value);
                }
                // Unresolved new field stays off the target until resolved.
                None if conflict.conflict_type == ConflictType::SchemaChange => {
                    mapped.remove(&conflict.field);
                }
                None => {
                    mapped.insert(conflict.field.clone(), decision.value);
                }
            }

            op.add_conflict(conflict);
        }
    }
}
