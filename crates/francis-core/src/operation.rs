//! # Sync Operations
//!
//! One execution instance of a profile and its state machine.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SyncOperation Lifecycle                            │
//! │                                                                         │
//! │   ┌─────────┐  start()   ┌─────────┐  complete()  ┌─────────┐           │
//! │   │ PENDING │ ─────────► │ RUNNING │ ───────────► │ SUCCESS │           │
//! │   └─────────┘            └─────────┘              └─────────┘           │
//! │      ▲   │                 │    │                                       │
//! │      │   │                 │    │ fail()          ┌─────────┐           │
//! │      │   │                 │    └───────────────► │  ERROR  │           │
//! │      │   │                 │     retries left?    └─────────┘           │
//! │      └───┼─────────────────┘ yes: retry_count++       (no)              │
//! │          │ cancel()        │ cancel()                                   │
//! │          ▼                 ▼                                            │
//! │        ┌──────────────────────┐                                         │
//! │        │      CANCELLED       │                                         │
//! │        └──────────────────────┘                                         │
//! │                                                                         │
//! │  Invariants                                                             │
//! │  • records_success + records_error == records_processed                 │
//! │  • end_time.is_some() ⇔ status is terminal                              │
//! │  • retry_count ≤ max_retries                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::SyncConflict;
use crate::error::{CoreError, CoreResult};

// =============================================================================
// Enums
// =============================================================================

/// What kind of pass an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    #[default]
    Sync,
    InitialLoad,
    Incremental,
    ConflictResolution,
}

/// Lifecycle status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Success,
    Error,
    Cancelled,
}

impl OperationStatus {
    /// Terminal states admit no further automatic transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Success | OperationStatus::Error | OperationStatus::Cancelled
        )
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Pending => write!(f, "PENDING"),
            OperationStatus::Running => write!(f, "RUNNING"),
            OperationStatus::Success => write!(f, "SUCCESS"),
            OperationStatus::Error => write!(f, "ERROR"),
            OperationStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Data flow direction of a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationDirection {
    SourceToTarget,
    TargetToSource,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// One entry in an operation's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLog {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Entity the entry concerns, if any.
    pub entity_id: Option<String>,
}

/// What happens after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to PENDING; the caller re-enqueues at the tail.
    Retry,
    /// Terminal ERROR.
    Exhausted,
}

// =============================================================================
// Sync Operation
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,
    /// Owning profile (reference, never embedded).
    pub profile_id: String,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    pub direction: OperationDirection,
    pub created_at: DateTime<Utc>,
    /// Start of the latest attempt.
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub records_success: u64,
    pub records_error: u64,
    pub conflicts: Vec<SyncConflict>,
    pub logs: Vec<SyncLog>,
    /// Number of times this operation was re-enqueued after a failure.
    pub retry_count: u32,
    pub max_retries: u32,
}

impl SyncOperation {
    /// Creates a PENDING operation.
    pub fn new(
        profile_id: impl Into<String>,
        operation_type: OperationType,
        direction: OperationDirection,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        SyncOperation {
            id: Uuid::new_v4().to_string(),
            profile_id: profile_id.into(),
            operation_type,
            status: OperationStatus::Pending,
            direction,
            created_at: now,
            start_time: now,
            end_time: None,
            records_processed: 0,
            records_success: 0,
            records_error: 0,
            conflicts: Vec::new(),
            logs: Vec::new(),
            retry_count: 0,
            max_retries,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition_error(&self, to: OperationStatus) -> CoreError {
        CoreError::InvalidTransition {
            operation_id: self.id.clone(),
            from: self.status,
            to,
        }
    }

    /// PENDING → RUNNING. Counters and conflicts are reset per attempt; logs
    /// accumulate across attempts.
    pub fn start(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != OperationStatus::Pending {
            return Err(self.transition_error(OperationStatus::Running));
        }
        self.status = OperationStatus::Running;
        self.start_time = now;
        self.records_processed = 0;
        self.records_success = 0;
        self.records_error = 0;
        self.conflicts.clear();
        self.log(
            LogLevel::Info,
            format!("Attempt {} started", self.retry_count + 1),
            None,
        );
        Ok(())
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, entity_id: Option<&str>) {
        self.logs.push(SyncLog {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            entity_id: entity_id.map(str::to_string),
        });
    }

    /// Counts one successfully written record.
    pub fn record_success(&mut self, entity_id: &str, message: impl Into<String>) {
        self.records_processed += 1;
        self.records_success += 1;
        self.log(LogLevel::Info, message, Some(entity_id));
    }

    /// Counts one record that could not be processed.
    pub fn record_error(&mut self, entity_id: &str, reason: impl Into<String>) {
        self.records_processed += 1;
        self.records_error += 1;
        self.log(LogLevel::Error, reason, Some(entity_id));
    }

    pub fn add_conflict(&mut self, conflict: SyncConflict) {
        let message = format!(
            "Conflict on field '{}' ({:?})",
            conflict.field, conflict.conflict_type
        );
        let entity_id = conflict.entity_id.clone();
        self.conflicts.push(conflict);
        self.log(LogLevel::Warning, message, Some(&entity_id));
    }

    /// RUNNING → SUCCESS.
    pub fn complete(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != OperationStatus::Running {
            return Err(self.transition_error(OperationStatus::Success));
        }
        self.status = OperationStatus::Success;
        self.end_time = Some(now);
        self.log(
            LogLevel::Info,
            format!(
                "Completed: {} processed, {} succeeded, {} failed",
                self.records_processed, self.records_success, self.records_error
            ),
            None,
        );
        Ok(())
    }

    /// RUNNING → PENDING (retry) or ERROR (exhausted).
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> CoreResult<RetryDecision> {
        if self.status != OperationStatus::Running {
            return Err(self.transition_error(OperationStatus::Error));
        }
        self.log(LogLevel::Error, format!("Attempt failed: {reason}"), None);

        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.status = OperationStatus::Pending;
            Ok(RetryDecision::Retry)
        } else {
            self.status = OperationStatus::Error;
            self.end_time = Some(now);
            Ok(RetryDecision::Exhausted)
        }
    }

    /// PENDING/RUNNING → CANCELLED.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.is_terminal() {
            return Err(self.transition_error(OperationStatus::Cancelled));
        }
        self.status = OperationStatus::Cancelled;
        self.end_time = Some(now);
        self.log(LogLevel::Warning, "Operation cancelled", None);
        Ok(())
    }

    /// Puts an operation interrupted mid-run (process exit) back to PENDING.
    ///
    /// Returns false if the operation was not RUNNING.
    pub fn reset_interrupted(&mut self) -> bool {
        if self.status != OperationStatus::Running {
            return false;
        }
        self.status = OperationStatus::Pending;
        self.log(
            LogLevel::Warning,
            "Operation was interrupted by shutdown; re-queued",
            None,
        );
        true
    }

    pub fn conflict_mut(&mut self, conflict_id: &str) -> Option<&mut SyncConflict> {
        self.conflicts.iter_mut().find(|c| c.id == conflict_id)
    }

    pub fn unresolved_conflicts(&self) -> usize {
        self.conflicts.iter().filter(|c| !c.is_resolved()).count()
    }
}
