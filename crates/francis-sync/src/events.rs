//! # Engine Events
//!
//! In-process observer for engine activity, alongside the outbound webhooks.
//! Embedders (a desktop shell, a metrics bridge) implement
//! [`SyncEventEmitter`]; the daemon uses [`NoOpEmitter`] or [`LogEmitter`].
//!
//! Emitters are called after the engine state lock is released and must not
//! block.

use tracing::{debug, info};

use francis_core::SyncOperation;

/// Observer for operation lifecycle events.
pub trait SyncEventEmitter: Send + Sync {
    /// An operation reached SUCCESS, ERROR or CANCELLED.
    fn emit_operation_finished(&self, operation: &SyncOperation);

    /// An attempt failed and the operation was re-enqueued.
    fn emit_retry(&self, operation: &SyncOperation, reason: &str);

    /// Queue depth after a tick.
    fn emit_queue_depth(&self, depth: usize);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_operation_finished(&self, _operation: &SyncOperation) {}
    fn emit_retry(&self, _operation: &SyncOperation, _reason: &str) {}
    fn emit_queue_depth(&self, _depth: usize) {}
}

/// Emits every event as a `tracing` record.
pub struct LogEmitter;

impl SyncEventEmitter for LogEmitter {
    fn emit_operation_finished(&self, operation: &SyncOperation) {
        info!(
            operation_id = %operation.id,
            profile_id = %operation.profile_id,
            status = %operation.status,
            processed = operation.records_processed,
            errors = operation.records_error,
            conflicts = operation.conflicts.len(),
            "Operation finished"
        );
    }

    fn emit_retry(&self, operation: &SyncOperation, reason: &str) {
        info!(
            operation_id = %operation.id,
            retry = operation.retry_count,
            max_retries = operation.max_retries,
            reason = %reason,
            "Operation re-enqueued"
        );
    }

    fn emit_queue_depth(&self, depth: usize) {
        debug!(depth, "Queue depth");
    }
}
