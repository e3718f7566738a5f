//! # Sync Engine
//!
//! Owns the profile store, the operation table, the FIFO queue and the webhook
//! registry, and drives one operation at a time through the executor.
//!
//! ## Tick
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            tick()                                       │
//! │                                                                         │
//! │  ticking? ──yes──► Skipped                                             │
//! │     │ no                                                                │
//! │     ▼                                                                   │
//! │  auto_schedule: enqueue SYNC for every due profile                     │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  pop head PENDING ──none──► Idle                                       │
//! │     │ PENDING → RUNNING        (state lock released)                   │
//! │     ▼                                                                   │
//! │  Executor::run ─────────────────────────────────────────┐              │
//! │     │                                                    │              │
//! │     ├─ cancel flag set ─────────► CANCELLED              │              │
//! │     ├─ Ok(Completed) ───────────► SUCCESS, profile.lastSync = now       │
//! │     │                                   └─► sync.completed             │
//! │     └─ Err(e) ─┬─ retry < max ──► PENDING, push to queue TAIL          │
//! │                └─ exhausted ────► ERROR ─► sync.failed                 │
//! │                                                                         │
//! │  persist ─► notify webhooks ─► emit events ─► Executed                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! State is only held under the lock for bookkeeping; provider calls and
//! persistence run with the lock released.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use francis_core::validation::{validate_new_profile, validate_new_webhook};
use francis_core::{
    ConflictResolution, DashboardStats, LogLevel, NewSyncProfile, NewWebhookEndpoint,
    OperationDirection, OperationStatus, OperationType, RetryDecision, SyncOperation, SyncProfile,
    WebhookEndpoint, WebhookEvent,
};

use crate::config::{EngineConfig, EngineSettings};
use crate::error::{SyncError, SyncResult};
use crate::events::{NoOpEmitter, SyncEventEmitter};
use crate::executor::{ExecutionOutcome, Executor};
use crate::persistence::{decode, encode, Collection, MemoryPersistence, StatePersistence};
use crate::provider::{DataProvider, HttpDataProvider};
use crate::webhook::WebhookDispatcher;

// =============================================================================
// Public Types
// =============================================================================

/// Options for [`SyncEngine::execute_sync`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub operation_type: OperationType,
    /// Defaults to BIDIRECTIONAL for bidirectional profiles, else SOURCE_TO_TARGET.
    pub direction: Option<OperationDirection>,
    /// Allows running an inactive profile.
    pub manual: bool,
    /// Defaults to `engine.default_max_retries`.
    pub max_retries: Option<u32>,
}

impl ExecuteOptions {
    pub fn manual() -> Self {
        ExecuteOptions {
            manual: true,
            ..Default::default()
        }
    }
}

/// Result of one scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still executing.
    Skipped,
    /// Nothing was queued.
    Idle,
    /// One attempt ran; `status` is the operation's status afterwards.
    Executed {
        operation_id: String,
        status: OperationStatus,
    },
}

/// What [`SyncEngine::restore`] reloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub profiles: usize,
    pub operations: usize,
    pub webhooks: usize,
    /// PENDING operations put back on the queue.
    pub requeued: usize,
    /// RUNNING operations found after a crash, reset to PENDING.
    pub interrupted: usize,
}

// =============================================================================
// Engine State
// =============================================================================

#[derive(Default)]
struct EngineState {
    profiles: HashMap<String, SyncProfile>,
    /// Creation order.
    operations: Vec<SyncOperation>,
    queue: VecDeque<String>,
    webhooks: Vec<WebhookEndpoint>,
    running: Option<(String, Arc<AtomicBool>)>,
}

impl EngineState {
    fn operation(&self, id: &str) -> Option<&SyncOperation> {
        self.operations.iter().find(|op| op.id == id)
    }

    fn operation_mut(&mut self, id: &str) -> Option<&mut SyncOperation> {
        self.operations.iter_mut().find(|op| op.id == id)
    }

    fn has_open_operation(&self, profile_id: &str) -> bool {
        self.operations.iter().any(|op| {
            op.profile_id == profile_id
                && matches!(op.status, OperationStatus::Pending | OperationStatus::Running)
        })
    }

    fn sorted_profiles(&self) -> Vec<&SyncProfile> {
        let mut profiles: Vec<&SyncProfile> = self.profiles.values().collect();
        profiles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        profiles
    }

    fn encode(&self, collection: Collection) -> SyncResult<Vec<(String, Value)>> {
        match collection {
            Collection::Profiles => encode(self.sorted_profiles().into_iter().map(|p| (&p.id, p))),
            Collection::Operations => encode(self.operations.iter().map(|op| (&op.id, op))),
            Collection::Webhooks => encode(self.webhooks.iter().map(|w| (&w.id, w))),
        }
    }
}

struct EngineInner {
    settings: EngineSettings,
    state: RwLock<EngineState>,
    executor: Executor,
    dispatcher: WebhookDispatcher,
    persistence: Arc<dyn StatePersistence>,
    emitter: Arc<dyn SyncEventEmitter>,
    ticking: AtomicBool,
    /// Serializes snapshot writes so a later snapshot never lands first.
    persist_lock: Mutex<()>,
}

struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// The sync engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Starts building an engine from `config`.
    pub fn builder(config: EngineConfig) -> SyncEngineBuilder {
        SyncEngineBuilder::new(config)
    }

    // =========================================================================
    // Profile Store
    // =========================================================================

    /// Validates and stores a new, inactive profile.
    pub async fn create_sync_profile(&self, data: NewSyncProfile) -> SyncResult<SyncProfile> {
        validate_new_profile(&data)?;
        let profile = SyncProfile::from_new(data, Utc::now());

        self.inner
            .state
            .write()
            .await
            .profiles
            .insert(profile.id.clone(), profile.clone());

        info!(
            profile_id = %profile.id,
            name = %profile.name,
            entity_type = %profile.entity_type,
            frequency = %profile.frequency,
            "Sync profile created"
        );

        self.persist(&[Collection::Profiles]).await;
        Ok(profile)
    }

    pub async fn get_sync_profile(&self, profile_id: &str) -> Option<SyncProfile> {
        self.inner.state.read().await.profiles.get(profile_id).cloned()
    }

    /// All profiles, oldest first.
    pub async fn get_sync_profiles(&self) -> Vec<SyncProfile> {
        let state = self.inner.state.read().await;
        state.sorted_profiles().into_iter().cloned().collect()
    }

    /// Activates or deactivates a profile. Unknown ids are ignored.
    pub async fn toggle_profile(&self, profile_id: &str, active: bool) {
        let changed = match self.inner.state.write().await.profiles.get_mut(profile_id) {
            Some(profile) => {
                profile.active = active;
                true
            }
            None => false,
        };

        if changed {
            info!(profile_id = %profile_id, active, "Sync profile toggled");
            self.persist(&[Collection::Profiles]).await;
        } else {
            debug!(profile_id = %profile_id, "Toggle ignored for unknown profile");
        }
    }

    // =========================================================================
    // Operation Queue
    // =========================================================================

    /// Creates a PENDING operation for `profile_id` and appends it to the queue.
    ///
    /// ## Errors
    /// - [`SyncError::ProfileNotFound`] if no such profile exists
    /// - [`SyncError::ProfileDisabled`] if it is inactive and `options.manual` is false
    pub async fn execute_sync(
        &self,
        profile_id: &str,
        options: ExecuteOptions,
    ) -> SyncResult<SyncOperation> {
        let operation = {
            let mut state = self.inner.state.write().await;
            let profile = state
                .profiles
                .get(profile_id)
                .ok_or_else(|| SyncError::ProfileNotFound(profile_id.to_string()))?;

            if !profile.active && !options.manual {
                return Err(SyncError::ProfileDisabled(profile_id.to_string()));
            }

            let operation = self.new_operation(profile, &options);
            state.queue.push_back(operation.id.clone());
            state.operations.push(operation.clone());
            operation
        };

        info!(
            operation_id = %operation.id,
            profile_id = %profile_id,
            operation_type = ?operation.operation_type,
            manual = options.manual,
            "Operation enqueued"
        );

        self.persist(&[Collection::Operations]).await;
        Ok(operation)
    }

    fn new_operation(&self, profile: &SyncProfile, options: &ExecuteOptions) -> SyncOperation {
        let direction = options.direction.unwrap_or(if profile.is_bidirectional() {
            OperationDirection::Bidirectional
        } else {
            OperationDirection::SourceToTarget
        });
        SyncOperation::new(
            &profile.id,
            options.operation_type,
            direction,
            options
                .max_retries
                .unwrap_or(self.inner.settings.default_max_retries),
            Utc::now(),
        )
    }

    /// Cancels a PENDING or RUNNING operation.
    ///
    /// A PENDING operation leaves the queue at once. A RUNNING one is flagged
    /// and stops before its next record. Returns false for unknown or
    /// terminal operations.
    pub async fn cancel_operation(&self, operation_id: &str) -> bool {
        let cancelled = {
            let mut state = self.inner.state.write().await;

            if let Some((running_id, flag)) = &state.running {
                if running_id == operation_id {
                    flag.store(true, Ordering::SeqCst);
                    info!(operation_id = %operation_id, "Cancellation requested for running operation");
                    return true;
                }
            }

            let Some(operation) = state.operation_mut(operation_id) else {
                return false;
            };
            if operation.status != OperationStatus::Pending {
                return false;
            }
            if let Err(e) = operation.cancel(Utc::now()) {
                warn!(operation_id = %operation_id, error = %e, "Cancel rejected");
                return false;
            }
            let cancelled = operation.clone();
            state.queue.retain(|id| id != operation_id);
            cancelled
        };

        info!(operation_id = %operation_id, "Pending operation cancelled");
        self.persist(&[Collection::Operations]).await;
        self.inner.emitter.emit_operation_finished(&cancelled);
        true
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.state.read().await.queue.len()
    }

    pub async fn get_operation(&self, operation_id: &str) -> Option<SyncOperation> {
        self.inner.state.read().await.operation(operation_id).cloned()
    }

    /// Operations newest first, optionally for one profile.
    ///
    /// `limit` defaults to `engine.operation_history_limit`.
    pub async fn get_operations(
        &self,
        profile_id: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<SyncOperation> {
        let limit = limit.unwrap_or(self.inner.settings.operation_history_limit);
        let state = self.inner.state.read().await;
        state
            .operations
            .iter()
            .rev()
            .filter(|op| profile_id.map_or(true, |id| op.profile_id == id))
            .take(limit)
            .cloned()
            .collect()
    }

    // =========================================================================
    // Conflict Ledger
    // =========================================================================

    /// Resolves one conflict of an operation, terminal or not.
    ///
    /// Returns false if either id is unknown or the conflict was already
    /// resolved; the first resolution is kept.
    pub async fn resolve_conflict(
        &self,
        operation_id: &str,
        conflict_id: &str,
        resolution: ConflictResolution,
        resolved_by: &str,
    ) -> bool {
        let resolved = {
            let mut state = self.inner.state.write().await;
            let Some(operation) = state.operation_mut(operation_id) else {
                return false;
            };
            let Some(conflict) = operation.conflict_mut(conflict_id) else {
                return false;
            };
            let resolved = conflict.resolve(resolution, resolved_by, Utc::now());
            if resolved {
                let entity_id = conflict.entity_id.clone();
                operation.log(
                    LogLevel::Info,
                    format!("Conflict {conflict_id} resolved as {resolution:?} by {resolved_by}"),
                    Some(&entity_id),
                );
            }
            resolved
        };

        if resolved {
            info!(
                operation_id = %operation_id,
                conflict_id = %conflict_id,
                ?resolution,
                resolved_by = %resolved_by,
                "Conflict resolved"
            );
            self.persist(&[Collection::Operations]).await;
        } else {
            debug!(operation_id = %operation_id, conflict_id = %conflict_id, "Conflict not resolved");
        }
        resolved
    }

    // =========================================================================
    // Webhook Registry
    // =========================================================================

    pub async fn add_webhook_endpoint(&self, data: NewWebhookEndpoint) -> SyncResult<WebhookEndpoint> {
        validate_new_webhook(&data)?;
        let endpoint = WebhookEndpoint::from_new(data, Utc::now());

        self.inner.state.write().await.webhooks.push(endpoint.clone());
        info!(endpoint_id = %endpoint.id, url = %endpoint.url, "Webhook endpoint registered");

        self.persist(&[Collection::Webhooks]).await;
        Ok(endpoint)
    }

    pub async fn get_webhook_endpoints(&self) -> Vec<WebhookEndpoint> {
        self.inner.state.read().await.webhooks.clone()
    }

    // =========================================================================
    // Dashboard
    // =========================================================================

    pub async fn get_dashboard_stats(&self) -> DashboardStats {
        let state = self.inner.state.read().await;
        let count = |status: OperationStatus| {
            state
                .operations
                .iter()
                .filter(|op| op.status == status)
                .count()
        };

        DashboardStats {
            total_profiles: state.profiles.len(),
            active_profiles: state.profiles.values().filter(|p| p.active).count(),
            total_operations: state.operations.len(),
            running_operations: count(OperationStatus::Running),
            pending_operations: count(OperationStatus::Pending),
            successful_operations: count(OperationStatus::Success),
            failed_operations: count(OperationStatus::Error),
            total_conflicts: state.operations.iter().map(|op| op.conflicts.len()).sum(),
            unresolved_conflicts: state
                .operations
                .iter()
                .map(SyncOperation::unresolved_conflicts)
                .sum(),
        }
    }

    // =========================================================================
    // Scheduler Tick
    // =========================================================================

    /// Schedules due profiles, then runs at most one queued attempt.
    pub async fn tick(&self) -> TickOutcome {
        if self
            .inner
            .ticking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Previous tick still running, skipping");
            return TickOutcome::Skipped;
        }
        let _guard = TickGuard(&self.inner.ticking);

        if self.inner.settings.auto_schedule {
            self.schedule_due().await;
        }

        let Some((mut operation, profile, cancel)) = self.begin_next().await else {
            return TickOutcome::Idle;
        };

        let result = self.inner.executor.run(&profile, &mut operation, &cancel).await;
        self.finish(operation, &profile, result, &cancel).await
    }

    async fn schedule_due(&self) {
        let now = Utc::now();
        let scheduled = {
            let mut state = self.inner.state.write().await;
            let due: Vec<SyncProfile> = state
                .sorted_profiles()
                .into_iter()
                .filter(|p| p.is_due(now) && !state.has_open_operation(&p.id))
                .cloned()
                .collect();

            for profile in &due {
                let operation = self.new_operation(profile, &ExecuteOptions::default());
                debug!(profile_id = %profile.id, operation_id = %operation.id, "Scheduled due profile");
                state.queue.push_back(operation.id.clone());
                state.operations.push(operation);
            }
            due.len()
        };

        if scheduled > 0 {
            info!(count = scheduled, "Scheduled due profiles");
            self.persist(&[Collection::Operations]).await;
        }
    }

    /// Pops the head PENDING operation and marks it RUNNING.
    async fn begin_next(&self) -> Option<(SyncOperation, SyncProfile, Arc<AtomicBool>)> {
        let now = Utc::now();
        let next = {
            let mut state = self.inner.state.write().await;
            let mut next = None;

            while let Some(id) = state.queue.pop_front() {
                let Some(profile) = state
                    .operation(&id)
                    .and_then(|op| state.profiles.get(&op.profile_id))
                    .cloned()
                else {
                    if let Some(orphan) = state.operation_mut(&id) {
                        orphan.log(LogLevel::Error, "Owning profile no longer exists", None);
                        if let Err(e) = orphan.cancel(now) {
                            warn!(operation_id = %id, error = %e, "Cancel rejected");
                        }
                    }
                    warn!(operation_id = %id, "Dropping operation without profile");
                    continue;
                };

                let Some(operation) = state.operation_mut(&id) else {
                    continue;
                };
                if operation.status != OperationStatus::Pending {
                    continue;
                }
                if let Err(e) = operation.start(now) {
                    warn!(operation_id = %id, error = %e, "Could not start operation");
                    continue;
                }

                let operation = operation.clone();
                let cancel = Arc::new(AtomicBool::new(false));
                state.running = Some((id, Arc::clone(&cancel)));
                next = Some((operation, profile, cancel));
                break;
            }
            next
        };

        if next.is_some() {
            self.persist(&[Collection::Operations]).await;
        }
        next
    }

    async fn finish(
        &self,
        mut operation: SyncOperation,
        profile: &SyncProfile,
        result: SyncResult<ExecutionOutcome>,
        cancel: &AtomicBool,
    ) -> TickOutcome {
        let now = Utc::now();
        let mut event = None;
        let mut retry_reason = None;

        if cancel.load(Ordering::SeqCst) || matches!(result, Ok(ExecutionOutcome::Cancelled)) {
            if let Err(e) = operation.cancel(now) {
                warn!(operation_id = %operation.id, error = %e, "Cancel rejected");
            }
        } else {
            match result {
                Ok(_) => match operation.complete(now) {
                    Ok(()) => event = Some(WebhookEvent::SyncCompleted),
                    Err(e) => error!(operation_id = %operation.id, error = %e, "Complete rejected"),
                },
                Err(e) => {
                    let reason = e.to_string();
                    error!(
                        operation_id = %operation.id,
                        retry = operation.retry_count,
                        retryable = e.is_retryable(),
                        error = %reason,
                        "Sync attempt failed"
                    );
                    match operation.fail(&reason, now) {
                        Ok(RetryDecision::Retry) => retry_reason = Some(reason),
                        Ok(RetryDecision::Exhausted) => event = Some(WebhookEvent::SyncFailed),
                        Err(e) => error!(operation_id = %operation.id, error = %e, "Fail rejected"),
                    }
                }
            }
        }

        let succeeded = operation.status == OperationStatus::Success;
        let (webhooks, depth) = {
            let mut state = self.inner.state.write().await;

            if succeeded {
                if let Some(stored) = state.profiles.get_mut(&operation.profile_id) {
                    stored.record_sync(now);
                }
            }
            if retry_reason.is_some() {
                state.queue.push_back(operation.id.clone());
            }
            if let Some(slot) = state.operation_mut(&operation.id) {
                *slot = operation.clone();
            }
            state.running = None;

            (state.webhooks.clone(), state.queue.len())
        };

        info!(
            operation_id = %operation.id,
            status = %operation.status,
            processed = operation.records_processed,
            succeeded = operation.records_success,
            failed = operation.records_error,
            conflicts = operation.conflicts.len(),
            "Attempt finished"
        );

        if succeeded {
            self.persist(&[Collection::Operations, Collection::Profiles]).await;
        } else {
            self.persist(&[Collection::Operations]).await;
        }

        if let Some(event) = event {
            match webhook_payload(&operation, profile) {
                Ok(payload) => {
                    self.inner.dispatcher.notify(&webhooks, event, payload);
                }
                Err(e) => warn!(
                    operation_id = %operation.id,
                    event = %event,
                    error = %e,
                    "Could not encode webhook payload, delivery skipped"
                ),
            }
        }

        match &retry_reason {
            Some(reason) => self.inner.emitter.emit_retry(&operation, reason),
            None => self.inner.emitter.emit_operation_finished(&operation),
        }
        self.inner.emitter.emit_queue_depth(depth);

        TickOutcome::Executed {
            operation_id: operation.id,
            status: operation.status,
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Reloads all collections from the persistence adapter, replacing the
    /// in-memory state.
    pub async fn restore(&self) -> SyncResult<RestoreSummary> {
        let persistence = &self.inner.persistence;
        let profiles: Vec<(String, SyncProfile)> =
            decode(persistence.load(Collection::Profiles).await?)?;
        let mut operations: Vec<(String, SyncOperation)> =
            decode(persistence.load(Collection::Operations).await?)?;
        let webhooks: Vec<(String, WebhookEndpoint)> =
            decode(persistence.load(Collection::Webhooks).await?)?;

        operations.sort_by(|(_, a), (_, b)| a.created_at.cmp(&b.created_at));

        let mut summary = RestoreSummary {
            profiles: profiles.len(),
            operations: operations.len(),
            webhooks: webhooks.len(),
            ..Default::default()
        };

        {
            let mut state = self.inner.state.write().await;
            *state = EngineState::default();
            state.profiles = profiles.into_iter().collect();
            state.webhooks = webhooks.into_iter().map(|(_, w)| w).collect();

            for (_, mut operation) in operations {
                if operation.reset_interrupted() {
                    warn!(operation_id = %operation.id, "Interrupted operation re-queued");
                    summary.interrupted += 1;
                }
                if operation.status == OperationStatus::Pending {
                    state.queue.push_back(operation.id.clone());
                    summary.requeued += 1;
                }
                state.operations.push(operation);
            }
        }

        info!(
            profiles = summary.profiles,
            operations = summary.operations,
            webhooks = summary.webhooks,
            requeued = summary.requeued,
            interrupted = summary.interrupted,
            "Engine state restored"
        );

        if summary.interrupted > 0 {
            self.persist(&[Collection::Operations]).await;
        }
        Ok(summary)
    }

    /// Saves `collections`. Failures are logged and never surface.
    async fn persist(&self, collections: &[Collection]) {
        let _order = self.inner.persist_lock.lock().await;

        for &collection in collections {
            let entries = self.inner.state.read().await.encode(collection);
            let saved = match entries {
                Ok(entries) => self.inner.persistence.save(collection, entries).await,
                Err(e) => Err(e),
            };
            if let Err(e) = saved {
                warn!(collection = collection.as_str(), error = %e, "Failed to persist collection");
            }
        }
    }

    /// Stops the webhook dispatcher.
    pub async fn shutdown(&self) -> SyncResult<()> {
        info!("Sync engine shutting down");
        self.inner.dispatcher.shutdown().await
    }
}

/// Operation snapshot sent with terminal webhook events.
fn webhook_payload(operation: &SyncOperation, profile: &SyncProfile) -> serde_json::Result<Value> {
    let mut payload = serde_json::to_value(operation)?;
    if let Value::Object(map) = &mut payload {
        map.insert("profile_name".into(), Value::String(profile.name.clone()));
    }
    Ok(payload)
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a [`SyncEngine`] with custom collaborators.
pub struct SyncEngineBuilder {
    config: EngineConfig,
    provider: Option<Arc<dyn DataProvider>>,
    persistence: Option<Arc<dyn StatePersistence>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        SyncEngineBuilder {
            config,
            provider: None,
            persistence: None,
            emitter: None,
        }
    }

    /// Sets the data provider. Defaults to HTTP with the configured providers.
    pub fn with_provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets the persistence adapter. Defaults to in-memory.
    pub fn with_persistence(mut self, persistence: Arc<dyn StatePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Builds the engine and spawns its webhook dispatcher.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> SyncResult<SyncEngine> {
        self.config.validate()?;

        let provider = match self.provider {
            Some(provider) => provider,
            None => Arc::new(HttpDataProvider::from_config(&self.config)?),
        };
        let persistence = self
            .persistence
            .unwrap_or_else(|| Arc::new(MemoryPersistence::new()));
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));
        let dispatcher = WebhookDispatcher::spawn(&self.config.webhooks)?;

        let settings = self.config.engine;
        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                executor: Executor::new(provider, settings.batch_size),
                settings,
                state: RwLock::new(EngineState::default()),
                dispatcher,
                persistence,
                emitter,
                ticking: AtomicBool::new(false),
                persist_lock: Mutex::new(()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryProvider, RecordPage};
    use async_trait::async_trait;
    use chrono::DateTime;
    use francis_core::{
        ConflictStrategy, EntityRecord, EntityType, FieldMapping, Fields, RetryConfig,
        SyncDirection, SyncFrequency,
    };
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    // =========================================================================
    // Helpers
    // =========================================================================

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn config(auto_schedule: bool) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.engine.auto_schedule = auto_schedule;
        config.webhooks.initial_backoff_ms = 10;
        config
    }

    fn new_profile(name: &str, source: &str, direction: SyncDirection, frequency: SyncFrequency) -> NewSyncProfile {
        NewSyncProfile {
            name: name.into(),
            source_api: source.into(),
            target_api: "ledger".into(),
            entity_type: EntityType::Client,
            direction,
            frequency,
            field_mapping: vec![FieldMapping::new("full_name", "name")],
            transformations: Vec::new(),
            conflict_resolution: ConflictStrategy::Manual,
            merge_rules: BTreeMap::new(),
        }
    }

    fn new_webhook(url: String, events: &[WebhookEvent]) -> NewWebhookEndpoint {
        NewWebhookEndpoint {
            name: "ops".into(),
            url,
            events: events.iter().copied().collect::<BTreeSet<_>>(),
            headers: BTreeMap::new(),
            active: true,
            secret: None,
            retry_config: RetryConfig {
                max_retries: 0,
                backoff_multiplier: 2.0,
                max_backoff_seconds: 1,
            },
        }
    }

    async fn seeded_provider() -> Arc<MemoryProvider> {
        let provider = Arc::new(MemoryProvider::new());
        provider
            .insert(
                "crm",
                EntityType::Client,
                EntityRecord::new("c1", fields(json!({ "full_name": "Jane" }))),
            )
            .await;
        provider
    }

    fn engine(provider: Arc<dyn DataProvider>, persistence: Arc<dyn StatePersistence>, auto: bool) -> SyncEngine {
        SyncEngine::builder(config(auto))
            .with_provider(provider)
            .with_persistence(persistence)
            .build()
            .unwrap()
    }

    async fn wait_for_requests(server: &MockServer, n: usize) -> Vec<Request> {
        for _ in 0..100 {
            let received = server.received_requests().await.unwrap_or_default();
            if received.len() >= n {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        server.received_requests().await.unwrap_or_default()
    }

    async fn run_until_terminal(engine: &SyncEngine, operation_id: &str) -> usize {
        let mut ticks = 0;
        for _ in 0..20 {
            engine.tick().await;
            ticks += 1;
            let op = engine.get_operation(operation_id).await.unwrap();
            if op.is_terminal() {
                break;
            }
        }
        ticks
    }

    #[derive(Default)]
    struct CountingEmitter {
        finished: AtomicUsize,
        retries: AtomicUsize,
    }

    impl SyncEventEmitter for CountingEmitter {
        fn emit_operation_finished(&self, _operation: &SyncOperation) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_retry(&self, _operation: &SyncOperation, _reason: &str) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_queue_depth(&self, _depth: usize) {}
    }

    /// Blocks every page fetch until released.
    struct GatedProvider {
        inner: MemoryProvider,
        entered: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl DataProvider for GatedProvider {
        async fn fetch_batch(
            &self,
            api: &str,
            entity_type: EntityType,
            cursor: Option<&str>,
            limit: usize,
            since: Option<DateTime<Utc>>,
        ) -> SyncResult<RecordPage> {
            self.entered.notify_one();
            let _permit = self.gate.acquire().await.unwrap();
            self.inner.fetch_batch(api, entity_type, cursor, limit, since).await
        }

        async fn fetch_record(&self, api: &str, entity_type: EntityType, id: &str) -> SyncResult<Option<EntityRecord>> {
            self.inner.fetch_record(api, entity_type, id).await
        }

        async fn write_record(&self, api: &str, entity_type: EntityType, id: &str, fields: &Fields) -> SyncResult<()> {
            self.inner.write_record(api, entity_type, id, fields).await
        }

        async fn delete_record(&self, api: &str, entity_type: EntityType, id: &str) -> SyncResult<()> {
            self.inner.delete_record(api, entity_type, id).await
        }
    }

    struct FailingPersistence;

    #[async_trait]
    impl StatePersistence for FailingPersistence {
        async fn save(&self, _collection: Collection, _entries: Vec<(String, Value)>) -> SyncResult<()> {
            Err(SyncError::DatabaseError("disk full".into()))
        }
        async fn load(&self, _collection: Collection) -> SyncResult<Vec<(String, Value)>> {
            Err(SyncError::DatabaseError("disk full".into()))
        }
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    #[tokio::test]
    async fn test_manual_run_succeeds_and_schedules_next_sync() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let engine = engine(seeded_provider().await, Arc::new(MemoryPersistence::new()), false);
        engine
            .add_webhook_endpoint(new_webhook(server.uri(), &[WebhookEvent::SyncCompleted]))
            .await
            .unwrap();
        let profile = engine
            .create_sync_profile(new_profile("Clients", "crm", SyncDirection::Unidirectional, SyncFrequency::Hourly))
            .await
            .unwrap();
        assert!(!profile.active);

        let op = engine.execute_sync(&profile.id, ExecuteOptions::manual()).await.unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(engine.queue_len().await, 1);

        let outcome = engine.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Executed {
                operation_id: op.id.clone(),
                status: OperationStatus::Success
            }
        );

        let done = engine.get_operation(&op.id).await.unwrap();
        assert_eq!(done.records_processed, 1);
        assert!(done.end_time.is_some());

        let profile = engine.get_sync_profile(&profile.id).await.unwrap();
        let last = profile.last_sync.unwrap();
        assert_eq!(profile.next_sync, Some(last + chrono::Duration::hours(1)));

        let received = wait_for_requests(&server, 1).await;
        assert_eq!(received.len(), 1);
        let envelope: Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(envelope["event"], "sync.completed");
        assert_eq!(envelope["payload"]["status"], "SUCCESS");
        assert_eq!(envelope["payload"]["profile_name"], "Clients");
    }

    #[tokio::test]
    async fn test_inactive_profile_rejected_without_manual() {
        let engine = engine(seeded_provider().await, Arc::new(MemoryPersistence::new()), false);
        let profile = engine
            .create_sync_profile(new_profile("Clients", "crm", SyncDirection::Unidirectional, SyncFrequency::Hourly))
            .await
            .unwrap();

        let err = engine
            .execute_sync(&profile.id, ExecuteOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::ProfileDisabled(_)));
        assert!(err.is_config_error());
        assert_eq!(engine.queue_len().await, 0);
        assert!(engine.get_operations(None, None).await.is_empty());

        let err = engine
            .execute_sync("missing", ExecuteOptions::manual())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ProfileNotFound(_)));
    }

    #[tokio::test]
    async fn test_max_retries_plus_one_attempts_then_single_failed_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let provider = seeded_provider().await;
        provider.fail_next_fetches("crm", 100).await;
        let emitter = Arc::new(CountingEmitter::default());
        let engine = SyncEngine::builder(config(false))
            .with_provider(provider)
            .with_emitter(emitter.clone())
            .build()
            .unwrap();

        engine
            .add_webhook_endpoint(new_webhook(
                server.uri(),
                &[WebhookEvent::SyncCompleted, WebhookEvent::SyncFailed],
            ))
            .await
            .unwrap();
        let profile = engine
            .create_sync_profile(new_profile("Clients", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual))
            .await
            .unwrap();
        let op = engine.execute_sync(&profile.id, ExecuteOptions::manual()).await.unwrap();
        assert_eq!(op.max_retries, 3);

        let ticks = run_until_terminal(&engine, &op.id).await;
        assert_eq!(ticks, 4);

        let failed = engine.get_operation(&op.id).await.unwrap();
        assert_eq!(failed.status, OperationStatus::Error);
        assert_eq!(failed.retry_count, 3);
        assert!(failed.end_time.is_some());
        assert_eq!(engine.queue_len().await, 0);

        // terminal ERROR is sticky
        assert_eq!(engine.tick().await, TickOutcome::Idle);
        assert_eq!(engine.get_operation(&op.id).await.unwrap().status, OperationStatus::Error);

        let received = wait_for_requests(&server, 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(received.len(), 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        let envelope: Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(envelope["event"], "sync.failed");
        assert_eq!(envelope["payload"]["id"], json!(op.id));
        assert_eq!(envelope["payload"]["profile_name"], "Clients");

        assert_eq!(emitter.retries.load(Ordering::SeqCst), 3);
        assert_eq!(emitter.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bidirectional_conflict_resolved_once() {
        let provider = seeded_provider().await;
        provider
            .insert(
                "ledger",
                EntityType::Client,
                EntityRecord::new("c1", fields(json!({ "name": "Janet" }))),
            )
            .await;

        let engine = engine(provider, Arc::new(MemoryPersistence::new()), false);
        let profile = engine
            .create_sync_profile(new_profile("Clients", "crm", SyncDirection::Bidirectional, SyncFrequency::Manual))
            .await
            .unwrap();
        let op = engine.execute_sync(&profile.id, ExecuteOptions::manual()).await.unwrap();
        assert_eq!(op.direction, OperationDirection::Bidirectional);
        engine.tick().await;

        let done = engine.get_operation(&op.id).await.unwrap();
        assert_eq!(done.status, OperationStatus::Success);
        assert_eq!(done.conflicts.len(), 1);
        assert!(done.conflicts[0].resolution.is_none());
        assert_eq!(engine.get_dashboard_stats().await.unresolved_conflicts, 1);

        let conflict_id = done.conflicts[0].id.clone();
        assert!(
            engine
                .resolve_conflict(&op.id, &conflict_id, ConflictResolution::AcceptedSource, "alice")
                .await
        );
        let first = engine.get_operation(&op.id).await.unwrap().conflicts[0].clone();

        assert!(
            !engine
                .resolve_conflict(&op.id, &conflict_id, ConflictResolution::AcceptedTarget, "bob")
                .await
        );
        let after = engine.get_operation(&op.id).await.unwrap();
        assert_eq!(after.status, OperationStatus::Success);
        assert_eq!(after.conflicts[0].resolution, Some(ConflictResolution::AcceptedSource));
        assert_eq!(after.conflicts[0].resolved_by.as_deref(), Some("alice"));
        assert_eq!(after.conflicts[0].resolved_at, first.resolved_at);

        assert!(!engine.resolve_conflict("nope", &conflict_id, ConflictResolution::Manual, "x").await);
        assert!(!engine.resolve_conflict(&op.id, "nope", ConflictResolution::Manual, "x").await);
    }

    #[tokio::test]
    async fn test_failed_only_webhook_not_called_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let engine = engine(seeded_provider().await, Arc::new(MemoryPersistence::new()), false);
        engine
            .add_webhook_endpoint(new_webhook(server.uri(), &[WebhookEvent::SyncFailed]))
            .await
            .unwrap();
        let profile = engine
            .create_sync_profile(new_profile("Clients", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual))
            .await
            .unwrap();
        engine.execute_sync(&profile.id, ExecuteOptions::manual()).await.unwrap();
        engine.tick().await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    // =========================================================================
    // Queue & Scheduling
    // =========================================================================

    #[tokio::test]
    async fn test_single_running_operation_and_running_cancel() {
        let provider = Arc::new(GatedProvider {
            inner: MemoryProvider::new(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        });
        provider
            .inner
            .insert(
                "crm",
                EntityType::Client,
                EntityRecord::new("c1", fields(json!({ "full_name": "Jane" }))),
            )
            .await;

        let engine = engine(provider.clone(), Arc::new(MemoryPersistence::new()), false);
        let profile = engine
            .create_sync_profile(new_profile("Clients", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual))
            .await
            .unwrap();
        let first = engine.execute_sync(&profile.id, ExecuteOptions::manual()).await.unwrap();
        let second = engine.execute_sync(&profile.id, ExecuteOptions::manual()).await.unwrap();

        let ticking = engine.clone();
        let handle = tokio::spawn(async move { ticking.tick().await });
        provider.entered.notified().await;

        assert_eq!(engine.tick().await, TickOutcome::Skipped);
        let stats = engine.get_dashboard_stats().await;
        assert_eq!(stats.running_operations, 1);
        assert_eq!(stats.pending_operations, 1);
        assert_eq!(
            engine.get_operation(&second.id).await.unwrap().status,
            OperationStatus::Pending
        );

        assert!(engine.cancel_operation(&first.id).await);
        provider.gate.add_permits(10);

        let outcome = handle.await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Executed {
                operation_id: first.id.clone(),
                status: OperationStatus::Cancelled
            }
        );
        let cancelled = engine.get_operation(&first.id).await.unwrap();
        assert!(cancelled.end_time.is_some());
        assert!(!engine.cancel_operation(&first.id).await);

        match engine.tick().await {
            TickOutcome::Executed { operation_id, status } => {
                assert_eq!(operation_id, second.id);
                assert_eq!(status, OperationStatus::Success);
            }
            other => panic!("unexpected tick outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_pending_operation() {
        let engine = engine(seeded_provider().await, Arc::new(MemoryPersistence::new()), false);
        let profile = engine
            .create_sync_profile(new_profile("Clients", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual))
            .await
            .unwrap();
        let op = engine.execute_sync(&profile.id, ExecuteOptions::manual()).await.unwrap();

        assert!(engine.cancel_operation(&op.id).await);
        assert_eq!(engine.queue_len().await, 0);

        let cancelled = engine.get_operation(&op.id).await.unwrap();
        assert_eq!(cancelled.status, OperationStatus::Cancelled);
        assert!(cancelled.end_time.is_some());
        assert_eq!(engine.tick().await, TickOutcome::Idle);
        assert!(!engine.cancel_operation("missing").await);
    }

    #[tokio::test]
    async fn test_orphaned_operation_is_cancelled_on_dequeue() {
        let engine = engine(seeded_provider().await, Arc::new(MemoryPersistence::new()), false);
        let orphan = SyncOperation::new(
            "deleted-profile",
            OperationType::Sync,
            OperationDirection::SourceToTarget,
            3,
            Utc::now(),
        );
        {
            let mut state = engine.inner.state.write().await;
            state.queue.push_back(orphan.id.clone());
            state.operations.push(orphan.clone());
        }

        assert_eq!(engine.tick().await, TickOutcome::Idle);
        assert_eq!(engine.queue_len().await, 0);

        let cancelled = engine.get_operation(&orphan.id).await.unwrap();
        assert_eq!(cancelled.status, OperationStatus::Cancelled);
        assert!(cancelled.end_time.is_some());
        assert!(cancelled
            .logs
            .iter()
            .any(|log| log.level == LogLevel::Error && log.message.contains("profile")));
    }

    #[test]
    fn test_webhook_payload_carries_profile_name() {
        let profile = SyncProfile::from_new(
            new_profile("Clients", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual),
            Utc::now(),
        );
        let operation = SyncOperation::new(
            &profile.id,
            OperationType::Sync,
            OperationDirection::SourceToTarget,
            3,
            Utc::now(),
        );

        let payload = webhook_payload(&operation, &profile).unwrap();
        assert_eq!(payload["id"], json!(operation.id));
        assert_eq!(payload["profile_id"], json!(profile.id));
        assert_eq!(payload["profile_name"], "Clients");
    }

    #[tokio::test]
    async fn test_retry_requeues_at_tail() {
        let provider = seeded_provider().await;
        provider
            .insert(
                "erp",
                EntityType::Client,
                EntityRecord::new("e1", fields(json!({ "full_name": "Eve" }))),
            )
            .await;
        provider.fail_next_fetches("erp", 1).await;

        let engine = engine(provider, Arc::new(MemoryPersistence::new()), false);
        let flaky = engine
            .create_sync_profile(new_profile("Flaky", "erp", SyncDirection::Unidirectional, SyncFrequency::Manual))
            .await
            .unwrap();
        let steady = engine
            .create_sync_profile(new_profile("Steady", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual))
            .await
            .unwrap();

        let flaky_op = engine.execute_sync(&flaky.id, ExecuteOptions::manual()).await.unwrap();
        let steady_op = engine.execute_sync(&steady.id, ExecuteOptions::manual()).await.unwrap();

        assert_eq!(
            engine.tick().await,
            TickOutcome::Executed {
                operation_id: flaky_op.id.clone(),
                status: OperationStatus::Pending
            }
        );
        assert_eq!(
            engine.tick().await,
            TickOutcome::Executed {
                operation_id: steady_op.id.clone(),
                status: OperationStatus::Success
            }
        );
        assert_eq!(
            engine.tick().await,
            TickOutcome::Executed {
                operation_id: flaky_op.id.clone(),
                status: OperationStatus::Success
            }
        );

        let flaky_op = engine.get_operation(&flaky_op.id).await.unwrap();
        assert_eq!(flaky_op.retry_count, 1);
        assert!(flaky_op.logs.iter().any(|l| l.level == LogLevel::Error));
    }

    #[tokio::test]
    async fn test_auto_schedule_enqueues_due_profiles() {
        let engine = engine(seeded_provider().await, Arc::new(MemoryPersistence::new()), true);
        let hourly = engine
            .create_sync_profile(new_profile("Hourly", "crm", SyncDirection::Unidirectional, SyncFrequency::Hourly))
            .await
            .unwrap();
        let manual = engine
            .create_sync_profile(new_profile("Manual", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual))
            .await
            .unwrap();

        // inactive profiles are never scheduled
        assert_eq!(engine.tick().await, TickOutcome::Idle);

        engine.toggle_profile(&hourly.id, true).await;
        engine.toggle_profile(&manual.id, true).await;
        engine.toggle_profile("missing", true).await;

        assert!(matches!(
            engine.tick().await,
            TickOutcome::Executed {
                status: OperationStatus::Success,
                ..
            }
        ));
        // next_sync is an hour away now
        assert_eq!(engine.tick().await, TickOutcome::Idle);

        let operations = engine.get_operations(None, None).await;
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].profile_id, hourly.id);
        assert!(engine.get_operations(Some(&manual.id), None).await.is_empty());
    }

    #[tokio::test]
    async fn test_operations_newest_first_with_limit() {
        let engine = engine(seeded_provider().await, Arc::new(MemoryPersistence::new()), false);
        let a = engine
            .create_sync_profile(new_profile("A", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual))
            .await
            .unwrap();
        let b = engine
            .create_sync_profile(new_profile("B", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual))
            .await
            .unwrap();

        let first = engine.execute_sync(&a.id, ExecuteOptions::manual()).await.unwrap();
        let second = engine.execute_sync(&b.id, ExecuteOptions::manual()).await.unwrap();
        let third = engine.execute_sync(&a.id, ExecuteOptions::manual()).await.unwrap();

        let all: Vec<String> = engine
            .get_operations(None, None)
            .await
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(all, vec![third.id.clone(), second.id.clone(), first.id.clone()]);

        let limited = engine.get_operations(None, Some(2)).await;
        assert_eq!(limited.len(), 2);

        let only_a: Vec<String> = engine
            .get_operations(Some(&a.id), None)
            .await
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(only_a, vec![third.id, first.id]);

        let profiles = engine.get_sync_profiles().await;
        assert_eq!(profiles.len(), 2);
        assert!(profiles.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn test_dashboard_stats() {
        let engine = engine(seeded_provider().await, Arc::new(MemoryPersistence::new()), false);
        let profile = engine
            .create_sync_profile(new_profile("Clients", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual))
            .await
            .unwrap();
        engine.toggle_profile(&profile.id, true).await;
        engine.execute_sync(&profile.id, ExecuteOptions::default()).await.unwrap();
        engine.execute_sync(&profile.id, ExecuteOptions::default()).await.unwrap();
        engine.tick().await;

        let stats = engine.get_dashboard_stats().await;
        assert_eq!(stats.total_profiles, 1);
        assert_eq!(stats.active_profiles, 1);
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.successful_operations, 1);
        assert_eq!(stats.pending_operations, 1);
        assert_eq!(stats.running_operations, 0);
        assert_eq!(stats.failed_operations, 0);
        assert_eq!(stats.total_conflicts, 0);
    }

    #[tokio::test]
    async fn test_invalid_input_rejected() {
        let engine = engine(seeded_provider().await, Arc::new(MemoryPersistence::new()), false);

        let mut data = new_profile("Clients", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual);
        data.field_mapping.clear();
        let err = engine.create_sync_profile(data).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let err = engine
            .add_webhook_endpoint(new_webhook("ftp://example.com".into(), &[WebhookEvent::SyncFailed]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(engine.get_webhook_endpoints().await.is_empty());
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[tokio::test]
    async fn test_restore_requeues_pending_operations() {
        let persistence = Arc::new(MemoryPersistence::new());
        let provider = seeded_provider().await;

        let (profile_id, pending_id) = {
            let engine = engine(provider.clone(), persistence.clone(), false);
            engine
                .add_webhook_endpoint(new_webhook("https://hooks.example.com/x".into(), &[WebhookEvent::SyncFailed]))
                .await
                .unwrap();
            let profile = engine
                .create_sync_profile(new_profile("Clients", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual))
                .await
                .unwrap();
            engine.execute_sync(&profile.id, ExecuteOptions::manual()).await.unwrap();
            let pending = engine.execute_sync(&profile.id, ExecuteOptions::manual()).await.unwrap();
            engine.tick().await;
            (profile.id, pending.id)
        };

        assert!(persistence.version(Collection::Operations).await > 0);

        let restored = engine(provider, persistence, false);
        let summary = restored.restore().await.unwrap();
        assert_eq!(
            summary,
            RestoreSummary {
                profiles: 1,
                operations: 2,
                webhooks: 1,
                requeued: 1,
                interrupted: 0,
            }
        );
        assert!(restored.get_sync_profile(&profile_id).await.unwrap().last_sync.is_some());
        assert_eq!(restored.queue_len().await, 1);

        assert_eq!(
            restored.tick().await,
            TickOutcome::Executed {
                operation_id: pending_id,
                status: OperationStatus::Success
            }
        );
    }

    #[tokio::test]
    async fn test_restore_resets_interrupted_operation() {
        let persistence = Arc::new(MemoryPersistence::new());
        let mut interrupted = SyncOperation::new(
            "p-1",
            OperationType::Sync,
            OperationDirection::SourceToTarget,
            3,
            Utc::now(),
        );
        interrupted.start(Utc::now()).unwrap();
        persistence
            .save(
                Collection::Operations,
                encode(std::iter::once((&interrupted.id, &interrupted))).unwrap(),
            )
            .await
            .unwrap();

        let engine = engine(seeded_provider().await, persistence, false);
        let summary = engine.restore().await.unwrap();
        assert_eq!(summary.interrupted, 1);
        assert_eq!(summary.requeued, 1);

        let op = engine.get_operation(&interrupted.id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert!(op.end_time.is_none());
        assert!(op.logs.iter().any(|l| l.level == LogLevel::Warning));
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_abort() {
        let engine = engine(seeded_provider().await, Arc::new(FailingPersistence), false);
        let profile = engine
            .create_sync_profile(new_profile("Clients", "crm", SyncDirection::Unidirectional, SyncFrequency::Manual))
            .await
            .unwrap();
        let op = engine.execute_sync(&profile.id, ExecuteOptions::manual()).await.unwrap();

        assert_eq!(
            engine.tick().await,
            TickOutcome::Executed {
                operation_id: op.id,
                status: OperationStatus::Success
            }
        );
        assert!(engine.restore().await.is_err());
    }
}
