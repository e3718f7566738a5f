//! # Scheduler
//!
//! Background task that calls [`SyncEngine::tick`] on a fixed interval.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Scheduler Loop                                  │
//! │                                                                         │
//! │   interval (poll_interval_ms, MissedTickBehavior::Delay)               │
//! │        │                                                                │
//! │        ├──► engine.tick()     one attempt at most, awaited in-loop     │
//! │        │                                                                │
//! │        └──► shutdown_rx       stop after the current tick              │
//! │                                                                         │
//! │  A long attempt delays the next tick instead of overlapping it.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::{SyncEngine, TickOutcome};
use crate::error::{SyncError, SyncResult};

/// Drives an engine until shut down.
pub struct Scheduler {
    engine: SyncEngine,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals shutdown and waits for the loop to exit.
    pub async fn shutdown(self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Scheduler shutdown channel closed".into()))?;
        self.join
            .await
            .map_err(|e| SyncError::Internal(format!("Scheduler task failed: {e}")))
    }
}

impl Scheduler {
    /// Spawns the scheduler loop on the current runtime.
    pub fn spawn(engine: SyncEngine, interval: Duration) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let scheduler = Scheduler {
            engine,
            interval,
            shutdown_rx,
        };
        let join = tokio::spawn(scheduler.run());

        SchedulerHandle { shutdown_tx, join }
    }

    async fn run(mut self) {
        info!(interval_ms = self.interval.as_millis() as u64, "Scheduler starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.engine.tick().await {
                        TickOutcome::Executed { operation_id, status } => {
                            debug!(operation_id = %operation_id, status = %status, "Tick executed");
                        }
                        TickOutcome::Idle | TickOutcome::Skipped => {}
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }

        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::ExecuteOptions;
    use crate::provider::MemoryProvider;
    use francis_core::{
        ConflictStrategy, EntityRecord, EntityType, FieldMapping, Fields, NewSyncProfile,
        OperationStatus, SyncDirection, SyncFrequency,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scheduler_drains_queue_and_stops() {
        let provider = Arc::new(MemoryProvider::new());
        provider
            .insert("crm", EntityType::Account, EntityRecord::new("a1", Fields::new()))
            .await;

        let engine = SyncEngine::builder(EngineConfig::default())
            .with_provider(provider)
            .build()
            .unwrap();
        let profile = engine
            .create_sync_profile(NewSyncProfile {
                name: "Accounts".into(),
                source_api: "crm".into(),
                target_api: "ledger".into(),
                entity_type: EntityType::Account,
                direction: SyncDirection::Unidirectional,
                frequency: SyncFrequency::Manual,
                field_mapping: vec![FieldMapping::new("number", "account_no")],
                transformations: Vec::new(),
                conflict_resolution: ConflictStrategy::SourceWins,
                merge_rules: BTreeMap::new(),
            })
            .await
            .unwrap();
        let first = engine.execute_sync(&profile.id, ExecuteOptions::manual()).await.unwrap();
        let second = engine.execute_sync(&profile.id, ExecuteOptions::manual()).await.unwrap();

        let handle = Scheduler::spawn(engine.clone(), Duration::from_millis(10));

        for _ in 0..200 {
            if engine.queue_len().await == 0
                && engine.get_dashboard_stats().await.running_operations == 0
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.shutdown().await.unwrap();

        for id in [first.id, second.id] {
            let op = engine.get_operation(&id).await.unwrap();
            assert_eq!(op.status, OperationStatus::Success);
        }
    }
}
