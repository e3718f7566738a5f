//! # francis-sync: Sync Engine for the Francis Data-Sync Service
//!
//! Reconciles entities between a source and a target system under a profile's
//! mapping, transformation and conflict rules, one operation at a time.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncEngine (engine.rs)                      │  │
//! │  │                                                                  │  │
//! │  │  Profile Store · Operation table · FIFO queue · Webhook registry │  │
//! │  │  tick(): at most one RUNNING operation system-wide               │  │
//! │  └───────┬───────────────────┬───────────────────┬──────────────────┘  │
//! │          │                   │                   │                      │
//! │          ▼                   ▼                   ▼                      │
//! │  ┌───────────────┐  ┌─────────────────┐  ┌────────────────────────┐    │
//! │  │   Executor    │  │ WebhookDispatch │  │   StatePersistence     │    │
//! │  │               │  │                 │  │                        │    │
//! │  │ pull → map →  │  │ bounded queue,  │  │ profiles / operations  │    │
//! │  │ transform →   │  │ HMAC signature, │  │ / webhooks snapshots   │    │
//! │  │ conflicts →   │  │ backoff retry   │  │ (SQLite or memory)     │    │
//! │  │ write         │  │                 │  │                        │    │
//! │  └──────┬────────┘  └─────────────────┘  └────────────────────────┘    │
//! │         ▼                                                               │
//! │  ┌───────────────┐        ┌───────────────┐                            │
//! │  │ DataProvider  │        │   Scheduler   │ interval loop → tick()     │
//! │  │ HTTP / memory │        │ (scheduler.rs)│                            │
//! │  └───────────────┘        └───────────────┘                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - `SyncEngine`, the public programmatic surface
//! - [`executor`] - One attempt of one operation
//! - [`scheduler`] - Background polling loop
//! - [`provider`] - Source/target data provider seam
//! - [`webhook`] - Outbound webhook delivery
//! - [`persistence`] - Snapshot/restore of engine state
//! - [`events`] - In-process event emitter
//! - [`config`] - Engine configuration (TOML + env)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use francis_sync::{EngineConfig, ExecuteOptions, Scheduler, SyncEngine};
//!
//! let config = EngineConfig::load(None)?;
//! let engine = SyncEngine::builder(config.clone()).build()?;
//!
//! let profile = engine.create_sync_profile(data).await?;
//! let op = engine.execute_sync(&profile.id, ExecuteOptions::manual()).await?;
//!
//! let scheduler = Scheduler::spawn(engine.clone(), config.poll_interval());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod persistence;
pub mod provider;
pub mod scheduler;
pub mod webhook;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{EngineConfig, EngineSettings, ProviderSettings, StorageSettings, WebhookSettings};
pub use engine::{ExecuteOptions, RestoreSummary, SyncEngine, SyncEngineBuilder, TickOutcome};
pub use error::{SyncError, SyncResult};
pub use events::{LogEmitter, NoOpEmitter, SyncEventEmitter};
pub use executor::{ExecutionOutcome, Executor};
pub use persistence::{Collection, MemoryPersistence, SqlitePersistence, StatePersistence};
pub use provider::{DataProvider, HttpDataProvider, MemoryProvider, RecordPage};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use webhook::{WebhookDispatcher, WebhookEnvelope};
