//! # francis-core: Pure Domain Logic for the Francis Sync Engine
//!
//! Everything the engine decides without touching the network or disk:
//! profile and operation types, the operation state machine, field mapping,
//! transformation rules and conflict policy.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Francis Sync Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    apps/syncd (daemon)                          │   │
//! │  │        config ──► restore ──► scheduler ──► ctrl-c shutdown     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 francis-sync (engine, I/O)                      │   │
//! │  │   SyncEngine • Scheduler • Executor • Webhooks • Providers      │   │
//! │  └──────────────┬──────────────────────────────────┬───────────────┘   │
//! │                 │                                  │                    │
//! │  ┌──────────────▼──────────────────┐  ┌────────────▼───────────────┐   │
//! │  │   ★ francis-core (THIS CRATE) ★ │  │  francis-db (snapshots)    │   │
//! │  │   types • operation • conflict  │  │  SQLite pool, migrations   │   │
//! │  │   mapping • transform • valid.  │  │  SnapshotRepository        │   │
//! │  │   NO I/O • PURE FUNCTIONS       │  └────────────────────────────┘   │
//! │  └─────────────────────────────────┘                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Profiles, entity records, webhook endpoints, stats
//! - [`operation`] - `SyncOperation` and its state machine
//! - [`conflict`] - Conflict ledger entries, detection, resolution policy
//! - [`mapping`] - Field mapping
//! - [`transform`] - Declarative transformation rules
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod error;
pub mod mapping;
pub mod operation;
pub mod transform;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use conflict::{ConflictResolution, ConflictType, MergeRule, SyncConflict};
pub use error::{CoreError, CoreResult, TransformError, ValidationError};
pub use mapping::FieldMapping;
pub use operation::{
    LogLevel, OperationDirection, OperationStatus, OperationType, RetryDecision, SyncLog,
    SyncOperation,
};
pub use transform::{DataTransformation, TransformRule};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Retry budget for operations that do not set their own.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default page size for `getOperations`.
pub const DEFAULT_OPERATIONS_LIMIT: usize = 50;
