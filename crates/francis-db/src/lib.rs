//! # francis-db: Database Layer for the Francis Sync Engine
//!
//! SQLite storage for engine state snapshots, accessed through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Francis Persistence Flow                         │
//! │                                                                         │
//! │  SyncEngine mutation (create profile, finish operation, ...)           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SqlitePersistence (francis-sync) ── serialize [(id, record)] ──┐     │
//! │                                                                  │     │
//! │  ┌───────────────────────────────────────────────────────────────▼─┐   │
//! │  │                     francis-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌─────────────┐ │   │
//! │  │   │   Database    │    │ SnapshotRepository │  │ Migrations  │ │   │
//! │  │   │   (pool.rs)   │◄───│ save / load        │  │ (embedded)  │ │   │
//! │  │   └───────────────┘    └────────────────────┘  └─────────────┘ │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (storage.database_path)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use francis_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("sync.db")).await?;
//! let version = db.snapshots().save("profiles", "[]").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::snapshot::{Snapshot, SnapshotRepository};
