//! # Snapshot Repository
//!
//! Stores one opaque JSON payload per named collection.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         snapshots table                                 │
//! │                                                                         │
//! │  collection   version   payload                        updated_at      │
//! │  ──────────   ───────   ───────────────────────────    ──────────      │
//! │  profiles     12        [["id-1", {...}], ...]         2026-..         │
//! │  operations   87        [["id-9", {...}], ...]         2026-..         │
//! │  webhooks     2         [["id-4", {...}]]              2026-..         │
//! │                                                                         │
//! │  save() upserts the row and bumps `version` in one statement.          │
//! │  Collections are versioned independently.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

/// A stored collection snapshot.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Snapshot {
    pub collection: String,
    pub version: i64,
    pub payload: String,
    pub updated_at: DateTime<Utc>,
}

/// Repository for collection snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotRepository {
    pool: SqlitePool,
}

impl SnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SnapshotRepository { pool }
    }

    /// Replaces the payload of `collection` and returns its new version.
    pub async fn save(&self, collection: &str, payload: &str) -> DbResult<i64> {
        let now = Utc::now();

        let version: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO snapshots (collection, version, payload, updated_at)
            VALUES (?1, 1, ?2, ?3)
            ON CONFLICT(collection) DO UPDATE SET
                version = snapshots.version + 1,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            RETURNING version
            "#,
        )
        .bind(collection)
        .bind(payload)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        debug!(collection = %collection, version, bytes = payload.len(), "Snapshot saved");

        Ok(version)
    }

    /// Loads the latest snapshot of `collection`, if one was ever saved.
    pub async fn load(&self, collection: &str) -> DbResult<Option<Snapshot>> {
        let snapshot = sqlx::query_as::<_, Snapshot>(
            r#"
            SELECT collection, version, payload, updated_at
            FROM snapshots
            WHERE collection = ?1
            "#,
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;

        Ok(snapshot)
    }

    /// Current version of `collection`, 0 if never saved.
    pub async fn version(&self, collection: &str) -> DbResult<i64> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM snapshots WHERE collection = ?1")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await?;

        Ok(version.unwrap_or(0))
    }
}
