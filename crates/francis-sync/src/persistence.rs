//! # Persistence Adapter
//!
//! Snapshots the engine's three keyed collections to a durable store and
//! reloads them at start-up.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Snapshot Layout                                  │
//! │                                                                         │
//! │  Collection::Profiles    ──►  [["<id>", {SyncProfile}], ...]           │
//! │  Collection::Operations  ──►  [["<id>", {SyncOperation}], ...]         │
//! │  Collection::Webhooks    ──►  [["<id>", {WebhookEndpoint}], ...]       │
//! │                                                                         │
//! │  Order is preserved. Each collection is versioned independently and   │
//! │  every save replaces the whole collection.                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use francis_db::SnapshotRepository;

use crate::error::SyncResult;

/// One persisted collection entry.
pub type Entry = (String, Value);

/// The persisted collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Profiles,
    Operations,
    Webhooks,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Profiles => "profiles",
            Collection::Operations => "operations",
            Collection::Webhooks => "webhooks",
        }
    }
}

/// Durable store for engine collections.
#[async_trait]
pub trait StatePersistence: Send + Sync {
    /// Replaces the stored contents of `collection`.
    async fn save(&self, collection: Collection, entries: Vec<Entry>) -> SyncResult<()>;

    /// Loads `collection`; empty if it was never saved.
    async fn load(&self, collection: Collection) -> SyncResult<Vec<Entry>>;
}

/// Serializes records into `(id, value)` entries.
pub fn encode<'a, T, I>(items: I) -> SyncResult<Vec<Entry>>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = (&'a String, &'a T)>,
{
    items
        .into_iter()
        .map(|(id, item)| Ok((id.clone(), serde_json::to_value(item)?)))
        .collect()
}

/// Deserializes `(id, value)` entries back into records.
pub fn decode<T: DeserializeOwned>(entries: Vec<Entry>) -> SyncResult<Vec<(String, T)>> {
    entries
        .into_iter()
        .map(|(id, value)| Ok((id, serde_json::from_value(value)?)))
        .collect()
}

// =============================================================================
// SQLite
// =============================================================================

/// Stores each collection as one row of the `snapshots` table.
#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    snapshots: SnapshotRepository,
}

impl SqlitePersistence {
    pub fn new(snapshots: SnapshotRepository) -> Self {
        SqlitePersistence { snapshots }
    }

    /// Current stored version of `collection`.
    pub async fn version(&self, collection: Collection) -> SyncResult<i64> {
        Ok(self.snapshots.version(collection.as_str()).await?)
    }
}

#[async_trait]
impl StatePersistence for SqlitePersistence {
    async fn save(&self, collection: Collection, entries: Vec<Entry>) -> SyncResult<()> {
        let payload = serde_json::to_string(&entries)?;
        let version = self.snapshots.save(collection.as_str(), &payload).await?;
        debug!(
            collection = collection.as_str(),
            version,
            entries = entries.len(),
            "Collection persisted"
        );
        Ok(())
    }

    async fn load(&self, collection: Collection) -> SyncResult<Vec<Entry>> {
        match self.snapshots.load(collection.as_str()).await? {
            Some(snapshot) => Ok(serde_json::from_str(&snapshot.payload)?),
            None => Ok(Vec::new()),
        }
    }
}

// =============================================================================
// In-Memory
// =============================================================================

/// Keeps snapshots in process memory.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    collections: Mutex<HashMap<Collection, (u64, Vec<Entry>)>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of saves of `collection` so far.
    pub async fn version(&self, collection: Collection) -> u64 {
        self.collections
            .lock()
            .await
            .get(&collection)
            .map(|(v, _)| *v)
            .unwrap_or(0)
    }
}

#[async_trait]
impl StatePersistence for MemoryPersistence {
    async fn save(&self, collection: Collection, entries: Vec<Entry>) -> SyncResult<()> {
        let mut collections = self.collections.lock().await;
        let slot = collections.entry(collection).or_insert((0, Vec::new()));
        slot.0 += 1;
        slot.1 = entries;
        Ok(())
    }

    async fn load(&self, collection: Collection) -> SyncResult<Vec<Entry>> {
        Ok(self
            .collections
            .lock()
            .await
            .get(&collection)
            .map(|(_, entries)| entries.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use francis_db::{Database, DbConfig};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
    }

    fn items() -> Vec<(String, Item)> {
        vec![
            ("b".into(), Item { name: "second".into() }),
            ("a".into(), Item { name: "first".into() }),
        ]
    }

    #[test]
    fn test_encode_decode_preserves_order() {
        let source = items();
        let entries = encode(source.iter().map(|(id, item)| (id, item))).unwrap();
        assert_eq!(entries[0], ("b".to_string(), json!({ "name": "second" })));

        let decoded: Vec<(String, Item)> = decode(entries).unwrap();
        assert_eq!(decoded, source);
    }

    #[tokio::test]
    async fn test_sqlite_round_trip_bumps_version() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let persistence = SqlitePersistence::new(db.snapshots());

        assert!(persistence.load(Collection::Webhooks).await.unwrap().is_empty());

        let entries = encode(items().iter().map(|(id, item)| (id, item))).unwrap();
        persistence
            .save(Collection::Webhooks, entries.clone())
            .await
            .unwrap();
        persistence.save(Collection::Webhooks, entries).await.unwrap();

        assert_eq!(persistence.version(Collection::Webhooks).await.unwrap(), 2);
        assert_eq!(persistence.version(Collection::Profiles).await.unwrap(), 0);

        let loaded: Vec<(String, Item)> =
            decode(persistence.load(Collection::Webhooks).await.unwrap()).unwrap();
        assert_eq!(loaded, items());
    }

    #[tokio::test]
    async fn test_memory_persistence() {
        let persistence = MemoryPersistence::new();
        persistence
            .save(Collection::Profiles, vec![("p".into(), json!({}))])
            .await
            .unwrap();

        assert_eq!(persistence.version(Collection::Profiles).await, 1);
        assert_eq!(persistence.load(Collection::Profiles).await.unwrap().len(), 1);
        assert!(persistence.load(Collection::Operations).await.unwrap().is_empty());
    }
}
