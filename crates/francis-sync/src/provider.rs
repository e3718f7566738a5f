//! # Data Providers
//!
//! The seam between the executor and the systems being synchronized. The
//! engine treats source and target APIs as opaque ids; a provider knows how to
//! reach them.
//!
//! ## HTTP Wire Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      HttpDataProvider                                   │
//! │                                                                         │
//! │  fetch_batch   GET    {base}/{entity}?limit=100&cursor=..&since=..     │
//! │                       ◄── { "records": [{id, fields, deleted?}],       │
//! │                             "next_cursor": "..." | null }              │
//! │  fetch_record  GET    {base}/{entity}/{id}       404 → None            │
//! │  write_record  PUT    {base}/{entity}/{id}       body: fields object   │
//! │  delete_record DELETE {base}/{entity}/{id}       404 → already gone    │
//! │                                                                         │
//! │  {entity} is the lowercase entity type: client, account, ...           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use francis_core::{EntityRecord, EntityType, Fields};

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Provider Trait
// =============================================================================

/// One page of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub records: Vec<EntityRecord>,
    /// Cursor for the next page; `None` on the last page.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Access to source and target systems.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Fetches one page of records, optionally only those changed after `since`.
    async fn fetch_batch(
        &self,
        api: &str,
        entity_type: EntityType,
        cursor: Option<&str>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<RecordPage>;

    /// Fetches a single record; `Ok(None)` if it does not exist.
    async fn fetch_record(
        &self,
        api: &str,
        entity_type: EntityType,
        id: &str,
    ) -> SyncResult<Option<EntityRecord>>;

    /// Creates or updates a record.
    async fn write_record(
        &self,
        api: &str,
        entity_type: EntityType,
        id: &str,
        fields: &Fields,
    ) -> SyncResult<()>;

    /// Deletes a record. Deleting a missing record is not an error.
    async fn delete_record(&self, api: &str, entity_type: EntityType, id: &str) -> SyncResult<()>;
}

// =============================================================================
// HTTP Provider
// =============================================================================

/// `reqwest`-backed provider with one base URL per API id.
#[derive(Debug, Clone)]
pub struct HttpDataProvider {
    client: reqwest::Client,
    base_urls: BTreeMap<String, String>,
}

impl HttpDataProvider {
    /// Creates a provider with no APIs registered.
    pub fn new(request_timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(HttpDataProvider {
            client,
            base_urls: BTreeMap::new(),
        })
    }

    /// Creates a provider for every `[providers.*]` entry in the config.
    pub fn from_config(config: &EngineConfig) -> SyncResult<Self> {
        let mut provider =
            Self::new(Duration::from_secs(config.webhooks.request_timeout_secs))?;
        for (api, settings) in &config.providers {
            provider = provider.with_api(api, &settings.base_url)?;
        }
        Ok(provider)
    }

    /// Registers the base URL of `api`.
    pub fn with_api(mut self, api: impl Into<String>, base_url: &str) -> SyncResult<Self> {
        let parsed = url::Url::parse(base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Provider URL must be http(s), got: {base_url}"
            )));
        }
        self.base_urls
            .insert(api.into(), base_url.trim_end_matches('/').to_string());
        Ok(self)
    }

    fn collection_url(&self, api: &str, entity_type: EntityType) -> SyncResult<String> {
        let base = self
            .base_urls
            .get(api)
            .ok_or_else(|| SyncError::ProviderUnavailable(api.to_string()))?;
        Ok(format!("{}/{}", base, entity_type.as_str()))
    }

    fn record_url(&self, api: &str, entity_type: EntityType, id: &str) -> SyncResult<String> {
        let mut url = url::Url::parse(&self.collection_url(api, entity_type)?)?;
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(format!("Provider '{api}' URL cannot be a base")))?
            .push(id);
        Ok(url.into())
    }

    async fn check(api: &str, response: reqwest::Response) -> SyncResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SyncError::ProviderStatus {
            api: api.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl DataProvider for HttpDataProvider {
    async fn fetch_batch(
        &self,
        api: &str,
        entity_type: EntityType,
        cursor: Option<&str>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<RecordPage> {
        let url = self.collection_url(api, entity_type)?;

        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339()));
        }

        debug!(api = %api, url = %url, cursor = ?cursor, "Fetching record page");

        let response = self.client.get(&url).query(&query).send().await?;
        let page = Self::check(api, response).await?.json::<RecordPage>().await?;
        Ok(page)
    }

    async fn fetch_record(
        &self,
        api: &str,
        entity_type: EntityType,
        id: &str,
    ) -> SyncResult<Option<EntityRecord>> {
        let url = self.record_url(api, entity_type, id)?;
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let record = Self::check(api, response).await?.json::<EntityRecord>().await?;
        Ok(Some(record))
    }

    async fn write_record(
        &self,
        api: &str,
        entity_type: EntityType,
        id: &str,
        fields: &Fields,
    ) -> SyncResult<()> {
        let url = self.record_url(api, entity_type, id)?;
        let response = self.client.put(&url).json(fields).send().await?;
        Self::check(api, response).await?;
        Ok(())
    }

    async fn delete_record(&self, api: &str, entity_type: EntityType, id: &str) -> SyncResult<()> {
        let url = self.record_url(api, entity_type, id)?;
        let response = self.client.delete(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!(api = %api, id = %id, "Record already absent on delete");
            return Ok(());
        }

        Self::check(api, response).await?;
        Ok(())
    }
}

// =============================================================================
// In-Memory Provider
// =============================================================================

#[derive(Debug, Clone)]
struct StoredRecord {
    record: EntityRecord,
    updated_at: DateTime<Utc>,
}

type CollectionKey = (String, EntityType);

#[derive(Debug, Default)]
struct MemoryState {
    collections: HashMap<CollectionKey, BTreeMap<String, StoredRecord>>,
    failing_fetches: HashMap<String, u32>,
    failing_writes: HashSet<String>,
    fetch_calls: usize,
    last_since: Option<DateTime<Utc>>,
}

/// In-process provider used for tests and dry runs.
///
/// Records are kept per `(api, entity_type)` in id order; cursors are the last
/// id of the previous page. Writes merge fields into the existing record.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    state: Mutex<MemoryState>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record` as if it changed now.
    pub async fn insert(&self, api: &str, entity_type: EntityType, record: EntityRecord) {
        self.insert_at(api, entity_type, record, Utc::now()).await;
    }

    /// Stores `record` with an explicit change timestamp.
    pub async fn insert_at(
        &self,
        api: &str,
        entity_type: EntityType,
        record: EntityRecord,
        updated_at: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().await;
        state
            .collections
            .entry((api.to_string(), entity_type))
            .or_default()
            .insert(record.id.clone(), StoredRecord { record, updated_at });
    }

    pub async fn get(&self, api: &str, entity_type: EntityType, id: &str) -> Option<EntityRecord> {
        let state = self.state.lock().await;
        state
            .collections
            .get(&(api.to_string(), entity_type))
            .and_then(|c| c.get(id))
            .map(|s| s.record.clone())
    }

    /// All records of one collection, in id order.
    pub async fn records(&self, api: &str, entity_type: EntityType) -> Vec<EntityRecord> {
        let state = self.state.lock().await;
        state
            .collections
            .get(&(api.to_string(), entity_type))
            .map(|c| c.values().map(|s| s.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Makes the next `n` page fetches from `api` fail with a connection error.
    pub async fn fail_next_fetches(&self, api: &str, n: u32) {
        self.state
            .lock()
            .await
            .failing_fetches
            .insert(api.to_string(), n);
    }

    /// Makes every write of record `id` fail.
    pub async fn fail_writes_for(&self, id: &str) {
        self.state.lock().await.failing_writes.insert(id.to_string());
    }

    /// Number of `fetch_batch` calls so far.
    pub async fn fetch_calls(&self) -> usize {
        self.state.lock().await.fetch_calls
    }

    /// `since` passed to the most recent `fetch_batch`.
    pub async fn last_since(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_since
    }
}

#[async_trait]
impl DataProvider for MemoryProvider {
    async fn fetch_batch(
        &self,
        api: &str,
        entity_type: EntityType,
        cursor: Option<&str>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<RecordPage> {
        let mut state = self.state.lock().await;
        state.fetch_calls += 1;
        state.last_since = since;

        if let Some(remaining) = state.failing_fetches.get_mut(api) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::ConnectionFailed(format!(
                    "injected fetch failure for '{api}'"
                )));
            }
        }

        let Some(collection) = state.collections.get(&(api.to_string(), entity_type)) else {
            return Ok(RecordPage::default());
        };

        let mut matching = collection
            .values()
            .filter(|s| cursor.map_or(true, |c| s.record.id.as_str() > c))
            .filter(|s| since.map_or(true, |t| s.updated_at > t));

        let records: Vec<EntityRecord> = matching
            .by_ref()
            .take(limit)
            .map(|s| s.record.clone())
            .collect();

        let next_cursor = if matching.next().is_some() {
            records.last().map(|r| r.id.clone())
        } else {
            None
        };

        Ok(RecordPage {
            records,
            next_cursor,
        })
    }

    async fn fetch_record(
        &self,
        api: &str,
        entity_type: EntityType,
        id: &str,
    ) -> SyncResult<Option<EntityRecord>> {
        Ok(self.get(api, entity_type, id).await)
    }

    async fn write_record(
        &self,
        api: &str,
        entity_type: EntityType,
        id: &str,
        fields: &Fields,
    ) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        if state.failing_writes.contains(id) {
            return Err(SyncError::ProviderStatus {
                api: api.to_string(),
                status: 422,
                message: format!("injected write failure for '{id}'"),
            });
        }

        let collection = state
            .collections
            .entry((api.to_string(), entity_type))
            .or_default();
        let stored = collection
            .entry(id.to_string())
            .or_insert_with(|| StoredRecord {
                record: EntityRecord::new(id, Fields::new()),
                updated_at: Utc::now(),
            });
        stored.record.deleted = false;
        for (key, value) in fields {
            stored.record.fields.insert(key.clone(), value.clone());
        }
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_record(&self, api: &str, entity_type: EntityType, id: &str) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        if let Some(collection) = state.collections.get_mut(&(api.to_string(), entity_type)) {
            collection.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_memory_pagination() {
        let provider = MemoryProvider::new();
        for id in ["a", "b", "c"] {
            provider
                .insert("crm", EntityType::Client, EntityRecord::new(id, Fields::new()))
                .await;
        }

        let first = provider
            .fetch_batch("crm", EntityType::Client, None, 2, None)
            .await
            .unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("b"));

        let second = provider
            .fetch_batch("crm", EntityType::Client, Some("b"), 2, None)
            .await
            .unwrap();
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test]
    async fn test_memory_since_filter_and_fault_injection() {
        let provider = MemoryProvider::new();
        let old = Utc::now() - chrono::Duration::hours(2);
        provider
            .insert_at("crm", EntityType::Client, EntityRecord::new("old", Fields::new()), old)
            .await;
        provider
            .insert("crm", EntityType::Client, EntityRecord::new("new", Fields::new()))
            .await;

        let since = Utc::now() - chrono::Duration::hours(1);
        let page = provider
            .fetch_batch("crm", EntityType::Client, None, 10, Some(since))
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id, "new");

        provider.fail_next_fetches("crm", 1).await;
        assert!(provider
            .fetch_batch("crm", EntityType::Client, None, 10, None)
            .await
            .is_err());
        assert!(provider
            .fetch_batch("crm", EntityType::Client, None, 10, None)
            .await
            .is_ok());
        assert_eq!(provider.fetch_calls().await, 3);
    }

    #[tokio::test]
    async fn test_memory_write_merges_fields() {
        let provider = MemoryProvider::new();
        provider
            .insert(
                "ledger",
                EntityType::Account,
                EntityRecord::new("a1", fields(json!({ "name": "Old", "tier": "gold" }))),
            )
            .await;

        provider
            .write_record("ledger", EntityType::Account, "a1", &fields(json!({ "name": "New" })))
            .await
            .unwrap();

        let record = provider.get("ledger", EntityType::Account, "a1").await.unwrap();
        assert_eq!(record.fields.get("name"), Some(&json!("New")));
        assert_eq!(record.fields.get("tier"), Some(&json!("gold")));

        provider.fail_writes_for("a1").await;
        assert!(provider
            .write_record("ledger", EntityType::Account, "a1", &Fields::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_http_fetch_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/client"))
            .and(query_param("limit", "50"))
            .and(query_param("cursor", "c-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [
                    { "id": "c-10", "fields": { "name": "Jane" } },
                    { "id": "c-11", "deleted": true }
                ],
                "next_cursor": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpDataProvider::new(Duration::from_secs(5))
            .unwrap()
            .with_api("crm", &format!("{}/api/", server.uri()))
            .unwrap();

        let page = provider
            .fetch_batch("crm", EntityType::Client, Some("c-9"), 50, None)
            .await
            .unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(page.records[1].deleted);
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn test_http_record_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/account/a-1"))
            .and(body_json(json!({ "name": "Acme" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/account/a-2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpDataProvider::new(Duration::from_secs(5))
            .unwrap()
            .with_api("ledger", &server.uri())
            .unwrap();

        let missing = provider
            .fetch_record("ledger", EntityType::Account, "missing")
            .await
            .unwrap();
        assert!(missing.is_none());

        provider
            .write_record("ledger", EntityType::Account, "a-1", &fields(json!({ "name": "Acme" })))
            .await
            .unwrap();
        provider
            .delete_record("ledger", EntityType::Account, "a-2")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_http_error_status_and_unknown_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/client"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let provider = HttpDataProvider::new(Duration::from_secs(5))
            .unwrap()
            .with_api("crm", &server.uri())
            .unwrap();

        let err = provider
            .fetch_batch("crm", EntityType::Client, None, 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ProviderStatus { status: 503, .. }));
        assert!(err.is_retryable());

        let err = provider
            .fetch_batch("unknown", EntityType::Client, None, 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ProviderUnavailable(_)));
    }
}
