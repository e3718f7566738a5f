//! # Domain Types
//!
//! Core domain types used throughout the Francis sync engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  SyncProfile    │   │  SyncOperation  │   │ WebhookEndpoint │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │◄──│  profile_id     │   │  id (UUID)      │       │
//! │  │  source/target  │   │  status         │   │  url            │       │
//! │  │  field_mapping  │   │  counters       │   │  events         │       │
//! │  │  transformations│   │  conflicts      │   │  secret         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ SyncFrequency   │   │ SyncDirection   │   │ ConflictStrategy│       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  REAL_TIME      │   │  UNIDIRECTIONAL │   │  SOURCE_WINS    │       │
//! │  │  HOURLY (+1h)   │   │  BIDIRECTIONAL  │   │  TARGET_WINS    │       │
//! │  │  DAILY  (+1d)   │   └─────────────────┘   │  MERGE          │       │
//! │  │  WEEKLY (+7d)   │                         │  MANUAL         │       │
//! │  │  MANUAL         │                         └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations and conflicts live in [`crate::operation`] and
//! [`crate::conflict`]; they reference profiles by id, never by embedding.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::MergeRule;
use crate::mapping::FieldMapping;
use crate::transform::DataTransformation;

/// A record's field bag, as returned by a source or target system.
pub type Fields = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Entity Type
// =============================================================================

/// The kind of entity a profile synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Client,
    Account,
    Transaction,
    Document,
    Report,
    Custom,
}

impl EntityType {
    /// Lowercase path segment used by providers (`client`, `account`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Client => "client",
            EntityType::Account => "account",
            EntityType::Transaction => "transaction",
            EntityType::Document => "document",
            EntityType::Report => "report",
            EntityType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sync Direction
// =============================================================================

/// Direction contract of a profile.
///
/// Only [`SyncDirection::Bidirectional`] profiles may raise conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncDirection {
    #[default]
    Unidirectional,
    Bidirectional,
}

// =============================================================================
// Sync Frequency
// =============================================================================

/// How often a profile is synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncFrequency {
    RealTime,
    Hourly,
    Daily,
    Weekly,
    #[default]
    Manual,
}

impl SyncFrequency {
    /// Returns the schedule interval, if this frequency has one.
    ///
    /// `RealTime` and `Manual` have no computed interval.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            SyncFrequency::Hourly => Some(Duration::hours(1)),
            SyncFrequency::Daily => Some(Duration::days(1)),
            SyncFrequency::Weekly => Some(Duration::days(7)),
            SyncFrequency::RealTime | SyncFrequency::Manual => None,
        }
    }

    /// Computes the next sync time after a sync at `last_sync`.
    pub fn next_after(&self, last_sync: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.interval().map(|interval| last_sync + interval)
    }
}

impl std::fmt::Display for SyncFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncFrequency::RealTime => write!(f, "real_time"),
            SyncFrequency::Hourly => write!(f, "hourly"),
            SyncFrequency::Daily => write!(f, "daily"),
            SyncFrequency::Weekly => write!(f, "weekly"),
            SyncFrequency::Manual => write!(f, "manual"),
        }
    }
}

// =============================================================================
// Conflict Strategy
// =============================================================================

/// Profile-level conflict resolution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStrategy {
    SourceWins,
    TargetWins,
    Merge,
    #[default]
    Manual,
}

// =============================================================================
// Entity Record
// =============================================================================

/// One entity as exchanged with a data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Identifier shared by source and target for this entity.
    pub id: String,

    /// Field values keyed by field name.
    #[serde(default)]
    pub fields: Fields,

    /// Tombstone marker: the entity was deleted at the origin.
    #[serde(default)]
    pub deleted: bool,
}

impl EntityRecord {
    /// Creates a live record.
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        EntityRecord {
            id: id.into(),
            fields,
            deleted: false,
        }
    }

    /// Creates a tombstone record.
    pub fn tombstone(id: impl Into<String>) -> Self {
        EntityRecord {
            id: id.into(),
            fields: Fields::new(),
            deleted: true,
        }
    }
}

// =============================================================================
// Sync Profile
// =============================================================================

/// Data needed to create a [`SyncProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSyncProfile {
    pub name: String,
    pub source_api: String,
    pub target_api: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub direction: SyncDirection,
    #[serde(default)]
    pub frequency: SyncFrequency,
    pub field_mapping: Vec<FieldMapping>,
    #[serde(default)]
    pub transformations: Vec<DataTransformation>,
    #[serde(default)]
    pub conflict_resolution: ConflictStrategy,
    /// Per-target-field merge rules used by [`ConflictStrategy::Merge`].
    #[serde(default)]
    pub merge_rules: BTreeMap<String, MergeRule>,
}

/// A named synchronization contract between a source and a target system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProfile {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub name: String,
    /// Opaque identifier of the source API.
    pub source_api: String,
    /// Opaque identifier of the target API.
    pub target_api: String,
    pub entity_type: EntityType,
    pub direction: SyncDirection,
    pub frequency: SyncFrequency,
    /// Ordered source-field → target-field mapping.
    pub field_mapping: Vec<FieldMapping>,
    /// Applied in declared order after mapping.
    pub transformations: Vec<DataTransformation>,
    pub conflict_resolution: ConflictStrategy,
    #[serde(default)]
    pub merge_rules: BTreeMap<String, MergeRule>,
    pub active: bool,
    pub last_sync: Option<DateTime<Utc>>,
    /// Only set when `frequency` has an interval.
    pub next_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SyncProfile {
    /// Builds an inactive profile from creation data.
    pub fn from_new(data: NewSyncProfile, now: DateTime<Utc>) -> Self {
        SyncProfile {
            id: Uuid::new_v4().to_string(),
            name: data.name.trim().to_string(),
            source_api: data.source_api,
            target_api: data.target_api,
            entity_type: data.entity_type,
            direction: data.direction,
            frequency: data.frequency,
            field_mapping: data.field_mapping,
            transformations: data.transformations,
            conflict_resolution: data.conflict_resolution,
            merge_rules: data.merge_rules,
            active: false,
            last_sync: None,
            next_sync: None,
            created_at: now,
        }
    }

    /// Returns true if this profile may raise conflicts.
    #[inline]
    pub fn is_bidirectional(&self) -> bool {
        self.direction == SyncDirection::Bidirectional
    }

    /// Records a successful sync at `at`.
    ///
    /// `next_sync` is always derived from this `last_sync`.
    pub fn record_sync(&mut self, at: DateTime<Utc>) {
        self.last_sync = Some(at);
        self.next_sync = self.frequency.next_after(at);
    }

    /// Returns true if the scheduler should enqueue this profile at `now`.
    ///
    /// Only active profiles with an interval frequency are ever due. A profile
    /// that has never synced is due immediately.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.active || self.frequency.interval().is_none() {
            return false;
        }
        match self.next_sync {
            Some(next) => next <= now,
            None => true,
        }
    }
}

// =============================================================================
// Webhooks
// =============================================================================

/// Events emitted to webhook receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WebhookEvent {
    #[serde(rename = "sync.completed")]
    SyncCompleted,
    #[serde(rename = "sync.failed")]
    SyncFailed,
}

impl WebhookEvent {
    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::SyncCompleted => "sync.completed",
            WebhookEvent::SyncFailed => "sync.failed",
        }
    }
}

impl std::fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-endpoint delivery retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub max_backoff_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            backoff_multiplier: 2.0,
            max_backoff_seconds: 60,
        }
    }
}

/// Data needed to register a [`WebhookEndpoint`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWebhookEndpoint {
    pub name: String,
    pub url: String,
    pub events: BTreeSet<WebhookEvent>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub retry_config: RetryConfig,
}

fn default_true() -> bool {
    true
}

/// A registered notification target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: String,
    pub name: String,
    pub url: String,
    pub events: BTreeSet<WebhookEvent>,
    pub headers: BTreeMap<String, String>,
    pub active: bool,
    pub secret: Option<String>,
    pub retry_config: RetryConfig,
    pub created_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    /// Builds an endpoint from registration data.
    pub fn from_new(data: NewWebhookEndpoint, now: DateTime<Utc>) -> Self {
        WebhookEndpoint {
            id: Uuid::new_v4().to_string(),
            name: data.name.trim().to_string(),
            url: data.url,
            events: data.events,
            headers: data.headers,
            active: data.active,
            secret: data.secret,
            retry_config: data.retry_config,
            created_at: now,
        }
    }

    /// Returns true if this endpoint should receive `event`.
    #[inline]
    pub fn wants(&self, event: WebhookEvent) -> bool {
        self.active && self.events.contains(&event)
    }
}

// =============================================================================
// Dashboard Stats
// =============================================================================

/// Aggregate counts across the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_profiles: usize,
    pub active_profiles: usize,
    pub total_operations: usize,
    pub running_operations: usize,
    pub pending_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub total_conflicts: usize,
    pub unresolved_conflicts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_new_profile() -> NewSyncProfile {
        NewSyncProfile {
            name: "  CRM clients  ".into(),
            source_api: "crm".into(),
            target_api: "ledger".into(),
            entity_type: EntityType::Client,
            direction: SyncDirection::Unidirectional,
            frequency: SyncFrequency::Hourly,
            field_mapping: vec![FieldMapping::new("full_name", "name")],
            transformations: vec![],
            conflict_resolution: ConflictStrategy::Manual,
            merge_rules: BTreeMap::new(),
        }
    }

    #[test]
    fn test_frequency_intervals() {
        assert_eq!(SyncFrequency::Hourly.interval(), Some(Duration::hours(1)));
        assert_eq!(SyncFrequency::Daily.interval(), Some(Duration::days(1)));
        assert_eq!(SyncFrequency::Weekly.interval(), Some(Duration::days(7)));
        assert_eq!(SyncFrequency::Manual.interval(), None);
        assert_eq!(SyncFrequency::RealTime.interval(), None);
    }

    #[test]
    fn test_profile_from_new_is_inactive() {
        let now = Utc::now();
        let profile = SyncProfile::from_new(sample_new_profile(), now);
        assert!(!profile.active);
        assert_eq!(profile.name, "CRM clients");
        assert!(profile.last_sync.is_none());
        assert!(profile.next_sync.is_none());
        assert_eq!(profile.created_at, now);
    }

    #[test]
    fn test_record_sync_computes_next_sync() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut profile = SyncProfile::from_new(sample_new_profile(), at);
        profile.record_sync(at);
        assert_eq!(profile.last_sync, Some(at));
        assert_eq!(profile.next_sync, Some(at + Duration::hours(1)));

        profile.frequency = SyncFrequency::Manual;
        profile.record_sync(at);
        assert_eq!(profile.next_sync, None);
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut profile = SyncProfile::from_new(sample_new_profile(), now);
        assert!(!profile.is_due(now), "inactive profiles are never due");

        profile.active = true;
        assert!(profile.is_due(now), "never-synced profile is due");

        profile.record_sync(now);
        assert!(!profile.is_due(now));
        assert!(profile.is_due(now + Duration::hours(1)));

        profile.frequency = SyncFrequency::RealTime;
        assert!(!profile.is_due(now + Duration::days(30)));
    }

    #[test]
    fn test_webhook_event_wire_names() {
        let json = serde_json::to_string(&WebhookEvent::SyncFailed).unwrap();
        assert_eq!(json, "\"sync.failed\"");
        assert_eq!(WebhookEvent::SyncCompleted.to_string(), "sync.completed");
    }

    #[test]
    fn test_endpoint_wants() {
        let endpoint = WebhookEndpoint::from_new(
            NewWebhookEndpoint {
                name: "ops".into(),
                url: "https://hooks.example.com/sync".into(),
                events: [WebhookEvent::SyncFailed].into_iter().collect(),
                headers: BTreeMap::new(),
                active: true,
                secret: None,
                retry_config: RetryConfig::default(),
            },
            Utc::now(),
        );
        assert!(endpoint.wants(WebhookEvent::SyncFailed));
        assert!(!endpoint.wants(WebhookEvent::SyncCompleted));
    }

    #[test]
    fn test_enum_serialization() {
        let json = serde_json::to_string(&ConflictStrategy::SourceWins).unwrap();
        assert_eq!(json, "\"SOURCE_WINS\"");
        let parsed: SyncFrequency = serde_json::from_str("\"REAL_TIME\"").unwrap();
        assert_eq!(parsed, SyncFrequency::RealTime);
    }
}
