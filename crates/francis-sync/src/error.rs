//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Provider      │  │     Persistence         │ │
//! │  │  (never retried)│  │  (retryable)    │  │  (logged, never fatal)  │ │
//! │  │  ProfileNotFound│  │  Connection     │  │  DatabaseError          │ │
//! │  │  ProfileDisabled│  │  Timeout        │  │  SerializationFailed    │ │
//! │  │  InvalidConfig  │  │  ProviderStatus │  │                         │ │
//! │  │  Validation     │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Webhook      │  │    Internal     │                              │
//! │  │  (local only)   │  │                 │                              │
//! │  │  WebhookDelivery│  │  Core, Channel  │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! │                                                                         │
//! │  Conflicts are not errors and never appear here.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use francis_core::{CoreError, ValidationError};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all engine failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// No profile with this id.
    #[error("Sync profile not found: {0}")]
    ProfileNotFound(String),

    /// Profile is inactive and the request was not manual.
    #[error("Sync profile {0} is disabled; activate it or pass manual")]
    ProfileDisabled(String),

    /// Invalid engine configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// Input validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No provider is configured for this API id.
    #[error("No data provider configured for API '{0}'")]
    ProviderUnavailable(String),

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// Could not reach the provider.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Provider answered with an unexpected status.
    #[error("Provider '{api}' returned HTTP {status}: {message}")]
    ProviderStatus {
        api: String,
        status: u16,
        message: String,
    },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Database query failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Failed to serialize or deserialize state.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Webhook Errors
    // =========================================================================
    /// A webhook delivery attempt failed.
    #[error("Webhook delivery to {endpoint} failed: {reason}")]
    WebhookDelivery { endpoint: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Domain rule violation.
    #[error(transparent)]
    Core(CoreError),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => SyncError::Validation(v),
            other => SyncError::Core(other),
        }
    }
}

impl From<francis_db::DbError> for SyncError {
    fn from(err: francis_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if err.is_decode() {
            SyncError::SerializationFailed(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if a later attempt may succeed.
    ///
    /// ## Retryable Errors
    /// - Connection failures and timeouts
    /// - Provider 5xx and 429 responses
    /// - Webhook delivery failures
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_)
            | SyncError::Timeout(_)
            | SyncError::WebhookDelivery { .. } => true,
            SyncError::ProviderStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if this error is surfaced synchronously to the caller
    /// and never retried.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::ProfileNotFound(_)
                | SyncError::ProfileDisabled(_)
                | SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
                | SyncError::Validation(_)
                | SyncError::ProviderUnavailable(_)
        )
    }
}
