//! # Validation Module
//!
//! Input validation for profile and webhook registration.
//!
//! ```text
//! createSyncProfile(data)
//!      │
//!      ▼
//! validate_new_profile(&data)  ← THIS MODULE
//!      │
//!      ├── name empty / too long?           → Required / TooLong
//!      ├── source or target api empty?      → Required
//!      ├── mapping empty?                   → Required
//!      ├── two sources → same target?       → Duplicate
//!      ├── transformation on unmapped field → InvalidFormat
//!      │
//!      └── OK → SyncProfile::from_new
//! ```

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::transform::{FormatStyle, TransformRule, MAX_FIXED_DECIMALS};
use crate::types::{NewSyncProfile, NewWebhookEndpoint, RetryConfig};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of profile and endpoint names.
pub const MAX_NAME_LEN: usize = 200;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a display name.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most [`MAX_NAME_LEN`] characters
pub fn validate_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

fn require(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a webhook URL: absolute, http or https, with a host.
pub fn validate_webhook_url(raw: &str) -> ValidationResult<()> {
    require("url", raw)?;

    let parsed = url::Url::parse(raw.trim()).map_err(|e| ValidationError::InvalidFormat {
        field: "url".to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidFormat {
            field: "url".to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    if parsed.host_str().is_none() {
        return Err(ValidationError::InvalidFormat {
            field: "url".to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Profile Validation
// =============================================================================

/// Validates profile creation data.
pub fn validate_new_profile(data: &NewSyncProfile) -> ValidationResult<()> {
    validate_name(&data.name)?;
    require("source_api", &data.source_api)?;
    require("target_api", &data.target_api)?;

    if data.field_mapping.is_empty() {
        return Err(ValidationError::Required {
            field: "field_mapping".to_string(),
        });
    }

    let mut targets = HashSet::new();
    for pair in &data.field_mapping {
        require("field_mapping.source", &pair.source)?;
        require("field_mapping.target", &pair.target)?;
        if !targets.insert(pair.target.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "field_mapping.target".to_string(),
                value: pair.target.clone(),
            });
        }
    }

    let mut rule_ids = HashSet::new();
    for transformation in &data.transformations {
        require("transformations.rule_id", &transformation.rule_id)?;
        if !rule_ids.insert(transformation.rule_id.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "transformations.rule_id".to_string(),
                value: transformation.rule_id.clone(),
            });
        }

        // Enrichment may introduce fields the mapping does not produce.
        let adds_field = matches!(transformation.rule, TransformRule::Enrichment { .. });
        if !adds_field && !targets.contains(transformation.field.as_str()) {
            return Err(ValidationError::InvalidFormat {
                field: "transformations.field".to_string(),
                reason: format!(
                    "'{}' is not a mapped target field",
                    transformation.field
                ),
            });
        }

        if let TransformRule::Format {
            format: FormatStyle::FixedDecimals { decimals },
        } = &transformation.rule
        {
            if *decimals > MAX_FIXED_DECIMALS {
                return Err(ValidationError::InvalidFormat {
                    field: "transformations.rule.decimals".to_string(),
                    reason: format!("must be at most {MAX_FIXED_DECIMALS}"),
                });
            }
        }
    }

    Ok(())
}

// =============================================================================
// Webhook Validation
// =============================================================================

/// Validates a per-endpoint retry policy.
pub fn validate_retry_config(config: &RetryConfig) -> ValidationResult<()> {
    if !config.backoff_multiplier.is_finite() || config.backoff_multiplier < 1.0 {
        return Err(ValidationError::InvalidFormat {
            field: "retry_config.backoff_multiplier".to_string(),
            reason: "must be a finite number >= 1.0".to_string(),
        });
    }
    if config.max_backoff_seconds == 0 {
        return Err(ValidationError::InvalidFormat {
            field: "retry_config.max_backoff_seconds".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}

/// Validates webhook registration data.
pub fn validate_new_webhook(data: &NewWebhookEndpoint) -> ValidationResult<()> {
    validate_name(&data.name)?;
    validate_webhook_url(&data.url)?;

    if data.events.is_empty() {
        return Err(ValidationError::Required {
            field: "events".to_string(),
        });
    }

    validate_retry_config(&data.retry_config)
}
