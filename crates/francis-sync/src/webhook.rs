//! # Webhook Dispatcher
//!
//! Fan-out of operation outcomes to registered HTTP endpoints, decoupled from
//! the scheduler.
//!
//! ## Delivery Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Webhook Delivery                                  │
//! │                                                                         │
//! │  SyncEngine::tick()                                                    │
//! │       │  notify(endpoints, "sync.completed", payload)                  │
//! │       │  (filters active + subscribed, never awaits delivery)          │
//! │       ▼                                                                 │
//! │  ┌──────────────────────┐   try_send    full queue → drop + warn       │
//! │  │ bounded mpsc queue   │◄──────────────                               │
//! │  │ (queue_capacity)     │                                               │
//! │  └──────────┬───────────┘                                               │
//! │             ▼                                                           │
//! │  ┌──────────────────────┐   Semaphore(max_in_flight)                   │
//! │  │ DeliveryWorker task  │──► one task per delivery                     │
//! │  └──────────────────────┘        │                                      │
//! │                                  ▼                                      │
//! │   POST url                                                             │
//! │   Content-Type: application/json                                       │
//! │   X-Francis-Event: sync.completed                                      │
//! │   X-Francis-Signature: sha256=<hex hmac>   (if secret)                 │
//! │   { "event", "timestamp", "payload" }                                  │
//! │                                                                         │
//! │   non-2xx / error ──► backoff sleep ──► retry (≤ retry_config.max)     │
//! │   exhausted       ──► warn! and drop                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use francis_core::{WebhookEndpoint, WebhookEvent};

use crate::config::WebhookSettings;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Constants
// =============================================================================

/// Header carrying the event name.
pub const EVENT_HEADER: &str = "X-Francis-Event";

/// Header carrying the HMAC-SHA256 body signature.
pub const SIGNATURE_HEADER: &str = "X-Francis-Signature";

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Envelope
// =============================================================================

/// JSON body POSTed to every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub event: WebhookEvent,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Signs `body` with `secret`, returning `sha256=<hex>`.
pub fn sign(secret: &str, body: &[u8]) -> SyncResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SyncError::Internal(format!("HMAC key: {e}")))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

// =============================================================================
// Dispatcher Handle
// =============================================================================

#[derive(Debug)]
struct Delivery {
    endpoint: WebhookEndpoint,
    event: WebhookEvent,
    body: Arc<Vec<u8>>,
}

/// Handle for queueing webhook deliveries.
#[derive(Clone)]
pub struct WebhookDispatcher {
    delivery_tx: mpsc::Sender<Delivery>,
    shutdown_tx: mpsc::Sender<()>,
}

impl WebhookDispatcher {
    /// Spawns the delivery worker. Must be called inside a tokio runtime.
    pub fn spawn(settings: &WebhookSettings) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {e}")))?;

        let (delivery_tx, delivery_rx) = mpsc::channel(settings.queue_capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let worker = DeliveryWorker {
            client,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            in_flight: Arc::new(Semaphore::new(settings.max_in_flight)),
            delivery_rx,
            shutdown_rx,
        };
        tokio::spawn(worker.run());

        Ok(WebhookDispatcher {
            delivery_tx,
            shutdown_tx,
        })
    }

    /// Queues `event` for every active endpoint subscribed to it.
    ///
    /// Returns the number of deliveries queued. Never waits on the network.
    pub fn notify(&self, endpoints: &[WebhookEndpoint], event: WebhookEvent, payload: Value) -> usize {
        let targets: Vec<&WebhookEndpoint> = endpoints.iter().filter(|e| e.wants(event)).collect();
        if targets.is_empty() {
            return 0;
        }

        let envelope = WebhookEnvelope {
            event,
            timestamp: Utc::now(),
            payload,
        };
        let body = match serde_json::to_vec(&envelope) {
            Ok(body) => Arc::new(body),
            Err(e) => {
                warn!(?e, event = event.as_str(), "Failed to serialize webhook envelope");
                return 0;
            }
        };

        let mut queued = 0;
        for endpoint in targets {
            let delivery = Delivery {
                endpoint: endpoint.clone(),
                event,
                body: Arc::clone(&body),
            };
            match self.delivery_tx.try_send(delivery) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(d)) => {
                    warn!(endpoint = %d.endpoint.url, event = event.as_str(), "Webhook queue full, dropping delivery");
                }
                Err(mpsc::error::TrySendError::Closed(d)) => {
                    warn!(endpoint = %d.endpoint.url, "Webhook dispatcher stopped, dropping delivery");
                }
            }
        }

        debug!(event = event.as_str(), queued, "Webhook deliveries queued");
        queued
    }

    /// Stops the worker. Deliveries already in flight finish on their own.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Webhook shutdown channel closed".into()))
    }
}

// =============================================================================
// Delivery Worker
// =============================================================================

struct DeliveryWorker {
    client: reqwest::Client,
    initial_backoff: Duration,
    in_flight: Arc<Semaphore>,
    delivery_rx: mpsc::Receiver<Delivery>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl DeliveryWorker {
    async fn run(mut self) {
        info!("Webhook dispatcher starting");

        loop {
            tokio::select! {
                delivery = self.delivery_rx.recv() => {
                    let Some(delivery) = delivery else { break };
                    let Ok(permit) = Arc::clone(&self.in_flight).acquire_owned().await else {
                        break;
                    };
                    let client = self.client.clone();
                    let initial_backoff = self.initial_backoff;

                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = deliver_with_retry(&client, &delivery.endpoint, delivery.event, &delivery.body, initial_backoff).await {
                            warn!(
                                endpoint_id = %delivery.endpoint.id,
                                event = delivery.event.as_str(),
                                error = %e,
                                "Webhook delivery abandoned"
                            );
                        }
                    });
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Webhook dispatcher shutting down");
                    break;
                }
            }
        }

        info!("Webhook dispatcher stopped");
    }
}

/// Delivers one envelope, retrying up to `retry_config.max_retries` times.
pub(crate) async fn deliver_with_retry(
    client: &reqwest::Client,
    endpoint: &WebhookEndpoint,
    event: WebhookEvent,
    body: &[u8],
    initial_backoff: Duration,
) -> SyncResult<()> {
    let retry = &endpoint.retry_config;
    let max_interval = Duration::from_secs(retry.max_backoff_seconds);
    let mut backoff = ExponentialBackoff {
        current_interval: initial_backoff,
        initial_interval: initial_backoff,
        max_interval,
        multiplier: retry.backoff_multiplier,
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempt = 0u32;
    loop {
        match send_once(client, endpoint, event, body).await {
            Ok(()) => {
                debug!(endpoint_id = %endpoint.id, attempt, "Webhook delivered");
                return Ok(());
            }
            Err(e) if attempt >= retry.max_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                let wait = backoff.next_backoff().unwrap_or(max_interval);
                debug!(
                    endpoint_id = %endpoint.id,
                    attempt,
                    ?wait,
                    error = %e,
                    "Webhook delivery failed, retrying"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

async fn send_once(
    client: &reqwest::Client,
    endpoint: &WebhookEndpoint,
    event: WebhookEvent,
    body: &[u8],
) -> SyncResult<()> {
    let failed = |reason: String| SyncError::WebhookDelivery {
        endpoint: endpoint.url.clone(),
        reason,
    };

    let mut request = client
        .post(&endpoint.url)
        .header(CONTENT_TYPE, "application/json")
        .header(EVENT_HEADER, event.as_str());

    for (name, value) in &endpoint.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    if let Some(secret) = &endpoint.secret {
        request = request.header(SIGNATURE_HEADER, sign(secret, body)?);
    }

    let response = request
        .body(body.to_vec())
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(failed(format!("HTTP {status}")))
    }
}
