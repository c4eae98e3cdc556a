//! Webhook delivery subsystem: events, subscriptions, signed deliveries.
//!
//! Producers emit events through [`WebhookDispatcher::emit`]; the event is
//! persisted durably before the producer is acknowledged, then one delivery is
//! enqueued per matching active subscription. A bounded pool of delivery tasks
//! POSTs signed payloads with exponential backoff; exhausted deliveries land
//! in the dead-letter view.
//!
//! Deliveries for one subscription are **not** ordered across events; each
//! delivery is independent. Subscribers needing order must use the embedded
//! `timestamp` and `event_id`.

mod dispatcher;
mod event;
mod signature;
mod subscription;
mod transport;

pub use dispatcher::{WebhookConfig, WebhookDispatcher};
pub use event::{
    EventKind, WebhookEvent, DOCUMENT_ARCHIVED, DOCUMENT_INGESTED, JOB_CLASSIFIED,
    QUERY_COMPLETED, SESSION_CLEARED, SESSION_CLOSED, SYSTEM_REGISTRY_REFRESHED,
};
pub use signature::{sign_payload, verify_signature, ReplayGuard, SignatureError};
pub use subscription::{hash_secret, DeliveryPolicy, WebhookSubscription};
pub use transport::{
    DeliveryTransport, HttpTransport, MockTransport, TransportCall, TransportError,
};

use chrono::{DateTime, Utc};

/// Lifecycle of one delivery. The delivery id is stable across retries so
/// receivers can deduplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Awaiting its first attempt (or manually re-enqueued from the DLQ).
    Queued,
    /// An attempt is on the wire.
    InFlight,
    /// A 2xx was received; terminal.
    Success,
    /// The last attempt failed retryably; the next one fires at
    /// `next_retry_at`.
    Failed,
    /// Retry budget exhausted or a non-retryable response; retained for the
    /// dead-letter view.
    Dead,
}

/// One delivery of one event to one subscription.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WebhookDelivery {
    pub id: String,
    pub event_id: String,
    pub subscription_id: String,
    /// 1-based count of attempts performed so far.
    pub attempt: u32,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response_code: Option<u16>,
    #[serde(default)]
    pub last_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
