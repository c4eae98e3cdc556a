//! Event dispatch and delivery execution.
//!
//! `emit` persists the event, then fans out one delivery per matching active
//! subscription. Each delivery runs as its own task: attempts are bounded by a
//! shared semaphore (the worker pool), retries follow the configured backoff
//! schedule with ±jitter, and a delivery that exhausts its budget is marked
//! `dead` for the DLQ view. Pending markers in the K/V store let a restarted
//! process resume queued deliveries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::store::{KvStore, RelationalStore, StoreError};

use super::event::WebhookEvent;
use super::signature::{sign_payload, verify_signature, ReplayGuard, SignatureError};
use super::subscription::{hash_secret, DeliveryPolicy, WebhookSubscription};
use super::transport::DeliveryTransport;
use super::{DeliveryStatus, WebhookDelivery};

/// Dispatcher configuration. The schedule lists the waits between attempts;
/// its length is the default retry budget.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub schedule: Vec<Duration>,
    /// Jitter fraction applied to each wait (0.2 = ±20%).
    pub jitter: f32,
    /// Maximum concurrent delivery attempts.
    pub max_concurrency: usize,
    pub default_timeout: Duration,
    /// Accepted clock skew when verifying incoming webhooks.
    pub skew: Duration,
    pub tenant: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            schedule: vec![
                Duration::from_secs(5),
                Duration::from_secs(30),
                Duration::from_secs(300),
                Duration::from_secs(1800),
            ],
            jitter: 0.2,
            max_concurrency: 8,
            default_timeout: Duration::from_secs(10),
            skew: Duration::from_secs(300),
            tenant: "default".to_string(),
        }
    }
}

fn retryable_status(code: u16) -> bool {
    code == 408 || code == 429 || (500..600).contains(&code)
}

/// Owns event persistence, delivery fan-out, and the retry scheduler.
pub struct WebhookDispatcher {
    store: Arc<dyn RelationalStore>,
    kv: Arc<dyn KvStore>,
    transport: Arc<dyn DeliveryTransport>,
    config: WebhookConfig,
    pool: Arc<Semaphore>,
    cancel: CancellationToken,
    replay: ReplayGuard,
}

impl WebhookDispatcher {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        kv: Arc<dyn KvStore>,
        transport: Arc<dyn DeliveryTransport>,
        config: WebhookConfig,
    ) -> Arc<Self> {
        let pool = Arc::new(Semaphore::new(config.max_concurrency));
        let replay = ReplayGuard::new(kv.clone(), config.skew);
        Arc::new(Self {
            store,
            kv,
            transport,
            config,
            pool,
            cancel: CancellationToken::new(),
            replay,
        })
    }

    /// Stops retry waits; in-flight attempts finish, queued deliveries stay
    /// queued (and resume via [`WebhookDispatcher::resume_queued`]).
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // --- subscriptions -----------------------------------------------------

    /// Registers an endpoint. The secret is stored hashed on the subscription
    /// row; the signing plaintext goes to the dispatcher keyring.
    pub async fn subscribe(
        &self,
        url: &str,
        kinds: Vec<String>,
        secret: &str,
        policy: DeliveryPolicy,
    ) -> Result<String, PipelineError> {
        if url.trim().is_empty() || secret.is_empty() || kinds.is_empty() {
            return Err(PipelineError::Validation(
                "subscription needs url, secret, and at least one kind".into(),
            ));
        }
        let id = format!("whk_{}", uuid::Uuid::new_v4().simple());
        let sub = WebhookSubscription {
            id: id.clone(),
            url: url.to_string(),
            kinds,
            active: true,
            secret_hash: hash_secret(secret),
            policy,
        };
        self.kv
            .set(&format!("whsecret:{}", id), secret, None)
            .await?;
        self.store.insert_subscription(&sub).await?;
        Ok(id)
    }

    pub async fn set_active(&self, subscription_id: &str, active: bool) -> Result<(), PipelineError> {
        Ok(self
            .store
            .set_subscription_active(subscription_id, active)
            .await?)
    }

    // --- emission ----------------------------------------------------------

    /// Persists the event durably, then enqueues deliveries. The event row is
    /// written before this returns, so the producer is only acknowledged for
    /// durable events.
    pub async fn emit(
        self: &Arc<Self>,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<WebhookEvent, PipelineError> {
        let event = WebhookEvent::new(kind, &self.config.tenant, payload);
        self.store.insert_event(&event).await?;

        let subs = self.store.subscriptions_for_kind(event.kind.as_str()).await?;
        for sub in subs {
            let delivery = WebhookDelivery {
                id: format!("dlv_{}", uuid::Uuid::new_v4().simple()),
                event_id: event.id.clone(),
                subscription_id: sub.id.clone(),
                attempt: 0,
                status: DeliveryStatus::Queued,
                last_response_code: None,
                last_latency_ms: 0,
                next_retry_at: Some(Utc::now()),
                updated_at: Utc::now(),
            };
            self.store.insert_delivery(&delivery).await?;
            self.kv
                .set(&format!("whpending:{}", delivery.id), "1", None)
                .await?;
            self.spawn_delivery(delivery.id.clone());
        }
        Ok(event)
    }

    /// Re-runs unfinished deliveries found in the pending markers (queued,
    /// mid-attempt, or failed awaiting retry), e.g. after a process restart.
    pub async fn resume_queued(self: &Arc<Self>) -> Result<usize, PipelineError> {
        let pending = self.kv.scan_prefix("whpending:").await?;
        let mut resumed = 0;
        for (key, _) in pending {
            let id = key.trim_start_matches("whpending:").to_string();
            if let Some(d) = self.store.get_delivery(&id).await? {
                if matches!(
                    d.status,
                    DeliveryStatus::Queued | DeliveryStatus::InFlight | DeliveryStatus::Failed
                ) {
                    self.spawn_delivery(id);
                    resumed += 1;
                }
            }
        }
        Ok(resumed)
    }

    /// Manually re-enqueues a delivery (typically from the DLQ view) with a
    /// fresh retry budget. The delivery id stays stable.
    pub async fn retry(self: &Arc<Self>, delivery_id: &str) -> Result<(), PipelineError> {
        let mut delivery = self
            .store
            .get_delivery(delivery_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("delivery {}", delivery_id)))?;
        delivery.attempt = 0;
        delivery.status = DeliveryStatus::Queued;
        delivery.next_retry_at = Some(Utc::now());
        delivery.updated_at = Utc::now();
        self.store.update_delivery(&delivery).await?;
        self.kv
            .set(&format!("whpending:{}", delivery_id), "1", None)
            .await?;
        self.spawn_delivery(delivery_id.to_string());
        Ok(())
    }

    pub async fn list_deliveries(
        &self,
        subscription_id: &str,
        status: Option<DeliveryStatus>,
    ) -> Result<Vec<WebhookDelivery>, PipelineError> {
        Ok(self.store.list_deliveries(subscription_id, status).await?)
    }

    pub async fn dead_deliveries(&self) -> Result<Vec<WebhookDelivery>, PipelineError> {
        Ok(self.store.list_dead_deliveries().await?)
    }

    // --- incoming verification ---------------------------------------------

    /// Verifies an incoming webhook with the subscription's secret, the skew
    /// window, and replay protection on the delivery id.
    pub async fn verify_incoming(
        &self,
        subscription_id: &str,
        timestamp: i64,
        body: &str,
        signature_header: &str,
        delivery_id: &str,
    ) -> Result<(), SignatureError> {
        let secret = self
            .kv
            .get(&format!("whsecret:{}", subscription_id))
            .await
            .ok()
            .flatten()
            .ok_or(SignatureError::Mismatch)?;
        verify_signature(
            &secret,
            timestamp,
            body,
            signature_header,
            self.config.skew,
            Utc::now().timestamp(),
        )?;
        self.replay.check_and_record(delivery_id).await
    }

    // --- delivery execution ------------------------------------------------

    fn spawn_delivery(self: &Arc<Self>, delivery_id: String) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_delivery(&delivery_id).await {
                warn!(delivery_id = %delivery_id, error = %e, "delivery task failed");
            }
        });
    }

    fn backoff_for(&self, completed_attempts: u32) -> Duration {
        let idx = (completed_attempts.saturating_sub(1) as usize).min(self.config.schedule.len() - 1);
        let base = self.config.schedule[idx];
        let jitter = self.config.jitter as f64;
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        base.mul_f64(factor.max(0.0))
    }

    async fn clear_pending(&self, delivery_id: &str) {
        let _ = self.kv.delete(&format!("whpending:{}", delivery_id)).await;
    }

    async fn run_delivery(self: &Arc<Self>, delivery_id: &str) -> Result<(), StoreError> {
        loop {
            let Some(mut delivery) = self.store.get_delivery(delivery_id).await? else {
                return Ok(());
            };
            if matches!(
                delivery.status,
                DeliveryStatus::Success | DeliveryStatus::Dead
            ) {
                self.clear_pending(delivery_id).await;
                return Ok(());
            }
            let Some(sub) = self
                .store
                .get_subscription(&delivery.subscription_id)
                .await?
            else {
                self.mark_dead(&mut delivery).await?;
                return Ok(());
            };
            let Some(event) = self.store.get_event(&delivery.event_id).await? else {
                self.mark_dead(&mut delivery).await?;
                return Ok(());
            };
            let secret = self
                .kv
                .get(&format!("whsecret:{}", sub.id))
                .await?
                .unwrap_or_default();

            // One attempt, bounded by the worker pool.
            let permit = self
                .pool
                .clone()
                .acquire_owned()
                .await
                .expect("delivery pool is never closed");

            delivery.attempt += 1;
            delivery.status = DeliveryStatus::InFlight;
            delivery.updated_at = Utc::now();
            self.store.update_delivery(&delivery).await?;

            let body = serde_json::to_string(&serde_json::json!({
                "event_id": event.id,
                "kind": event.kind.as_str(),
                "timestamp": event.created_at.timestamp(),
                "delivery_attempt": delivery.attempt,
                "data": event.payload,
            }))?;
            let ts = Utc::now().timestamp();
            let headers = vec![
                ("X-Event-Id".to_string(), event.id.clone()),
                ("X-Event-Kind".to_string(), event.kind.as_str().to_string()),
                ("X-Webhook-Id".to_string(), sub.id.clone()),
                ("X-Delivery-Attempt".to_string(), delivery.attempt.to_string()),
                ("X-Timestamp".to_string(), ts.to_string()),
                ("X-Signature".to_string(), sign_payload(&secret, ts, &body)),
            ];

            let started = Instant::now();
            let outcome = self
                .transport
                .post(&sub.url, &headers, &body, sub.policy.timeout())
                .await;
            drop(permit);

            delivery.last_latency_ms = started.elapsed().as_millis() as u64;
            delivery.updated_at = Utc::now();

            let retryable = match outcome {
                Ok(code) if (200..300).contains(&code) => {
                    delivery.last_response_code = Some(code);
                    delivery.status = DeliveryStatus::Success;
                    delivery.next_retry_at = None;
                    self.store.update_delivery(&delivery).await?;
                    self.clear_pending(delivery_id).await;
                    debug!(delivery_id = %delivery.id, code, "delivery succeeded");
                    return Ok(());
                }
                Ok(code) => {
                    delivery.last_response_code = Some(code);
                    retryable_status(code)
                }
                Err(e) => {
                    debug!(delivery_id = %delivery.id, error = %e, "transport failure");
                    delivery.last_response_code = None;
                    true
                }
            };

            let budget = sub.policy.max_attempts.max(1);
            if !retryable || delivery.attempt >= budget {
                self.mark_dead(&mut delivery).await?;
                return Ok(());
            }

            // Failed with a retry pending; the loop marks it in_flight again
            // once the backoff elapses.
            let wait = self.backoff_for(delivery.attempt);
            delivery.status = DeliveryStatus::Failed;
            delivery.next_retry_at =
                Some(Utc::now() + chrono::Duration::milliseconds(wait.as_millis() as i64));
            self.store.update_delivery(&delivery).await?;

            // Cancellable between attempts, not mid-attempt.
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn mark_dead(&self, delivery: &mut WebhookDelivery) -> Result<(), StoreError> {
        delivery.status = DeliveryStatus::Dead;
        delivery.next_retry_at = None;
        delivery.updated_at = Utc::now();
        self.store.update_delivery(delivery).await?;
        self.clear_pending(&delivery.id).await;
        warn!(
            delivery_id = %delivery.id,
            attempts = delivery.attempt,
            code = ?delivery.last_response_code,
            "delivery dead-lettered"
        );
        Ok(())
    }
}
