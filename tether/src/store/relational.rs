//! Relational capability: transactional CRUD on the authoritative rows.

use async_trait::async_trait;

use crate::model::{Document, QAPair, QueryRecord};
use crate::session::Session;
use crate::webhook::{DeliveryStatus, WebhookDelivery, WebhookEvent, WebhookSubscription};

use super::StoreError;

/// Transactional store for documents, pairs, query records, sessions, and the
/// webhook tables. Batch writes (`insert_pairs`, `archive_document`) are
/// atomic: either every row lands or none does.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    // --- documents & pairs -------------------------------------------------

    async fn insert_document(&self, doc: &Document) -> Result<(), StoreError>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Archives the document and all of its pairs in one transaction.
    async fn archive_document(&self, id: &str) -> Result<(), StoreError>;

    /// Inserts pairs transactionally. Every pair must pass
    /// [`QAPair::validate`]; an existing id is a conflict.
    async fn insert_pairs(&self, pairs: &[QAPair]) -> Result<(), StoreError>;

    /// Deletes pairs by id. Used as the compensating action when a commit
    /// fails after the relational insert.
    async fn delete_pairs(&self, ids: &[String]) -> Result<(), StoreError>;

    async fn get_pair(&self, id: &str) -> Result<Option<QAPair>, StoreError>;

    async fn get_pairs(&self, ids: &[String]) -> Result<Vec<QAPair>, StoreError>;

    /// All pairs belonging to active documents (or with no document).
    async fn list_active_pairs(&self) -> Result<Vec<QAPair>, StoreError>;

    /// Active pairs in a category, optionally narrowed to one intent.
    async fn pairs_by_category(
        &self,
        category: &str,
        intent: Option<&str>,
    ) -> Result<Vec<QAPair>, StoreError>;

    // --- query records -----------------------------------------------------

    /// Query records are immutable: insert-only, no update surface.
    async fn insert_query_record(&self, record: &QueryRecord) -> Result<(), StoreError>;

    async fn get_query_record(&self, id: &str) -> Result<Option<QueryRecord>, StoreError>;

    // --- sessions ----------------------------------------------------------

    /// Loads a session by `(user_id, session_id)`. Expired sessions read as
    /// absent; expiry is enforced on load.
    async fn load_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, StoreError>;

    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;

    // --- webhook subscriptions, events, deliveries -------------------------

    async fn insert_subscription(&self, sub: &WebhookSubscription) -> Result<(), StoreError>;

    async fn get_subscription(&self, id: &str)
        -> Result<Option<WebhookSubscription>, StoreError>;

    /// Active subscriptions whose kind patterns match `kind`.
    async fn subscriptions_for_kind(
        &self,
        kind: &str,
    ) -> Result<Vec<WebhookSubscription>, StoreError>;

    async fn set_subscription_active(&self, id: &str, active: bool) -> Result<(), StoreError>;

    /// Events are append-only; persisted before the producer is acknowledged.
    async fn insert_event(&self, event: &WebhookEvent) -> Result<(), StoreError>;

    async fn get_event(&self, id: &str) -> Result<Option<WebhookEvent>, StoreError>;

    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError>;

    async fn update_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError>;

    async fn get_delivery(&self, id: &str) -> Result<Option<WebhookDelivery>, StoreError>;

    async fn list_deliveries(
        &self,
        subscription_id: &str,
        status: Option<DeliveryStatus>,
    ) -> Result<Vec<WebhookDelivery>, StoreError>;

    /// The dead-letter view: deliveries that exhausted their retry budget.
    async fn list_dead_deliveries(&self) -> Result<Vec<WebhookDelivery>, StoreError>;
}
