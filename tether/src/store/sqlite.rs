//! SQLite-backed relational store. Persistent across process restarts.
//!
//! Rows are stored as JSON documents with the columns the queries need lifted
//! out (status, category, next_retry_at, …). Every call opens a connection in
//! `spawn_blocking`, keeping the async surface free of blocking I/O.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::model::{Document, DocumentStatus, QAPair, QueryRecord};
use crate::session::Session;
use crate::webhook::{DeliveryStatus, WebhookDelivery, WebhookEvent, WebhookSubscription};

use super::relational::RelationalStore;
use super::StoreError;

fn storage_err<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Storage(e.to_string())
}

fn status_str(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Queued => "queued",
        DeliveryStatus::InFlight => "in_flight",
        DeliveryStatus::Success => "success",
        DeliveryStatus::Failed => "failed",
        DeliveryStatus::Dead => "dead",
    }
}

/// SQLite relational store for single-node deployments.
pub struct SqliteRelationalStore {
    db_path: std::path::PathBuf,
}

impl SqliteRelationalStore {
    /// Opens (or creates) the database and ensures the schema.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path).map_err(storage_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pairs (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                intent TEXT NOT NULL,
                archived INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pairs_category ON pairs (category, intent);
            CREATE TABLE IF NOT EXISTS query_records (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sessions (
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (user_id, session_id)
            );
            CREATE TABLE IF NOT EXISTS subscriptions (
                id TEXT PRIMARY KEY,
                active INTEGER NOT NULL DEFAULT 1,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_kind ON events (kind, created_at);
            CREATE TABLE IF NOT EXISTS deliveries (
                id TEXT PRIMARY KEY,
                subscription_id TEXT NOT NULL,
                status TEXT NOT NULL,
                next_retry_at INTEGER,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_deliveries_sub
                ON deliveries (subscription_id, status, next_retry_at);
            "#,
        )
        .map_err(storage_err)?;
        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path).map_err(storage_err)?;
            f(&mut conn)
        })
        .await
        .map_err(storage_err)?
    }
}

#[async_trait]
impl RelationalStore for SqliteRelationalStore {
    async fn insert_document(&self, doc: &Document) -> Result<(), StoreError> {
        let doc = doc.clone();
        self.with_conn(move |conn| {
            let data = serde_json::to_string(&doc)?;
            let status = match doc.status {
                DocumentStatus::Active => "active",
                DocumentStatus::Archived => "archived",
            };
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO documents (id, status, data) VALUES (?1, ?2, ?3)",
                    params![doc.id, status, data],
                )
                .map_err(storage_err)?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!("document {}", doc.id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row: Option<String> = conn
                .query_row(
                    "SELECT data FROM documents WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .ok();
            row.map(|data| serde_json::from_str(&data).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn archive_document(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            let data: String = tx
                .query_row(
                    "SELECT data FROM documents WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .map_err(|_| StoreError::NotFound(format!("document {}", id)))?;
            let mut doc: Document = serde_json::from_str(&data)?;
            doc.status = DocumentStatus::Archived;
            doc.updated_at = chrono::Utc::now();
            tx.execute(
                "UPDATE documents SET status = 'archived', data = ?2 WHERE id = ?1",
                params![id, serde_json::to_string(&doc)?],
            )
            .map_err(storage_err)?;
            for pair_id in &doc.pair_ids {
                tx.execute(
                    "UPDATE pairs SET archived = 1 WHERE id = ?1",
                    params![pair_id],
                )
                .map_err(storage_err)?;
            }
            tx.commit().map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn insert_pairs(&self, pairs: &[QAPair]) -> Result<(), StoreError> {
        let pairs = pairs.to_vec();
        self.with_conn(move |conn| {
            for pair in &pairs {
                pair.validate().map_err(|e| StoreError::Storage(e.to_string()))?;
            }
            let tx = conn.transaction().map_err(storage_err)?;
            for pair in &pairs {
                let inserted = tx
                    .execute(
                        "INSERT OR IGNORE INTO pairs (id, category, intent, archived, data)
                         VALUES (?1, ?2, ?3, 0, ?4)",
                        params![
                            pair.id,
                            pair.metadata.category,
                            pair.metadata.intent,
                            serde_json::to_string(pair)?
                        ],
                    )
                    .map_err(storage_err)?;
                if inserted == 0 {
                    // Rolls back the whole batch on drop.
                    return Err(StoreError::Conflict(format!("pair {}", pair.id)));
                }
            }
            tx.commit().map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn delete_pairs(&self, ids: &[String]) -> Result<(), StoreError> {
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            for id in &ids {
                tx.execute("DELETE FROM pairs WHERE id = ?1", params![id])
                    .map_err(storage_err)?;
            }
            tx.commit().map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn get_pair(&self, id: &str) -> Result<Option<QAPair>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row: Option<String> = conn
                .query_row("SELECT data FROM pairs WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .ok();
            row.map(|data| serde_json::from_str(&data).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn get_pairs(&self, ids: &[String]) -> Result<Vec<QAPair>, StoreError> {
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT data FROM pairs WHERE id = ?1")
                .map_err(storage_err)?;
            let mut out = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Ok(data) = stmt.query_row(params![id], |row| row.get::<_, String>(0)) {
                    out.push(serde_json::from_str(&data)?);
                }
            }
            Ok(out)
        })
        .await
    }

    async fn list_active_pairs(&self) -> Result<Vec<QAPair>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT data FROM pairs WHERE archived = 0")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for data in rows {
                out.push(serde_json::from_str(&data.map_err(storage_err)?)?);
            }
            Ok(out)
        })
        .await
    }

    async fn pairs_by_category(
        &self,
        category: &str,
        intent: Option<&str>,
    ) -> Result<Vec<QAPair>, StoreError> {
        let category = category.to_string();
        let intent = intent.map(String::from);
        self.with_conn(move |conn| {
            let mut out: Vec<QAPair> = Vec::new();
            let mut push_rows = |raw: Vec<String>| -> Result<(), StoreError> {
                for data in raw {
                    out.push(serde_json::from_str(&data)?);
                }
                Ok(())
            };
            match &intent {
                Some(intent) => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT data FROM pairs
                             WHERE archived = 0 AND category = ?1 AND intent = ?2",
                        )
                        .map_err(storage_err)?;
                    let raw = stmt
                        .query_map(params![category, intent], |row| row.get::<_, String>(0))
                        .map_err(storage_err)?
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(storage_err)?;
                    push_rows(raw)?;
                }
                None => {
                    let mut stmt = conn
                        .prepare("SELECT data FROM pairs WHERE archived = 0 AND category = ?1")
                        .map_err(storage_err)?;
                    let raw = stmt
                        .query_map(params![category], |row| row.get::<_, String>(0))
                        .map_err(storage_err)?
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(storage_err)?;
                    push_rows(raw)?;
                }
            }
            Ok(out)
        })
        .await
    }

    async fn insert_query_record(&self, record: &QueryRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO query_records (id, data) VALUES (?1, ?2)",
                    params![record.id, serde_json::to_string(&record)?],
                )
                .map_err(storage_err)?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!("query record {}", record.id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_query_record(&self, id: &str) -> Result<Option<QueryRecord>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row: Option<String> = conn
                .query_row(
                    "SELECT data FROM query_records WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .ok();
            row.map(|data| serde_json::from_str(&data).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn load_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let user_id = user_id.to_string();
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let row: Option<(i64, String)> = conn
                .query_row(
                    "SELECT expires_at, data FROM sessions WHERE user_id = ?1 AND session_id = ?2",
                    params![user_id, session_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .ok();
            match row {
                Some((expires_at, _)) if expires_at <= chrono::Utc::now().timestamp() => {
                    conn.execute(
                        "DELETE FROM sessions WHERE user_id = ?1 AND session_id = ?2",
                        params![user_id, session_id],
                    )
                    .map_err(storage_err)?;
                    Ok(None)
                }
                Some((_, data)) => Ok(Some(serde_json::from_str(&data)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let session = session.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sessions (user_id, session_id, expires_at, data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.user_id,
                    session.session_id,
                    session.expires_at.timestamp(),
                    serde_json::to_string(&session)?
                ],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn insert_subscription(&self, sub: &WebhookSubscription) -> Result<(), StoreError> {
        let sub = sub.clone();
        self.with_conn(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO subscriptions (id, active, data) VALUES (?1, ?2, ?3)",
                    params![sub.id, sub.active as i64, serde_json::to_string(&sub)?],
                )
                .map_err(storage_err)?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!("subscription {}", sub.id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_subscription(
        &self,
        id: &str,
    ) -> Result<Option<WebhookSubscription>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row: Option<String> = conn
                .query_row(
                    "SELECT data FROM subscriptions WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .ok();
            row.map(|data| serde_json::from_str(&data).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn subscriptions_for_kind(
        &self,
        kind: &str,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        let kind = crate::webhook::EventKind::new(kind);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT data FROM subscriptions WHERE active = 1")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for data in rows {
                let sub: WebhookSubscription =
                    serde_json::from_str(&data.map_err(storage_err)?)?;
                if sub.matches(&kind) {
                    out.push(sub);
                }
            }
            Ok(out)
        })
        .await
    }

    async fn set_subscription_active(&self, id: &str, active: bool) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let data: String = conn
                .query_row(
                    "SELECT data FROM subscriptions WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .map_err(|_| StoreError::NotFound(format!("subscription {}", id)))?;
            let mut sub: WebhookSubscription = serde_json::from_str(&data)?;
            sub.active = active;
            conn.execute(
                "UPDATE subscriptions SET active = ?2, data = ?3 WHERE id = ?1",
                params![id, active as i64, serde_json::to_string(&sub)?],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn insert_event(&self, event: &WebhookEvent) -> Result<(), StoreError> {
        let event = event.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO events (id, kind, created_at, data) VALUES (?1, ?2, ?3, ?4)",
                params![
                    event.id,
                    event.kind.as_str(),
                    event.created_at.timestamp(),
                    serde_json::to_string(&event)?
                ],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn get_event(&self, id: &str) -> Result<Option<WebhookEvent>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row: Option<String> = conn
                .query_row("SELECT data FROM events WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .ok();
            row.map(|data| serde_json::from_str(&data).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        self.update_delivery(delivery).await
    }

    async fn update_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        let delivery = delivery.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO deliveries (id, subscription_id, status, next_retry_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    delivery.id,
                    delivery.subscription_id,
                    status_str(delivery.status),
                    delivery.next_retry_at.map(|t| t.timestamp()),
                    serde_json::to_string(&delivery)?
                ],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn get_delivery(&self, id: &str) -> Result<Option<WebhookDelivery>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let row: Option<String> = conn
                .query_row(
                    "SELECT data FROM deliveries WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .ok();
            row.map(|data| serde_json::from_str(&data).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn list_deliveries(
        &self,
        subscription_id: &str,
        status: Option<DeliveryStatus>,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let subscription_id = subscription_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT data FROM deliveries WHERE subscription_id = ?1")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![subscription_id], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for data in rows {
                let delivery: WebhookDelivery = serde_json::from_str(&data.map_err(storage_err)?)?;
                if status.map_or(true, |s| delivery.status == s) {
                    out.push(delivery);
                }
            }
            Ok(out)
        })
        .await
    }

    async fn list_dead_deliveries(&self) -> Result<Vec<WebhookDelivery>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT data FROM deliveries WHERE status = 'dead'")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            let mut out = Vec::new();
            for data in rows {
                out.push(serde_json::from_str(&data.map_err(storage_err)?)?);
            }
            Ok(out)
        })
        .await
    }
}
