//! Session manager: conversation logs, TTL, serial turn processing, and
//! explicit per-user long-term memory.
//!
//! Sessions are keyed by `(user_id, session_id)` and live in the relational
//! store with an `expires_at` refreshed on activity. Turns for one session are
//! processed in arrival order through a per-session async lock; distinct
//! sessions run in parallel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::dialog::DialogState;
use crate::message::Message;
use crate::store::{KvStore, RelationalStore, StoreError};

/// Role of a stored turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One turn in a session's ordered log.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionTurn {
    pub role: Role,
    pub content: String,
    pub ts: DateTime<Utc>,
    /// The query record this turn belongs to (assistant turns).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
}

/// A conversation session. `low_confidence_streak` backs the dialog state
/// machine's consecutive-low-turn escalation rule.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub user_id: String,
    pub session_id: String,
    pub turns: Vec<SessionTurn>,
    pub dialog_state: DialogState,
    #[serde(default)]
    pub low_confidence_streak: u32,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// The last `k` turns converted to model messages, oldest first.
    pub fn context_messages(&self, k: usize) -> Vec<Message> {
        let start = self.turns.len().saturating_sub(k);
        self.turns[start..]
            .iter()
            .map(|t| match t.role {
                Role::User => Message::user(&t.content),
                Role::Assistant => Message::assistant(&t.content),
                Role::System => Message::system(&t.content),
            })
            .collect()
    }

    /// Questions from the most recent user turns, oldest first, for loop
    /// detection. Bounded by `window`.
    pub fn recent_questions(&self, window: usize) -> Vec<String> {
        let mut qs: Vec<String> = self
            .turns
            .iter()
            .rev()
            .filter(|t| t.role == Role::User)
            .take(window)
            .map(|t| t.content.clone())
            .collect();
        qs.reverse();
        qs
    }
}

/// Owns session lifecycle: load-or-create, turn appends, TTL refresh, clear,
/// and the per-user long-term memory slots (K/V backed, explicit writes only).
pub struct SessionManager {
    store: Arc<dyn RelationalStore>,
    kv: Arc<dyn KvStore>,
    ttl: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn RelationalStore>, kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            store,
            kv,
            ttl,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, user_id: &str, session_id: &str) -> Arc<Mutex<()>> {
        let key = format!("{}:{}", user_id, session_id);
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Serializes turn processing for one session. Hold the guard for the
    /// whole query; drop it after the assistant turn is appended.
    pub async fn acquire(&self, user_id: &str, session_id: &str) -> OwnedMutexGuard<()> {
        self.lock_for(user_id, session_id).lock_owned().await
    }

    fn fresh_expiry(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(24))
    }

    /// Loads the session or creates an empty one. Expired sessions are
    /// replaced by a fresh one with the same identity.
    pub async fn load_or_create(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Session, StoreError> {
        if let Some(mut session) = self.store.load_session(user_id, session_id).await? {
            session.expires_at = self.fresh_expiry();
            return Ok(session);
        }
        Ok(Session {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            turns: Vec::new(),
            dialog_state: DialogState::Open,
            low_confidence_streak: 0,
            expires_at: self.fresh_expiry(),
        })
    }

    pub async fn append_user_turn(
        &self,
        session: &mut Session,
        content: &str,
    ) -> Result<(), StoreError> {
        session.turns.push(SessionTurn {
            role: Role::User,
            content: content.to_string(),
            ts: Utc::now(),
            query_id: None,
        });
        session.expires_at = self.fresh_expiry();
        self.store.save_session(session).await
    }

    pub async fn append_assistant_turn(
        &self,
        session: &mut Session,
        content: &str,
        query_id: &str,
    ) -> Result<(), StoreError> {
        session.turns.push(SessionTurn {
            role: Role::Assistant,
            content: content.to_string(),
            ts: Utc::now(),
            query_id: Some(query_id.to_string()),
        });
        session.expires_at = self.fresh_expiry();
        self.store.save_session(session).await
    }

    /// Persists dialog-state bookkeeping after a turn.
    pub async fn update_dialog(
        &self,
        session: &mut Session,
        state: DialogState,
        low_confidence: bool,
    ) -> Result<(), StoreError> {
        session.dialog_state = state;
        session.low_confidence_streak = if low_confidence {
            session.low_confidence_streak + 1
        } else {
            0
        };
        self.store.save_session(session).await
    }

    /// Empties the turn log but retains the session identity and TTL.
    pub async fn clear(&self, user_id: &str, session_id: &str) -> Result<(), StoreError> {
        let mut session = self.load_or_create(user_id, session_id).await?;
        session.turns.clear();
        session.dialog_state = DialogState::Open;
        session.low_confidence_streak = 0;
        self.store.save_session(&session).await
    }

    /// Marks the conversation CLOSED, retaining the turn log. The dialog
    /// state machine reopens it on the next turn; closing is the only way
    /// into CLOSED.
    pub async fn close(&self, user_id: &str, session_id: &str) -> Result<(), StoreError> {
        let mut session = self.load_or_create(user_id, session_id).await?;
        session.dialog_state = DialogState::Closed;
        session.low_confidence_streak = 0;
        self.store.save_session(&session).await
    }

    // --- long-term memory (per user, explicit writes only) -----------------

    fn memory_key(user_id: &str) -> String {
        format!("memory:{}", user_id)
    }

    /// Stores one stable fact (e.g. language preference, channel). Writes are
    /// explicit; nothing is inferred from message content.
    pub async fn set_memory(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut slots: BTreeMap<String, String> = match self.kv.get(&Self::memory_key(user_id)).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => BTreeMap::new(),
        };
        slots.insert(key.to_string(), value.to_string());
        self.kv
            .set(
                &Self::memory_key(user_id),
                &serde_json::to_string(&slots)?,
                None,
            )
            .await
    }

    pub async fn get_memory(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        let Some(raw) = self.kv.get(&Self::memory_key(user_id)).await? else {
            return Ok(None);
        };
        let slots: BTreeMap<String, String> = serde_json::from_str(&raw)?;
        Ok(slots.get(key).cloned())
    }
}
