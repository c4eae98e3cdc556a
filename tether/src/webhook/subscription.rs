//! Webhook subscriptions and secret hashing.

use std::time::Duration;

use sha2::{Digest, Sha256};

use super::event::EventKind;

/// Per-subscription delivery policy.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeliveryPolicy {
    /// Total attempts including the first (1 initial + N retries).
    pub max_attempts: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            timeout_secs: 10,
        }
    }
}

impl DeliveryPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A registered webhook endpoint. The shared secret is stored only as a
/// SHA-256 hash; the dispatcher keeps the signing plaintext in its keyring.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WebhookSubscription {
    pub id: String,
    pub url: String,
    /// Kind patterns: exact kinds or family wildcards (`"query.*"`).
    pub kinds: Vec<String>,
    pub active: bool,
    pub secret_hash: String,
    pub policy: DeliveryPolicy,
}

impl WebhookSubscription {
    pub fn matches(&self, kind: &EventKind) -> bool {
        self.active && self.kinds.iter().any(|p| kind.matches_pattern(p))
    }
}

/// Hex SHA-256 of a shared secret, for at-rest storage and audit.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Matching requires an active subscription and a pattern hit.
    #[test]
    fn matching_respects_active_flag() {
        let mut sub = WebhookSubscription {
            id: "whk_1".into(),
            url: "https://example.test/hook".into(),
            kinds: vec!["query.*".into()],
            active: true,
            secret_hash: hash_secret("s"),
            policy: DeliveryPolicy::default(),
        };
        let kind = EventKind::new("query.completed");
        assert!(sub.matches(&kind));
        sub.active = false;
        assert!(!sub.matches(&kind));
    }

    /// **Scenario**: Hashing is deterministic and never exposes the secret.
    #[test]
    fn secret_hash_deterministic() {
        let h1 = hash_secret("topsecret");
        let h2 = hash_secret("topsecret");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(!h1.contains("topsecret"));
    }
}
