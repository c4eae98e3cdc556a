//! Key/value capability: TTL entries, atomic counters, prefix scan, queues.

use std::time::Duration;

use async_trait::async_trait;

use super::StoreError;

/// Key/value store with TTL, counters, and simple list queues.
///
/// Values are strings; callers serialize structured values as JSON. TTL
/// expiry is enforced by the backend: an expired key reads as absent.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the value, or `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Sets the value. `ttl == None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Atomic set-if-absent. Returns `true` when this call created the key.
    /// Used as the per-draft advisory commit lock.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>)
        -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically adds `delta` to an integer value (missing key counts as 0)
    /// and returns the new value. Non-integer values are an error.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// All live `(key, value)` pairs whose key starts with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Appends to the tail of a list queue.
    async fn push(&self, queue: &str, value: &str) -> Result<(), StoreError>;

    /// Pops from the head of a list queue; `None` when empty.
    async fn pop(&self, queue: &str) -> Result<Option<String>, StoreError>;
}
