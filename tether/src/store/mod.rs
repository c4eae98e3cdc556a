//! Store capability traits and backends.
//!
//! Three thin capabilities, consumed (not defined) by the pipeline core:
//!
//! 1. **RelationalStore** — transactional CRUD on documents, pairs, query
//!    records, sessions, webhook subscriptions/events/deliveries.
//! 2. **VectorStore** — upsert/delete/search/count over pair embeddings with
//!    an equality + boolean filter grammar.
//! 3. **KvStore** — get/set-with-TTL, atomic increment, prefix scan, and
//!    list push/pop for queues. Staging drafts, cache entries, and the
//!    delivery queue live here.
//!
//! | Backend                  | Persistence | Use case              |
//! |--------------------------|-------------|-----------------------|
//! | `InMemoryRelationalStore`| In-memory   | Dev, tests            |
//! | `SqliteRelationalStore`  | SQLite file | Single-node production|
//! | `InMemoryVectorStore`    | In-memory   | Dev, tests            |
//! | `SqliteVecStore`         | SQLite file | Persistent embeddings |
//! | `InMemoryKvStore`        | In-memory   | Dev, tests, cache     |

mod kv;
mod memory;
mod relational;
mod sqlite;
mod sqlite_vec;
pub(crate) mod vector;

pub use kv::KvStore;
pub use memory::{InMemoryKvStore, InMemoryRelationalStore, InMemoryVectorStore};
pub use relational::RelationalStore;
pub use sqlite::SqliteRelationalStore;
pub use sqlite_vec::SqliteVecStore;
pub use vector::{FilterField, VectorFilter, VectorHit, VectorRecord, VectorStore};

use thiserror::Error;

/// Store adapter error. Converted to `PipelineError::Upstream` at the pipeline
/// boundary; the raw text never reaches a user-facing result.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}
