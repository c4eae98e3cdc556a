//! SQLite-backed vector store with KNN search via sqlite-vec.
//!
//! Dual-table design: `pair_vec_meta` holds the pair id and the filterable
//! payload columns, the `vec0` virtual table holds the embeddings keyed by the
//! meta rowid. KNN queries over-fetch and filter in Rust, since the virtual
//! table cannot join on payload columns inside the MATCH query.

use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::model::Language;

use super::vector::{VectorFilter, VectorHit, VectorRecord, VectorStore};
use super::StoreError;

static SQLITE_VEC_INIT: Once = Once::new();

fn storage_err<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// Formats a vector as JSON for sqlite-vec (e.g. "[0.1,0.2]").
fn vector_to_json(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Persistent vector store over sqlite-vec.
pub struct SqliteVecStore {
    db_path: std::path::PathBuf,
    dimension: usize,
}

impl SqliteVecStore {
    /// Opens the store, registering the sqlite-vec extension and creating the
    /// tables for the given embedding dimension.
    pub fn new(path: impl AsRef<Path>, dimension: usize) -> Result<Self, StoreError> {
        SQLITE_VEC_INIT.call_once(|| unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        });

        let db_path = path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path).map_err(storage_err)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS pair_vec_meta (
                id INTEGER PRIMARY KEY,
                pair_id TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL,
                intent TEXT NOT NULL,
                language TEXT NOT NULL,
                model TEXT NOT NULL
            )
            "#,
            [],
        )
        .map_err(storage_err)?;
        conn.execute(
            &format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS pair_vec_embeddings USING vec0(embedding float[{}])",
                dimension
            ),
            [],
        )
        .map_err(storage_err)?;

        Ok(Self { db_path, dimension })
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
impl VectorStore for SqliteVecStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
        let records = records.to_vec();
        let dimension = self.dimension;
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            for record in &records {
                if record.vector.len() != dimension {
                    return Err(StoreError::Storage(format!(
                        "vector dimension {} != expected {}",
                        record.vector.len(),
                        dimension
                    )));
                }
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM pair_vec_meta WHERE pair_id = ?1",
                        params![record.pair_id],
                        |row| row.get(0),
                    )
                    .ok();
                let language = serde_json::to_string(&record.language)?
                    .trim_matches('"')
                    .to_string();
                let id = match existing {
                    Some(id) => {
                        tx.execute(
                            "DELETE FROM pair_vec_embeddings WHERE rowid = ?1",
                            params![id],
                        )
                        .map_err(storage_err)?;
                        tx.execute(
                            "UPDATE pair_vec_meta
                             SET category = ?2, intent = ?3, language = ?4, model = ?5
                             WHERE id = ?1",
                            params![id, record.category, record.intent, language, record.model],
                        )
                        .map_err(storage_err)?;
                        id
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO pair_vec_meta (pair_id, category, intent, language, model)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            params![record.pair_id, record.category, record.intent, language, record.model],
                        )
                        .map_err(storage_err)?;
                        tx.last_insert_rowid()
                    }
                };
                tx.execute(
                    "INSERT INTO pair_vec_embeddings (rowid, embedding) VALUES (?1, ?2)",
                    params![id, vector_to_json(&record.vector)],
                )
                .map_err(storage_err)?;
            }
            tx.commit().map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, pair_ids: &[String]) -> Result<(), StoreError> {
        let pair_ids = pair_ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            for pair_id in &pair_ids {
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM pair_vec_meta WHERE pair_id = ?1",
                        params![pair_id],
                        |row| row.get(0),
                    )
                    .ok();
                if let Some(id) = existing {
                    tx.execute(
                        "DELETE FROM pair_vec_embeddings WHERE rowid = ?1",
                        params![id],
                    )
                    .map_err(storage_err)?;
                    tx.execute("DELETE FROM pair_vec_meta WHERE id = ?1", params![id])
                        .map_err(storage_err)?;
                }
            }
            tx.commit().map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorHit>, StoreError> {
        let vec_json = vector_to_json(vector);
        let filter = filter.clone();
        self.with_conn(move |conn| {
            // Over-fetch so post-filtering can still fill top_k.
            let knn_limit = (top_k.max(1) * 4).max(50);
            let mut stmt = conn
                .prepare(
                    "SELECT rowid, distance FROM pair_vec_embeddings
                     WHERE embedding MATCH ?1 AND k = ?2",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![vec_json, knn_limit as i64], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
                })
                .map_err(storage_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err)?;

            let mut hits = Vec::new();
            for (rowid, distance) in rows {
                let meta: Option<(String, String, String, String)> = conn
                    .query_row(
                        "SELECT pair_id, category, intent, language
                         FROM pair_vec_meta WHERE id = ?1",
                        params![rowid],
                        |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                        },
                    )
                    .ok();
                let Some((pair_id, category, intent, language)) = meta else {
                    continue;
                };
                let language: Language = language.parse().unwrap_or_default();
                if !filter.matches(&category, &intent, language) {
                    continue;
                }
                // sqlite-vec reports L2 distance; map to a similarity-like
                // score so ordering matches the in-memory backend.
                hits.push(VectorHit {
                    pair_id,
                    score: 1.0 / (1.0 + distance as f32),
                });
                if hits.len() >= top_k {
                    break;
                }
            }
            Ok(hits)
        })
        .await
    }

    async fn count(&self, filter: &VectorFilter) -> Result<usize, StoreError> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT category, intent, language FROM pair_vec_meta")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(storage_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err)?;
            Ok(rows
                .into_iter()
                .filter(|(category, intent, language)| {
                    filter.matches(
                        category,
                        intent,
                        language.parse().unwrap_or_default(),
                    )
                })
                .count())
        })
        .await
    }
}
