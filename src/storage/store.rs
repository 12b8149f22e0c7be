//! SQLite-backed memory store
//!
//! Durable, thread-safe CRUD over a single database file. No external
//! server is required; every operation maps to one SQL statement or a
//! small transaction.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Row};
use std::path::Path;
use tracing::debug;

use super::connection::{resolve_db_path, ConnectionPool};
use super::migrations::ensure_schema;
use crate::error::{MemoryMeshError, Result};
use crate::types::{Memory, MemoryFilter, MemoryPatch, MemoryScope, SessionSummary};

/// Metadata filter keys are interpolated into a `json_extract` path, so
/// they are restricted to identifier characters as an injection guard.
static FILTER_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid filter key regex"));

const MEMORY_COLUMNS: &str = "id, text, metadata_json, embedding_blob, created_at, updated_at, \
     access_count, importance, decay_rate, session_id";

/// Pack an embedding into a little-endian f32 blob.
pub(crate) fn pack_embedding(embedding: Option<&[f32]>) -> Option<Vec<u8>> {
    let embedding = embedding?;
    if embedding.is_empty() {
        return None;
    }
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    Some(blob)
}

/// Unpack a little-endian f32 blob back into a vector.
pub(crate) fn unpack_embedding(blob: Option<Vec<u8>>) -> Option<Vec<f32>> {
    let blob = blob?;
    let mut out = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Some(out)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Thread-safe SQLite storage for [`Memory`] objects.
///
/// Each instance manages one database file. The scope is a property of
/// the store, not the row: every memory read back is stamped with the
/// store's scope.
pub struct MemoryStore {
    pool: ConnectionPool,
    scope: MemoryScope,
    schema_version: i32,
}

impl MemoryStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>, scope: MemoryScope) -> Result<Self> {
        let resolved = resolve_db_path(path.as_ref())?;
        let pool = ConnectionPool::new(resolved);
        let schema_version = pool.with_conn(ensure_schema)?;
        debug!(
            path = %pool.path().display(),
            scope = %scope,
            schema_version,
            "Opened memory store"
        );
        Ok(Self {
            pool,
            scope,
            schema_version,
        })
    }

    pub fn scope(&self) -> MemoryScope {
        self.scope
    }

    pub fn path(&self) -> &Path {
        self.pool.path()
    }

    pub fn schema_version(&self) -> i32 {
        self.schema_version
    }

    pub(crate) fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn row_to_memory(&self, row: &Row<'_>) -> rusqlite::Result<Memory> {
        let metadata_json: String = row.get(2)?;
        let metadata = serde_json::from_str(&metadata_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
        })?;
        let created_raw: String = row.get(4)?;
        let updated_raw: String = row.get(5)?;
        let mut memory = Memory {
            id: row.get(0)?,
            text: row.get(1)?,
            metadata,
            embedding: unpack_embedding(row.get(3)?),
            created_at: parse_ts(4, &created_raw)?,
            updated_at: parse_ts(5, &updated_raw)?,
            access_count: row.get(6)?,
            importance: row.get(7)?,
            decay_rate: row.get(8)?,
            session_id: row.get(9)?,
            scope: self.scope,
        };
        memory.normalize();
        Ok(memory)
    }

    /// Insert or fully replace a memory by id.
    pub fn save(&self, memory: &Memory) -> Result<()> {
        let metadata_json = serde_json::to_string(&memory.metadata)?;
        self.pool.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO memories
                     (id, text, metadata_json, embedding_blob,
                      created_at, updated_at, access_count,
                      importance, decay_rate, session_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    memory.id,
                    memory.text,
                    metadata_json,
                    pack_embedding(memory.embedding.as_deref()),
                    memory.created_at.to_rfc3339(),
                    memory.updated_at.to_rfc3339(),
                    memory.access_count,
                    memory.importance,
                    memory.decay_rate,
                    memory.session_id,
                ],
            )?;
            Ok(())
        })
    }

    /// Retrieve a single memory by id.
    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        self.pool.with_conn(|conn| {
            let sql = format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query_map(params![id], |row| self.row_to_memory(row))?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
    }

    /// Delete a memory by id, returning whether a row was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.pool.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }

    /// Case-insensitive substring search over `text`. LIKE wildcards in
    /// the query are escaped so they match literally.
    pub fn search_by_text(&self, query: &str, limit: usize) -> Result<Vec<Memory>> {
        let escaped = query
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{}%", escaped);
        self.pool.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM memories
                 WHERE text LIKE ?1 ESCAPE '\\'
                 ORDER BY updated_at DESC
                 LIMIT ?2",
                MEMORY_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![pattern, limit as i64], |row| {
                self.row_to_memory(row)
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// List memories ordered by most recently updated first.
    pub fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<Memory>> {
        self.pool.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM memories
                 ORDER BY updated_at DESC
                 LIMIT ?1 OFFSET ?2",
                MEMORY_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
                self.row_to_memory(row)
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Rows with a non-NULL embedding, optionally filtered by minimum
    /// importance and category. Used by the recall pipeline.
    pub fn candidates_with_embeddings(
        &self,
        limit: usize,
        min_importance: Option<f32>,
        category: Option<&str>,
    ) -> Result<Vec<Memory>> {
        let mut conditions = vec!["embedding_blob IS NOT NULL".to_string()];
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(min) = min_importance {
            conditions.push(format!("importance >= ?{}", values.len() + 1));
            values.push(SqlValue::Real(min as f64));
        }
        if let Some(cat) = category {
            conditions.push(format!(
                "json_extract(metadata_json, '$.category') = ?{}",
                values.len() + 1
            ));
            values.push(SqlValue::Text(cat.to_string()));
        }

        let sql = format!(
            "SELECT {} FROM memories
             WHERE {}
             ORDER BY importance DESC, updated_at DESC
             LIMIT ?{}",
            MEMORY_COLUMNS,
            conditions.join(" AND "),
            values.len() + 1
        );
        values.push(SqlValue::Integer(limit as i64));

        self.pool.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                self.row_to_memory(row)
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// All memories belonging to a session, oldest first.
    pub fn get_by_session(&self, session_id: &str, limit: usize) -> Result<Vec<Memory>> {
        self.pool.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM memories
                 WHERE session_id = ?1
                 ORDER BY created_at ASC
                 LIMIT ?2",
                MEMORY_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![session_id, limit as i64], |row| {
                self.row_to_memory(row)
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Distinct sessions with per-session count and first/last timestamps,
    /// most recent session first.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        self.pool.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id,
                        COUNT(*) AS cnt,
                        MIN(created_at) AS first_at,
                        MAX(created_at) AS last_at
                 FROM memories
                 WHERE session_id IS NOT NULL
                 GROUP BY session_id
                 ORDER BY last_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                let first_raw: String = row.get(2)?;
                let last_raw: String = row.get(3)?;
                Ok(SessionSummary {
                    session_id: row.get(0)?,
                    count: row.get(1)?,
                    first_at: parse_ts(2, &first_raw)?,
                    last_at: parse_ts(3, &last_raw)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Search with composable SQL-level filters.
    ///
    /// Metadata filter keys must match `^[A-Za-z_][A-Za-z0-9_]*$`;
    /// anything else is rejected before any SQL executes.
    pub fn search_filtered(&self, filter: &MemoryFilter) -> Result<Vec<Memory>> {
        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(category) = &filter.category {
            conditions.push(format!(
                "json_extract(metadata_json, '$.category') = ?{}",
                values.len() + 1
            ));
            values.push(SqlValue::Text(category.clone()));
        }

        if let Some(min) = filter.min_importance {
            conditions.push(format!("importance >= ?{}", values.len() + 1));
            values.push(SqlValue::Real(min as f64));
        }

        if let Some((start, end)) = &filter.time_range {
            conditions.push(format!(
                "created_at >= ?{} AND created_at <= ?{}",
                values.len() + 1,
                values.len() + 2
            ));
            values.push(SqlValue::Text(start.to_rfc3339()));
            values.push(SqlValue::Text(end.to_rfc3339()));
        }

        if let Some(metadata_filter) = &filter.metadata_filter {
            for (key, value) in metadata_filter {
                if !FILTER_KEY_RE.is_match(key) {
                    return Err(MemoryMeshError::InvalidInput(format!(
                        "Invalid metadata filter key {:?}: keys must match [A-Za-z_][A-Za-z0-9_]*",
                        key
                    )));
                }
                conditions.push(format!(
                    "json_extract(metadata_json, '$.{}') = ?{}",
                    key,
                    values.len() + 1
                ));
                values.push(json_to_sql(value));
            }
        }

        let where_clause = if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        };
        let sql = format!(
            "SELECT {} FROM memories
             WHERE {}
             ORDER BY importance DESC, updated_at DESC
             LIMIT ?{}",
            MEMORY_COLUMNS,
            where_clause,
            values.len() + 1
        );
        values.push(SqlValue::Integer(filter.limit as i64));

        self.pool.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                self.row_to_memory(row)
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Atomically increment access_count and refresh updated_at.
    pub fn update_access(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.pool.with_conn(|conn| {
            conn.execute(
                "UPDATE memories
                 SET access_count = access_count + 1,
                     updated_at = ?1
                 WHERE id = ?2",
                params![now, id],
            )?;
            Ok(())
        })
    }

    /// Partial update; `updated_at` is always refreshed. Returns whether
    /// a row matched.
    pub fn update_fields(&self, id: &str, patch: &MemoryPatch) -> Result<bool> {
        use crate::types::FieldChange;

        let mut set_clauses: Vec<String> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let FieldChange::Set(text) = &patch.text {
            set_clauses.push(format!("text = ?{}", values.len() + 1));
            values.push(SqlValue::Text(text.clone()));
        }
        if let FieldChange::Set(importance) = &patch.importance {
            set_clauses.push(format!("importance = ?{}", values.len() + 1));
            values.push(SqlValue::Real(importance.clamp(0.0, 1.0) as f64));
        }
        if let FieldChange::Set(decay_rate) = &patch.decay_rate {
            set_clauses.push(format!("decay_rate = ?{}", values.len() + 1));
            values.push(SqlValue::Real(decay_rate.max(0.0) as f64));
        }
        if let FieldChange::Set(metadata) = &patch.metadata {
            set_clauses.push(format!("metadata_json = ?{}", values.len() + 1));
            values.push(SqlValue::Text(serde_json::to_string(metadata)?));
        }
        if let FieldChange::Set(embedding) = &patch.embedding {
            set_clauses.push(format!("embedding_blob = ?{}", values.len() + 1));
            values.push(match pack_embedding(embedding.as_deref()) {
                Some(blob) => SqlValue::Blob(blob),
                None => SqlValue::Null,
            });
        }
        if let FieldChange::Set(session_id) = &patch.session_id {
            set_clauses.push(format!("session_id = ?{}", values.len() + 1));
            values.push(match session_id {
                Some(s) => SqlValue::Text(s.clone()),
                None => SqlValue::Null,
            });
        }

        set_clauses.push(format!("updated_at = ?{}", values.len() + 1));
        values.push(SqlValue::Text(Utc::now().to_rfc3339()));

        let sql = format!(
            "UPDATE memories SET {} WHERE id = ?{}",
            set_clauses.join(", "),
            values.len() + 1
        );
        values.push(SqlValue::Text(id.to_string()));

        self.pool.with_conn(|conn| {
            let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
            Ok(changed > 0)
        })
    }

    /// Total number of stored memories.
    pub fn count(&self) -> Result<i64> {
        self.pool.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?)
        })
    }

    /// Oldest and newest created_at timestamps, or `None` when empty.
    pub fn time_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        self.pool.with_conn(|conn| {
            let row: (Option<String>, Option<String>) = conn.query_row(
                "SELECT MIN(created_at), MAX(created_at) FROM memories",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            match row {
                (Some(min), Some(max)) => Ok(Some((
                    parse_ts(0, &min).map_err(MemoryMeshError::from)?,
                    parse_ts(1, &max).map_err(MemoryMeshError::from)?,
                ))),
                _ => Ok(None),
            }
        })
    }

    /// Delete every memory, returning how many rows were removed.
    pub fn clear(&self) -> Result<i64> {
        self.pool.with_conn(|conn| {
            let tx = conn.transaction()?;
            let total: i64 = tx.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
            tx.execute("DELETE FROM memories", [])?;
            tx.commit()?;
            Ok(total)
        })
    }

    /// Drop this store's pooled connections.
    pub fn close(&self) {
        self.pool.close();
    }
}

fn json_to_sql(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(*b as i64),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
