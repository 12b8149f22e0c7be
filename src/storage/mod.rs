//! Storage layer: connection management, migrations, the SQLite store,
//! and the optional encryption wrapper.

pub mod connection;
pub mod encryption;
pub mod migrations;
pub mod store;

pub use encryption::{decrypt_field, derive_key, encrypt_field, EncryptedMemoryStore};
pub use migrations::{ensure_schema, get_schema_version, LATEST_VERSION};
pub use store::MemoryStore;

use chrono::{DateTime, Utc};
use std::path::Path;

use crate::error::Result;
use crate::types::{Memory, MemoryFilter, MemoryPatch, MemoryScope, SessionSummary};

/// The storage operations the façade depends on.
///
/// Implemented by both [`MemoryStore`] and [`EncryptedMemoryStore`] so
/// encryption can be layered in without the rest of the engine caring.
pub trait MemoryBackend: Send + Sync {
    fn scope(&self) -> MemoryScope;
    fn path(&self) -> &Path;
    fn schema_version(&self) -> i32;

    fn save(&self, memory: &Memory) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<Memory>>;
    fn delete(&self, id: &str) -> Result<bool>;
    fn search_by_text(&self, query: &str, limit: usize) -> Result<Vec<Memory>>;
    fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<Memory>>;
    fn candidates_with_embeddings(
        &self,
        limit: usize,
        min_importance: Option<f32>,
        category: Option<&str>,
    ) -> Result<Vec<Memory>>;
    fn get_by_session(&self, session_id: &str, limit: usize) -> Result<Vec<Memory>>;
    fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>>;
    fn search_filtered(&self, filter: &MemoryFilter) -> Result<Vec<Memory>>;
    fn update_access(&self, id: &str) -> Result<()>;
    fn update_fields(&self, id: &str, patch: &MemoryPatch) -> Result<bool>;
    fn count(&self) -> Result<i64>;
    fn time_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>>;
    fn clear(&self) -> Result<i64>;
    fn close(&self);
}

impl MemoryBackend for MemoryStore {
    fn scope(&self) -> MemoryScope {
        MemoryStore::scope(self)
    }

    fn path(&self) -> &Path {
        MemoryStore::path(self)
    }

    fn schema_version(&self) -> i32 {
        MemoryStore::schema_version(self)
    }

    fn save(&self, memory: &Memory) -> Result<()> {
        MemoryStore::save(self, memory)
    }

    fn get(&self, id: &str) -> Result<Option<Memory>> {
        MemoryStore::get(self, id)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        MemoryStore::delete(self, id)
    }

    fn search_by_text(&self, query: &str, limit: usize) -> Result<Vec<Memory>> {
        MemoryStore::search_by_text(self, query, limit)
    }

    fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<Memory>> {
        MemoryStore::list_all(self, limit, offset)
    }

    fn candidates_with_embeddings(
        &self,
        limit: usize,
        min_importance: Option<f32>,
        category: Option<&str>,
    ) -> Result<Vec<Memory>> {
        MemoryStore::candidates_with_embeddings(self, limit, min_importance, category)
    }

    fn get_by_session(&self, session_id: &str, limit: usize) -> Result<Vec<Memory>> {
        MemoryStore::get_by_session(self, session_id, limit)
    }

    fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        MemoryStore::list_sessions(self, limit)
    }

    fn search_filtered(&self, filter: &MemoryFilter) -> Result<Vec<Memory>> {
        MemoryStore::search_filtered(self, filter)
    }

    fn update_access(&self, id: &str) -> Result<()> {
        MemoryStore::update_access(self, id)
    }

    fn update_fields(&self, id: &str, patch: &MemoryPatch) -> Result<bool> {
        MemoryStore::update_fields(self, id, patch)
    }

    fn count(&self) -> Result<i64> {
        MemoryStore::count(self)
    }

    fn time_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        MemoryStore::time_range(self)
    }

    fn clear(&self) -> Result<i64> {
        MemoryStore::clear(self)
    }

    fn close(&self) {
        MemoryStore::close(self)
    }
}

impl MemoryBackend for EncryptedMemoryStore {
    fn scope(&self) -> MemoryScope {
        self.inner().scope()
    }

    fn path(&self) -> &Path {
        self.inner().path()
    }

    fn schema_version(&self) -> i32 {
        self.inner().schema_version()
    }

    fn save(&self, memory: &Memory) -> Result<()> {
        let encrypted = self.encrypt_memory(memory)?;
        self.inner().save(&encrypted)
    }

    fn get(&self, id: &str) -> Result<Option<Memory>> {
        match self.inner().get(id)? {
            Some(memory) => Ok(Some(self.decrypt_memory(memory)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, id: &str) -> Result<bool> {
        self.inner().delete(id)
    }

    /// LIKE search cannot see through encrypted text; callers fall back
    /// to embedding-based recall.
    fn search_by_text(&self, _query: &str, _limit: usize) -> Result<Vec<Memory>> {
        Ok(Vec::new())
    }

    fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<Memory>> {
        self.decrypt_all(self.inner().list_all(limit, offset)?)
    }

    fn candidates_with_embeddings(
        &self,
        limit: usize,
        min_importance: Option<f32>,
        category: Option<&str>,
    ) -> Result<Vec<Memory>> {
        let rows = self
            .inner()
            .candidates_with_embeddings(limit, min_importance, category)?;
        self.decrypt_all(rows)
    }

    fn get_by_session(&self, session_id: &str, limit: usize) -> Result<Vec<Memory>> {
        self.decrypt_all(self.inner().get_by_session(session_id, limit)?)
    }

    fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        self.inner().list_sessions(limit)
    }

    /// Metadata filters run against the encrypted metadata column and
    /// will not match plaintext keys; importance and time filters keep
    /// working because those columns are never encrypted.
    fn search_filtered(&self, filter: &MemoryFilter) -> Result<Vec<Memory>> {
        self.decrypt_all(self.inner().search_filtered(filter)?)
    }

    fn update_access(&self, id: &str) -> Result<()> {
        self.inner().update_access(id)
    }

    fn update_fields(&self, id: &str, patch: &MemoryPatch) -> Result<bool> {
        let encrypted = self.encrypt_patch(patch)?;
        self.inner().update_fields(id, &encrypted)
    }

    fn count(&self) -> Result<i64> {
        self.inner().count()
    }

    fn time_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        self.inner().time_range()
    }

    fn clear(&self) -> Result<i64> {
        self.inner().clear()
    }

    fn close(&self) {
        self.inner().close()
    }
}
