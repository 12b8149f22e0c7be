//! The MemoryMesh façade
//!
//! One logical memory surface spanning two stores: an optional
//! per-workspace project store and an always-present per-user global
//! store. Routes every operation, runs the write pipeline
//! (privacy guard, category/scope resolution, importance, contradiction
//! handling, embedding), and triggers auto-compaction.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use crate::embedding::{create_embedder, Embedder, EmbeddingSelector};
use crate::error::{MemoryMeshError, Result};
use crate::intelligence::categories::{auto_categorize, infer_scope, validate_category};
use crate::intelligence::compaction::{compact_store, CompactionResult, DEFAULT_TEXT_THRESHOLD};
use crate::intelligence::contradiction::{
    find_contradictions, DEFAULT_MAX_CANDIDATES, DEFAULT_THRESHOLD,
};
use crate::intelligence::privacy::{check_for_secrets, redact_secrets};
use crate::intelligence::project::{
    default_global_db_path, detect_project_root, migrate_legacy_db, PROJECT_ROOT_ENV,
};
use crate::intelligence::review::{review_memories, IssueType, ReviewResult};
use crate::intelligence::score_importance;
use crate::search::{RelevanceEngine, RelevanceWeights};
use crate::storage::{EncryptedMemoryStore, MemoryBackend, MemoryStore};
use crate::types::{
    ConflictMode, FieldChange, Memory, MemoryFilter, MemoryId, MemoryPatch, MemoryScope,
    RecallOptions, RememberOptions, SessionSummary, UpdateRequest, META_CATEGORY,
    META_CONTRADICTS, META_DETECTED_SECRET_TYPES, META_HAS_SECRETS_WARNING, META_PINNED,
    META_REPLACED_MEMORY_ID,
};

/// Additive score bonus for memories sharing the caller's session id.
/// Large enough to break ties, small enough not to override a clear
/// semantic winner.
const SESSION_BOOST: f32 = 0.05;

/// Default number of writes between automatic compactions
pub const DEFAULT_COMPACT_INTERVAL: usize = 50;

const LIST_SCAN_LIMIT: usize = 100_000;
const EMBEDDED_CANDIDATE_LIMIT: usize = 10_000;

/// Configuration for [`MemoryMesh::open`].
#[derive(Debug)]
pub struct MeshConfig {
    /// Project store database file; absent means no project store
    pub project_path: Option<PathBuf>,
    /// Global store database file; defaults to `~/.memorymesh/global.db`
    pub global_path: Option<PathBuf>,
    /// Embedding provider selection
    pub embedding: EmbeddingSelector,
    /// Ranking weights; defaults honour the `MEMORYMESH_WEIGHT_*`
    /// environment variables
    pub relevance_weights: Option<RelevanceWeights>,
    /// Non-empty passphrase enables field-level encryption at rest
    pub encryption_key: Option<String>,
    /// Writes between automatic compactions; 0 disables
    pub compact_interval: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            project_path: None,
            global_path: None,
            embedding: EmbeddingSelector::default(),
            relevance_weights: None,
            encryption_key: None,
            compact_interval: DEFAULT_COMPACT_INTERVAL,
        }
    }
}

impl MeshConfig {
    /// Build a config with the project store placed inside the
    /// auto-detected project root. Returns the config together with the
    /// detection diagnostics.
    pub fn detected(roots: Option<&[String]>) -> (Self, Vec<String>) {
        let mut diagnostics = Vec::new();
        let root = detect_project_root(roots, Some(&mut diagnostics));
        let config = Self {
            project_path: root.map(|r| r.join(".memorymesh").join("project.db")),
            ..Self::default()
        };
        (config, diagnostics)
    }
}

/// The embeddable AI-memory engine.
pub struct MemoryMesh {
    project: Option<Box<dyn MemoryBackend>>,
    global: Box<dyn MemoryBackend>,
    embedder: Box<dyn Embedder>,
    engine: RelevanceEngine,
    compact_interval: usize,
    project_writes: AtomicUsize,
    global_writes: AtomicUsize,
    project_name: Option<String>,
}

impl MemoryMesh {
    /// Open the mesh: run the one-time legacy migration, open the global
    /// store (and the project store when configured), and build the
    /// embedding provider and relevance engine.
    pub fn open(config: MeshConfig) -> Result<Self> {
        if config.global_path.is_none() {
            // Only relevant when using the default global location.
            if let Err(e) = migrate_legacy_db() {
                warn!(error = %e, "Legacy database migration failed");
            }
        }

        let global_path = match config.global_path {
            Some(path) => path,
            None => default_global_db_path().ok_or_else(|| {
                MemoryMeshError::Config(
                    "Could not determine the home directory for the global store; \
                     set MeshConfig.global_path explicitly"
                        .to_string(),
                )
            })?,
        };

        let encryption_key = config
            .encryption_key
            .as_deref()
            .filter(|k| !k.is_empty());

        let global = open_store(&global_path, MemoryScope::Global, encryption_key)?;
        let project = match &config.project_path {
            Some(path) => Some(open_store(path, MemoryScope::Project, encryption_key)?),
            None => None,
        };

        let weights = config
            .relevance_weights
            .unwrap_or_else(RelevanceWeights::from_env);

        let project_name = detect_project_root(None, None)
            .and_then(|root| root.file_name().map(|n| n.to_string_lossy().into_owned()));

        let mesh = Self {
            project,
            global,
            embedder: create_embedder(config.embedding),
            engine: RelevanceEngine::with_weights(weights),
            compact_interval: config.compact_interval,
            project_writes: AtomicUsize::new(0),
            global_writes: AtomicUsize::new(0),
            project_name,
        };
        info!(
            global = %mesh.global.path().display(),
            project = ?mesh.project.as_ref().map(|s| s.path().display().to_string()),
            embedder = mesh.embedder.name(),
            "MemoryMesh initialised"
        );
        Ok(mesh)
    }

    fn store_for_scope(&self, scope: MemoryScope) -> Result<&dyn MemoryBackend> {
        match scope {
            MemoryScope::Global => Ok(self.global.as_ref()),
            MemoryScope::Project => self.project.as_deref().ok_or_else(|| {
                MemoryMeshError::Config(format!(
                    "No project store is configured. Set MeshConfig.project_path, export \
                     {}, or build the config with MeshConfig::detected()",
                    PROJECT_ROOT_ENV
                ))
            }),
        }
    }

    /// The stores selected by an optional scope; `None` means both.
    fn stores(&self, scope: Option<MemoryScope>) -> Result<Vec<&dyn MemoryBackend>> {
        match scope {
            Some(scope) => Ok(vec![self.store_for_scope(scope)?]),
            None => {
                let mut stores: Vec<&dyn MemoryBackend> = Vec::with_capacity(2);
                if let Some(project) = self.project.as_deref() {
                    stores.push(project);
                }
                stores.push(self.global.as_ref());
                Ok(stores)
            }
        }
    }

    /// Embed text, returning `None` on a noop provider, an empty vector,
    /// or a provider failure (which is logged, never propagated).
    fn safe_embed(&self, text: &str) -> Option<Vec<f32>> {
        if self.embedder.is_noop() {
            return None;
        }
        match self.embedder.embed(text) {
            Ok(vector) if !vector.is_empty() => Some(vector),
            Ok(_) => None,
            Err(e) => {
                warn!(
                    error = %e,
                    provider = self.embedder.name(),
                    "Embedding failed, falling back to keyword search"
                );
                None
            }
        }
    }

    /// Store a new memory, running the full write pipeline.
    ///
    /// Effect order: secret detection (and opt-in redaction), category
    /// resolution and scope routing, importance assignment, contradiction
    /// handling, embedding, save, auto-compaction trigger. Returns the
    /// new memory's id, or an empty string when a `Skip` conflict
    /// suppressed the write.
    pub fn remember(&self, text: &str, opts: RememberOptions) -> Result<MemoryId> {
        if text.is_empty() {
            return Err(MemoryMeshError::InvalidInput(
                "Memory text must not be empty".to_string(),
            ));
        }

        // 1. Privacy guard.
        let detected = check_for_secrets(text);
        let stored_text = if opts.redact_secrets && !detected.is_empty() {
            redact_secrets(text)
        } else {
            text.to_string()
        };
        let mut metadata = opts.metadata.unwrap_or_default();
        if !detected.is_empty() {
            metadata.insert(
                META_HAS_SECRETS_WARNING.to_string(),
                serde_json::Value::Bool(true),
            );
            metadata.insert(
                META_DETECTED_SECRET_TYPES.to_string(),
                serde_json::json!(detected),
            );
        }

        // 2. Category resolution drives scope.
        let category = match &opts.category {
            Some(name) => Some(validate_category(name)?),
            None if opts.auto_categorize => Some(auto_categorize(&stored_text, Some(&metadata))),
            None => None,
        };
        let scope = match category {
            Some(category) => {
                metadata.insert(
                    META_CATEGORY.to_string(),
                    serde_json::Value::String(category.as_str().to_string()),
                );
                category.scope()
            }
            None => match opts.scope {
                Some(scope) => scope,
                None => infer_scope(&stored_text, self.project_name.as_deref()).unwrap_or({
                    if self.project.is_some() {
                        MemoryScope::Project
                    } else {
                        MemoryScope::Global
                    }
                }),
            },
        };
        let store = self.store_for_scope(scope)?;

        // 3. Importance.
        let (importance, decay_rate) = if opts.pin {
            metadata.insert(META_PINNED.to_string(), serde_json::Value::Bool(true));
            (1.0, 0.0)
        } else {
            let importance = match opts.importance {
                Some(explicit) => explicit,
                None if opts.auto_importance => score_importance(&stored_text, Some(&metadata)),
                None => 0.5,
            };
            (importance, opts.decay_rate.unwrap_or(0.01))
        };

        // 4. Contradiction handling (embedding computed once, reused for
        // the save below).
        let embedding = self.safe_embed(&stored_text);
        let contradictions = find_contradictions(
            &stored_text,
            embedding.as_deref(),
            store,
            DEFAULT_THRESHOLD,
            DEFAULT_MAX_CANDIDATES,
        )?;

        match opts.on_conflict {
            ConflictMode::Skip if !contradictions.is_empty() => {
                debug!(
                    conflicts = contradictions.len(),
                    "Skipping write due to contradictions"
                );
                return Ok(String::new());
            }
            ConflictMode::Update if !contradictions.is_empty() => {
                let (replaced, similarity) = &contradictions[0];
                store.delete(&replaced.id)?;
                metadata.insert(
                    META_REPLACED_MEMORY_ID.to_string(),
                    serde_json::Value::String(replaced.id.clone()),
                );
                debug!(
                    replaced = %replaced.id,
                    similarity = *similarity,
                    "Replacing contradicting memory"
                );
            }
            ConflictMode::KeepBoth if !contradictions.is_empty() => {
                let ids: Vec<&str> = contradictions.iter().map(|(m, _)| m.id.as_str()).collect();
                metadata.insert(META_CONTRADICTS.to_string(), serde_json::json!(ids));
            }
            _ => {}
        }

        // 5. Build and save.
        let mut memory = Memory::new(stored_text)?;
        memory.metadata = metadata;
        memory.embedding = embedding;
        memory.importance = importance;
        memory.decay_rate = decay_rate;
        memory.session_id = opts.session_id;
        memory.scope = scope;
        memory.normalize();
        store.save(&memory)?;
        debug!(id = %memory.id, scope = %scope, chars = memory.text.len(), "Remembered memory");

        // 6. Auto-compaction trigger.
        self.note_write(scope);

        Ok(memory.id)
    }

    fn note_write(&self, scope: MemoryScope) {
        if self.compact_interval == 0 {
            return;
        }
        let counter = match scope {
            MemoryScope::Project => &self.project_writes,
            MemoryScope::Global => &self.global_writes,
        };
        let writes = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if writes >= self.compact_interval {
            counter.store(0, Ordering::SeqCst);
            match self.store_for_scope(scope) {
                Ok(store) => {
                    if let Err(e) = compact_store(store, DEFAULT_TEXT_THRESHOLD, false) {
                        warn!(error = %e, scope = %scope, "Auto-compaction failed");
                    }
                }
                Err(e) => warn!(error = %e, scope = %scope, "Auto-compaction skipped"),
            }
        }
    }

    /// Recall the most relevant memories for a query.
    pub fn recall(&self, query: &str, opts: RecallOptions) -> Result<Vec<Memory>> {
        let query_embedding = self.safe_embed(query);
        let stores = self.stores(opts.scope)?;

        let filter = MemoryFilter {
            category: opts.category.clone(),
            min_importance: opts.min_importance,
            time_range: opts.time_range,
            metadata_filter: opts.metadata_filter.clone(),
            limit: EMBEDDED_CANDIDATE_LIMIT,
        };

        let mut candidates: Vec<Memory> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut push_unique = |mems: Vec<Memory>, candidates: &mut Vec<Memory>| {
            for mem in mems {
                if seen.insert(mem.id.clone()) {
                    candidates.push(mem);
                }
            }
        };

        for store in &stores {
            if !filter.is_unfiltered() {
                // Filtered fetch already covers rows with and without
                // embeddings, so no keyword supplement is needed.
                push_unique(store.search_filtered(&filter)?, &mut candidates);
            } else if query_embedding.is_none() {
                push_unique(store.search_by_text(query, opts.k * 4)?, &mut candidates);
            } else {
                push_unique(
                    store.candidates_with_embeddings(EMBEDDED_CANDIDATE_LIMIT, None, None)?,
                    &mut candidates,
                );
                // Supplementary keyword pass so exact hits without
                // embeddings are not missed.
                push_unique(store.search_by_text(query, opts.k * 2)?, &mut candidates);
            }
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        self.engine.apply_decay(&mut candidates, now);
        let mut scored = self.engine.rank_scored(
            candidates,
            query_embedding.as_deref(),
            opts.min_relevance,
            now,
        );

        if let Some(session_id) = &opts.session_id {
            for (score, memory) in scored.iter_mut() {
                if memory.session_id.as_deref() == Some(session_id.as_str()) {
                    *score += SESSION_BOOST;
                }
            }
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.1.updated_at.cmp(&a.1.updated_at))
            });
        }

        let mut results: Vec<Memory> = scored
            .into_iter()
            .take(opts.k)
            .map(|(_, memory)| memory)
            .collect();

        for memory in results.iter_mut() {
            if let Ok(store) = self.store_for_scope(memory.scope) {
                store.update_access(&memory.id)?;
            }
            memory.access_count += 1;
        }

        debug!(query_chars = query.len(), results = results.len(), "Recall complete");
        Ok(results)
    }

    /// Delete a memory wherever it lives. Returns whether it was found.
    pub fn forget(&self, id: &str) -> Result<bool> {
        for store in self.stores(None)? {
            if store.delete(id)? {
                debug!(%id, scope = %store.scope(), "Forgot memory");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Delete every memory in the selected scope(s), returning the count.
    pub fn forget_all(&self, scope: Option<MemoryScope>) -> Result<i64> {
        let mut total = 0;
        for store in self.stores(scope)? {
            total += store.clear()?;
        }
        info!(deleted = total, "Forgot memories");
        Ok(total)
    }

    /// Retrieve a memory by id from whichever store holds it.
    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        for store in self.stores(None)? {
            if let Some(memory) = store.get(id)? {
                return Ok(Some(memory));
            }
        }
        Ok(None)
    }

    /// Update fields of an existing memory. Providing a different scope
    /// migrates the memory across stores, keeping its id. A changed text
    /// triggers re-embedding.
    pub fn update(&self, id: &str, req: UpdateRequest) -> Result<Option<Memory>> {
        if req.text.as_deref() == Some("") {
            return Err(MemoryMeshError::InvalidInput(
                "Memory text must not be empty".to_string(),
            ));
        }

        let Some(current) = self.get(id)? else {
            return Ok(None);
        };
        let target_scope = req.scope.unwrap_or(current.scope);
        let text_changed = req.text.as_deref().is_some_and(|t| t != current.text);
        let new_embedding = if text_changed {
            self.safe_embed(req.text.as_deref().unwrap_or_default())
        } else {
            None
        };

        if target_scope != current.scope {
            let source = self.store_for_scope(current.scope)?;
            let dest = self.store_for_scope(target_scope)?;

            let mut migrated = current;
            if let Some(text) = req.text {
                migrated.text = text;
            }
            if let Some(importance) = req.importance {
                migrated.importance = importance;
            }
            if let Some(decay_rate) = req.decay_rate {
                migrated.decay_rate = decay_rate;
            }
            if let Some(metadata) = req.metadata {
                migrated.metadata = metadata;
            }
            if text_changed {
                migrated.embedding = new_embedding;
            }
            migrated.scope = target_scope;
            migrated.updated_at = Utc::now();
            migrated.normalize();

            source.delete(id)?;
            dest.save(&migrated)?;
            debug!(%id, from = %source.scope(), to = %target_scope, "Migrated memory across stores");
            return Ok(Some(migrated));
        }

        let store = self.store_for_scope(current.scope)?;
        let mut patch = MemoryPatch {
            text: req.text.into(),
            importance: req.importance.into(),
            decay_rate: req.decay_rate.into(),
            metadata: req.metadata.into(),
            ..Default::default()
        };
        if text_changed {
            patch.embedding = FieldChange::Set(new_embedding);
        }
        if !store.update_fields(id, &patch)? {
            return Ok(None);
        }
        store.get(id)
    }

    /// Number of memories in the selected scope(s).
    pub fn count(&self, scope: Option<MemoryScope>) -> Result<i64> {
        let mut total = 0;
        for store in self.stores(scope)? {
            total += store.count()?;
        }
        Ok(total)
    }

    /// List memories, most recently updated first; merged listings
    /// interleave both stores by `updated_at`.
    pub fn list(
        &self,
        limit: usize,
        offset: usize,
        scope: Option<MemoryScope>,
    ) -> Result<Vec<Memory>> {
        let mut all = Vec::new();
        for store in self.stores(scope)? {
            all.extend(store.list_all(limit + offset, 0)?);
        }
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    /// Oldest and newest creation timestamps across the selected
    /// scope(s).
    pub fn get_time_range(
        &self,
        scope: Option<MemoryScope>,
    ) -> Result<Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)>> {
        let mut merged: Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> = None;
        for store in self.stores(scope)? {
            if let Some((oldest, newest)) = store.time_range()? {
                merged = Some(match merged {
                    Some((lo, hi)) => (lo.min(oldest), hi.max(newest)),
                    None => (oldest, newest),
                });
            }
        }
        Ok(merged)
    }

    /// All memories in a session, oldest first.
    pub fn get_session(
        &self,
        session_id: &str,
        scope: Option<MemoryScope>,
    ) -> Result<Vec<Memory>> {
        let mut all = Vec::new();
        for store in self.stores(scope)? {
            all.extend(store.get_by_session(session_id, LIST_SCAN_LIMIT)?);
        }
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    /// Distinct sessions with counts and first/last timestamps; entries
    /// for the same session in both stores are combined.
    pub fn list_sessions(&self, scope: Option<MemoryScope>) -> Result<Vec<SessionSummary>> {
        let mut by_id: std::collections::HashMap<String, SessionSummary> =
            std::collections::HashMap::new();
        for store in self.stores(scope)? {
            for summary in store.list_sessions(LIST_SCAN_LIMIT)? {
                by_id
                    .entry(summary.session_id.clone())
                    .and_modify(|existing| {
                        existing.count += summary.count;
                        existing.first_at = existing.first_at.min(summary.first_at);
                        existing.last_at = existing.last_at.max(summary.last_at);
                    })
                    .or_insert(summary);
            }
        }
        let mut sessions: Vec<SessionSummary> = by_id.into_values().collect();
        sessions.sort_by(|a, b| b.last_at.cmp(&a.last_at));
        Ok(sessions)
    }

    /// Merge near-duplicate memories in one scope.
    pub fn compact(
        &self,
        scope: MemoryScope,
        threshold: Option<f32>,
        dry_run: bool,
    ) -> Result<CompactionResult> {
        let store = self.store_for_scope(scope)?;
        compact_store(store, threshold.unwrap_or(DEFAULT_TEXT_THRESHOLD), dry_run)
    }

    /// Audit memories for quality issues.
    pub fn review(
        &self,
        scope: Option<MemoryScope>,
        detectors: Option<&[IssueType]>,
        project_name: Option<&str>,
    ) -> Result<ReviewResult> {
        let memories = self.list(LIST_SCAN_LIMIT, 0, scope)?;
        let name = project_name.or(self.project_name.as_deref());
        Ok(review_memories(&memories, scope, detectors, name))
    }

    /// Pick representative memories for export, ranked with a recency
    /// emphasis (or the caller's weights).
    pub fn smart_sync(
        &self,
        top_n: usize,
        scope: Option<MemoryScope>,
        weights: Option<RelevanceWeights>,
    ) -> Result<Vec<Memory>> {
        let candidates = self.list(LIST_SCAN_LIMIT, 0, scope)?;
        let weights = weights.unwrap_or(RelevanceWeights {
            semantic: 0.0,
            recency: 0.5,
            importance: 0.3,
            frequency: 0.2,
        });
        let engine = RelevanceEngine::with_weights(weights);
        Ok(engine.rank(candidates, None, top_n, 0.0, Utc::now()))
    }

    /// Schema version of a store.
    pub fn schema_version(&self, scope: MemoryScope) -> Result<i32> {
        Ok(self.store_for_scope(scope)?.schema_version())
    }

    /// Whether a project store is configured.
    pub fn has_project_store(&self) -> bool {
        self.project.is_some()
    }

    /// Close all per-thread database connections.
    pub fn close(&self) {
        if let Some(project) = self.project.as_deref() {
            project.close();
        }
        self.global.close();
    }
}

fn open_store(
    path: &std::path::Path,
    scope: MemoryScope,
    encryption_key: Option<&str>,
) -> Result<Box<dyn MemoryBackend>> {
    let store = MemoryStore::open(path, scope)?;
    match encryption_key {
        Some(key) => Ok(Box::new(EncryptedMemoryStore::new(store, key)?)),
        None => Ok(Box::new(store)),
    }
}
