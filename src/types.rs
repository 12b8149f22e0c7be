//! Core types for MemoryMesh

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a memory (32 lowercase hex chars)
pub type MemoryId = String;

/// Arbitrary key-value metadata attached to a memory
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Reserved metadata key: category name
pub const META_CATEGORY: &str = "category";
/// Reserved metadata key: pinned flag
pub const META_PINNED: &str = "pinned";
/// Reserved metadata key: ids of contradicting memories
pub const META_CONTRADICTS: &str = "contradicts";
/// Reserved metadata key: secrets were detected in the text
pub const META_HAS_SECRETS_WARNING: &str = "has_secrets_warning";
/// Reserved metadata key: which secret types were detected
pub const META_DETECTED_SECRET_TYPES: &str = "detected_secret_types";
/// Reserved metadata key: id of the memory this one replaced
pub const META_REPLACED_MEMORY_ID: &str = "replaced_memory_id";
/// Reserved metadata key: ciphertext envelope for encrypted metadata
pub const META_ENCRYPTED: &str = "_encrypted";

fn new_memory_id() -> MemoryId {
    uuid::Uuid::new_v4().simple().to_string()
}

fn default_importance() -> f32 {
    0.5
}

fn default_decay_rate() -> f32 {
    0.01
}

/// A single unit of memory stored in MemoryMesh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier (hex UUID)
    pub id: MemoryId,
    /// The textual content of the memory
    pub text: String,
    /// Arbitrary key-value metadata
    #[serde(default)]
    pub metadata: Metadata,
    /// Vector embedding of the text, or `None` if not yet computed
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// When the memory was first stored (UTC)
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent update (UTC)
    pub updated_at: DateTime<Utc>,
    /// Number of times this memory has been recalled
    #[serde(default)]
    pub access_count: i64,
    /// Importance score in `[0, 1]`
    #[serde(default = "default_importance")]
    pub importance: f32,
    /// Rate at which importance decays over time; `0` disables decay
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f32,
    /// Groups memories created in the same conversational session
    #[serde(default)]
    pub session_id: Option<String>,
    /// Which store persists this memory
    #[serde(default)]
    pub scope: MemoryScope,
}

impl Memory {
    /// Create a new memory with a fresh id and current timestamps.
    ///
    /// Importance is clamped to `[0, 1]` and decay_rate to `>= 0` by
    /// [`Memory::normalize`], which is also applied when rows are read
    /// back from disk.
    pub fn new(text: impl Into<String>) -> crate::Result<Self> {
        let text = text.into();
        if text.is_empty() {
            return Err(crate::MemoryMeshError::InvalidInput(
                "Memory text must not be empty".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: new_memory_id(),
            text,
            metadata: Metadata::new(),
            embedding: None,
            created_at: now,
            updated_at: now,
            access_count: 0,
            importance: 0.5,
            decay_rate: 0.01,
            session_id: None,
            scope: MemoryScope::default(),
        })
    }

    /// Clamp importance to `[0, 1]` and decay_rate to `>= 0`.
    pub fn normalize(&mut self) {
        self.importance = self.importance.clamp(0.0, 1.0);
        self.decay_rate = self.decay_rate.max(0.0);
    }

    /// Whether this memory is pinned (maximum importance, no decay).
    pub fn is_pinned(&self) -> bool {
        self.metadata
            .get(META_PINNED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// The category name stored in metadata, if any.
    pub fn category(&self) -> Option<&str> {
        self.metadata.get(META_CATEGORY).and_then(|v| v.as_str())
    }
}

/// Which store a memory lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    /// Per-workspace store
    #[default]
    Project,
    /// Per-user store, shared across projects
    Global,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScope::Project => "project",
            MemoryScope::Global => "global",
        }
    }
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "project" => Ok(MemoryScope::Project),
            "global" => Ok(MemoryScope::Global),
            _ => Err(format!("Unknown scope: {} (expected 'project' or 'global')", s)),
        }
    }
}

/// How to handle detected contradictions when storing a new memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictMode {
    /// Store the new memory alongside existing ones, flagging the
    /// contradiction ids in metadata
    #[default]
    KeepBoth,
    /// Replace the most similar existing memory with the new text
    Update,
    /// Do not store the new memory if a contradiction is found
    Skip,
}

impl ConflictMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictMode::KeepBoth => "keep_both",
            ConflictMode::Update => "update",
            ConflictMode::Skip => "skip",
        }
    }

    /// Parse a mode name; unknown names fall back to `KeepBoth`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "update" => ConflictMode::Update,
            "skip" => ConflictMode::Skip,
            _ => ConflictMode::KeepBoth,
        }
    }
}

/// Summary statistics for one conversational session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub count: i64,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
}

/// A partial-update sentinel distinguishing "keep the stored value" from
/// "set a new value" (including setting an optional field to `None`).
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FieldChange<T> {
    #[default]
    Keep,
    Set(T),
}

impl<T> FieldChange<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, FieldChange::Set(_))
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            FieldChange::Keep => None,
            FieldChange::Set(v) => Some(v),
        }
    }
}

impl<T> From<Option<T>> for FieldChange<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => FieldChange::Set(v),
            None => FieldChange::Keep,
        }
    }
}

/// Partial update applied by `update_fields`; `updated_at` is always
/// refreshed regardless of which fields change.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub text: FieldChange<String>,
    pub importance: FieldChange<f32>,
    pub decay_rate: FieldChange<f32>,
    pub metadata: FieldChange<Metadata>,
    /// `Set(None)` clears a stored embedding
    pub embedding: FieldChange<Option<Vec<f32>>>,
    /// `Set(None)` detaches the memory from its session
    pub session_id: FieldChange<Option<String>>,
}

impl MemoryPatch {
    pub fn is_empty(&self) -> bool {
        !(self.text.is_set()
            || self.importance.is_set()
            || self.decay_rate.is_set()
            || self.metadata.is_set()
            || self.embedding.is_set()
            || self.session_id.is_set())
    }
}

/// SQL-level filters composable by `search_filtered`
#[derive(Debug, Clone)]
pub struct MemoryFilter {
    /// Match `metadata.category` exactly
    pub category: Option<String>,
    /// Minimum importance threshold
    pub min_importance: Option<f32>,
    /// Inclusive `created_at` range
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Equality filters over metadata keys; keys must match
    /// `^[A-Za-z_][A-Za-z0-9_]*$`
    pub metadata_filter: Option<Metadata>,
    /// Maximum rows returned
    pub limit: usize,
}

impl Default for MemoryFilter {
    fn default() -> Self {
        Self {
            category: None,
            min_importance: None,
            time_range: None,
            metadata_filter: None,
            limit: 10_000,
        }
    }
}

impl MemoryFilter {
    pub fn is_unfiltered(&self) -> bool {
        self.category.is_none()
            && self.min_importance.is_none()
            && self.time_range.is_none()
            && self.metadata_filter.is_none()
    }
}

/// Options for [`crate::MemoryMesh::remember`]
#[derive(Debug, Clone, Default)]
pub struct RememberOptions {
    /// Explicit category; must be one of the recognised names
    pub category: Option<String>,
    /// Explicit importance in `[0, 1]`; overrides auto-importance
    pub importance: Option<f32>,
    pub decay_rate: Option<f32>,
    /// Caller-requested scope; category routing overrides this
    pub scope: Option<MemoryScope>,
    pub metadata: Option<Metadata>,
    /// Derive importance from text heuristics when no explicit value given
    pub auto_importance: bool,
    /// Derive a category from text heuristics when none given
    pub auto_categorize: bool,
    /// Force importance 1.0 and decay 0.0, marking `metadata.pinned`
    pub pin: bool,
    /// Replace detected secrets with `[REDACTED]` in the stored text
    pub redact_secrets: bool,
    pub on_conflict: ConflictMode,
    pub session_id: Option<String>,
}

/// Options for [`crate::MemoryMesh::recall`]
#[derive(Debug, Clone)]
pub struct RecallOptions {
    /// Maximum number of results
    pub k: usize,
    /// Restrict to one store; `None` queries both
    pub scope: Option<MemoryScope>,
    pub category: Option<String>,
    pub min_importance: Option<f32>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub metadata_filter: Option<Metadata>,
    /// Memories sharing this session id get a small score boost
    pub session_id: Option<String>,
    /// Discard results scoring below this threshold
    pub min_relevance: f32,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            k: 5,
            scope: None,
            category: None,
            min_importance: None,
            time_range: None,
            metadata_filter: None,
            session_id: None,
            min_relevance: 0.0,
        }
    }
}

/// Field updates accepted by [`crate::MemoryMesh::update`]
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub text: Option<String>,
    pub importance: Option<f32>,
    pub decay_rate: Option<f32>,
    pub metadata: Option<Metadata>,
    /// Moving to a different scope migrates the row across stores
    pub scope: Option<MemoryScope>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_memory_has_32_hex_id() {
        let mem = Memory::new("hello").unwrap();
        assert_eq!(mem.id.len(), 32);
        assert!(mem.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_text_rejected() {
        assert!(Memory::new("").is_err());
    }

    #[test]
    fn normalize_clamps() {
        let mut mem = Memory::new("x").unwrap();
        mem.importance = 3.0;
        mem.decay_rate = -1.0;
        mem.normalize();
        assert_eq!(mem.importance, 1.0);
        assert_eq!(mem.decay_rate, 0.0);
    }

    #[test]
    fn scope_roundtrip() {
        for scope in [MemoryScope::Project, MemoryScope::Global] {
            let parsed: MemoryScope = scope.as_str().parse().unwrap();
            assert_eq!(scope, parsed);
        }
        assert!("workspace".parse::<MemoryScope>().is_err());
    }

    #[test]
    fn conflict_mode_lenient_fallback() {
        assert_eq!(ConflictMode::parse_lenient("update"), ConflictMode::Update);
        assert_eq!(ConflictMode::parse_lenient("skip"), ConflictMode::Skip);
        assert_eq!(ConflictMode::parse_lenient("???"), ConflictMode::KeepBoth);
    }

    #[test]
    fn memory_json_roundtrip() {
        let mut mem = Memory::new("remember me").unwrap();
        mem.embedding = Some(vec![0.1, 0.2, 0.3]);
        mem.metadata
            .insert("category".to_string(), serde_json::json!("decision"));
        let json = serde_json::to_string(&mem).unwrap();
        let back: Memory = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, mem.id);
        assert_eq!(back.text, mem.text);
        assert_eq!(back.embedding, mem.embedding);
        assert_eq!(back.metadata, mem.metadata);
    }
}
