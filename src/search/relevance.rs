//! Relevance scoring and time-based decay
//!
//! Combines semantic similarity, recency, importance, and access
//! frequency into a single score that determines which memories surface
//! during recall.

use chrono::{DateTime, Utc};

use crate::embedding::cosine_similarity;
use crate::types::Memory;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Weights controlling how each signal contributes to the final score.
///
/// Weights must be non-negative but need not sum to 1; the engine
/// normalizes by the total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelevanceWeights {
    /// Cosine similarity between query and memory embeddings
    pub semantic: f32,
    /// How recently the memory was updated
    pub recency: f32,
    /// The memory's stored importance
    pub importance: f32,
    /// How often the memory has been accessed
    pub frequency: f32,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            recency: 0.2,
            importance: 0.2,
            frequency: 0.1,
        }
    }
}

impl RelevanceWeights {
    pub fn total(&self) -> f32 {
        self.semantic + self.recency + self.importance + self.frequency
    }

    /// Build weights from `MEMORYMESH_WEIGHT_{SEMANTIC,RECENCY,IMPORTANCE,
    /// FREQUENCY}`, falling back per-field to the defaults. Unparseable
    /// or negative values fall back too.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            semantic: env_weight("MEMORYMESH_WEIGHT_SEMANTIC", defaults.semantic),
            recency: env_weight("MEMORYMESH_WEIGHT_RECENCY", defaults.recency),
            importance: env_weight("MEMORYMESH_WEIGHT_IMPORTANCE", defaults.importance),
            frequency: env_weight("MEMORYMESH_WEIGHT_FREQUENCY", defaults.frequency),
        }
    }
}

fn env_weight(name: &str, fallback: f32) -> f32 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<f32>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(fallback)
}

/// Scores, ranks, and decays memories.
#[derive(Debug, Clone)]
pub struct RelevanceEngine {
    weights: RelevanceWeights,
    /// Days after which the recency signal bottoms out
    max_recency_days: f32,
    /// Access count at which the frequency signal saturates
    max_access_count: i64,
}

impl Default for RelevanceEngine {
    fn default() -> Self {
        Self::new(RelevanceWeights::default(), 30.0, 100)
    }
}

impl RelevanceEngine {
    pub fn new(weights: RelevanceWeights, max_recency_days: f32, max_access_count: i64) -> Self {
        Self {
            weights,
            max_recency_days: max_recency_days.max(1.0),
            max_access_count: max_access_count.max(1),
        }
    }

    pub fn with_weights(weights: RelevanceWeights) -> Self {
        Self::new(weights, 30.0, 100)
    }

    pub fn weights(&self) -> RelevanceWeights {
        self.weights
    }

    fn days_since(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let delta = (now - updated_at).num_milliseconds() as f64 / 1000.0;
        (delta / SECONDS_PER_DAY).max(0.0)
    }

    /// Composite relevance score for one memory.
    ///
    /// The semantic term is the cosine similarity shifted from `[-1, 1]`
    /// into `[0, 1]`, and contributes 0 when either embedding is missing
    /// or the lengths differ. Returns 0 when the configured weights sum
    /// to 0.
    pub fn score(
        &self,
        memory: &Memory,
        query_embedding: Option<&[f32]>,
        now: DateTime<Utc>,
    ) -> f32 {
        let w = self.weights;
        let total = w.total();
        if total == 0.0 {
            return 0.0;
        }

        let sem_score = match (query_embedding, memory.embedding.as_deref()) {
            (Some(q), Some(e)) if !q.is_empty() && q.len() == e.len() => {
                (cosine_similarity(q, e) + 1.0) / 2.0
            }
            _ => 0.0,
        };

        let days = Self::days_since(memory.updated_at, now);
        let recency_score = (-days / self.max_recency_days as f64).exp() as f32;

        let importance_score = memory.importance;

        let freq_score = (memory.access_count as f32 / self.max_access_count as f32).min(1.0);

        (w.semantic * sem_score
            + w.recency * recency_score
            + w.importance * importance_score
            + w.frequency * freq_score)
            / total
    }

    /// Apply time-based importance decay in place:
    /// `importance *= exp(-decay_rate * days_since_update)`, clamped to
    /// `[0, 1]`. Memories with `decay_rate == 0` are unaffected.
    pub fn apply_decay(&self, memories: &mut [Memory], now: DateTime<Utc>) {
        for memory in memories.iter_mut() {
            let days = Self::days_since(memory.updated_at, now);
            if memory.decay_rate > 0.0 && days > 0.0 {
                let factor = (-(memory.decay_rate as f64) * days).exp() as f32;
                memory.importance = (memory.importance * factor).clamp(0.0, 1.0);
            }
        }
    }

    /// Score every candidate, discard those below `min_relevance`, and
    /// return `(score, memory)` pairs sorted by descending score with
    /// `updated_at` as the tie-breaker.
    pub fn rank_scored(
        &self,
        memories: Vec<Memory>,
        query_embedding: Option<&[f32]>,
        min_relevance: f32,
        now: DateTime<Utc>,
    ) -> Vec<(f32, Memory)> {
        let mut scored: Vec<(f32, Memory)> = memories
            .into_iter()
            .filter_map(|memory| {
                let s = self.score(&memory, query_embedding, now);
                (s >= min_relevance).then_some((s, memory))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.updated_at.cmp(&a.1.updated_at))
        });
        scored
    }

    /// The top-k most relevant memories.
    pub fn rank(
        &self,
        memories: Vec<Memory>,
        query_embedding: Option<&[f32]>,
        k: usize,
        min_relevance: f32,
        now: DateTime<Utc>,
    ) -> Vec<Memory> {
        self.rank_scored(memories, query_embedding, min_relevance, now)
            .into_iter()
            .take(k)
            .map(|(_, memory)| memory)
            .collect()
    }
}
