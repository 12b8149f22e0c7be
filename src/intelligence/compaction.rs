//! Memory compaction and deduplication
//!
//! Detects redundant memories and merges them to keep a store lean. Two
//! passes: text similarity (containment + word-set Jaccard) and, for
//! memories left unpaired, embedding cosine similarity. All similarity
//! math is pure code.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::storage::MemoryBackend;
use crate::types::Memory;

/// Default minimum text similarity for a merge
pub const DEFAULT_TEXT_THRESHOLD: f32 = 0.85;
/// Cosine threshold for the embedding pass
const EMBEDDING_THRESHOLD: f32 = 0.9;
/// Above this Jaccard similarity the secondary text adds nothing and is
/// dropped instead of appended
const APPEND_THRESHOLD: f32 = 0.95;

const SCAN_LIMIT: usize = 100_000;

/// One merge performed (or planned) by the compactor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDetail {
    pub primary_id: String,
    pub secondary_id: String,
    pub similarity: f32,
    pub merged_text_preview: String,
}

/// Result of a compaction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionResult {
    /// Number of merge operations performed
    pub merged_count: usize,
    /// Ids of deleted (secondary) memories
    pub deleted_ids: Vec<String>,
    /// Ids of kept (primary) memories, now holding merged content
    pub kept_ids: Vec<String>,
    /// Per-merge descriptions
    pub details: Vec<MergeDetail>,
}

fn word_set(text: &str) -> std::collections::HashSet<String> {
    text.to_lowercase().split_whitespace().map(String::from).collect()
}

/// Word-set Jaccard similarity in `[0, 1]`; 0 when both texts are empty.
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let set_a = word_set(a);
    let set_b = word_set(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Text similarity with a containment check: if one stripped lowercase
/// text contains the other they are effectively duplicates (1.0),
/// otherwise word-set Jaccard.
pub fn text_similarity(a: &str, b: &str) -> f32 {
    let a_lower = a.to_lowercase();
    let a_lower = a_lower.trim();
    let b_lower = b.to_lowercase();
    let b_lower = b_lower.trim();
    if a_lower.contains(b_lower) || b_lower.contains(a_lower) {
        return 1.0;
    }
    jaccard_similarity(a, b)
}

/// Prefer higher importance; ties keep the older memory as primary.
fn pick_primary(a: &Memory, b: &Memory) -> (Memory, Memory) {
    if a.importance > b.importance {
        return (a.clone(), b.clone());
    }
    if b.importance > a.importance {
        return (b.clone(), a.clone());
    }
    if a.created_at <= b.created_at {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Pairs of memories whose text similarity meets `threshold`. A memory
/// already chosen as a secondary cannot be paired again.
pub fn find_duplicates(memories: &[Memory], threshold: f32) -> Vec<(Memory, Memory)> {
    let mut pairs = Vec::new();
    let mut seen_secondary: std::collections::HashSet<String> = std::collections::HashSet::new();

    for i in 0..memories.len() {
        if seen_secondary.contains(&memories[i].id) {
            continue;
        }
        for j in (i + 1)..memories.len() {
            if seen_secondary.contains(&memories[j].id) {
                continue;
            }
            let sim = text_similarity(&memories[i].text, &memories[j].text);
            if sim >= threshold {
                let (primary, secondary) = pick_primary(&memories[i], &memories[j]);
                seen_secondary.insert(secondary.id.clone());
                pairs.push((primary, secondary));
            }
        }
    }
    pairs
}

/// Pairs of embedded memories whose cosine similarity meets `threshold`.
pub fn find_near_duplicates(memories: &[Memory], threshold: f32) -> Vec<(Memory, Memory)> {
    let embedded: Vec<&Memory> = memories
        .iter()
        .filter(|m| m.embedding.as_ref().is_some_and(|e| !e.is_empty()))
        .collect();

    let mut pairs = Vec::new();
    let mut seen_secondary: std::collections::HashSet<String> = std::collections::HashSet::new();

    for i in 0..embedded.len() {
        if seen_secondary.contains(&embedded[i].id) {
            continue;
        }
        for j in (i + 1)..embedded.len() {
            if seen_secondary.contains(&embedded[j].id) {
                continue;
            }
            let sim = cosine_similarity(
                embedded[i].embedding.as_deref().unwrap_or_default(),
                embedded[j].embedding.as_deref().unwrap_or_default(),
            );
            if sim >= threshold {
                let (primary, secondary) = pick_primary(embedded[i], embedded[j]);
                seen_secondary.insert(secondary.id.clone());
                pairs.push((primary, secondary));
            }
        }
    }
    pairs
}

/// Merge two memories, keeping the best attributes of each.
///
/// The primary's id, text trunk, and embedding are kept; the secondary's
/// text is appended after a `---` separator unless the texts are
/// near-identical. Metadata merges with the primary overwriting on key
/// conflicts; counters and timestamps take the sum / max / min / older /
/// newer respectively.
pub fn merge_memories(primary: &Memory, secondary: &Memory) -> Memory {
    let sim = jaccard_similarity(&primary.text, &secondary.text);
    let merged_text = if sim < APPEND_THRESHOLD {
        format!(
            "{}\n---\n{}",
            primary.text.trim_end(),
            secondary.text.trim_start()
        )
    } else {
        primary.text.clone()
    };

    let mut merged_metadata = secondary.metadata.clone();
    for (key, value) in &primary.metadata {
        merged_metadata.insert(key.clone(), value.clone());
    }

    Memory {
        id: primary.id.clone(),
        text: merged_text,
        metadata: merged_metadata,
        embedding: primary.embedding.clone(),
        created_at: primary.created_at.min(secondary.created_at),
        updated_at: primary.updated_at.max(secondary.updated_at),
        access_count: primary.access_count + secondary.access_count,
        importance: primary.importance.max(secondary.importance),
        decay_rate: primary.decay_rate.min(secondary.decay_rate),
        session_id: primary.session_id.clone(),
        scope: primary.scope,
    }
}

/// Compact one store: find duplicate pairs, merge each into its primary,
/// and delete the secondary. `dry_run` computes the plan without
/// writing.
pub fn compact_store(
    store: &dyn MemoryBackend,
    threshold: f32,
    dry_run: bool,
) -> Result<CompactionResult> {
    let memories = store.list_all(SCAN_LIMIT, 0)?;
    if memories.len() < 2 {
        return Ok(CompactionResult::default());
    }

    let mut pairs = find_duplicates(&memories, threshold);

    let mut already_paired: std::collections::HashSet<String> = std::collections::HashSet::new();
    for (primary, secondary) in &pairs {
        already_paired.insert(primary.id.clone());
        already_paired.insert(secondary.id.clone());
    }
    let unpaired: Vec<Memory> = memories
        .iter()
        .filter(|m| !already_paired.contains(&m.id))
        .cloned()
        .collect();
    if unpaired.len() >= 2 {
        pairs.extend(find_near_duplicates(&unpaired, EMBEDDING_THRESHOLD));
    }

    if pairs.is_empty() {
        return Ok(CompactionResult::default());
    }

    let mut result = CompactionResult::default();
    for (primary, secondary) in pairs {
        let merged = merge_memories(&primary, &secondary);
        result.details.push(MergeDetail {
            primary_id: primary.id.clone(),
            secondary_id: secondary.id.clone(),
            similarity: text_similarity(&primary.text, &secondary.text),
            merged_text_preview: merged.text.chars().take(100).collect(),
        });

        if !dry_run {
            store.save(&merged)?;
            store.delete(&secondary.id)?;
        }

        result.merged_count += 1;
        result.deleted_ids.push(secondary.id);
        result.kept_ids.push(primary.id);
    }

    info!(
        merged = result.merged_count,
        deleted = result.deleted_ids.len(),
        scope = %store.scope(),
        threshold,
        dry_run,
        "Compaction finished"
    );
    Ok(result)
}
