//! Contradiction detection
//!
//! When a new memory is stored, finds existing memories that may
//! contradict it: embedding cosine similarity when vectors are available,
//! keyword overlap otherwise. The façade decides what to do with the
//! matches based on the caller's [`crate::types::ConflictMode`].

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::storage::MemoryBackend;
use crate::types::Memory;

use super::compaction::jaccard_similarity;

/// Default minimum similarity for a contradiction candidate
pub const DEFAULT_THRESHOLD: f32 = 0.75;
/// Default maximum number of candidates returned
pub const DEFAULT_MAX_CANDIDATES: usize = 5;

const EMBEDDED_SCAN_LIMIT: usize = 10_000;

/// Find existing memories that may contradict `text`.
///
/// With an embedding, every stored memory carrying a vector is scored by
/// cosine similarity. Without one, a LIKE query over the first five
/// significant words supplies candidates which are scored by word-level
/// Jaccard overlap. Results are sorted by descending similarity and
/// truncated to `max_candidates`.
pub fn find_contradictions(
    text: &str,
    embedding: Option<&[f32]>,
    store: &dyn MemoryBackend,
    threshold: f32,
    max_candidates: usize,
) -> Result<Vec<(Memory, f32)>> {
    let mut candidates: Vec<(Memory, f32)> = Vec::new();

    match embedding {
        Some(query) if !query.is_empty() => {
            for mem in store.candidates_with_embeddings(EMBEDDED_SCAN_LIMIT, None, None)? {
                let sim = match mem.embedding.as_deref() {
                    Some(stored) => cosine_similarity(query, stored),
                    None => continue,
                };
                if sim >= threshold {
                    candidates.push((mem, sim));
                }
            }
        }
        _ => {
            let words: Vec<&str> = text.split_whitespace().take(5).collect();
            if !words.is_empty() {
                let keyword_query = words.join(" ");
                for mem in store.search_by_text(&keyword_query, max_candidates * 2)? {
                    let sim = jaccard_similarity(text, &mem.text);
                    if sim >= threshold {
                        candidates.push((mem, sim));
                    }
                }
            }
        }
    }

    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(max_candidates);
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::MemoryScope;

    fn temp_store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(dir.path().join("mem.db"), MemoryScope::Project).unwrap();
        (dir, store)
    }

    #[test]
    fn embedding_path_finds_similar_vectors() {
        let (_dir, store) = temp_store();
        let mut close = Memory::new("the database host is localhost").unwrap();
        close.embedding = Some(vec![1.0, 0.0, 0.0]);
        store.save(&close).unwrap();
        let mut far = Memory::new("the sky is blue").unwrap();
        far.embedding = Some(vec![0.0, 1.0, 0.0]);
        store.save(&far).unwrap();

        let hits = find_contradictions(
            "the database host is db.example.com",
            Some(&[0.99, 0.05, 0.0]),
            &store,
            0.75,
            5,
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, close.id);
        assert!(hits[0].1 >= 0.75);
    }

    #[test]
    fn keyword_path_uses_word_overlap() {
        let (_dir, store) = temp_store();
        let near = Memory::new("the database host is localhost today").unwrap();
        store.save(&near).unwrap();
        store
            .save(&Memory::new("completely unrelated topic").unwrap())
            .unwrap();

        let hits = find_contradictions(
            "the database host is localhost now",
            None,
            &store,
            0.5,
            5,
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, near.id);
    }

    #[test]
    fn results_sorted_and_truncated() {
        let (_dir, store) = temp_store();
        for i in 0..4 {
            let mut mem = Memory::new(format!("candidate number {}", i)).unwrap();
            mem.embedding = Some(vec![1.0, i as f32 * 0.1]);
            store.save(&mem).unwrap();
        }

        let hits = find_contradictions("query", Some(&[1.0, 0.0]), &store, 0.0, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].1 >= hits[1].1);
    }

    #[test]
    fn empty_store_finds_nothing() {
        let (_dir, store) = temp_store();
        let hits = find_contradictions("anything at all", None, &store, 0.75, 5).unwrap();
        assert!(hits.is_empty());
    }
}
