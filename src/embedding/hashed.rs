//! In-process hashed embedder
//!
//! Deterministic feature-hashing term-frequency embedder: no network, no
//! model download, stable across runs on the same platform. Quality is
//! below a real sentence encoder but good enough for duplicate detection
//! and coarse semantic recall.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use super::Embedder;
use crate::error::Result;

/// Default vector width for the local provider
pub const DEFAULT_DIMENSION: usize = 384;

/// Local embedding provider using the hashing trick over unigrams and
/// bigrams, L2-normalized.
pub struct HashedEmbedder {
    dimension: usize,
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimension
    }

    /// Signed hashing halves the expected collision error.
    fn sign(token: &str) -> f32 {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        hasher.write_u8(0x5a);
        if hasher.finish() % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }
}

impl Embedder for HashedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = Self::tokenize(text);
        let mut vector = vec![0.0_f32; self.dimension];
        if tokens.is_empty() {
            return Ok(vector);
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        for (token, count) in tf {
            let tf_score = (1.0 + count / doc_len).ln();
            // Longer tokens tend to be rarer; a cheap IDF stand-in.
            let idf_score = 1.0 + token.len() as f32 * 0.1;
            vector[self.bucket(token)] += tf_score * idf_score * Self::sign(token);
        }

        for window in tokens.windows(2) {
            let bigram = format!("{} {}", window[0], window[1]);
            vector[self.bucket(&bigram)] += 0.5 * Self::sign(&bigram);
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn name(&self) -> &str {
        "hashed"
    }
}
