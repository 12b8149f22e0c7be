//! Relevance scoring and ranking for recall.

pub mod relevance;

pub use relevance::{RelevanceEngine, RelevanceWeights};
