//! Heuristic auto-importance scoring
//!
//! Assigns an importance score from text alone: no ML, just four weighted
//! signals (length, keywords, structure, specificity), each in `[0, 1]`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::Metadata;

const WEIGHT_LENGTH: f32 = 0.15;
const WEIGHT_KEYWORDS: f32 = 0.35;
const WEIGHT_STRUCTURE: f32 = 0.20;
const WEIGHT_SPECIFICITY: f32 = 0.30;

const BOOSTER_KEYWORDS: &[&str] = &[
    "decision",
    "architecture",
    "critical",
    "important",
    "always",
    "never",
    "bug",
    "fix",
    "security",
    "preference",
    "convention",
    "principle",
    "requirement",
    "breaking",
    "migration",
    "production",
    "deploy",
    "secret",
    "password",
    "credential",
    "root cause",
    "vulnerability",
    "performance",
    "deadline",
];

const REDUCER_KEYWORDS: &[&str] = &[
    "test",
    "trying",
    "maybe",
    "perhaps",
    "temporary",
    "todo",
    "wip",
    "experiment",
    "draft",
    "scratch",
    "placeholder",
    "stub",
    "mock",
    "hack",
    "workaround",
    "temp",
    "fixme",
];

// Code-shaped patterns: backticks, function/class definitions, imports,
// dotted calls.
static CODE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"`[^`]+`",
        r"```",
        r"def\s+\w+\(",
        r"class\s+\w+[:(]",
        r"import\s+\w+",
        r"\w+\.\w+\(",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid code pattern"))
    .collect()
});

// Specificity indicators: file paths, versions, URLs, CamelCase names,
// acronyms.
static SPECIFICITY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"[\w/\\]+\.\w{1,4}\b",
        r"v?\d+\.\d+(?:\.\d+)?",
        r"https?://\S+",
        r"\b[A-Z][a-z]+(?:[A-Z][a-z]+)+\b",
        r"\b[A-Z]{2,}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid specificity pattern"))
    .collect()
});

fn length_signal(text: &str) -> f32 {
    match text.len() {
        0..=19 => 0.2,
        20..=49 => 0.4,
        50..=199 => 0.5,
        200..=499 => 0.7,
        _ => 0.8,
    }
}

fn keyword_signal(text: &str) -> f32 {
    let text_lower = text.to_lowercase();

    let boost_count = BOOSTER_KEYWORDS
        .iter()
        .filter(|k| text_lower.contains(*k))
        .count() as f32;
    let reduce_count = REDUCER_KEYWORDS
        .iter()
        .filter(|k| text_lower.contains(*k))
        .count() as f32;

    (0.5 + boost_count * 0.08 - reduce_count * 0.06).clamp(0.0, 1.0)
}

fn structure_signal(text: &str) -> f32 {
    let match_count = CODE_PATTERNS.iter().filter(|p| p.is_match(text)).count();
    match match_count {
        0 => 0.4,
        1 => 0.6,
        2..=3 => 0.75,
        _ => 0.9,
    }
}

fn specificity_signal(text: &str) -> f32 {
    let mut match_count = 0;
    for pattern in SPECIFICITY_PATTERNS.iter() {
        match_count += pattern.find_iter(text).count();
    }
    match match_count {
        0 => 0.3,
        1..=2 => 0.55,
        3..=5 => 0.7,
        _ => 0.9,
    }
}

/// Score the importance of a memory from text heuristics.
///
/// Returns a value in `[0, 1]`; unremarkable prose lands near 0.5.
/// `metadata` is accepted for parity with the categorizer but carries no
/// signal yet.
pub fn score_importance(text: &str, _metadata: Option<&Metadata>) -> f32 {
    let combined = WEIGHT_LENGTH * length_signal(text)
        + WEIGHT_KEYWORDS * keyword_signal(text)
        + WEIGHT_STRUCTURE * structure_signal(text)
        + WEIGHT_SPECIFICITY * specificity_signal(text);
    combined.clamp(0.0, 1.0)
}
