//! Memory review: quality auditing
//!
//! Stateless detectors over a list of memories. Each produces issues with
//! a severity and an actionable suggestion; the aggregate yields a
//! 0-100 quality score.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::compaction::text_similarity;
use super::importance::score_importance;
use crate::types::{Memory, MemoryScope};

/// Kinds of issues the reviewer can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    ScopeMismatch,
    TooVerbose,
    Uncategorized,
    Stale,
    NearDuplicate,
    LowQuality,
}

impl IssueType {
    pub const ALL: &'static [IssueType] = &[
        IssueType::ScopeMismatch,
        IssueType::TooVerbose,
        IssueType::Uncategorized,
        IssueType::Stale,
        IssueType::NearDuplicate,
        IssueType::LowQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::ScopeMismatch => "scope_mismatch",
            IssueType::TooVerbose => "too_verbose",
            IssueType::Uncategorized => "uncategorized",
            IssueType::Stale => "stale",
            IssueType::NearDuplicate => "near_duplicate",
            IssueType::LowQuality => "low_quality",
        }
    }
}

impl std::str::FromStr for IssueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scope_mismatch" => Ok(IssueType::ScopeMismatch),
            "too_verbose" => Ok(IssueType::TooVerbose),
            "uncategorized" => Ok(IssueType::Uncategorized),
            "stale" => Ok(IssueType::Stale),
            "near_duplicate" => Ok(IssueType::NearDuplicate),
            "low_quality" => Ok(IssueType::LowQuality),
            _ => Err(format!("Unknown detector: {}", s)),
        }
    }
}

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// A single quality issue found during review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub memory_id: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub description: String,
    pub suggestion: String,
    /// Whether the issue can be fixed without human judgement
    pub auto_fixable: bool,
}

/// Aggregate result of a review pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub issues: Vec<ReviewIssue>,
    /// Overall health score, 0-100
    pub quality_score: i32,
    pub total_reviewed: usize,
    /// Which scope was reviewed; `None` means both
    pub scanned_scope: Option<MemoryScope>,
}

// Patterns suggesting a memory is project-specific and should not be
// global.
static PROJECT_INDICATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bsrc/",
        r"\btests?/",
        r"\b\w+\.py\b",
        r"\b\w+\.rs\b",
        r"\b\w+\.ts\b",
        r"\b\w+\.js\b",
        r"(?i)\bImplementation state\b",
        r"\bv\d+\.\d+\.\d+\b.*\b\d{4}-\d{2}-\d{2}\b",
        r"\bpyproject\.toml\b",
        r"\bpackage\.json\b",
        r"\bCargo\.toml\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid project indicator"))
    .collect()
});

// Patterns suggesting a memory belongs in the global store.
static GLOBAL_INDICATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\buser prefers?\b",
        r"(?i)\bacross all projects?\b",
        r"(?i)\bglobal preference\b",
        r"(?i)\buser['\u{2019}]?s? favou?rite\b",
        r"(?i)\balways use\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid global indicator"))
    .collect()
});

/// Maximum memories compared per scope in the duplicate scan
const DUPLICATE_SCAN_CAP: usize = 500;
const STALE_AFTER_DAYS: i64 = 30;
const GLOBAL_VERBOSITY_LIMIT: usize = 200;
const PROJECT_VERBOSITY_LIMIT: usize = 500;
const LOW_QUALITY_THRESHOLD: f32 = 0.4;
const DUPLICATE_SIMILARITY: f32 = 0.7;

fn detect_scope_mismatch(memories: &[Memory], project_name: Option<&str>) -> Vec<ReviewIssue> {
    let mut issues = Vec::new();

    let name_pattern = project_name.filter(|n| n.len() >= 3).and_then(|name| {
        Regex::new(&format!(r"(?i)\b{}\b", regex::escape(name))).ok()
    });

    for mem in memories {
        match mem.scope {
            MemoryScope::Global => {
                let matched = PROJECT_INDICATORS
                    .iter()
                    .find(|p| p.is_match(&mem.text))
                    .map(|p| p.as_str().to_string())
                    .or_else(|| {
                        name_pattern
                            .as_ref()
                            .filter(|p| p.is_match(&mem.text))
                            .map(|p| p.as_str().to_string())
                    });
                if let Some(pattern) = matched {
                    issues.push(ReviewIssue {
                        memory_id: mem.id.clone(),
                        issue_type: IssueType::ScopeMismatch,
                        severity: Severity::High,
                        description: format!(
                            "Global memory contains project-specific content (matched: {:?})",
                            pattern
                        ),
                        suggestion: format!(
                            "Move to project scope with update('{}', scope='project')",
                            mem.id
                        ),
                        auto_fixable: false,
                    });
                }
            }
            MemoryScope::Project => {
                if let Some(pattern) = GLOBAL_INDICATORS.iter().find(|p| p.is_match(&mem.text)) {
                    issues.push(ReviewIssue {
                        memory_id: mem.id.clone(),
                        issue_type: IssueType::ScopeMismatch,
                        severity: Severity::High,
                        description: format!(
                            "Project memory contains global-scope content (matched: {:?})",
                            pattern.as_str()
                        ),
                        suggestion: format!(
                            "Move to global scope with update('{}', scope='global')",
                            mem.id
                        ),
                        auto_fixable: false,
                    });
                }
            }
        }
    }

    issues
}

fn detect_too_verbose(memories: &[Memory]) -> Vec<ReviewIssue> {
    memories
        .iter()
        .filter_map(|mem| {
            let limit = match mem.scope {
                MemoryScope::Global => GLOBAL_VERBOSITY_LIMIT,
                MemoryScope::Project => PROJECT_VERBOSITY_LIMIT,
            };
            (mem.text.len() > limit).then(|| ReviewIssue {
                memory_id: mem.id.clone(),
                issue_type: IssueType::TooVerbose,
                severity: Severity::Medium,
                description: format!(
                    "Memory text is {} chars (limit for {}: {})",
                    mem.text.len(),
                    mem.scope,
                    limit
                ),
                suggestion: "Distill to a shorter, more focused statement".to_string(),
                auto_fixable: false,
            })
        })
        .collect()
}

fn detect_uncategorized(memories: &[Memory]) -> Vec<ReviewIssue> {
    memories
        .iter()
        .filter(|mem| mem.category().is_none())
        .map(|mem| ReviewIssue {
            memory_id: mem.id.clone(),
            issue_type: IssueType::Uncategorized,
            severity: Severity::Low,
            description: "Memory has no category in metadata".to_string(),
            suggestion: "Add a category (e.g. decision, pattern, preference)".to_string(),
            auto_fixable: true,
        })
        .collect()
}

fn detect_stale(memories: &[Memory]) -> Vec<ReviewIssue> {
    let now = Utc::now();
    memories
        .iter()
        .filter_map(|mem| {
            let age_days = (now - mem.updated_at).num_days();
            (age_days >= STALE_AFTER_DAYS && mem.importance < 0.5).then(|| ReviewIssue {
                memory_id: mem.id.clone(),
                issue_type: IssueType::Stale,
                severity: Severity::Low,
                description: format!(
                    "Not accessed in {} days and importance is {:.2}",
                    age_days, mem.importance
                ),
                suggestion: "Consider deleting if no longer relevant".to_string(),
                auto_fixable: false,
            })
        })
        .collect()
}

fn detect_near_duplicate(memories: &[Memory]) -> Vec<ReviewIssue> {
    let mut issues = Vec::new();
    let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();

    // Compare only within the same scope so cross-store merges are never
    // suggested.
    for scope in [MemoryScope::Project, MemoryScope::Global] {
        let scoped: Vec<&Memory> = memories
            .iter()
            .filter(|m| m.scope == scope)
            .take(DUPLICATE_SCAN_CAP)
            .collect();
        for i in 0..scoped.len() {
            if seen.contains(scoped[i].id.as_str()) {
                continue;
            }
            for j in (i + 1)..scoped.len() {
                if seen.contains(scoped[j].id.as_str()) {
                    continue;
                }
                let sim = text_similarity(&scoped[i].text, &scoped[j].text);
                if sim >= DUPLICATE_SIMILARITY {
                    issues.push(ReviewIssue {
                        memory_id: scoped[j].id.clone(),
                        issue_type: IssueType::NearDuplicate,
                        severity: Severity::Medium,
                        description: format!(
                            "Similar to memory {}... (similarity: {:.2})",
                            &scoped[i].id[..8.min(scoped[i].id.len())],
                            sim
                        ),
                        suggestion: format!(
                            "Consider merging with {}... or deleting this duplicate",
                            &scoped[i].id[..8.min(scoped[i].id.len())]
                        ),
                        auto_fixable: false,
                    });
                    seen.insert(scoped[j].id.as_str());
                }
            }
        }
    }

    issues
}

fn detect_low_quality(memories: &[Memory]) -> Vec<ReviewIssue> {
    memories
        .iter()
        .filter_map(|mem| {
            let score = score_importance(&mem.text, Some(&mem.metadata));
            (score < LOW_QUALITY_THRESHOLD).then(|| ReviewIssue {
                memory_id: mem.id.clone(),
                issue_type: IssueType::LowQuality,
                severity: Severity::Low,
                description: format!(
                    "Low quality score ({:.2}). Text may be too vague or short",
                    score
                ),
                suggestion: "Rewrite with more specific, actionable content".to_string(),
                auto_fixable: false,
            })
        })
        .collect()
}

/// Audit memories for quality issues.
///
/// `detectors` selects a subset by type; `None` runs all of them.
/// `project_name` feeds the scope-mismatch detector (global memories
/// mentioning the product by name are flagged).
pub fn review_memories(
    memories: &[Memory],
    scanned_scope: Option<MemoryScope>,
    detectors: Option<&[IssueType]>,
    project_name: Option<&str>,
) -> ReviewResult {
    let mut result = ReviewResult {
        issues: Vec::new(),
        quality_score: 100,
        total_reviewed: memories.len(),
        scanned_scope,
    };

    if memories.is_empty() {
        return result;
    }

    let active = |t: IssueType| detectors.map_or(true, |d| d.contains(&t));

    if active(IssueType::ScopeMismatch) {
        result
            .issues
            .extend(detect_scope_mismatch(memories, project_name));
    }
    if active(IssueType::TooVerbose) {
        result.issues.extend(detect_too_verbose(memories));
    }
    if active(IssueType::Uncategorized) {
        result.issues.extend(detect_uncategorized(memories));
    }
    if active(IssueType::Stale) {
        result.issues.extend(detect_stale(memories));
    }
    if active(IssueType::NearDuplicate) {
        result.issues.extend(detect_near_duplicate(memories));
    }
    if active(IssueType::LowQuality) {
        result.issues.extend(detect_low_quality(memories));
    }

    let high = result
        .issues
        .iter()
        .filter(|i| i.severity == Severity::High)
        .count() as i32;
    let medium = result
        .issues
        .iter()
        .filter(|i| i.severity == Severity::Medium)
        .count() as i32;
    let low = result
        .issues
        .iter()
        .filter(|i| i.severity == Severity::Low)
        .count() as i32;
    result.quality_score = (100 - (high * 10 + medium * 5 + low * 2)).clamp(0, 100);

    result
}
