//! Memory categories with automatic scope routing and categorization
//!
//! A fixed taxonomy, a compile-time category-to-scope map, keyword-based
//! auto-categorization, and subject-based scope inference for text that
//! carries no explicit category.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{MemoryMeshError, Result};
use crate::types::{Metadata, MemoryScope};

/// The fixed category taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Preference,
    Guardrail,
    Mistake,
    Personality,
    Question,
    Decision,
    Pattern,
    Context,
    SessionSummary,
}

impl Category {
    pub const ALL: &'static [Category] = &[
        Category::Preference,
        Category::Guardrail,
        Category::Mistake,
        Category::Personality,
        Category::Question,
        Category::Decision,
        Category::Pattern,
        Category::Context,
        Category::SessionSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Preference => "preference",
            Category::Guardrail => "guardrail",
            Category::Mistake => "mistake",
            Category::Personality => "personality",
            Category::Question => "question",
            Category::Decision => "decision",
            Category::Pattern => "pattern",
            Category::Context => "context",
            Category::SessionSummary => "session_summary",
        }
    }

    /// The default scope this category routes to.
    pub fn scope(&self) -> MemoryScope {
        match self {
            Category::Preference
            | Category::Guardrail
            | Category::Mistake
            | Category::Personality
            | Category::Question => MemoryScope::Global,
            Category::Decision
            | Category::Pattern
            | Category::Context
            | Category::SessionSummary => MemoryScope::Project,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preference" => Ok(Category::Preference),
            "guardrail" => Ok(Category::Guardrail),
            "mistake" => Ok(Category::Mistake),
            "personality" => Ok(Category::Personality),
            "question" => Ok(Category::Question),
            "decision" => Ok(Category::Decision),
            "pattern" => Ok(Category::Pattern),
            "context" => Ok(Category::Context),
            "session_summary" => Ok(Category::SessionSummary),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// Validate a category name, returning the parsed category.
pub fn validate_category(category: &str) -> Result<Category> {
    category.parse().map_err(|_| {
        let names: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
        MemoryMeshError::InvalidInput(format!(
            "Invalid category {:?}. Must be one of: {}",
            category,
            names.join(", ")
        ))
    })
}

/// The default scope for a category name.
pub fn scope_for_category(category: &str) -> Result<MemoryScope> {
    Ok(validate_category(category)?.scope())
}

fn patterns(raw: &[&str]) -> Vec<Regex> {
    raw.iter()
        .map(|p| Regex::new(p).expect("valid category pattern"))
        .collect()
}

// Tried in order; the first category with any match wins, so narrow
// categories are listed before broad ones.
static CATEGORY_PATTERNS: Lazy<Vec<(Category, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        (
            Category::Guardrail,
            patterns(&[
                r"(?i)\bnever\b",
                r"(?i)\bdon'?t\b",
                r"(?i)\bmust not\b",
                r"(?i)\bavoid\b",
                r"(?i)\bdo not\b",
                r"(?i)\bforbid",
                r"(?i)\bprohibit",
                r"(?i)\brule:\s",
            ]),
        ),
        (
            Category::Mistake,
            patterns(&[
                r"(?i)\bmistake\b",
                r"(?i)\bbug\b",
                r"(?i)\bbroke\b",
                r"(?i)\bforgot\b",
                r"(?i)\bshould have\b",
                r"(?i)\blesson\b",
                r"(?i)\blearned\b",
                r"(?i)\bregret\b",
                r"(?i)\baccident",
            ]),
        ),
        (
            Category::Personality,
            patterns(&[
                r"(?i)\bI am\b",
                r"(?i)\bI work\b",
                r"(?i)\bmy role\b",
                r"(?i)\bsenior\b",
                r"(?i)\bjunior\b",
                r"(?i)\bmy background\b",
                r"(?i)\byears? of experience\b",
                r"(?i)\bmy name\b",
            ]),
        ),
        (
            Category::Preference,
            patterns(&[
                r"(?i)\bprefer\b",
                r"(?i)\balways use\b",
                r"(?i)\blike to\b",
                r"(?i)\bstyle\b",
                r"(?i)\bfavou?rite\b",
                r"(?i)\bdefault to\b",
            ]),
        ),
        (
            Category::Question,
            patterns(&[
                r"(?i)\bwhy\b.*\?",
                r"(?i)\bhow\b.*\?",
                r"(?i)\bwhat if\b",
                r"(?i)\bconcern\b",
                r"(?i)\bwonder\b",
                r"(?i)\bcurious\b",
            ]),
        ),
        (
            Category::Decision,
            patterns(&[
                r"(?i)\bdecided\b",
                r"(?i)\bchose\b",
                r"(?i)\bpicked\b",
                r"(?i)\bapproach\b",
                r"(?i)\barchitecture\b",
                r"(?i)\bwent with\b",
                r"(?i)\bselected\b",
            ]),
        ),
        (
            Category::Pattern,
            patterns(&[
                r"(?i)\bconvention\b",
                r"(?i)\bpattern\b",
                r"(?i)\bstyle guide\b",
                r"(?i)\balways do\b",
                r"(?i)\bcoding standard\b",
                r"(?i)\bbest practice\b",
            ]),
        ),
        (
            Category::SessionSummary,
            patterns(&[
                r"(?i)\bsession summary\b",
                r"(?i)\bsummary of\b.*\bsession\b",
                r"(?i)\bwhat we did\b",
                r"(?i)\baccomplished\b",
            ]),
        ),
    ]
});

/// Detect the most likely category for a piece of text.
///
/// A valid `category` hint in the metadata is honoured first; otherwise
/// the keyword tables are tried in order and the first match wins.
/// Falls back to [`Category::Context`].
pub fn auto_categorize(text: &str, metadata: Option<&Metadata>) -> Category {
    if let Some(meta) = metadata {
        if let Some(hint) = meta.get("category").and_then(|v| v.as_str()) {
            if let Ok(category) = hint.parse() {
                return category;
            }
        }
    }

    for (category, pats) in CATEGORY_PATTERNS.iter() {
        if pats.iter().any(|p| p.is_match(text)) {
            return *category;
        }
    }

    Category::Context
}

// Subject-based scope inference: signals that the text is about the user
// rather than about this codebase.
static USER_SUBJECT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"(?i)\buser prefers?\b",
        r"(?i)\bI (?:prefer|like|always|never)\b",
        r"(?i)\bacross all projects?\b",
        r"(?i)\bmy favou?rite\b",
        r"(?i)\bglobal preference\b",
        // Possessive name plus a lifestyle noun ("Dana's hobby").
        r"\b[A-Z][a-z]+['\u{2019}]s (?:favou?rite|preference|style|habit|hobby|routine)\b",
    ])
});

static PROJECT_SUBJECT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    patterns(&[
        r"\bsrc/",
        r"\btests?/",
        r"\b\w+\.(?:py|rs|ts|js|go|java|rb|c|cpp|h)\b",
        r"\bv?\d+\.\d+(?:\.\d+)?\b.*\b\d{4}-\d{2}-\d{2}\b",
        r"\b[0-9a-f]{7,40}\b",
        r"\b(?:pyproject\.toml|package\.json|Cargo\.toml|go\.mod|CMakeLists\.txt)\b",
    ])
});

/// Infer scope from who the text is about.
///
/// Counts user-subject versus project-subject signals; a whole-word match
/// of the project name counts double. Returns `None` when neither side
/// clearly wins so the caller's default applies.
pub fn infer_scope(text: &str, project_name: Option<&str>) -> Option<MemoryScope> {
    let user_signals = USER_SUBJECT_PATTERNS
        .iter()
        .filter(|p| p.is_match(text))
        .count();

    let mut project_signals = PROJECT_SUBJECT_PATTERNS
        .iter()
        .filter(|p| p.is_match(text))
        .count();

    if let Some(name) = project_name {
        if name.len() >= 3 {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(name));
            if let Ok(re) = Regex::new(&pattern) {
                if re.is_match(text) {
                    project_signals += 2;
                }
            }
        }
    }

    match user_signals.cmp(&project_signals) {
        std::cmp::Ordering::Greater => Some(MemoryScope::Global),
        std::cmp::Ordering::Less => Some(MemoryScope::Project),
        std::cmp::Ordering::Equal => None,
    }
}
