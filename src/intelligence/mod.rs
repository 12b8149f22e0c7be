//! Heuristic intelligence over stored memories: categorization, scope
//! inference, secret detection, importance scoring, contradiction
//! detection, compaction, and quality review.

pub mod categories;
pub mod compaction;
pub mod contradiction;
pub mod importance;
pub mod privacy;
pub mod project;
pub mod review;

pub use categories::{auto_categorize, infer_scope, scope_for_category, validate_category, Category};
pub use compaction::{compact_store, CompactionResult, MergeDetail};
pub use contradiction::find_contradictions;
pub use importance::score_importance;
pub use privacy::{check_for_secrets, redact_secrets};
pub use project::{detect_project_root, migrate_legacy_db};
pub use review::{review_memories, IssueType, ReviewIssue, ReviewResult, Severity};
