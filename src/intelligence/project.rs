//! Project root detection and default store locations
//!
//! Mirrors the way `git` finds a repository: walk upward from the
//! working directory until a marker file appears. Callers may override
//! via explicit `file://` roots or the `MEMORYMESH_PROJECT_ROOT`
//! environment variable.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;

/// Environment variable naming the project root explicitly
pub const PROJECT_ROOT_ENV: &str = "MEMORYMESH_PROJECT_ROOT";

/// A directory containing any of these is considered a project root.
pub const PROJECT_MARKERS: &[&str] = &[
    ".git",
    ".hg",
    ".memorymesh",
    "pyproject.toml",
    "Cargo.toml",
    "package.json",
    "go.mod",
    "build.gradle",
    "pom.xml",
    "CMakeLists.txt",
    "Makefile",
];

fn has_project_marker(dir: &Path) -> bool {
    PROJECT_MARKERS.iter().any(|m| dir.join(m).exists())
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(value) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn path_from_file_uri(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file://")?;
    // Strip an authority component ("file://host/path"); an empty
    // authority ("file:///path") is the common case.
    let path = match rest.find('/') {
        Some(0) => rest.to_string(),
        Some(idx) => rest[idx..].to_string(),
        None => return None,
    };
    Some(PathBuf::from(percent_decode(&path)))
}

fn note(diagnostics: Option<&mut Vec<String>>, message: String) {
    if let Some(diag) = diagnostics {
        diag.push(message);
    }
}

/// Detect the project root directory.
///
/// Priority:
/// 1. The first `file://` URI in `roots`, when it names an existing
///    directory.
/// 2. `MEMORYMESH_PROJECT_ROOT`, when it names an existing directory.
/// 3. The working directory or its nearest ancestor containing a
///    project marker.
/// 4. `None`.
///
/// When `diagnostics` is supplied, a human-readable description of each
/// step is appended, for error messages and status output.
pub fn detect_project_root(
    roots: Option<&[String]>,
    mut diagnostics: Option<&mut Vec<String>>,
) -> Option<PathBuf> {
    if let Some(roots) = roots {
        match roots.first() {
            Some(uri) if uri.starts_with("file://") => match path_from_file_uri(uri) {
                Some(path) if path.is_dir() => {
                    let real = path.canonicalize().unwrap_or(path);
                    note(
                        diagnostics.as_mut().map(|d| &mut **d),
                        format!("roots: {} (accepted)", real.display()),
                    );
                    return Some(real);
                }
                Some(path) => note(
                    diagnostics.as_mut().map(|d| &mut **d),
                    format!("roots: {} (directory does not exist)", path.display()),
                ),
                None => note(
                    diagnostics.as_mut().map(|d| &mut **d),
                    format!("roots: malformed URI '{}' (skipped)", truncate(uri, 60)),
                ),
            },
            Some(uri) => note(
                diagnostics.as_mut().map(|d| &mut **d),
                format!("roots: non-file URI '{}' (skipped)", truncate(uri, 60)),
            ),
            None => note(diagnostics.as_mut().map(|d| &mut **d), "roots: empty list".to_string()),
        }
    } else {
        note(
            diagnostics.as_mut().map(|d| &mut **d),
            "roots: not provided by caller".to_string(),
        );
    }

    match std::env::var(PROJECT_ROOT_ENV) {
        Ok(value) if !value.is_empty() && Path::new(&value).is_dir() => {
            note(
                diagnostics.as_mut().map(|d| &mut **d),
                format!("{}: {} (found)", PROJECT_ROOT_ENV, value),
            );
            let path = PathBuf::from(&value);
            return Some(path.canonicalize().unwrap_or(path));
        }
        Ok(value) if !value.is_empty() => note(
            diagnostics.as_mut().map(|d| &mut **d),
            format!("{}: {} (not a directory)", PROJECT_ROOT_ENV, value),
        ),
        _ => note(
            diagnostics.as_mut().map(|d| &mut **d),
            format!("{}: not set", PROJECT_ROOT_ENV),
        ),
    }

    let cwd = std::env::current_dir().ok()?;
    let start = cwd.canonicalize().unwrap_or(cwd);
    let mut current = start.clone();
    let mut walked = 0usize;
    loop {
        walked += 1;
        if has_project_marker(&current) {
            note(
                diagnostics.as_mut().map(|d| &mut **d),
                format!("walk-up: {} (project marker found)", current.display()),
            );
            return Some(current);
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    note(
        diagnostics,
        format!(
            "walk-up: checked {} directories from {} (no project marker found)",
            walked,
            start.display()
        ),
    );
    None
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Default directory for the per-user store (`~/.memorymesh`).
pub fn default_memorymesh_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".memorymesh"))
}

/// Default path of the global database.
pub fn default_global_db_path() -> Option<PathBuf> {
    default_memorymesh_dir().map(|dir| dir.join("global.db"))
}

fn legacy_db_path() -> Option<PathBuf> {
    default_memorymesh_dir().map(|dir| dir.join("memories.db"))
}

/// One-time migration of the legacy single-file database: when
/// `global.db` does not exist but the old `memories.db` does, rename it
/// so existing data becomes the global store. Returns whether a rename
/// happened.
pub fn migrate_legacy_db() -> Result<bool> {
    let (Some(legacy), Some(global)) = (legacy_db_path(), default_global_db_path()) else {
        return Ok(false);
    };
    if legacy.exists() && !global.exists() {
        std::fs::rename(&legacy, &global)?;
        info!(
            from = %legacy.display(),
            to = %global.display(),
            "Migrated legacy database to global store"
        );
        return Ok(true);
    }
    debug!("No legacy database migration needed");
    Ok(false)
}
