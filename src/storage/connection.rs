//! Database connection management
//!
//! Each store owns a single SQLite file and hands out one connection per
//! OS thread, satisfying SQLite's threading constraints without sharing
//! connection objects. WAL mode keeps writers from blocking readers.

use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::ThreadId;

use crate::error::Result;

/// Small connection pool keyed by thread identity.
pub(crate) struct ConnectionPool {
    path: PathBuf,
    conns: Mutex<HashMap<ThreadId, Arc<Mutex<Connection>>>>,
}

impl ConnectionPool {
    /// Open a pool over an already-resolved database path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            conns: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA foreign_keys=ON;
            "#,
        )?;
        Ok(conn)
    }

    /// Run `f` with the calling thread's connection, creating it on first
    /// use.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let conn_arc = {
            let mut map = self.conns.lock();
            match map.get(&std::thread::current().id()) {
                Some(existing) => existing.clone(),
                None => {
                    let conn = Arc::new(Mutex::new(self.connect()?));
                    map.insert(std::thread::current().id(), conn.clone());
                    conn
                }
            }
        };
        let mut conn = conn_arc.lock();
        f(&mut conn)
    }

    /// Drop every pooled connection. Threads that call in again get a
    /// fresh connection.
    pub fn close(&self) {
        self.conns.lock().clear();
    }
}

/// Resolve a database path the way the store contract requires: expand
/// `~`, create the parent directory with mode 0o700, canonicalize the
/// parent (so a symlinked parent cannot escape the protected directory),
/// and pre-create the database file with mode 0o600.
pub(crate) fn resolve_db_path(raw: &Path) -> Result<PathBuf> {
    let expanded = shellexpand::tilde(&raw.to_string_lossy()).into_owned();
    let expanded = PathBuf::from(expanded);

    let file_name = expanded
        .file_name()
        .ok_or_else(|| {
            crate::MemoryMeshError::InvalidInput(format!(
                "Database path has no file name: {}",
                expanded.display()
            ))
        })?
        .to_owned();

    let parent = match expanded.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    create_private_dir(&parent)?;
    let parent = parent.canonicalize()?;
    let path = parent.join(file_name);

    if !path.exists() {
        create_private_file(&path)?;
    }

    Ok(path)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if !dir.exists() {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)?;
    }
    // Re-assert permissions on pre-existing directories, best effort.
    let _ = std::fs::set_permissions(dir, std::os::unix::fs::PermissionsExt::from_mode(0o700));
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(unix)]
fn create_private_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_file(path: &Path) -> Result<()> {
    std::fs::File::create(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_creates_parents_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("nested/deeper/mem.db");
        let resolved = resolve_db_path(&raw).unwrap();
        assert!(resolved.exists());
        assert!(resolved.parent().unwrap().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn resolve_sets_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("private/mem.db");
        let resolved = resolve_db_path(&raw).unwrap();

        let dir_mode = std::fs::metadata(resolved.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        let file_mode = std::fs::metadata(&resolved).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }

    #[test]
    fn pool_reuses_thread_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_db_path(&dir.path().join("pool.db")).unwrap();
        let pool = ConnectionPool::new(path);
        pool.with_conn(|conn| {
            conn.execute_batch("CREATE TABLE t (x INTEGER)")?;
            Ok(())
        })
        .unwrap();
        // Second call on the same thread must see the table.
        let count: i64 = pool
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name='t'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
