//! Schema migrations for MemoryMesh stores
//!
//! Versions are tracked with SQLite's `PRAGMA user_version`. Migrations
//! are additive-only; the ordered list below is the source of truth and
//! is never applied out of order.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::Result;

/// A single schema migration step.
pub struct Migration {
    /// Target schema version after this migration
    pub version: i32,
    /// Human-readable description of the change
    pub description: &'static str,
    /// SQL statements to execute; empty for version stamps
    pub statements: &'static [&'static str],
}

/// Full schema executed on fresh databases.
const FULL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id             TEXT PRIMARY KEY,
    text           TEXT    NOT NULL,
    metadata_json  TEXT    NOT NULL DEFAULT '{}',
    embedding_blob BLOB,
    created_at     TEXT    NOT NULL,
    updated_at     TEXT    NOT NULL,
    access_count   INTEGER NOT NULL DEFAULT 0,
    importance     REAL    NOT NULL DEFAULT 0.5,
    decay_rate     REAL    NOT NULL DEFAULT 0.01,
    session_id     TEXT
);

CREATE INDEX IF NOT EXISTS idx_memories_importance
ON memories (importance DESC);

CREATE INDEX IF NOT EXISTS idx_memories_updated_at
ON memories (updated_at DESC);

CREATE INDEX IF NOT EXISTS idx_memories_session_id
ON memories (session_id);
"#;

/// Ordered migration list. `LATEST_VERSION` is derived from the last
/// entry.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema",
        statements: &[],
    },
    Migration {
        version: 2,
        description: "Add session_id column and index",
        statements: &[
            "ALTER TABLE memories ADD COLUMN session_id TEXT",
            "CREATE INDEX IF NOT EXISTS idx_memories_session_id ON memories (session_id)",
        ],
    },
];

/// Current schema version.
pub const LATEST_VERSION: i32 = MIGRATIONS[MIGRATIONS.len() - 1].version;

/// Read the current schema version from `PRAGMA user_version`.
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    // PRAGMA does not accept bound parameters; version is a trusted
    // integer from the migration list.
    conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let mut stmt =
        conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    Ok(stmt.exists([name])?)
}

/// Ensure the database schema is up to date and return the resulting
/// version.
///
/// Handles four cases:
/// 1. Fresh database (no `memories` table, version 0): execute the full
///    DDL and stamp at [`LATEST_VERSION`].
/// 2. Pre-versioned database (table exists, version 0): stamp as
///    version 1, then apply pending migrations.
/// 3. Previously migrated database: apply only migrations whose version
///    exceeds the stored one, each inside a transaction. A failed
///    migration rolls back without advancing the version.
/// 4. Version newer than this library knows: warn and leave untouched.
pub fn ensure_schema(conn: &mut Connection) -> Result<i32> {
    let mut current = get_schema_version(conn)?;

    if current > LATEST_VERSION {
        warn!(
            db_version = current,
            supported = LATEST_VERSION,
            "Database schema is newer than this library supports; skipping migrations"
        );
        return Ok(current);
    }

    if current == 0 && !table_exists(conn, "memories")? {
        debug!(version = LATEST_VERSION, "Fresh database, creating schema");
        let tx = conn.transaction()?;
        tx.execute_batch(FULL_SCHEMA)?;
        tx.commit()?;
        set_schema_version(conn, LATEST_VERSION)?;
        return Ok(LATEST_VERSION);
    }

    if current == 0 {
        debug!("Pre-versioned database detected, stamping as version 1");
        current = 1;
        set_schema_version(conn, current)?;
    }

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        info!(
            version = migration.version,
            description = migration.description,
            "Applying migration"
        );
        let tx = conn.transaction()?;
        for stmt in migration.statements {
            tx.execute_batch(stmt).map_err(|e| {
                crate::MemoryMeshError::Migration(format!(
                    "migration v{} ({}) failed: {}",
                    migration.version, migration.description, e
                ))
            })?;
        }
        tx.commit()?;
        set_schema_version(conn, migration.version)?;
        current = migration.version;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn fresh_database_stamped_at_latest() {
        let mut conn = open_memory_db();
        let version = ensure_schema(&mut conn).unwrap();
        assert_eq!(version, LATEST_VERSION);
        assert!(table_exists(&conn, "memories").unwrap());
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let mut conn = open_memory_db();
        let first = ensure_schema(&mut conn).unwrap();
        let second = ensure_schema(&mut conn).unwrap();
        assert_eq!(first, second);
        assert_eq!(get_schema_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn legacy_table_is_stamped_and_migrated() {
        let mut conn = open_memory_db();
        // Simulate a database created before the migration system: the
        // v1 table shape without session_id, user_version 0.
        conn.execute_batch(
            r#"
            CREATE TABLE memories (
                id             TEXT PRIMARY KEY,
                text           TEXT    NOT NULL,
                metadata_json  TEXT    NOT NULL DEFAULT '{}',
                embedding_blob BLOB,
                created_at     TEXT    NOT NULL,
                updated_at     TEXT    NOT NULL,
                access_count   INTEGER NOT NULL DEFAULT 0,
                importance     REAL    NOT NULL DEFAULT 0.5,
                decay_rate     REAL    NOT NULL DEFAULT 0.01
            );
            "#,
        )
        .unwrap();

        let version = ensure_schema(&mut conn).unwrap();
        assert_eq!(version, LATEST_VERSION);

        // The v2 migration must have added the session_id column.
        let mut stmt = conn.prepare("SELECT session_id FROM memories").unwrap();
        assert!(stmt.query([]).is_ok());
    }

    #[test]
    fn newer_version_left_untouched() {
        let mut conn = open_memory_db();
        ensure_schema(&mut conn).unwrap();
        conn.execute_batch("PRAGMA user_version = 99").unwrap();
        let version = ensure_schema(&mut conn).unwrap();
        assert_eq!(version, 99);
    }

    #[test]
    fn migration_list_is_ordered() {
        let mut last = 0;
        for migration in MIGRATIONS {
            assert!(migration.version > last);
            last = migration.version;
        }
        assert_eq!(last, LATEST_VERSION);
    }
}
