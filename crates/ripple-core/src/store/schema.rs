//! SQLite schema DDL and migration framework.

use rusqlite::Connection;

use crate::errors::RippleResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 3;

/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables ──────────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS ripple_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        strictness_mode TEXT NOT NULL DEFAULT 'visibility',
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS components (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id),
        name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'stable',
        UNIQUE(project_id, name)
    );",
    "CREATE TABLE IF NOT EXISTS component_contributors (
        component_id TEXT NOT NULL REFERENCES components(id),
        user_id TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'contributor',
        PRIMARY KEY(component_id, user_id)
    );",
    "CREATE TABLE IF NOT EXISTS project_files (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id),
        component_id TEXT REFERENCES components(id),
        path TEXT NOT NULL,
        language TEXT,
        size_bytes INTEGER NOT NULL DEFAULT 0,
        storage_key TEXT NOT NULL,
        content_hash TEXT,
        parsed_symbols TEXT,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(project_id, path)
    );",
    "CREATE TABLE IF NOT EXISTS file_drafts (
        id TEXT PRIMARY KEY,
        file_id TEXT NOT NULL REFERENCES project_files(id),
        author_id TEXT NOT NULL,
        content TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS component_dependencies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id TEXT NOT NULL REFERENCES projects(id),
        source_component_id TEXT NOT NULL REFERENCES components(id),
        target_component_id TEXT NOT NULL REFERENCES components(id),
        dependency_type TEXT NOT NULL DEFAULT 'import',
        confidence REAL NOT NULL DEFAULT 1.0,
        detection_method TEXT NOT NULL DEFAULT 'parser',
        symbols TEXT NOT NULL DEFAULT '[]',
        UNIQUE(project_id, source_component_id, target_component_id, detection_method),
        CHECK(source_component_id <> target_component_id)
    );",
    "CREATE TABLE IF NOT EXISTS external_dependencies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id TEXT NOT NULL REFERENCES projects(id),
        file_path TEXT NOT NULL,
        source TEXT NOT NULL,
        line INTEGER
    );",
    "CREATE TABLE IF NOT EXISTS change_requests (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id),
        component_id TEXT NOT NULL REFERENCES components(id),
        author_id TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        resolved_at TEXT
    );",
    "CREATE TABLE IF NOT EXISTS change_impacts (
        id TEXT PRIMARY KEY,
        change_request_id TEXT NOT NULL REFERENCES change_requests(id),
        component_id TEXT NOT NULL REFERENCES components(id),
        contributor_id TEXT NOT NULL,
        detection_method TEXT NOT NULL,
        confidence REAL NOT NULL DEFAULT 1.0,
        affected_lines TEXT NOT NULL DEFAULT '{}',
        acknowledged INTEGER NOT NULL DEFAULT 0,
        dismissed INTEGER NOT NULL DEFAULT 0,
        auto_confirmed INTEGER NOT NULL DEFAULT 0,
        acknowledged_at TEXT,
        llm_annotation TEXT,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS project_snapshots (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id),
        change_request_id TEXT REFERENCES change_requests(id),
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS snapshot_files (
        snapshot_id TEXT NOT NULL REFERENCES project_snapshots(id),
        file_id TEXT NOT NULL,
        path TEXT NOT NULL,
        storage_key TEXT NOT NULL,
        content_hash TEXT,
        PRIMARY KEY(snapshot_id, file_id)
    );",
    // ── indexes ─────────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_components_project ON components(project_id);",
    "CREATE INDEX IF NOT EXISTS idx_files_component ON project_files(component_id);",
    "CREATE INDEX IF NOT EXISTS idx_drafts_author_active ON file_drafts(author_id, is_active);",
    "CREATE INDEX IF NOT EXISTS idx_deps_target ON component_dependencies(target_component_id);",
    "CREATE INDEX IF NOT EXISTS idx_external_project ON external_dependencies(project_id);",
    "CREATE INDEX IF NOT EXISTS idx_changes_project ON change_requests(project_id, status);",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`]. Each step is wrapped in a SAVEPOINT so a failure
/// rolls back only that single step.
pub fn migrate_schema(conn: &Connection) -> RippleResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT ripple_migrate_step;")?;

        let step_result = (|| -> RippleResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                2 => migrate_to_v2(conn)?,
                3 => migrate_to_v3(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT ripple_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT ripple_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT ripple_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Returns 0 when the key is absent or unparseable.
pub fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM ripple_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> RippleResult<()> {
    conn.execute(
        "INSERT INTO ripple_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> RippleResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> RippleResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: baseline, created by SCHEMA_STATEMENTS.
fn migrate_to_v1(_conn: &Connection) -> RippleResult<()> {
    Ok(())
}

/// v1 -> v2: impacts gained the `auto_confirmed` flag.
fn migrate_to_v2(conn: &Connection) -> RippleResult<()> {
    if !has_column(conn, "change_impacts", "auto_confirmed")? {
        conn.execute_batch(
            "ALTER TABLE change_impacts ADD COLUMN auto_confirmed INTEGER NOT NULL DEFAULT 0;",
        )?;
    }
    Ok(())
}

/// v2 -> v3: lookup indexes for impact listing and the aging sweep.
fn migrate_to_v3(conn: &Connection) -> RippleResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_impacts_change ON change_impacts(change_request_id);",
    )?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_impacts_unresolved \
         ON change_impacts(acknowledged, dismissed);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn
    }

    #[test]
    fn test_migrate_fresh_database() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let steps: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM migration_history WHERE status = 'success';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(steps, SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_migrate_idempotent() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_v2_adds_missing_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE ripple_meta (key TEXT PRIMARY KEY, value TEXT);
             CREATE TABLE migration_history (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 from_version INTEGER NOT NULL,
                 to_version INTEGER NOT NULL,
                 status TEXT NOT NULL,
                 error_message TEXT,
                 created_at TEXT DEFAULT CURRENT_TIMESTAMP
             );
             CREATE TABLE change_impacts (id TEXT PRIMARY KEY, change_request_id TEXT,
                 acknowledged INTEGER NOT NULL DEFAULT 0, dismissed INTEGER NOT NULL DEFAULT 0);
             INSERT INTO ripple_meta VALUES ('schema_version', '1');",
        )
        .unwrap();
        assert!(!has_column(&conn, "change_impacts", "auto_confirmed").unwrap());
        migrate_schema(&conn).unwrap();
        assert!(has_column(&conn, "change_impacts", "auto_confirmed").unwrap());
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }
}
