//! SQLite storage layer for Ripple.
//!
//! Each public method opens its own connection, so callers never manage
//! connection lifetime and a `Database` can be shared freely across threads.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::errors::{RippleError, RippleResult};
use crate::indexer::dependencies::DependencyGraph;
use crate::models::{
    new_id, AffectedLines, ChangeImpact, ChangeRequest, ChangeStatus, Component, ComponentStatus,
    Contributor, DependencyEdge, DetectionMethod, ExternalDependency, FileDraft, ParsedFile,
    Project, ProjectFile, ProjectSnapshot, SnapshotFile,
};
use crate::store::schema;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if text == "~" || text.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if text.len() > 2 {
                expanded.push(&text[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

fn resolve_path(path: &Path) -> RippleResult<PathBuf> {
    let expanded = expand_tilde(path);
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(std::env::current_dir()?.join(expanded))
    }
}

/// Decode a JSON text column, surfacing bad JSON as a conversion failure.
fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn to_json<T: serde::Serialize>(value: &T) -> RippleResult<String> {
    Ok(serde_json::to_string(value)?)
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

const PROJECT_COLUMNS: &str = "id, name, owner_id, strictness_mode";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        strictness_mode: row.get(3)?,
    })
}

const COMPONENT_COLUMNS: &str = "id, project_id, name, status";

fn component_from_row(row: &Row<'_>) -> rusqlite::Result<Component> {
    Ok(Component {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        status: row.get(3)?,
    })
}

const FILE_COLUMNS: &str = "id, project_id, component_id, path, language, size_bytes, \
                            storage_key, content_hash, parsed_symbols";

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectFile> {
    Ok(ProjectFile {
        id: row.get(0)?,
        project_id: row.get(1)?,
        component_id: row.get(2)?,
        path: row.get(3)?,
        language: row.get(4)?,
        size_bytes: row.get(5)?,
        storage_key: row.get(6)?,
        content_hash: row.get(7)?,
        parsed_symbols: optional_json_column(row, 8)?,
    })
}

fn draft_from_row(row: &Row<'_>) -> rusqlite::Result<FileDraft> {
    Ok(FileDraft {
        id: row.get(0)?,
        file_id: row.get(1)?,
        author_id: row.get(2)?,
        content: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const EDGE_COLUMNS: &str = "source_component_id, target_component_id, dependency_type, \
                            confidence, detection_method, symbols";

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<DependencyEdge> {
    Ok(DependencyEdge {
        source_component_id: row.get(0)?,
        target_component_id: row.get(1)?,
        dependency_type: row.get(2)?,
        confidence: row.get(3)?,
        detection_method: row.get(4)?,
        symbols: json_column(row, 5)?,
    })
}

const CHANGE_COLUMNS: &str = "id, project_id, component_id, author_id, title, description, \
                              status, created_at, updated_at, resolved_at";

fn change_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeRequest> {
    Ok(ChangeRequest {
        id: row.get(0)?,
        project_id: row.get(1)?,
        component_id: row.get(2)?,
        author_id: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        resolved_at: row.get(9)?,
    })
}

const IMPACT_COLUMNS: &str = "i.id, i.change_request_id, i.component_id, i.contributor_id, \
                              i.detection_method, i.confidence, i.affected_lines, \
                              i.acknowledged, i.dismissed, i.auto_confirmed, \
                              i.acknowledged_at, i.llm_annotation, i.created_at";

fn impact_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeImpact> {
    Ok(ChangeImpact {
        id: row.get(0)?,
        change_request_id: row.get(1)?,
        component_id: row.get(2)?,
        contributor_id: row.get(3)?,
        detection_method: row.get(4)?,
        confidence: row.get(5)?,
        affected_lines: json_column::<AffectedLines>(row, 6)?,
        acknowledged: row.get(7)?,
        dismissed: row.get(8)?,
        auto_confirmed: row.get(9)?,
        acknowledged_at: row.get(10)?,
        llm_annotation: optional_json_column(row, 11)?,
        created_at: row.get(12)?,
    })
}

fn insert_impact_rows(conn: &Connection, impacts: &[ChangeImpact]) -> RippleResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO change_impacts(id, change_request_id, component_id, contributor_id, \
             detection_method, confidence, affected_lines, acknowledged, dismissed, \
             auto_confirmed, acknowledged_at, llm_annotation, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
    )?;
    for impact in impacts {
        let annotation = impact.llm_annotation.as_ref().map(to_json).transpose()?;
        stmt.execute(params![
            impact.id,
            impact.change_request_id,
            impact.component_id,
            impact.contributor_id,
            impact.detection_method,
            impact.confidence,
            to_json(&impact.affected_lines)?,
            impact.acknowledged,
            impact.dismissed,
            impact.auto_confirmed,
            impact.acknowledged_at,
            annotation,
            impact.created_at,
        ])?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Approval payloads
// ---------------------------------------------------------------------------

/// A draft whose content becomes the committed content of its file.
#[derive(Clone, Debug, PartialEq)]
pub struct PromotedFile {
    pub file_id: String,
    pub draft_id: String,
    /// Object key the promoted bytes were written under.
    pub storage_key: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub parsed_symbols: Option<ParsedFile>,
}

/// Everything an approval writes, applied in one transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct ApprovalCommit {
    pub project_id: String,
    pub change_request_id: String,
    pub promoted: Vec<PromotedFile>,
    pub stabilize: Vec<String>,
    pub resolved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// The path is expanded and its parent directories are created.
    pub fn new(db_path: impl AsRef<Path>) -> RippleResult<Self> {
        let resolved = resolve_path(db_path.as_ref())?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { db_path: resolved })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> RippleResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    // -----------------------------------------------------------------------
    // Schema / backup
    // -----------------------------------------------------------------------

    /// Set WAL mode, create all tables and indexes, then run pending
    /// migrations.
    pub fn init_schema(&self) -> RippleResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    pub fn schema_version(&self) -> RippleResult<i32> {
        Ok(schema::get_schema_version(&self.connect()?))
    }

    /// Copy the database to `destination` with the SQLite backup API.
    pub fn backup_to(&self, destination: impl AsRef<Path>) -> RippleResult<PathBuf> {
        let resolved = resolve_path(destination.as_ref())?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let src_conn = self.connect()?;
        let mut dst_conn = Connection::open(&resolved)?;
        let backup = rusqlite::backup::Backup::new(&src_conn, &mut dst_conn)?;
        backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
        Ok(resolved)
    }

    pub fn restore_from(&self, source: impl AsRef<Path>) -> RippleResult<()> {
        let resolved = resolve_path(source.as_ref())?;
        if !resolved.exists() {
            return Err(RippleError::NotFound(format!(
                "backup file {}",
                resolved.display()
            )));
        }
        let src_conn = Connection::open(&resolved)?;
        let mut dst_conn = self.connect()?;
        let backup = rusqlite::backup::Backup::new(&src_conn, &mut dst_conn)?;
        backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Projects, components, contributors
    // -----------------------------------------------------------------------

    pub fn insert_project(&self, project: &Project) -> RippleResult<()> {
        self.connect()?.execute(
            "INSERT INTO projects(id, name, owner_id, strictness_mode) VALUES (?1, ?2, ?3, ?4);",
            params![
                project.id,
                project.name,
                project.owner_id,
                project.strictness_mode
            ],
        )?;
        Ok(())
    }

    pub fn get_project(&self, project_id: &str) -> RippleResult<Option<Project>> {
        let conn = self.connect()?;
        let project = conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1;"),
                params![project_id],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    pub fn insert_component(&self, component: &Component) -> RippleResult<()> {
        self.connect()?.execute(
            "INSERT INTO components(id, project_id, name, status) VALUES (?1, ?2, ?3, ?4);",
            params![
                component.id,
                component.project_id,
                component.name,
                component.status
            ],
        )?;
        Ok(())
    }

    pub fn get_component(&self, component_id: &str) -> RippleResult<Option<Component>> {
        let conn = self.connect()?;
        let component = conn
            .query_row(
                &format!("SELECT {COMPONENT_COLUMNS} FROM components WHERE id = ?1;"),
                params![component_id],
                component_from_row,
            )
            .optional()?;
        Ok(component)
    }

    pub fn list_components(&self, project_id: &str) -> RippleResult<Vec<Component>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMPONENT_COLUMNS} FROM components WHERE project_id = ?1 ORDER BY name;"
        ))?;
        let rows = stmt.query_map(params![project_id], component_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn set_component_status(
        &self,
        component_ids: &[String],
        status: ComponentStatus,
    ) -> RippleResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        for id in component_ids {
            tx.execute(
                "UPDATE components SET status = ?1 WHERE id = ?2;",
                params![status, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert or update the contributor's role.
    pub fn add_contributor(&self, contributor: &Contributor) -> RippleResult<()> {
        self.connect()?.execute(
            "INSERT INTO component_contributors(component_id, user_id, role) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(component_id, user_id) DO UPDATE SET role = excluded.role;",
            params![contributor.component_id, contributor.user_id, contributor.role],
        )?;
        Ok(())
    }

    pub fn list_contributors(&self, component_id: &str) -> RippleResult<Vec<Contributor>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT component_id, user_id, role FROM component_contributors \
             WHERE component_id = ?1 ORDER BY user_id;",
        )?;
        let rows = stmt.query_map(params![component_id], |row| {
            Ok(Contributor {
                component_id: row.get(0)?,
                user_id: row.get(1)?,
                role: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Project files and drafts
    // -----------------------------------------------------------------------

    /// Insert a file or update the existing row at the same path. Returns
    /// the id of the stored row, which is the existing id on update.
    pub fn upsert_project_file(&self, file: &ProjectFile) -> RippleResult<String> {
        let conn = self.connect()?;
        let parsed = file.parsed_symbols.as_ref().map(to_json).transpose()?;
        let id = conn.query_row(
            "INSERT INTO project_files(id, project_id, component_id, path, language, size_bytes, \
                                       storage_key, content_hash, parsed_symbols) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(project_id, path) DO UPDATE SET \
                 component_id = excluded.component_id, \
                 language = excluded.language, \
                 size_bytes = excluded.size_bytes, \
                 storage_key = excluded.storage_key, \
                 content_hash = excluded.content_hash, \
                 parsed_symbols = excluded.parsed_symbols, \
                 updated_at = CURRENT_TIMESTAMP \
             RETURNING id;",
            params![
                file.id,
                file.project_id,
                file.component_id,
                file.path,
                file.language,
                file.size_bytes,
                file.storage_key,
                file.content_hash,
                parsed,
            ],
            |row| row.get::<_, String>(0),
        )?;
        Ok(id)
    }

    pub fn get_project_file(&self, file_id: &str) -> RippleResult<Option<ProjectFile>> {
        let conn = self.connect()?;
        let file = conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM project_files WHERE id = ?1;"),
                params![file_id],
                file_from_row,
            )
            .optional()?;
        Ok(file)
    }

    pub fn get_project_file_by_path(
        &self,
        project_id: &str,
        path: &str,
    ) -> RippleResult<Option<ProjectFile>> {
        let conn = self.connect()?;
        let file = conn
            .query_row(
                &format!(
                    "SELECT {FILE_COLUMNS} FROM project_files WHERE project_id = ?1 AND path = ?2;"
                ),
                params![project_id, path],
                file_from_row,
            )
            .optional()?;
        Ok(file)
    }

    pub fn list_project_files(&self, project_id: &str) -> RippleResult<Vec<ProjectFile>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM project_files WHERE project_id = ?1 ORDER BY path;"
        ))?;
        let rows = stmt.query_map(params![project_id], file_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_component_files(&self, component_id: &str) -> RippleResult<Vec<ProjectFile>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM project_files WHERE component_id = ?1 ORDER BY path;"
        ))?;
        let rows = stmt.query_map(params![component_id], file_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Replace the cached symbol snapshot of a file wholesale.
    pub fn set_parsed_symbols(
        &self,
        file_id: &str,
        parsed: Option<&ParsedFile>,
    ) -> RippleResult<()> {
        let json = parsed.map(to_json).transpose()?;
        let updated = self.connect()?.execute(
            "UPDATE project_files SET parsed_symbols = ?1, updated_at = CURRENT_TIMESTAMP \
             WHERE id = ?2;",
            params![json, file_id],
        )?;
        if updated == 0 {
            return Err(RippleError::NotFound(format!("project file {file_id}")));
        }
        Ok(())
    }

    pub fn insert_draft(&self, draft: &FileDraft) -> RippleResult<()> {
        self.connect()?.execute(
            "INSERT INTO file_drafts(id, file_id, author_id, content, is_active, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                draft.id,
                draft.file_id,
                draft.author_id,
                draft.content,
                draft.is_active,
                draft.created_at
            ],
        )?;
        Ok(())
    }

    /// Active drafts by `author_id` on files of `component_id`, oldest first.
    pub fn list_active_drafts(
        &self,
        author_id: &str,
        component_id: &str,
    ) -> RippleResult<Vec<FileDraft>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT d.id, d.file_id, d.author_id, d.content, d.is_active, d.created_at \
             FROM file_drafts d \
             JOIN project_files f ON f.id = d.file_id \
             WHERE d.author_id = ?1 AND f.component_id = ?2 AND d.is_active = 1 \
             ORDER BY d.created_at, d.id;",
        )?;
        let rows = stmt.query_map(params![author_id, component_id], draft_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Dependency graph
    // -----------------------------------------------------------------------

    /// Replace the project's parser-derived edges and external dependencies.
    /// LLM-derived edges are left untouched.
    pub fn replace_parser_graph(
        &self,
        project_id: &str,
        graph: &DependencyGraph,
    ) -> RippleResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM component_dependencies WHERE project_id = ?1 AND detection_method = ?2;",
            params![project_id, DetectionMethod::Parser],
        )?;
        tx.execute(
            "DELETE FROM external_dependencies WHERE project_id = ?1;",
            params![project_id],
        )?;
        {
            let mut insert_edge = tx.prepare(
                "INSERT INTO component_dependencies(project_id, source_component_id, \
                     target_component_id, dependency_type, confidence, detection_method, symbols) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            )?;
            for edge in &graph.edges {
                insert_edge.execute(params![
                    project_id,
                    edge.source_component_id,
                    edge.target_component_id,
                    edge.dependency_type,
                    edge.confidence,
                    DetectionMethod::Parser,
                    to_json(&edge.symbols)?,
                ])?;
            }
            let mut insert_external = tx.prepare(
                "INSERT INTO external_dependencies(project_id, file_path, source, line) \
                 VALUES (?1, ?2, ?3, ?4);",
            )?;
            for dep in &graph.external {
                insert_external.execute(params![project_id, dep.file_path, dep.source, dep.line])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert an edge or merge its symbols into the existing edge with the
    /// same endpoints and detection method.
    pub fn upsert_edge(&self, project_id: &str, edge: &DependencyEdge) -> RippleResult<()> {
        if edge.source_component_id == edge.target_component_id {
            return Err(RippleError::Index(format!(
                "self edge on component {}",
                edge.source_component_id
            )));
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT symbols FROM component_dependencies \
                 WHERE project_id = ?1 AND source_component_id = ?2 \
                   AND target_component_id = ?3 AND detection_method = ?4;",
                params![
                    project_id,
                    edge.source_component_id,
                    edge.target_component_id,
                    edge.detection_method
                ],
                |row| row.get(0),
            )
            .optional()?;
        let mut symbols = edge.symbols.clone();
        if let Some(text) = existing {
            let previous: std::collections::BTreeSet<String> = serde_json::from_str(&text)?;
            symbols.extend(previous);
        }
        tx.execute(
            "INSERT INTO component_dependencies(project_id, source_component_id, \
                 target_component_id, dependency_type, confidence, detection_method, symbols) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(project_id, source_component_id, target_component_id, detection_method) \
             DO UPDATE SET symbols = excluded.symbols, confidence = excluded.confidence;",
            params![
                project_id,
                edge.source_component_id,
                edge.target_component_id,
                edge.dependency_type,
                edge.confidence,
                edge.detection_method,
                to_json(&symbols)?,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_edges(&self, project_id: &str) -> RippleResult<Vec<DependencyEdge>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM component_dependencies WHERE project_id = ?1 \
             ORDER BY source_component_id, target_component_id, detection_method;"
        ))?;
        let rows = stmt.query_map(params![project_id], edge_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Edges whose target is `component_id`.
    pub fn list_edges_into(
        &self,
        project_id: &str,
        component_id: &str,
    ) -> RippleResult<Vec<DependencyEdge>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM component_dependencies \
             WHERE project_id = ?1 AND target_component_id = ?2 \
             ORDER BY source_component_id, detection_method;"
        ))?;
        let rows = stmt.query_map(params![project_id, component_id], edge_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_external_dependencies(
        &self,
        project_id: &str,
    ) -> RippleResult<Vec<ExternalDependency>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT file_path, source, line FROM external_dependencies \
             WHERE project_id = ?1 ORDER BY file_path, line;",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(ExternalDependency {
                file_path: row.get(0)?,
                source: row.get(1)?,
                line: row.get::<_, Option<u32>>(2)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Change requests
    // -----------------------------------------------------------------------

    pub fn insert_change_request(&self, change: &ChangeRequest) -> RippleResult<()> {
        self.connect()?.execute(
            "INSERT INTO change_requests(id, project_id, component_id, author_id, title, \
                 description, status, created_at, updated_at, resolved_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                change.id,
                change.project_id,
                change.component_id,
                change.author_id,
                change.title,
                change.description,
                change.status,
                change.created_at,
                change.updated_at,
                change.resolved_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_change_request(&self, change_id: &str) -> RippleResult<Option<ChangeRequest>> {
        let conn = self.connect()?;
        let change = conn
            .query_row(
                &format!("SELECT {CHANGE_COLUMNS} FROM change_requests WHERE id = ?1;"),
                params![change_id],
                change_from_row,
            )
            .optional()?;
        Ok(change)
    }

    pub fn list_change_requests(&self, project_id: &str) -> RippleResult<Vec<ChangeRequest>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANGE_COLUMNS} FROM change_requests WHERE project_id = ?1 \
             ORDER BY created_at DESC;"
        ))?;
        let rows = stmt.query_map(params![project_id], change_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_change_status(&self, change_id: &str, status: ChangeStatus) -> RippleResult<()> {
        let updated = self.connect()?.execute(
            "UPDATE change_requests SET status = ?1, updated_at = ?2 WHERE id = ?3;",
            params![status, Utc::now(), change_id],
        )?;
        if updated == 0 {
            return Err(RippleError::NotFound(format!("change request {change_id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Impacts
    // -----------------------------------------------------------------------

    pub fn insert_impacts(&self, impacts: &[ChangeImpact]) -> RippleResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        insert_impact_rows(&tx, impacts)?;
        tx.commit()?;
        Ok(())
    }

    /// Record the parser stage in one transaction: move the request from
    /// `pending_analysis` to `analysis_complete`, insert its impacts and flag
    /// the affected components. Returns `false` and writes nothing when the
    /// request is no longer `pending_analysis`.
    pub fn commit_analysis(
        &self,
        change_id: &str,
        impacts: &[ChangeImpact],
        flag: &[String],
    ) -> RippleResult<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let claimed = tx.execute(
            "UPDATE change_requests SET status = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status = ?4;",
            params![
                ChangeStatus::AnalysisComplete,
                Utc::now(),
                change_id,
                ChangeStatus::PendingAnalysis
            ],
        )?;
        if claimed == 0 {
            return Ok(false);
        }
        insert_impact_rows(&tx, impacts)?;
        for component_id in flag {
            tx.execute(
                "UPDATE components SET status = ?1 WHERE id = ?2;",
                params![ComponentStatus::Flagged, component_id],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    pub fn get_impact(&self, impact_id: &str) -> RippleResult<Option<ChangeImpact>> {
        let conn = self.connect()?;
        let impact = conn
            .query_row(
                &format!("SELECT {IMPACT_COLUMNS} FROM change_impacts i WHERE i.id = ?1;"),
                params![impact_id],
                impact_from_row,
            )
            .optional()?;
        Ok(impact)
    }

    pub fn list_impacts(&self, change_id: &str) -> RippleResult<Vec<ChangeImpact>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {IMPACT_COLUMNS} FROM change_impacts i WHERE i.change_request_id = ?1 \
             ORDER BY i.component_id, i.contributor_id;"
        ))?;
        let rows = stmt.query_map(params![change_id], impact_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Marks an unresolved impact acknowledged. Returns false when the impact
    /// was already acknowledged or dismissed.
    pub fn acknowledge_impact(
        &self,
        impact_id: &str,
        at: DateTime<Utc>,
        auto_confirmed: bool,
    ) -> RippleResult<bool> {
        let updated = self.connect()?.execute(
            "UPDATE change_impacts SET acknowledged = 1, acknowledged_at = ?1, \
                 auto_confirmed = ?2 \
             WHERE id = ?3 AND acknowledged = 0 AND dismissed = 0;",
            params![at, auto_confirmed, impact_id],
        )?;
        Ok(updated > 0)
    }

    /// Marks an unresolved impact dismissed. Returns false when it was
    /// already resolved.
    pub fn dismiss_impact(&self, impact_id: &str, at: DateTime<Utc>) -> RippleResult<bool> {
        let updated = self.connect()?.execute(
            "UPDATE change_impacts SET dismissed = 1, acknowledged_at = ?1 \
             WHERE id = ?2 AND acknowledged = 0 AND dismissed = 0;",
            params![at, impact_id],
        )?;
        Ok(updated > 0)
    }

    pub fn set_llm_annotation(
        &self,
        impact_id: &str,
        annotation: &serde_json::Value,
    ) -> RippleResult<()> {
        self.connect()?.execute(
            "UPDATE change_impacts SET llm_annotation = ?1 WHERE id = ?2;",
            params![to_json(annotation)?, impact_id],
        )?;
        Ok(())
    }

    /// Unresolved impacts whose change request is not terminal, paired with
    /// the request's creation time.
    pub fn list_open_unresolved_impacts(
        &self,
    ) -> RippleResult<Vec<(ChangeImpact, DateTime<Utc>)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {IMPACT_COLUMNS}, c.created_at FROM change_impacts i \
             JOIN change_requests c ON c.id = i.change_request_id \
             WHERE i.acknowledged = 0 AND i.dismissed = 0 \
               AND c.status NOT IN (?1, ?2) \
             ORDER BY c.created_at, i.id;"
        ))?;
        let rows = stmt.query_map(
            params![ChangeStatus::Approved, ChangeStatus::Rejected],
            |row| Ok((impact_from_row(row)?, row.get::<_, DateTime<Utc>>(13)?)),
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Distinct components named by the request's impacts.
    pub fn affected_component_ids(&self, change_id: &str) -> RippleResult<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT component_id FROM change_impacts \
             WHERE change_request_id = ?1 ORDER BY component_id;",
        )?;
        let rows = stmt.query_map(params![change_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Approval / rejection
    // -----------------------------------------------------------------------

    /// Promote drafts, stabilize components, resolve the request and record
    /// a snapshot of the project's files. Returns the snapshot id.
    pub fn commit_approval(&self, commit: &ApprovalCommit) -> RippleResult<String> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        for promoted in &commit.promoted {
            let parsed = promoted.parsed_symbols.as_ref().map(to_json).transpose()?;
            tx.execute(
                "UPDATE project_files SET storage_key = ?1, content_hash = ?2, size_bytes = ?3, \
                     parsed_symbols = COALESCE(?4, parsed_symbols), \
                     updated_at = CURRENT_TIMESTAMP \
                 WHERE id = ?5;",
                params![
                    promoted.storage_key,
                    promoted.content_hash,
                    promoted.size_bytes,
                    parsed,
                    promoted.file_id
                ],
            )?;
            tx.execute(
                "UPDATE file_drafts SET is_active = 0 WHERE id = ?1;",
                params![promoted.draft_id],
            )?;
        }

        for component_id in &commit.stabilize {
            tx.execute(
                "UPDATE components SET status = ?1 WHERE id = ?2;",
                params![ComponentStatus::Stable, component_id],
            )?;
        }

        tx.execute(
            "UPDATE change_requests SET status = ?1, updated_at = ?2, resolved_at = ?2 \
             WHERE id = ?3;",
            params![
                ChangeStatus::Approved,
                commit.resolved_at,
                commit.change_request_id
            ],
        )?;

        let snapshot_id = new_id();
        tx.execute(
            "INSERT INTO project_snapshots(id, project_id, change_request_id, created_at) \
             VALUES (?1, ?2, ?3, ?4);",
            params![
                snapshot_id,
                commit.project_id,
                commit.change_request_id,
                commit.resolved_at
            ],
        )?;
        tx.execute(
            "INSERT INTO snapshot_files(snapshot_id, file_id, path, storage_key, content_hash) \
             SELECT ?1, id, path, storage_key, content_hash FROM project_files \
             WHERE project_id = ?2;",
            params![snapshot_id, commit.project_id],
        )?;

        tx.commit()?;
        Ok(snapshot_id)
    }

    pub fn commit_rejection(
        &self,
        change_id: &str,
        stabilize: &[String],
        resolved_at: DateTime<Utc>,
    ) -> RippleResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        for component_id in stabilize {
            tx.execute(
                "UPDATE components SET status = ?1 WHERE id = ?2;",
                params![ComponentStatus::Stable, component_id],
            )?;
        }
        tx.execute(
            "UPDATE change_requests SET status = ?1, updated_at = ?2, resolved_at = ?2 \
             WHERE id = ?3;",
            params![ChangeStatus::Rejected, resolved_at, change_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_snapshots(&self, project_id: &str) -> RippleResult<Vec<ProjectSnapshot>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, change_request_id, created_at FROM project_snapshots \
             WHERE project_id = ?1 ORDER BY created_at, id;",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(ProjectSnapshot {
                id: row.get(0)?,
                project_id: row.get(1)?,
                change_request_id: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_snapshot_files(&self, snapshot_id: &str) -> RippleResult<Vec<SnapshotFile>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT file_id, path, storage_key, content_hash FROM snapshot_files \
             WHERE snapshot_id = ?1 ORDER BY path;",
        )?;
        let rows = stmt.query_map(params![snapshot_id], |row| {
            Ok(SnapshotFile {
                file_id: row.get(0)?,
                path: row.get(1)?,
                storage_key: row.get(2)?,
                content_hash: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------
