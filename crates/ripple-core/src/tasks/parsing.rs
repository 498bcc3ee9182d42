//! Parse every file of a project and rebuild its dependency graph.

use std::path::Path;

use tracing::{info, warn};

use crate::errors::{RippleError, RippleResult};
use crate::indexer::dependencies::{build_dependency_graph, DependencyGraph, IndexedFile};
use crate::indexer::filesystem::{compute_content_hash, iter_project_files};
use crate::indexer::pipeline::{parse_sources, FileFailure, SourceFile};
use crate::models::{new_id, ProjectFile};
use crate::store::database::Database;
use crate::store::events;
use crate::store::objects::file_key;
use crate::tasks::TaskContext;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParseProjectReport {
    pub parsed: usize,
    /// Files with no supported language.
    pub skipped: usize,
    pub failed: Vec<FileFailure>,
    pub edges: usize,
    pub external: usize,
}

/// Rebuild the project's parser-derived graph from the stored snapshots.
pub fn rebuild_dependency_graph(db: &Database, project_id: &str) -> RippleResult<DependencyGraph> {
    let files = db.list_project_files(project_id)?;
    let graph = build_dependency_graph(files.iter().filter_map(IndexedFile::from_project_file));
    db.replace_parser_graph(project_id, &graph)?;
    Ok(graph)
}

/// Download, parse and snapshot every file of `project_id`, rebuild the
/// graph and tell the project owner. A file that cannot be downloaded or
/// parsed loses its previous snapshot and does not stop the batch.
pub fn parse_project(ctx: &TaskContext, project_id: &str) -> RippleResult<ParseProjectReport> {
    let project = ctx
        .db
        .get_project(project_id)?
        .ok_or_else(|| RippleError::NotFound(format!("project {project_id}")))?;

    let lock = ctx.locks.get(project_id);
    let _guard = lock.lock();

    let files = ctx.db.list_project_files(project_id)?;
    let mut report = ParseProjectReport::default();
    let mut sources = Vec::with_capacity(files.len());
    for file in &files {
        match ctx.objects.get(&file.storage_key) {
            Ok(content) => sources.push(SourceFile::new(&file.path, content)),
            Err(e) => {
                warn!("could not download {}: {e}", file.path);
                report.failed.push(FileFailure {
                    path: file.path.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    let parse_report = parse_sources(&ctx.registry, &sources, ctx.settings.parse_workers);
    report.skipped = parse_report.skipped.len();
    report.failed.extend(parse_report.failed);

    for outcome in parse_report.parsed {
        let Some(file) = files.iter().find(|f| f.path == outcome.parsed.path) else {
            continue;
        };
        ctx.db.set_parsed_symbols(&file.id, Some(&outcome.parsed))?;
        report.parsed += 1;
    }
    for failure in &report.failed {
        if let Some(file) = files.iter().find(|f| f.path == failure.path) {
            ctx.db.set_parsed_symbols(&file.id, None)?;
        }
    }

    let graph = rebuild_dependency_graph(&ctx.db, project_id)?;
    report.edges = graph.edges.len();
    report.external = graph.external.len();

    info!(
        "project {project_id} parsed in {}ms: {} parsed, {} skipped, {} failed, {} edges",
        parse_report.elapsed_ms,
        report.parsed,
        report.skipped,
        report.failed.len(),
        report.edges
    );
    ctx.events.publish(
        &project.owner_id,
        events::PROJECT_FILES_READY,
        events::project_payload(project_id),
    );
    Ok(report)
}

/// Register every supported file under `root` into `project_id`, storing its
/// bytes in the object store. `assign` maps a relative path to its owning
/// component. Returns the number of files registered.
pub fn load_local_project<F>(
    ctx: &TaskContext,
    project_id: &str,
    root: &Path,
    assign: F,
) -> RippleResult<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let scanned = iter_project_files(root, ctx.settings.exclude_sensitive)?;
    let mut registered = 0;
    for file in scanned {
        let content = match std::fs::read(&file.absolute) {
            Ok(content) => content,
            Err(e) => {
                warn!("could not read {}: {e}", file.absolute.display());
                continue;
            }
        };
        let storage_key = file_key(project_id, &file.relative);
        ctx.objects.put(&storage_key, &content)?;
        ctx.db.upsert_project_file(&ProjectFile {
            id: new_id(),
            project_id: project_id.to_string(),
            component_id: assign(&file.relative),
            path: file.relative.clone(),
            language: Some(file.language.name().to_string()),
            size_bytes: i64::try_from(file.size_bytes).unwrap_or(i64::MAX),
            storage_key,
            content_hash: Some(compute_content_hash(&content)),
            parsed_symbols: None,
        })?;
        registered += 1;
    }
    info!("registered {registered} file(s) from {}", root.display());
    Ok(registered)
}

/// Component for a path by its top-level directory name.
pub fn assign_by_top_level_dir<'a>(
    components: &'a [crate::models::Component],
) -> impl Fn(&str) -> Option<String> + 'a {
    move |path: &str| {
        let top = path.split('/').next()?;
        components
            .iter()
            .find(|c| c.name == top)
            .map(|c| c.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParsedFile, StrictnessMode};
    use crate::store::database::fixtures::seed_file;
    use crate::tasks::tests::test_context;
    use std::collections::BTreeSet;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_and_parse_local_project() {
        let t = test_context(StrictnessMode::Visibility);
        let ctx = &t.ctx;
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "X/utils.ts",
            "export function helper(a: number) { return a; }\nexport function other() {}\n",
        );
        write(
            dir.path(),
            "Y/app.ts",
            "import { helper } from '../X/utils';\nimport React from 'react';\nhelper(1);\n",
        );
        write(dir.path(), "Y/README.md", "# docs\n");

        let components = ctx.db.list_components("p1").unwrap();
        let loaded =
            load_local_project(ctx, "p1", dir.path(), assign_by_top_level_dir(&components)).unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(t.objects.len(), 2);

        let report = parse_project(ctx, "p1").unwrap();
        assert_eq!(report.parsed, 2);
        assert!(report.failed.is_empty());
        assert_eq!(report.edges, 1);
        assert_eq!(report.external, 1);

        let edges = ctx.db.list_edges("p1").unwrap();
        assert_eq!(edges[0].source_component_id, "Y");
        assert_eq!(edges[0].target_component_id, "X");
        assert_eq!(edges[0].symbols, BTreeSet::from(["helper".to_string()]));

        let app = ctx.db.get_project_file_by_path("p1", "Y/app.ts").unwrap().unwrap();
        let parsed = app.parsed_symbols.unwrap();
        assert_eq!(parsed.imports.len(), 2);
        assert_eq!(t.events.recipients(events::PROJECT_FILES_READY), vec!["owner"]);
    }

    #[test]
    fn test_missing_object_is_isolated() {
        let t = test_context(StrictnessMode::Visibility);
        let ctx = &t.ctx;
        let stale = ParsedFile {
            path: "X/lost.ts".into(),
            language: "typescript".into(),
            ..Default::default()
        };
        let lost = seed_file(&ctx.db, "p1", Some("X"), "X/lost.ts", Some(stale));
        let kept = seed_file(&ctx.db, "p1", Some("X"), "X/kept.ts", None);
        ctx.objects
            .put(&file_key("p1", "X/kept.ts"), b"export const a = 1;\n")
            .unwrap();

        let report = parse_project(ctx, "p1").unwrap();
        assert_eq!(report.parsed, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "X/lost.ts");
        assert!(ctx
            .db
            .get_project_file(&kept)
            .unwrap()
            .unwrap()
            .parsed_symbols
            .is_some());
        assert!(ctx
            .db
            .get_project_file(&lost)
            .unwrap()
            .unwrap()
            .parsed_symbols
            .is_none());
    }

    #[test]
    fn test_unknown_project() {
        let t = test_context(StrictnessMode::Visibility);
        assert!(matches!(
            parse_project(&t.ctx, "nope"),
            Err(RippleError::NotFound(_))
        ));
    }
}
