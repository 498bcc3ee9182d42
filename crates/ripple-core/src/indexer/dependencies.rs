//! Component dependency graph from parsed file snapshots.
//!
//! Building the graph is three explicit phases: [`ExportIndex::build`] sees
//! every file before anything resolves, [`resolve_edges`] turns imports into
//! file-level candidate edges, and [`merge_edges`] folds those into one edge
//! per ordered component pair.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::indexer::imports::resolve_import_path;
use crate::models::{DependencyEdge, ExternalDependency, Import, ParsedFile, ProjectFile, SymbolKind};

/// A parsed file and the component that owns it.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedFile {
    pub path: String,
    pub component_id: Option<String>,
    pub parsed: ParsedFile,
}

impl IndexedFile {
    pub fn new(component_id: Option<&str>, parsed: ParsedFile) -> Self {
        Self {
            path: parsed.path.clone(),
            component_id: component_id.map(str::to_string),
            parsed,
        }
    }

    /// Project files without a symbol snapshot are not indexed.
    pub fn from_project_file(file: &ProjectFile) -> Option<Self> {
        let mut parsed = file.parsed_symbols.clone()?;
        // Snapshots are keyed by the project path even if the parse saw another.
        parsed.path = file.path.clone();
        Some(Self {
            path: file.path.clone(),
            component_id: file.component_id.clone(),
            parsed,
        })
    }
}

// ---------------------------------------------------------------------------
// Index phase
// ---------------------------------------------------------------------------

/// Every known file plus, for each exported name, the files exporting it.
#[derive(Debug, Default)]
pub struct ExportIndex {
    files: BTreeMap<String, IndexedFile>,
    paths: HashSet<String>,
    exporters: BTreeMap<String, BTreeSet<String>>,
}

impl ExportIndex {
    pub fn build<I>(files: I) -> Self
    where
        I: IntoIterator<Item = IndexedFile>,
    {
        let mut index = Self::default();
        for file in files {
            for export in &file.parsed.exports {
                index
                    .exporters
                    .entry(export.name.clone())
                    .or_default()
                    .insert(file.path.clone());
            }
            index.paths.insert(file.path.clone());
            index.files.insert(file.path.clone(), file);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&IndexedFile> {
        self.files.get(path)
    }

    pub fn files(&self) -> impl Iterator<Item = &IndexedFile> {
        self.files.values()
    }

    pub fn component_of(&self, path: &str) -> Option<&str> {
        self.files.get(path)?.component_id.as_deref()
    }

    /// Files exporting `name`, in path order.
    pub fn exporters_of(&self, name: &str) -> Vec<&str> {
        self.exporters
            .get(name)
            .map(|paths| paths.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Resolve `source` imported by `importer` to an indexed path.
    pub fn resolve(&self, importer: &str, source: &str) -> Option<String> {
        resolve_import_path(importer, source, &self.paths)
    }
}

// ---------------------------------------------------------------------------
// Resolve phase
// ---------------------------------------------------------------------------

/// Names an import is confirmed to use from `target`. An explicit import
/// keeps only names the target exports; a default import also confirms the
/// target's default export.
pub fn confirmed_symbols(import: &Import, target: &ParsedFile) -> BTreeSet<String> {
    let exported = target.export_names();
    let mut confirmed: BTreeSet<String> = import
        .symbols
        .iter()
        .filter(|s| exported.contains(s.as_str()))
        .cloned()
        .collect();
    if import.is_default {
        confirmed.extend(
            target
                .exports
                .iter()
                .filter(|e| e.kind == SymbolKind::Default)
                .map(|e| e.name.clone()),
        );
    }
    confirmed
}

/// Unmerged output of the resolve phase.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolution {
    pub edges: Vec<DependencyEdge>,
    pub external: Vec<ExternalDependency>,
}

pub fn resolve_edges(index: &ExportIndex) -> Resolution {
    let mut resolution = Resolution::default();
    for file in index.files() {
        let Some(source_component) = file.component_id.as_deref() else {
            continue;
        };
        for import in &file.parsed.imports {
            if !import.is_relative() {
                resolution.external.push(external(file, import));
                continue;
            }
            let Some(target_path) = index.resolve(&file.path, &import.source) else {
                debug!("unresolved import {} in {}", import.source, file.path);
                resolution.external.push(external(file, import));
                continue;
            };
            let Some(target) = index.get(&target_path) else {
                continue;
            };
            let Some(target_component) = target.component_id.as_deref() else {
                continue;
            };
            if target_component == source_component {
                continue;
            }

            let mut edge = DependencyEdge::parser(source_component, target_component);
            if !import.binds_everything() {
                let confirmed = confirmed_symbols(import, &target.parsed);
                if confirmed.is_empty() {
                    continue;
                }
                edge.symbols = confirmed;
            }
            resolution.edges.push(edge);
        }
    }
    resolution
}

fn external(file: &IndexedFile, import: &Import) -> ExternalDependency {
    ExternalDependency {
        file_path: file.path.clone(),
        source: import.source.clone(),
        line: import.line,
    }
}

// ---------------------------------------------------------------------------
// Merge phase
// ---------------------------------------------------------------------------

/// One edge per `(source, target)` with the symbol sets unioned, sorted by
/// the pair.
pub fn merge_edges<I>(edges: I) -> Vec<DependencyEdge>
where
    I: IntoIterator<Item = DependencyEdge>,
{
    let mut merged: BTreeMap<(String, String), DependencyEdge> = BTreeMap::new();
    for edge in edges {
        let key = (
            edge.source_component_id.clone(),
            edge.target_component_id.clone(),
        );
        let merged_edge = merged.entry(key).or_insert_with(|| {
            DependencyEdge::parser(&edge.source_component_id, &edge.target_component_id)
        });
        merged_edge.symbols.extend(edge.symbols);
    }
    merged.into_values().collect()
}

/// The project's parser-derived graph.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DependencyGraph {
    pub edges: Vec<DependencyEdge>,
    pub external: Vec<ExternalDependency>,
}

pub fn build_dependency_graph<I>(files: I) -> DependencyGraph
where
    I: IntoIterator<Item = IndexedFile>,
{
    let index = ExportIndex::build(files);
    let resolution = resolve_edges(&index);
    let edges = merge_edges(resolution.edges);
    debug!(
        "dependency graph: {} files, {} edges, {} external imports",
        index.len(),
        edges.len(),
        resolution.external.len()
    );
    DependencyGraph {
        edges,
        external: resolution.external,
    }
}
