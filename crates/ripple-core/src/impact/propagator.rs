//! Which components and contributors a change reaches.
//!
//! Propagation is one hop: only components with an edge into the changed
//! component are candidates, and a candidate is affected only when one of
//! its files imports a changed symbol from a file of the changed component.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::indexer::dependencies::{confirmed_symbols, ExportIndex};
use crate::models::{
    AffectedLines, ChangeImpact, DependencyEdge, DetectionMethod, Export, Import, ParsedFile,
};

// ---------------------------------------------------------------------------
// Changed symbols
// ---------------------------------------------------------------------------

/// Exports added, removed, or changed in kind or signature between the
/// committed snapshot and a draft. With no committed snapshot every draft
/// export counts as changed.
pub fn changed_exports(committed: Option<&ParsedFile>, draft: &ParsedFile) -> BTreeSet<String> {
    let Some(committed) = committed else {
        return draft.exports.iter().map(|e| e.name.clone()).collect();
    };

    let before: BTreeMap<&str, &Export> = committed
        .exports
        .iter()
        .map(|e| (e.name.as_str(), e))
        .collect();
    let after: BTreeMap<&str, &Export> = draft
        .exports
        .iter()
        .map(|e| (e.name.as_str(), e))
        .collect();

    let mut changed = BTreeSet::new();
    for (name, old) in &before {
        match after.get(name) {
            Some(new) if new.kind == old.kind && new.signature == old.signature => {}
            _ => {
                changed.insert(name.to_string());
            }
        }
    }
    for name in after.keys() {
        if !before.contains_key(name) {
            changed.insert(name.to_string());
        }
    }
    changed
}

// ---------------------------------------------------------------------------
// Affected components
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AffectedComponent {
    pub component_id: String,
    pub matched_symbols: BTreeSet<String>,
    /// Affected file to the import and call lines referencing the matches.
    pub affected_lines: AffectedLines,
}

impl AffectedComponent {
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.affected_lines.keys().map(String::as_str)
    }
}

/// Changed symbols one import uses, plus the local names it binds them to.
struct ImportMatch {
    symbols: BTreeSet<String>,
    local_names: BTreeSet<String>,
}

/// Wildcard and side-effect imports match any content change of the target
/// component, whether or not an export changed.
fn match_import(
    import: &Import,
    target: &ParsedFile,
    changed: &BTreeSet<String>,
    content_changed: bool,
) -> Option<ImportMatch> {
    let symbols: BTreeSet<String> = if import.binds_everything() {
        if changed.is_empty() && !content_changed {
            return None;
        }
        changed.clone()
    } else {
        let symbols: BTreeSet<String> = import
            .symbols
            .iter()
            .cloned()
            .chain(confirmed_symbols(import, target))
            .filter(|s| changed.contains(s))
            .collect();
        if symbols.is_empty() {
            return None;
        }
        symbols
    };

    let mut local_names = symbols.clone();
    if import.is_default || import.is_wildcard {
        // Default and namespace bindings are referenced through their alias.
        local_names.extend(import.symbols.iter().cloned());
    }
    Some(ImportMatch {
        symbols,
        local_names,
    })
}

/// True when any `.`/`::` separated segment of `callee` is in `names`.
fn callee_references(callee: &str, names: &BTreeSet<String>) -> bool {
    callee
        .split(['.', ':'])
        .filter(|segment| !segment.is_empty())
        .any(|segment| names.contains(segment))
}

/// Candidates are the sources of `edges_into` the changed component. Files
/// of a candidate are checked against the committed snapshots in `index`.
/// `content_changed` is true when any drafted file of the component differs
/// from its committed content.
pub fn find_affected_components(
    changed_component_id: &str,
    changed_symbols: &BTreeSet<String>,
    content_changed: bool,
    edges_into: &[DependencyEdge],
    index: &ExportIndex,
) -> Vec<AffectedComponent> {
    if changed_symbols.is_empty() && !content_changed {
        return Vec::new();
    }

    let candidates: BTreeSet<&str> = edges_into
        .iter()
        .filter(|e| e.target_component_id == changed_component_id)
        .map(|e| e.source_component_id.as_str())
        .filter(|source| *source != changed_component_id)
        .collect();

    let mut affected: BTreeMap<String, AffectedComponent> = BTreeMap::new();

    for file in index.files() {
        let Some(component_id) = file.component_id.as_deref() else {
            continue;
        };
        if !candidates.contains(component_id) {
            continue;
        }

        let mut matched = false;
        let mut matched_symbols = BTreeSet::new();
        let mut local_names = BTreeSet::new();
        let mut lines = BTreeSet::new();

        for import in &file.parsed.imports {
            if !import.is_relative() {
                continue;
            }
            let Some(target) = index
                .resolve(&file.path, &import.source)
                .and_then(|path| index.get(&path))
            else {
                continue;
            };
            if target.component_id.as_deref() != Some(changed_component_id) {
                continue;
            }
            if let Some(m) = match_import(import, &target.parsed, changed_symbols, content_changed) {
                matched = true;
                matched_symbols.extend(m.symbols);
                local_names.extend(m.local_names);
                lines.insert(import.line);
            }
        }

        if !matched {
            continue;
        }
        for call in &file.parsed.calls {
            if callee_references(&call.callee, &local_names) {
                lines.insert(call.line);
            }
        }

        debug!(
            "{} affected by {:?} via {}",
            component_id, matched_symbols, file.path
        );
        let entry = affected
            .entry(component_id.to_string())
            .or_insert_with(|| AffectedComponent {
                component_id: component_id.to_string(),
                ..AffectedComponent::default()
            });
        entry.matched_symbols.extend(matched_symbols);
        entry
            .affected_lines
            .insert(file.path.clone(), lines.into_iter().filter(|l| *l > 0).collect());
    }

    affected.into_values().collect()
}

/// One parser impact per (affected component, contributor). Contributors
/// listed twice for a component get one row.
pub fn build_impacts(
    change_request_id: &str,
    affected: &[AffectedComponent],
    contributors: &BTreeMap<String, Vec<String>>,
) -> Vec<ChangeImpact> {
    let mut impacts = Vec::new();
    for component in affected {
        let users: BTreeSet<&String> = contributors
            .get(&component.component_id)
            .map(|users| users.iter().collect())
            .unwrap_or_default();
        for user in users {
            let mut impact = ChangeImpact::new(
                change_request_id,
                &component.component_id,
                user,
                DetectionMethod::Parser,
            );
            impact.affected_lines = component.affected_lines.clone();
            impacts.push(impact);
        }
    }
    impacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::dependencies::{build_dependency_graph, IndexedFile};
    use crate::models::{Call, SymbolKind};

    fn export(name: &str, signature: &str) -> Export {
        Export {
            name: name.into(),
            kind: SymbolKind::Function,
            signature: signature.into(),
            line: 1,
        }
    }

    fn parsed(path: &str, exports: Vec<Export>, imports: Vec<Import>, calls: &[(&str, u32)]) -> ParsedFile {
        let mut parsed = ParsedFile::new(path, "typescript");
        parsed.exports = exports;
        parsed.imports = imports;
        parsed.calls = calls
            .iter()
            .map(|(callee, line)| Call {
                callee: callee.to_string(),
                line: *line,
                parent_def: None,
            })
            .collect();
        parsed
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// X exports helper and other; Y imports helper; Z imports only other.
    fn helper_project() -> Vec<IndexedFile> {
        vec![
            IndexedFile::new(
                Some("X"),
                parsed(
                    "x/utils.ts",
                    vec![export("helper", "helper(a)"), export("other", "other()")],
                    vec![],
                    &[],
                ),
            ),
            IndexedFile::new(
                Some("Y"),
                parsed(
                    "y/app.ts",
                    vec![],
                    vec![Import::new("../x/utils", 1).with_symbols(["helper"])],
                    &[("helper", 4), ("console.log", 5), ("util.helper", 9)],
                ),
            ),
            IndexedFile::new(
                Some("Z"),
                parsed(
                    "z/main.ts",
                    vec![],
                    vec![Import::new("../x/utils", 2).with_symbols(["other"])],
                    &[("other", 3)],
                ),
            ),
        ]
    }

    fn affected_by(files: Vec<IndexedFile>, changed: &[&str]) -> Vec<AffectedComponent> {
        let graph = build_dependency_graph(files.clone());
        let index = ExportIndex::build(files);
        find_affected_components("X", &set(changed), !changed.is_empty(), &graph.edges, &index)
    }

    #[test]
    fn test_changed_exports_detects_signature_changes() {
        let before = parsed(
            "x/utils.ts",
            vec![export("helper", "helper(a)"), export("gone", "gone()"), export("same", "same()")],
            vec![],
            &[],
        );
        let after = parsed(
            "x/utils.ts",
            vec![export("helper", "helper(a, b)"), export("same", "same()"), export("added", "added()")],
            vec![],
            &[],
        );
        assert_eq!(
            changed_exports(Some(&before), &after),
            set(&["added", "gone", "helper"])
        );
        assert_eq!(changed_exports(None, &after), set(&["added", "helper", "same"]));
        assert!(changed_exports(Some(&after), &after).is_empty());
    }

    #[test]
    fn test_helper_change_reaches_only_importer() {
        let affected = affected_by(helper_project(), &["helper"]);
        assert_eq!(affected.len(), 1);
        assert_eq!(affected[0].component_id, "Y");
        assert_eq!(affected[0].matched_symbols, set(&["helper"]));
        assert_eq!(affected[0].affected_lines["y/app.ts"], vec![1, 4, 9]);
    }

    #[test]
    fn test_unrelated_change_affects_nobody_importing_other_names() {
        let affected = affected_by(helper_project(), &["other"]);
        assert_eq!(affected.len(), 1);
        assert_eq!(affected[0].component_id, "Z");
        assert!(affected_by(helper_project(), &["unknown"]).is_empty());
        assert!(affected_by(helper_project(), &[]).is_empty());
    }

    #[test]
    fn test_wildcard_import_is_conservatively_affected() {
        let mut files = helper_project();
        files.push(IndexedFile::new(
            Some("W"),
            parsed(
                "w/side.ts",
                vec![],
                vec![Import::new("../x/utils", 1).with_symbols(["utils"]).wildcard()],
                &[("utils.other", 6), ("unrelated", 7)],
            ),
        ));
        let affected = affected_by(files, &["other"]);
        let ids: Vec<&str> = affected.iter().map(|a| a.component_id.as_str()).collect();
        assert_eq!(ids, vec!["W", "Z"]);
        assert_eq!(affected[0].affected_lines["w/side.ts"], vec![1, 6]);
    }

    #[test]
    fn test_body_edit_reaches_wildcard_importers_only() {
        let mut files = helper_project();
        files.push(IndexedFile::new(
            Some("W"),
            parsed(
                "w/side.ts",
                vec![],
                vec![Import::new("../x/utils", 1).with_symbols(["utils"]).wildcard()],
                &[("utils.helper", 6), ("unrelated", 7)],
            ),
        ));
        files.push(IndexedFile::new(
            Some("V"),
            parsed(
                "v/effects.ts",
                vec![],
                vec![Import::new("../x/utils", 3).wildcard()],
                &[],
            ),
        ));
        let graph = build_dependency_graph(files.clone());
        let index = ExportIndex::build(files);

        let affected = find_affected_components("X", &BTreeSet::new(), true, &graph.edges, &index);
        let ids: Vec<&str> = affected.iter().map(|a| a.component_id.as_str()).collect();
        assert_eq!(ids, vec!["V", "W"]);
        assert!(affected[1].matched_symbols.is_empty());
        assert_eq!(affected[1].affected_lines["w/side.ts"], vec![1, 6]);
        assert_eq!(affected[0].affected_lines["v/effects.ts"], vec![3]);

        assert!(find_affected_components("X", &BTreeSet::new(), false, &graph.edges, &index).is_empty());
    }

    #[test]
    fn test_default_import_matches_through_alias() {
        let mut widget = parsed("x/widget.ts", vec![], vec![], &[]);
        widget.exports.push(Export {
            name: "Widget".into(),
            kind: SymbolKind::Default,
            signature: "Widget".into(),
            line: 1,
        });
        let mut import = Import::new("../x/widget", 2).with_symbols(["MyWidget"]);
        import.is_default = true;
        let files = vec![
            IndexedFile::new(Some("X"), widget),
            IndexedFile::new(
                Some("Y"),
                parsed("y/page.ts", vec![], vec![import], &[("MyWidget", 8)]),
            ),
        ];
        let affected = affected_by(files, &["Widget"]);
        assert_eq!(affected.len(), 1);
        assert_eq!(affected[0].affected_lines["y/page.ts"], vec![2, 8]);
    }

    #[test]
    fn test_files_without_edge_are_not_candidates() {
        let files = helper_project();
        let index = ExportIndex::build(files);
        let affected = find_affected_components("X", &set(&["helper"]), true, &[], &index);
        assert!(affected.is_empty());
    }

    #[test]
    fn test_build_impacts_one_per_contributor() {
        let affected = affected_by(helper_project(), &["helper"]);
        let contributors = BTreeMap::from([
            ("Y".to_string(), vec!["bob".to_string(), "alice".to_string(), "bob".to_string()]),
            ("Z".to_string(), vec!["carol".to_string()]),
        ]);
        let impacts = build_impacts("cr1", &affected, &contributors);
        assert_eq!(impacts.len(), 2);
        let users: Vec<&str> = impacts.iter().map(|i| i.contributor_id.as_str()).collect();
        assert_eq!(users, vec!["alice", "bob"]);
        for impact in &impacts {
            assert_eq!(impact.component_id, "Y");
            assert_eq!(impact.change_request_id, "cr1");
            assert_eq!(impact.detection_method, DetectionMethod::Parser);
            assert_eq!(impact.confidence, 1.0);
            assert!(impact.affected_lines.contains_key("y/app.ts"));
        }
    }
}
