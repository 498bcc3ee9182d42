//! Java extraction.

use tree_sitter::Node;

use super::common::{end_line, enclosing_name, field_text, find_child, line, text, walk};
use super::{FacetResult, SymbolExtractor};
use crate::models::{Call, Definition, Export, Import, SymbolKind};

pub struct JavaExtractor;

const TYPE_KINDS: &[&str] = &[
    "class_declaration",
    "interface_declaration",
    "enum_declaration",
    "record_declaration",
];

impl SymbolExtractor for JavaExtractor {
    fn extract_imports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Import> {
        let mut imports = Vec::new();
        for node in walk(root, &["import_declaration"]) {
            let Some(name) = find_child(node, "scoped_identifier")
                .or_else(|| find_child(node, "identifier"))
            else {
                continue;
            };
            let path = text(name, source);
            if find_child(node, "asterisk").is_some() {
                imports.push(Import::new(path, line(node)).wildcard());
                continue;
            }
            let import = match path.rsplit_once('.') {
                Some((package, class)) => {
                    Import::new(package, line(node)).with_symbols([class])
                }
                None => Import::new(path.clone(), line(node)).with_symbols([path.as_str()]),
            };
            imports.push(import);
        }
        Ok(imports)
    }

    fn extract_exports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Export> {
        let mut exports = Vec::new();
        let kinds: Vec<&str> = TYPE_KINDS
            .iter()
            .copied()
            .chain(["method_declaration"])
            .collect();
        for node in walk(root, &kinds) {
            if !is_public(node, source) {
                continue;
            }
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let (kind, signature) = match node.kind() {
                "method_declaration" => (SymbolKind::Method, signature(node, &name, source)),
                other => (type_kind(other), name.clone()),
            };
            exports.push(Export {
                name,
                kind,
                signature,
                line: line(node),
            });
        }
        Ok(exports)
    }

    fn extract_definitions(
        &self,
        root: Node<'_>,
        source: &[u8],
        _path: &str,
    ) -> FacetResult<Definition> {
        let mut definitions = Vec::new();
        let kinds: Vec<&str> = TYPE_KINDS
            .iter()
            .copied()
            .chain(["method_declaration", "constructor_declaration"])
            .collect();
        for node in walk(root, &kinds) {
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let parent = enclosing_name(node, TYPE_KINDS, source);
            let (kind, signature) = match node.kind() {
                "method_declaration" | "constructor_declaration" => {
                    (SymbolKind::Method, signature(node, &name, source))
                }
                other => (type_kind(other), name.clone()),
            };
            definitions.push(Definition {
                name,
                kind,
                signature,
                start_line: line(node),
                end_line: end_line(node),
                parent,
            });
        }
        Ok(definitions)
    }

    fn extract_calls(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Call> {
        let mut calls = Vec::new();
        for node in walk(root, &["method_invocation"]) {
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let callee = match field_text(node, "object", source) {
                Some(object) => format!("{object}.{name}"),
                None => name,
            };
            calls.push(Call {
                callee,
                line: line(node),
                parent_def: enclosing_name(
                    node,
                    &["method_declaration", "constructor_declaration"],
                    source,
                ),
            });
        }
        Ok(calls)
    }
}

fn is_public(node: Node<'_>, source: &[u8]) -> bool {
    find_child(node, "modifiers")
        .map(|m| text(m, source).split_whitespace().any(|w| w == "public"))
        .unwrap_or(false)
}

fn type_kind(kind: &str) -> SymbolKind {
    match kind {
        "interface_declaration" => SymbolKind::Interface,
        "enum_declaration" => SymbolKind::Type,
        _ => SymbolKind::Class,
    }
}

fn signature(node: Node<'_>, name: &str, source: &[u8]) -> String {
    let params = field_text(node, "parameters", source).unwrap_or_default();
    match field_text(node, "type", source) {
        Some(ret) => format!("{ret} {name}{params}"),
        None => format!("{name}{params}"),
    }
}
