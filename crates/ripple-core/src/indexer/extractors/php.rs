//! PHP extraction.

use tree_sitter::Node;

use super::common::{
    children, end_line, enclosing, enclosing_name, field_text, line, strip_quotes, text, walk,
};
use super::{FacetResult, SymbolExtractor};
use crate::models::{Call, Definition, Export, Import, SymbolKind};

pub struct PhpExtractor;

const INCLUDE_KINDS: &[&str] = &[
    "include_expression",
    "include_once_expression",
    "require_expression",
    "require_once_expression",
];

const TYPE_KINDS: &[&str] = &[
    "class_declaration",
    "interface_declaration",
    "trait_declaration",
    "enum_declaration",
];

impl SymbolExtractor for PhpExtractor {
    fn extract_imports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Import> {
        let mut imports = Vec::new();
        let kinds: Vec<&str> = INCLUDE_KINDS
            .iter()
            .copied()
            .chain(["namespace_use_clause"])
            .collect();
        for node in walk(root, &kinds) {
            if node.kind() == "namespace_use_clause" {
                let raw = text(node, source);
                let path = raw.split(" as ").next().unwrap_or(&raw).trim().trim_start_matches('\\');
                let import = match path.rsplit_once('\\') {
                    Some((namespace, name)) => {
                        Import::new(namespace, line(node)).with_symbols([name])
                    }
                    None => Import::new(path, line(node)).with_symbols([path]),
                };
                imports.push(import);
                continue;
            }
            let Some(literal) = walk(node, &["string", "encapsed_string"]).into_iter().next() else {
                continue;
            };
            let mut target = strip_quotes(&text(literal, source));
            // `__DIR__ . '/lib.php'` is relative to the including file.
            if text(node, source).contains("__DIR__") && target.starts_with('/') {
                target = format!(".{target}");
            }
            imports.push(Import::new(target, line(node)).wildcard());
        }
        Ok(imports)
    }

    fn extract_exports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Export> {
        let mut exports = Vec::new();
        let kinds: Vec<&str> = TYPE_KINDS
            .iter()
            .copied()
            .chain(["function_definition", "method_declaration"])
            .collect();
        for node in walk(root, &kinds) {
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let (kind, signature) = match node.kind() {
                "function_definition" => {
                    if enclosing(node, &["function_definition", "method_declaration"]).is_some() {
                        continue;
                    }
                    (SymbolKind::Function, signature(node, &name, source))
                }
                "method_declaration" => {
                    if !is_public(node, source) {
                        continue;
                    }
                    (SymbolKind::Method, signature(node, &name, source))
                }
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
            .chain(["function_definition", "method_declaration"])
            .collect();
        for node in walk(root, &kinds) {
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let (kind, signature, parent) = match node.kind() {
                "function_definition" => (SymbolKind::Function, signature(node, &name, source), None),
                "method_declaration" => (
                    SymbolKind::Method,
                    signature(node, &name, source),
                    enclosing_name(node, TYPE_KINDS, source),
                ),
                other => (type_kind(other), name.clone(), None),
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
        let kinds = [
            "function_call_expression",
            "member_call_expression",
            "nullsafe_member_call_expression",
            "scoped_call_expression",
        ];
        for node in walk(root, &kinds) {
            let callee = match node.kind() {
                "function_call_expression" => match field_text(node, "function", source) {
                    Some(function) => function,
                    None => continue,
                },
                "scoped_call_expression" => match (
                    field_text(node, "scope", source),
                    field_text(node, "name", source),
                ) {
                    (Some(scope), Some(name)) => format!("{scope}::{name}"),
                    _ => continue,
                },
                _ => match (
                    field_text(node, "object", source),
                    field_text(node, "name", source),
                ) {
                    (Some(object), Some(name)) => format!("{object}.{name}"),
                    _ => continue,
                },
            };
            calls.push(Call {
                callee,
                line: line(node),
                parent_def: enclosing_name(
                    node,
                    &["function_definition", "method_declaration"],
                    source,
                ),
            });
        }
        Ok(calls)
    }
}

/// Methods without a visibility modifier are public.
fn is_public(node: Node<'_>, source: &[u8]) -> bool {
    let visibility: Vec<String> = children(node)
        .into_iter()
        .filter(|c| c.kind() == "visibility_modifier")
        .map(|c| text(c, source).to_lowercase())
        .collect();
    visibility.is_empty() || visibility.iter().any(|v| v == "public")
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
    match field_text(node, "return_type", source) {
        Some(ret) => format!("{name}{params}: {ret}"),
        None => format!("{name}{params}"),
    }
}
