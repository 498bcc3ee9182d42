//! TypeScript, TSX and JavaScript extraction. The JavaScript grammar shares
//! node kinds with TypeScript minus the type-level declarations.

use std::collections::HashSet;

use tree_sitter::Node;

use super::common::{
    children, enclosing, end_line, field_text, find_child, line, named_children, strip_quotes,
    text, walk,
};
use super::{FacetResult, SymbolExtractor};
use crate::models::{Call, Definition, Export, Import, SymbolKind};

pub struct TypeScriptExtractor;

const FUNCTION_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "method_definition",
    "function_expression",
    "arrow_function",
];

const CLASS_KINDS: &[&str] = &["class_declaration", "abstract_class_declaration", "class"];

const TYPE_KINDS: &[&str] = &["interface_declaration", "type_alias_declaration", "enum_declaration"];

impl SymbolExtractor for TypeScriptExtractor {
    fn extract_imports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Import> {
        let mut imports = Vec::new();
        for node in walk(root, &["import_statement", "export_statement", "call_expression"]) {
            match node.kind() {
                "import_statement" => imports.extend(es_import(node, source)),
                "export_statement" => imports.extend(re_export(node, source)),
                _ => imports.extend(require_call(node, source)),
            }
        }
        Ok(imports)
    }

    fn extract_exports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Export> {
        let mut exports = Vec::new();
        for node in walk(root, &["export_statement"]) {
            exports.extend(exports_of(node, source));
        }
        Ok(exports)
    }

    fn extract_definitions(
        &self,
        root: Node<'_>,
        source: &[u8],
        _path: &str,
    ) -> FacetResult<Definition> {
        let mut seen: HashSet<(String, u32)> = HashSet::new();
        let mut definitions = Vec::new();
        let kinds: Vec<&str> = FUNCTION_KINDS
            .iter()
            .chain(CLASS_KINDS)
            .chain(TYPE_KINDS)
            .copied()
            .collect();

        for node in walk(root, &kinds) {
            let Some(name) = function_name(node, source) else {
                continue;
            };
            if !seen.insert((name.clone(), line(node))) {
                continue;
            }
            let (kind, parent, signature) = match node.kind() {
                "method_definition" => (
                    SymbolKind::Method,
                    enclosing(node, CLASS_KINDS).and_then(|c| field_text(c, "name", source)),
                    function_signature(node, &name, source),
                ),
                "class_declaration" | "abstract_class_declaration" | "class" => {
                    (SymbolKind::Class, None, name.clone())
                }
                "interface_declaration" => (SymbolKind::Interface, None, name.clone()),
                "type_alias_declaration" | "enum_declaration" => {
                    (SymbolKind::Type, None, name.clone())
                }
                _ => (
                    SymbolKind::Function,
                    None,
                    function_signature(node, &name, source),
                ),
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
        for node in walk(root, &["call_expression"]) {
            let Some(function) = node.child_by_field_name("function") else {
                continue;
            };
            let callee = match function.kind() {
                "identifier" => text(function, source),
                "member_expression" => {
                    match (
                        field_text(function, "object", source),
                        field_text(function, "property", source),
                    ) {
                        (Some(object), Some(property)) => format!("{object}.{property}"),
                        _ => continue,
                    }
                }
                _ => continue,
            };
            calls.push(Call {
                callee,
                line: line(node),
                parent_def: enclosing_function(node, source),
            });
        }
        Ok(calls)
    }
}

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

fn es_import(node: Node<'_>, source: &[u8]) -> Option<Import> {
    if let Some(require) = find_child(node, "import_require_clause") {
        let target = field_text(require, "source", source)?;
        return Some(Import::new(strip_quotes(&target), line(node)).wildcard());
    }

    let target = strip_quotes(&field_text(node, "source", source)?);
    let mut import = Import::new(target, line(node));

    let Some(clause) = find_child(node, "import_clause") else {
        // `import './polyfill'`
        import.is_wildcard = true;
        return Some(import);
    };

    for part in named_children(clause) {
        match part.kind() {
            "identifier" => {
                import.is_default = true;
                import.symbols.insert(text(part, source));
            }
            "namespace_import" => {
                import.is_wildcard = true;
                if let Some(alias) = find_child(part, "identifier") {
                    import.symbols.insert(text(alias, source));
                }
            }
            "named_imports" => {
                for spec in named_children(part) {
                    if spec.kind() != "import_specifier" {
                        continue;
                    }
                    if let Some(name) = field_text(spec, "name", source) {
                        import.symbols.insert(strip_quotes(&name));
                    }
                }
            }
            _ => {}
        }
    }
    Some(import)
}

/// `export { a } from './a'` and `export * from './a'` depend on their source.
fn re_export(node: Node<'_>, source: &[u8]) -> Option<Import> {
    let target = strip_quotes(&field_text(node, "source", source)?);
    let mut import = Import::new(target, line(node));
    match find_child(node, "export_clause") {
        Some(clause) => {
            for spec in named_children(clause) {
                if let Some(name) = field_text(spec, "name", source) {
                    import.symbols.insert(name);
                }
            }
        }
        None => import.is_wildcard = true,
    }
    Some(import)
}

/// `require('./x')`, with destructured bindings as symbols.
fn require_call(node: Node<'_>, source: &[u8]) -> Option<Import> {
    let function = node.child_by_field_name("function")?;
    if function.kind() != "identifier" || text(function, source) != "require" {
        return None;
    }
    let arguments = node.child_by_field_name("arguments")?;
    let first = named_children(arguments).into_iter().next()?;
    if first.kind() != "string" {
        return None;
    }
    let mut import = Import::new(strip_quotes(&text(first, source)), line(node));

    let pattern = node
        .parent()
        .filter(|p| p.kind() == "variable_declarator")
        .and_then(|p| p.child_by_field_name("name"))
        .filter(|n| n.kind() == "object_pattern");
    match pattern {
        Some(pattern) => {
            for prop in named_children(pattern) {
                match prop.kind() {
                    "shorthand_property_identifier_pattern" => {
                        import.symbols.insert(text(prop, source));
                    }
                    "pair_pattern" => {
                        if let Some(key) = field_text(prop, "key", source) {
                            import.symbols.insert(key);
                        }
                    }
                    _ => {}
                }
            }
        }
        None => import.is_wildcard = true,
    }
    Some(import)
}

// ---------------------------------------------------------------------------
// Exports
// ---------------------------------------------------------------------------

fn exports_of(node: Node<'_>, source: &[u8]) -> Vec<Export> {
    let at = line(node);
    let is_default = children(node).iter().any(|c| c.kind() == "default");

    if is_default {
        let target = node
            .child_by_field_name("declaration")
            .or_else(|| node.child_by_field_name("value"));
        let name = target
            .and_then(|t| match t.kind() {
                "identifier" => Some(text(t, source)),
                _ => field_text(t, "name", source),
            })
            .unwrap_or_else(|| "default".to_string());
        let signature = target
            .filter(|t| FUNCTION_KINDS.contains(&t.kind()))
            .map(|t| function_signature(t, &name, source))
            .unwrap_or_else(|| name.clone());
        return vec![Export {
            name,
            kind: SymbolKind::Default,
            signature,
            line: at,
        }];
    }

    if let Some(declaration) = node.child_by_field_name("declaration") {
        return declaration_exports(declaration, at, source);
    }

    // `export { a, b as c }` without a source re-exports local names.
    if node.child_by_field_name("source").is_none() {
        if let Some(clause) = find_child(node, "export_clause") {
            return named_children(clause)
                .into_iter()
                .filter_map(|spec| {
                    let name = field_text(spec, "alias", source)
                        .or_else(|| field_text(spec, "name", source))?;
                    Some(Export {
                        signature: name.clone(),
                        name,
                        kind: SymbolKind::Variable,
                        line: at,
                    })
                })
                .collect();
        }
    }
    Vec::new()
}

fn declaration_exports(declaration: Node<'_>, at: u32, source: &[u8]) -> Vec<Export> {
    let named = |kind: SymbolKind| -> Vec<Export> {
        field_text(declaration, "name", source)
            .map(|name| {
                vec![Export {
                    signature: name.clone(),
                    name,
                    kind,
                    line: at,
                }]
            })
            .unwrap_or_default()
    };

    match declaration.kind() {
        "function_declaration" | "generator_function_declaration" => {
            let Some(name) = field_text(declaration, "name", source) else {
                return Vec::new();
            };
            vec![Export {
                signature: function_signature(declaration, &name, source),
                name,
                kind: SymbolKind::Function,
                line: at,
            }]
        }
        "class_declaration" | "abstract_class_declaration" => named(SymbolKind::Class),
        "interface_declaration" => named(SymbolKind::Interface),
        "type_alias_declaration" | "enum_declaration" => named(SymbolKind::Type),
        "lexical_declaration" | "variable_declaration" => named_children(declaration)
            .into_iter()
            .filter(|d| d.kind() == "variable_declarator")
            .filter_map(|d| {
                let name_node = d.child_by_field_name("name")?;
                if name_node.kind() != "identifier" {
                    return None;
                }
                let name = text(name_node, source);
                Some(Export {
                    signature: text(d, source).lines().next().unwrap_or_default().to_string(),
                    name,
                    kind: SymbolKind::Variable,
                    line: at,
                })
            })
            .collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

/// Declared name, or the variable an anonymous function is assigned to.
fn function_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    if let Some(name) = field_text(node, "name", source) {
        return Some(name);
    }
    if matches!(node.kind(), "arrow_function" | "function_expression") {
        let parent = node.parent()?;
        if parent.kind() == "variable_declarator" {
            let name = parent.child_by_field_name("name")?;
            if name.kind() == "identifier" {
                return Some(text(name, source));
            }
        }
    }
    None
}

fn function_signature(node: Node<'_>, name: &str, source: &[u8]) -> String {
    let params = field_text(node, "parameters", source)
        .or_else(|| field_text(node, "parameter", source))
        .unwrap_or_default();
    let ret = field_text(node, "return_type", source).unwrap_or_default();
    format!("{name}{params}{ret}")
}

fn enclosing_function(node: Node<'_>, source: &[u8]) -> Option<String> {
    let mut current = enclosing(node, FUNCTION_KINDS);
    while let Some(function) = current {
        if let Some(name) = function_name(function, source) {
            return Some(name);
        }
        current = enclosing(function, FUNCTION_KINDS);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::extractors::run_facets;
    use crate::indexer::filesystem::Language;
    use crate::models::ParsedFile;

    fn parse(language: Language, src: &str) -> ParsedFile {
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&language.grammar()).unwrap();
        let tree = parser.parse(src, None).unwrap();
        let outcome = run_facets(&TypeScriptExtractor, language, &tree, src.as_bytes(), "src/app.ts");
        assert!(outcome.diagnostics.is_empty());
        outcome.parsed
    }

    #[test]
    fn test_import_clauses() {
        let src = r#"
import React from 'react';
import { helper, other as alias } from './util';
import * as ns from '../lib';
import './polyfill';
import Main, { side } from './main';
"#;
        let parsed = parse(Language::TypeScript, src);
        let imports = &parsed.imports;
        assert_eq!(imports.len(), 5);

        assert_eq!(imports[0].source, "react");
        assert!(imports[0].is_default);
        assert_eq!(imports[0].symbols.iter().collect::<Vec<_>>(), vec!["React"]);

        assert_eq!(imports[1].source, "./util");
        assert_eq!(
            imports[1].symbols.iter().collect::<Vec<_>>(),
            vec!["helper", "other"]
        );
        assert!(!imports[1].is_wildcard);

        assert!(imports[2].is_wildcard);
        assert_eq!(imports[2].line, 4);

        assert!(imports[3].is_wildcard);
        assert!(imports[3].symbols.is_empty());

        assert!(imports[4].is_default);
        assert_eq!(
            imports[4].symbols.iter().collect::<Vec<_>>(),
            vec!["Main", "side"]
        );
    }

    #[test]
    fn test_require_and_reexport() {
        let src = r#"
const { a, b: renamed } = require('./a');
const whole = require('./whole');
export { x } from './x';
export * from './star';
"#;
        let parsed = parse(Language::JavaScript, src);
        let by_source = |s: &str| parsed.imports.iter().find(|i| i.source == s).unwrap();
        assert_eq!(
            by_source("./a").symbols.iter().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(by_source("./whole").is_wildcard);
        assert_eq!(by_source("./x").symbols.iter().collect::<Vec<_>>(), vec!["x"]);
        assert!(by_source("./star").is_wildcard);
    }

    #[test]
    fn test_exports() {
        let src = r#"
export function helper(x: number): string { return ''; }
export class Widget {}
export const LIMIT = 10, other = 2;
export interface Shape { w: number }
export type Id = string;
const local = 1;
export { local as publicLocal };
export default function () {}
"#;
        let parsed = parse(Language::TypeScript, src);
        let summary: Vec<(&str, SymbolKind)> = parsed
            .exports
            .iter()
            .map(|e| (e.name.as_str(), e.kind))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("helper", SymbolKind::Function),
                ("Widget", SymbolKind::Class),
                ("LIMIT", SymbolKind::Variable),
                ("other", SymbolKind::Variable),
                ("Shape", SymbolKind::Interface),
                ("Id", SymbolKind::Type),
                ("publicLocal", SymbolKind::Variable),
                ("default", SymbolKind::Default),
            ]
        );
        assert_eq!(parsed.exports[0].signature, "helper(x: number): string");
        assert_eq!(parsed.exports[0].line, 2);
    }

    #[test]
    fn test_named_default_export() {
        let parsed = parse(Language::TypeScript, "export default class Store {}\n");
        assert_eq!(parsed.exports.len(), 1);
        assert_eq!(parsed.exports[0].name, "Store");
        assert_eq!(parsed.exports[0].kind, SymbolKind::Default);
    }

    #[test]
    fn test_definitions_and_calls() {
        let src = r#"
class Service {
  run(id: string) {
    this.log(id);
    fetchAll();
  }
}
const handler = (req) => { respond(req); };
function outer() {
  [1].map(function () { inner(); });
}
"#;
        let parsed = parse(Language::Tsx, src);
        let defs: Vec<(&str, SymbolKind, Option<&str>)> = parsed
            .definitions
            .iter()
            .map(|d| (d.name.as_str(), d.kind, d.parent.as_deref()))
            .collect();
        assert_eq!(
            defs,
            vec![
                ("Service", SymbolKind::Class, None),
                ("run", SymbolKind::Method, Some("Service")),
                ("handler", SymbolKind::Function, None),
                ("outer", SymbolKind::Function, None),
            ]
        );
        assert_eq!(parsed.definitions[0].start_line, 2);
        assert_eq!(parsed.definitions[0].end_line, 7);

        let calls: Vec<(&str, Option<&str>)> = parsed
            .calls
            .iter()
            .map(|c| (c.callee.as_str(), c.parent_def.as_deref()))
            .collect();
        assert_eq!(
            calls,
            vec![
                ("this.log", Some("run")),
                ("fetchAll", Some("run")),
                ("respond", Some("handler")),
                ("[1].map", Some("outer")),
                ("inner", Some("outer")),
            ]
        );
    }
}
