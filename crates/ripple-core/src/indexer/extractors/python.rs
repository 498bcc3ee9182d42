//! Python extraction.

use std::collections::HashSet;

use tree_sitter::Node;

use super::common::{
    end_line, enclosing_name, field_text, find_child, line, named_children, strip_quotes, text,
    walk,
};
use super::{FacetResult, SymbolExtractor};
use crate::models::{Call, Definition, Export, Import, SymbolKind};

pub struct PythonExtractor;

impl SymbolExtractor for PythonExtractor {
    fn extract_imports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Import> {
        let mut imports = Vec::new();
        for node in walk(root, &["import_statement", "import_from_statement"]) {
            if node.kind() == "import_statement" {
                for name in node_names(node) {
                    let module = match name.kind() {
                        "aliased_import" => field_text(name, "name", source),
                        _ => Some(text(name, source)),
                    };
                    if let Some(module) = module {
                        imports.push(Import::new(module.replace('.', "/"), line(node)).wildcard());
                    }
                }
            } else {
                imports.extend(from_import(node, source));
            }
        }
        Ok(imports)
    }

    fn extract_exports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Export> {
        let allowed = dunder_all(root, source);
        let mut exports = Vec::new();
        for node in top_level_definitions(root) {
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let visible = match &allowed {
                Some(names) => names.contains(&name),
                None => !name.starts_with('_'),
            };
            if !visible {
                continue;
            }
            let (kind, signature) = if node.kind() == "class_definition" {
                (SymbolKind::Class, name.clone())
            } else {
                (SymbolKind::Function, signature(node, &name, source))
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
        for node in walk(root, &["function_definition", "class_definition"]) {
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let owner = owning_class(node, source);
            let (kind, signature) = match (node.kind(), &owner) {
                ("class_definition", _) => (SymbolKind::Class, name.clone()),
                (_, Some(_)) => (SymbolKind::Method, signature(node, &name, source)),
                _ => (SymbolKind::Function, signature(node, &name, source)),
            };
            definitions.push(Definition {
                name,
                kind,
                signature,
                start_line: line(node),
                end_line: end_line(node),
                parent: owner,
            });
        }
        Ok(definitions)
    }

    fn extract_calls(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Call> {
        let mut calls = Vec::new();
        for node in walk(root, &["call"]) {
            let Some(function) = node.child_by_field_name("function") else {
                continue;
            };
            if !matches!(function.kind(), "identifier" | "attribute") {
                continue;
            }
            calls.push(Call {
                callee: text(function, source),
                line: line(node),
                parent_def: enclosing_name(node, &["function_definition"], source),
            });
        }
        Ok(calls)
    }
}

fn node_names(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children_by_field_name("name", &mut cursor).collect()
}

/// `from .mod import a` becomes an import of `./mod` binding `a`. Bare
/// `from . import sibling` imports each named sibling module.
fn from_import(node: Node<'_>, source: &[u8]) -> Vec<Import> {
    let Some(module) = node.child_by_field_name("module_name") else {
        return Vec::new();
    };
    let at = line(node);
    let names: Vec<String> = node_names(node)
        .into_iter()
        .filter_map(|n| match n.kind() {
            "aliased_import" => field_text(n, "name", source),
            _ => Some(text(n, source)),
        })
        .collect();
    let is_wildcard = find_child(node, "wildcard_import").is_some();

    let target = if module.kind() == "relative_import" {
        let dots = find_child(module, "import_prefix")
            .map(|p| text(p, source).trim().len())
            .unwrap_or(1);
        let prefix = if dots <= 1 {
            "./".to_string()
        } else {
            "../".repeat(dots - 1)
        };
        match find_child(module, "dotted_name") {
            Some(path) => format!("{prefix}{}", text(path, source).replace('.', "/")),
            None => {
                return names
                    .into_iter()
                    .map(|name| {
                        Import::new(format!("{prefix}{name}"), at)
                            .with_symbols([name])
                            .wildcard()
                    })
                    .collect();
            }
        }
    } else {
        text(module, source).replace('.', "/")
    };

    let mut import = Import::new(target, at).with_symbols(names);
    import.is_wildcard = is_wildcard;
    vec![import]
}

/// Module-level functions and classes, looking through decorators.
fn top_level_definitions(root: Node<'_>) -> Vec<Node<'_>> {
    named_children(root)
        .into_iter()
        .filter_map(|child| match child.kind() {
            "function_definition" | "class_definition" => Some(child),
            "decorated_definition" => child.child_by_field_name("definition"),
            _ => None,
        })
        .collect()
}

/// String entries of a module-level `__all__ = [...]`, if declared.
fn dunder_all(root: Node<'_>, source: &[u8]) -> Option<HashSet<String>> {
    for statement in named_children(root) {
        if statement.kind() != "expression_statement" {
            continue;
        }
        let Some(assignment) = find_child(statement, "assignment") else {
            continue;
        };
        if field_text(assignment, "left", source).as_deref() != Some("__all__") {
            continue;
        }
        let right = assignment.child_by_field_name("right")?;
        return Some(
            named_children(right)
                .into_iter()
                .filter(|n| n.kind() == "string")
                .map(|n| strip_quotes(&text(n, source)))
                .collect(),
        );
    }
    None
}

/// Class owning a method: the function sits directly in the class body.
fn owning_class(node: Node<'_>, source: &[u8]) -> Option<String> {
    let mut parent = node.parent()?;
    if parent.kind() == "decorated_definition" {
        parent = parent.parent()?;
    }
    if parent.kind() != "block" {
        return None;
    }
    let class = parent.parent()?;
    if class.kind() != "class_definition" {
        return None;
    }
    field_text(class, "name", source)
}

fn signature(node: Node<'_>, name: &str, source: &[u8]) -> String {
    let params = field_text(node, "parameters", source).unwrap_or_default();
    match field_text(node, "return_type", source) {
        Some(ret) => format!("{name}{params} -> {ret}"),
        None => format!("{name}{params}"),
    }
}
