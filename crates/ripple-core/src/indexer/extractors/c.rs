//! C and C++ extraction. Both grammars share the declarator structure used
//! here; C++ adds classes and qualified names.

use tree_sitter::Node;

use super::common::{children, end_line, enclosing, field_text, line, strip_quotes, text, walk};
use super::{FacetResult, SymbolExtractor};
use crate::models::{Call, Definition, Export, Import, SymbolKind};

pub struct CExtractor;

const RECORD_KINDS: &[&str] = &["class_specifier", "struct_specifier"];

/// Scopes whose direct declarations are file-scope for export purposes.
const FILE_SCOPES: &[&str] = &["translation_unit", "linkage_specification"];

impl SymbolExtractor for CExtractor {
    /// Includes always depend on the whole header. Quoted includes are
    /// searched next to the including file first, so they resolve relative
    /// to it.
    fn extract_imports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Import> {
        let mut imports = Vec::new();
        for node in walk(root, &["preproc_include"]) {
            let Some(path) = node.child_by_field_name("path") else {
                continue;
            };
            let raw = strip_quotes(&text(path, source));
            let target = if path.kind() == "string_literal" && !raw.starts_with('.') && !raw.starts_with('/') {
                format!("./{raw}")
            } else {
                raw
            };
            imports.push(Import::new(target, line(node)).wildcard());
        }
        Ok(imports)
    }

    fn extract_exports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Export> {
        let mut exports = Vec::new();
        for node in walk(root, &["function_definition", "declaration", "class_specifier", "struct_specifier"]) {
            if !at_file_scope(node) {
                continue;
            }
            if RECORD_KINDS.contains(&node.kind()) {
                if node.child_by_field_name("body").is_none() {
                    continue;
                }
                if let Some(name) = field_text(node, "name", source) {
                    exports.push(Export {
                        signature: name.clone(),
                        name,
                        kind: SymbolKind::Class,
                        line: line(node),
                    });
                }
                continue;
            }
            if is_static(node, source) {
                continue;
            }
            let Some(declarator) = function_declarator(node) else {
                continue;
            };
            let Some(name) = declarator_name(declarator, source) else {
                continue;
            };
            exports.push(Export {
                name,
                kind: SymbolKind::Function,
                signature: text(declarator, source),
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
        for node in walk(root, &["function_definition", "class_specifier", "struct_specifier"]) {
            if RECORD_KINDS.contains(&node.kind()) {
                if node.child_by_field_name("body").is_none() {
                    continue;
                }
                let Some(name) = field_text(node, "name", source) else {
                    continue;
                };
                definitions.push(Definition {
                    signature: name.clone(),
                    name,
                    kind: SymbolKind::Class,
                    start_line: line(node),
                    end_line: end_line(node),
                    parent: None,
                });
                continue;
            }

            let Some(declarator) = function_declarator(node) else {
                continue;
            };
            let Some(qualified) = declarator_name(declarator, source) else {
                continue;
            };
            // `void Foo::bar()` defines a method of Foo out of line.
            let (parent, name) = match qualified.rsplit_once("::") {
                Some((owner, name)) => (Some(owner.to_string()), name.to_string()),
                None => (
                    enclosing(node, RECORD_KINDS).and_then(|c| field_text(c, "name", source)),
                    qualified,
                ),
            };
            definitions.push(Definition {
                name,
                kind: if parent.is_some() {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                },
                signature: text(declarator, source),
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
            let parent_def = enclosing(node, &["function_definition"])
                .and_then(function_declarator)
                .and_then(|d| declarator_name(d, source))
                .map(|q| q.rsplit("::").next().unwrap_or(&q).to_string());
            calls.push(Call {
                callee: text(function, source),
                line: line(node),
                parent_def,
            });
        }
        Ok(calls)
    }
}

fn at_file_scope(node: Node<'_>) -> bool {
    let Some(mut parent) = node.parent() else {
        return false;
    };
    // `extern "C" { ... }` and namespaces wrap their items in a declaration list.
    if parent.kind() == "declaration_list" {
        match parent.parent() {
            Some(outer) if matches!(outer.kind(), "linkage_specification" | "namespace_definition") => {
                return true;
            }
            _ => return false,
        }
    }
    if parent.kind() == "template_declaration" {
        match parent.parent() {
            Some(outer) => parent = outer,
            None => return false,
        }
    }
    FILE_SCOPES.contains(&parent.kind())
}

fn is_static(node: Node<'_>, source: &[u8]) -> bool {
    children(node)
        .into_iter()
        .any(|c| c.kind() == "storage_class_specifier" && text(c, source) == "static")
}

/// Descend through pointer/reference declarators to the function declarator.
fn function_declarator(node: Node<'_>) -> Option<Node<'_>> {
    let mut current = node.child_by_field_name("declarator")?;
    loop {
        match current.kind() {
            "function_declarator" => return Some(current),
            "pointer_declarator" | "reference_declarator" | "parenthesized_declarator" => {
                current = current
                    .child_by_field_name("declarator")
                    .or_else(|| current.named_child(current.named_child_count().checked_sub(1)?))?;
            }
            _ => return None,
        }
    }
}

fn declarator_name(declarator: Node<'_>, source: &[u8]) -> Option<String> {
    let inner = declarator.child_by_field_name("declarator")?;
    match inner.kind() {
        "identifier" | "field_identifier" | "qualified_identifier" | "destructor_name"
        | "operator_name" => Some(text(inner, source)),
        _ => None,
    }
}
