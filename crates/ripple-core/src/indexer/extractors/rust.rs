//! Rust extraction. `use` trees are flattened into one import per path
//! prefix.

use indexmap::IndexMap;
use tree_sitter::Node;

use super::common::{end_line, enclosing, enclosing_name, field_text, find_child, line, text, walk};
use super::{FacetResult, SymbolExtractor};
use crate::models::{Call, Definition, Export, Import, SymbolKind};

pub struct RustExtractor;

const ITEM_KINDS: &[&str] = &[
    "function_item",
    "struct_item",
    "enum_item",
    "union_item",
    "trait_item",
    "type_item",
    "const_item",
    "static_item",
];

impl SymbolExtractor for RustExtractor {
    fn extract_imports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Import> {
        let mut imports = Vec::new();
        for node in walk(root, &["use_declaration"]) {
            let Some(argument) = node.child_by_field_name("argument") else {
                continue;
            };
            let mut leaves = Vec::new();
            flatten_use(argument, "", source, &mut leaves);

            let mut grouped: IndexMap<String, Import> = IndexMap::new();
            for leaf in leaves {
                let import = grouped
                    .entry(leaf.prefix.clone())
                    .or_insert_with(|| Import::new(leaf.prefix.clone(), line(node)));
                match leaf.name {
                    Some(name) => {
                        import.symbols.insert(name);
                    }
                    None => import.is_wildcard = true,
                }
            }
            imports.extend(grouped.into_values());
        }
        Ok(imports)
    }

    fn extract_exports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Export> {
        let mut exports = Vec::new();
        for node in walk(root, ITEM_KINDS) {
            if find_child(node, "visibility_modifier").is_none() {
                continue;
            }
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let (kind, signature) = match node.kind() {
                "function_item" => {
                    let kind = if impl_type(node, source).is_some() {
                        SymbolKind::Method
                    } else {
                        SymbolKind::Function
                    };
                    (kind, signature(node, &name, source))
                }
                "struct_item" | "enum_item" | "union_item" => (SymbolKind::Class, name.clone()),
                "trait_item" => (SymbolKind::Interface, name.clone()),
                "type_item" => (SymbolKind::Type, name.clone()),
                _ => (SymbolKind::Variable, name.clone()),
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
        for node in walk(root, &["function_item", "struct_item", "enum_item", "trait_item"]) {
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let (kind, signature, parent) = match node.kind() {
                "function_item" => {
                    let owner = impl_type(node, source);
                    let kind = if owner.is_some() {
                        SymbolKind::Method
                    } else {
                        SymbolKind::Function
                    };
                    (kind, signature(node, &name, source), owner)
                }
                "trait_item" => (SymbolKind::Interface, name.clone(), None),
                _ => (SymbolKind::Class, name.clone(), None),
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
            let Some(mut function) = node.child_by_field_name("function") else {
                continue;
            };
            if function.kind() == "generic_function" {
                match function.child_by_field_name("function") {
                    Some(inner) => function = inner,
                    None => continue,
                }
            }
            let callee = match function.kind() {
                "identifier" | "scoped_identifier" => text(function, source),
                "field_expression" => match (
                    field_text(function, "value", source),
                    field_text(function, "field", source),
                ) {
                    (Some(value), Some(field)) => format!("{value}.{field}"),
                    _ => continue,
                },
                _ => continue,
            };
            calls.push(Call {
                callee,
                line: line(node),
                parent_def: enclosing_name(node, &["function_item"], source),
            });
        }
        Ok(calls)
    }
}

struct UseLeaf {
    prefix: String,
    /// `None` for a glob.
    name: Option<String>,
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}::{segment}")
    }
}

fn flatten_use(node: Node<'_>, prefix: &str, source: &[u8], out: &mut Vec<UseLeaf>) {
    match node.kind() {
        "scoped_identifier" => {
            let path = field_text(node, "path", source).unwrap_or_default();
            if let Some(name) = field_text(node, "name", source) {
                out.push(UseLeaf {
                    prefix: join_path(prefix, &path),
                    name: Some(name),
                });
            }
        }
        "use_as_clause" => {
            if let Some(path) = node.child_by_field_name("path") {
                flatten_use(path, prefix, source, out);
            }
        }
        "use_wildcard" => {
            let prefix = match node.named_child(0) {
                Some(path) => join_path(prefix, &text(path, source)),
                None => prefix.to_string(),
            };
            out.push(UseLeaf { prefix, name: None });
        }
        "scoped_use_list" => {
            let nested = match field_text(node, "path", source) {
                Some(path) => join_path(prefix, &path),
                None => prefix.to_string(),
            };
            if let Some(list) = node.child_by_field_name("list") {
                flatten_use(list, &nested, source, out);
            }
        }
        "use_list" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                flatten_use(child, prefix, source, out);
            }
        }
        "identifier" | "self" | "crate" | "super" => {
            let name = text(node, source);
            if prefix.is_empty() {
                // `use serde;` imports a whole crate.
                out.push(UseLeaf { prefix: name, name: None });
            } else if name == "self" {
                out.push(UseLeaf {
                    prefix: prefix.to_string(),
                    name: None,
                });
            } else {
                out.push(UseLeaf {
                    prefix: prefix.to_string(),
                    name: Some(name),
                });
            }
        }
        _ => {}
    }
}

/// Self type of the impl block a function belongs to, without generics.
fn impl_type(function: Node<'_>, source: &[u8]) -> Option<String> {
    let body = function.parent().filter(|p| p.kind() == "declaration_list")?;
    let owner = enclosing(body, &["impl_item", "trait_item", "mod_item"])?;
    match owner.kind() {
        "impl_item" => {
            let raw = field_text(owner, "type", source)?;
            Some(raw.split('<').next().unwrap_or(&raw).trim().to_string())
        }
        "trait_item" => field_text(owner, "name", source),
        _ => None,
    }
}

fn signature(node: Node<'_>, name: &str, source: &[u8]) -> String {
    let params = field_text(node, "parameters", source).unwrap_or_default();
    match field_text(node, "return_type", source) {
        Some(ret) => format!("fn {name}{params} -> {ret}"),
        None => format!("fn {name}{params}"),
    }
}
