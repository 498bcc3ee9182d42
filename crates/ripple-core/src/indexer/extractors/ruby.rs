//! Ruby extraction. Ruby has no import syntax, so `require` family calls and
//! mixins (`include`, `extend`, `prepend`) stand in for imports.

use tree_sitter::Node;

use super::common::{
    end_line, enclosing, enclosing_name, field_text, line, named_children, text, walk,
};
use super::{FacetResult, SymbolExtractor};
use crate::models::{Call, Definition, Export, Import, SymbolKind};

pub struct RubyExtractor;

const REQUIRE_METHODS: &[&str] = &["require", "require_relative", "load", "autoload"];
const MIXIN_METHODS: &[&str] = &["include", "extend", "prepend"];
const SCOPE_KINDS: &[&str] = &["class", "module"];
const METHOD_KINDS: &[&str] = &["method", "singleton_method"];

impl SymbolExtractor for RubyExtractor {
    fn extract_imports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Import> {
        let mut imports = Vec::new();
        for node in walk(root, &["call"]) {
            if node.child_by_field_name("receiver").is_some() {
                continue;
            }
            let Some(method) = field_text(node, "method", source) else {
                continue;
            };
            let Some(arguments) = node.child_by_field_name("arguments") else {
                continue;
            };

            if REQUIRE_METHODS.contains(&method.as_str()) {
                let Some(content) = walk(arguments, &["string_content"]).into_iter().next() else {
                    continue;
                };
                let target = text(content, source);
                let target = if method == "require_relative" && !target.starts_with('.') {
                    format!("./{target}")
                } else {
                    target
                };
                imports.push(Import::new(target, line(node)).wildcard());
            } else if MIXIN_METHODS.contains(&method.as_str()) {
                for argument in named_children(arguments) {
                    if !matches!(argument.kind(), "constant" | "scope_resolution") {
                        continue;
                    }
                    let name = text(argument, source);
                    imports.push(Import::new(name.clone(), line(node)).with_symbols([name]));
                }
            }
        }
        Ok(imports)
    }

    fn extract_exports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Export> {
        let mut exports = Vec::new();
        let kinds: Vec<&str> = SCOPE_KINDS.iter().chain(METHOD_KINDS).copied().collect();
        for node in walk(root, &kinds) {
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let (kind, signature) = if METHOD_KINDS.contains(&node.kind()) {
                if is_hidden(node, source) {
                    continue;
                }
                (method_kind(node), signature(node, &name, source))
            } else {
                (SymbolKind::Class, name.clone())
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
        let kinds: Vec<&str> = SCOPE_KINDS.iter().chain(METHOD_KINDS).copied().collect();
        for node in walk(root, &kinds) {
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let (kind, signature, parent) = if METHOD_KINDS.contains(&node.kind()) {
                (
                    method_kind(node),
                    signature(node, &name, source),
                    enclosing_name(node, SCOPE_KINDS, source),
                )
            } else {
                (SymbolKind::Class, name.clone(), None)
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
        for node in walk(root, &["call"]) {
            let Some(method) = field_text(node, "method", source) else {
                continue;
            };
            let callee = match field_text(node, "receiver", source) {
                Some(receiver) => format!("{receiver}.{method}"),
                None if REQUIRE_METHODS.contains(&method.as_str())
                    || MIXIN_METHODS.contains(&method.as_str()) =>
                {
                    continue
                }
                None => method,
            };
            calls.push(Call {
                callee,
                line: line(node),
                parent_def: enclosing_name(node, METHOD_KINDS, source),
            });
        }
        Ok(calls)
    }
}

fn method_kind(node: Node<'_>) -> SymbolKind {
    if node.kind() == "singleton_method" || enclosing(node, SCOPE_KINDS).is_some() {
        SymbolKind::Method
    } else {
        SymbolKind::Function
    }
}

/// A bare `private` or `protected` earlier in the same body hides the
/// methods that follow it.
fn is_hidden(node: Node<'_>, source: &[u8]) -> bool {
    let mut sibling = node.prev_named_sibling();
    while let Some(prev) = sibling {
        if prev.kind() == "identifier" {
            match text(prev, source).as_str() {
                "private" | "protected" => return true,
                "public" => return false,
                _ => {}
            }
        }
        sibling = prev.prev_named_sibling();
    }
    false
}

fn signature(node: Node<'_>, name: &str, source: &[u8]) -> String {
    let params = field_text(node, "parameters", source).unwrap_or_default();
    match field_text(node, "object", source) {
        Some(object) => format!("def {object}.{name}{params}"),
        None => format!("def {name}{params}"),
    }
}
