//! Go extraction. Exported identifiers are the capitalized ones.

use tree_sitter::Node;

use super::common::{
    end_line, enclosing_name, field_text, line, named_children, strip_quotes, text, walk,
};
use super::{FacetResult, SymbolExtractor};
use crate::models::{Call, Definition, Export, Import, SymbolKind};

pub struct GoExtractor;

impl SymbolExtractor for GoExtractor {
    /// Go imports bind a whole package, so every import is a namespace
    /// import. The binding name is kept as the symbol.
    fn extract_imports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Import> {
        let mut imports = Vec::new();
        for spec in walk(root, &["import_spec"]) {
            let Some(path) = field_text(spec, "path", source) else {
                continue;
            };
            let path = strip_quotes(&path);
            let mut import = Import::new(path.clone(), line(spec)).wildcard();
            match spec.child_by_field_name("name") {
                Some(alias) if alias.kind() == "package_identifier" => {
                    import.symbols.insert(text(alias, source));
                }
                // `.` and `_` imports bind nothing by name.
                Some(_) => {}
                None => {
                    if let Some(last) = path.rsplit('/').next().filter(|s| !s.is_empty()) {
                        import.symbols.insert(last.to_string());
                    }
                }
            }
            imports.push(import);
        }
        Ok(imports)
    }

    fn extract_exports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Export> {
        let mut exports = Vec::new();
        let kinds = [
            "function_declaration",
            "method_declaration",
            "type_spec",
            "type_alias",
            "const_spec",
            "var_spec",
        ];
        for node in walk(root, &kinds) {
            let mut cursor = node.walk();
            let names: Vec<String> = node
                .children_by_field_name("name", &mut cursor)
                .map(|n| text(n, source))
                .collect();
            for name in names.into_iter().filter(|n| is_exported(n)) {
                let (kind, signature) = match node.kind() {
                    "function_declaration" => (SymbolKind::Function, signature(node, &name, source)),
                    "method_declaration" => (SymbolKind::Method, signature(node, &name, source)),
                    "type_spec" | "type_alias" => (type_kind(node), name.clone()),
                    _ => (SymbolKind::Variable, name.clone()),
                };
                exports.push(Export {
                    name,
                    kind,
                    signature,
                    line: line(node),
                });
            }
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
        for node in walk(root, &["function_declaration", "method_declaration", "type_spec"]) {
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let (kind, signature, parent) = match node.kind() {
                "function_declaration" => {
                    (SymbolKind::Function, signature(node, &name, source), None)
                }
                "method_declaration" => (
                    SymbolKind::Method,
                    signature(node, &name, source),
                    receiver_type(node, source),
                ),
                _ => (type_kind(node), name.clone(), None),
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
                "selector_expression" => match (
                    field_text(function, "operand", source),
                    field_text(function, "field", source),
                ) {
                    (Some(operand), Some(field)) => format!("{operand}.{field}"),
                    _ => continue,
                },
                _ => continue,
            };
            calls.push(Call {
                callee,
                line: line(node),
                parent_def: enclosing_name(
                    node,
                    &["function_declaration", "method_declaration"],
                    source,
                ),
            });
        }
        Ok(calls)
    }
}

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn type_kind(spec: Node<'_>) -> SymbolKind {
    match spec.child_by_field_name("type").map(|t| t.kind()) {
        Some("struct_type") => SymbolKind::Class,
        Some("interface_type") => SymbolKind::Interface,
        _ => SymbolKind::Type,
    }
}

fn signature(node: Node<'_>, name: &str, source: &[u8]) -> String {
    let params = field_text(node, "parameters", source).unwrap_or_default();
    match field_text(node, "result", source) {
        Some(result) => format!("{name}{params} {result}"),
        None => format!("{name}{params}"),
    }
}

/// `func (s *Server) Run()` has parent `Server`.
fn receiver_type(method: Node<'_>, source: &[u8]) -> Option<String> {
    let receiver = method.child_by_field_name("receiver")?;
    let declaration = named_children(receiver)
        .into_iter()
        .find(|n| n.kind() == "parameter_declaration")?;
    let raw = field_text(declaration, "type", source)?;
    let base = raw.trim_start_matches('*');
    let base = base.split('[').next().unwrap_or(base);
    Some(base.trim().to_string())
}
