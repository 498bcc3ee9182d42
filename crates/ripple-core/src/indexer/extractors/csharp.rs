//! C# extraction.

use tree_sitter::Node;

use super::common::{children, end_line, enclosing_name, field_text, line, text, walk};
use super::{FacetResult, SymbolExtractor};
use crate::models::{Call, Definition, Export, Import, SymbolKind};

pub struct CSharpExtractor;

const TYPE_KINDS: &[&str] = &[
    "class_declaration",
    "struct_declaration",
    "interface_declaration",
    "record_declaration",
    "enum_declaration",
];

const MEMBER_KINDS: &[&str] = &[
    "method_declaration",
    "constructor_declaration",
    "property_declaration",
];

impl SymbolExtractor for CSharpExtractor {
    /// `using A.B;` opens a namespace. `using X = A.B.C;` binds one name.
    fn extract_imports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Import> {
        let mut imports = Vec::new();
        for node in walk(root, &["using_directive"]) {
            let raw = text(node, source);
            let body = raw
                .trim()
                .trim_end_matches(';')
                .split_whitespace()
                .filter(|w| !matches!(*w, "global" | "using" | "static"))
                .collect::<Vec<_>>()
                .join(" ");

            let import = match body.split_once('=') {
                Some((_alias, target)) => {
                    let target = target.trim();
                    match target.rsplit_once('.') {
                        Some((namespace, name)) => {
                            Import::new(namespace, line(node)).with_symbols([name])
                        }
                        None => Import::new(target, line(node)).with_symbols([target]),
                    }
                }
                None if !body.is_empty() => Import::new(body, line(node)).wildcard(),
                None => continue,
            };
            imports.push(import);
        }
        Ok(imports)
    }

    fn extract_exports(&self, root: Node<'_>, source: &[u8], _path: &str) -> FacetResult<Export> {
        let mut exports = Vec::new();
        let kinds: Vec<&str> = TYPE_KINDS.iter().chain(MEMBER_KINDS).copied().collect();
        for node in walk(root, &kinds) {
            if node.kind() == "constructor_declaration" || !is_public(node, source) {
                continue;
            }
            let Some(name) = field_text(node, "name", source) else {
                continue;
            };
            let (kind, signature) = match node.kind() {
                "method_declaration" => (SymbolKind::Method, signature(node, &name, source)),
                "property_declaration" => (SymbolKind::Variable, name.clone()),
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
            let (kind, signature, parent) = match node.kind() {
                "method_declaration" | "constructor_declaration" => (
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
        for node in walk(root, &["invocation_expression"]) {
            let Some(function) = node
                .child_by_field_name("function")
                .or_else(|| node.named_child(0))
            else {
                continue;
            };
            calls.push(Call {
                callee: text(function, source),
                line: line(node),
                parent_def: enclosing_name(
                    node,
                    &[
                        "method_declaration",
                        "constructor_declaration",
                        "local_function_statement",
                    ],
                    source,
                ),
            });
        }
        Ok(calls)
    }
}

fn is_public(node: Node<'_>, source: &[u8]) -> bool {
    children(node)
        .into_iter()
        .any(|c| c.kind() == "modifier" && text(c, source) == "public")
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
    let returns = field_text(node, "returns", source).or_else(|| field_text(node, "type", source));
    match returns {
        Some(ret) => format!("{ret} {name}{params}"),
        None => format!("{name}{params}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::extractors::run_facets;
    use crate::indexer::filesystem::Language;
    use crate::models::ParsedFile;

    const SOURCE: &str = r#"using System;
using Json = Newtonsoft.Json.JsonConvert;

namespace Shop
{
    public class Cart
    {
        public int Count { get; set; }

        public Cart() { Reset(); }

        public decimal Total(int discount)
        {
            Console.WriteLine(discount);
            return 0;
        }

        private void Reset() {}
    }

    internal interface IHidden {}
}
"#;

    fn parse() -> ParsedFile {
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&Language::CSharp.grammar()).unwrap();
        let tree = parser.parse(SOURCE, None).unwrap();
        run_facets(&CSharpExtractor, Language::CSharp, &tree, SOURCE.as_bytes(), "Cart.cs").parsed
    }

    #[test]
    fn test_using_directives() {
        let parsed = parse();
        assert_eq!(parsed.imports.len(), 2);
        assert_eq!(parsed.imports[0].source, "System");
        assert!(parsed.imports[0].is_wildcard);
        assert_eq!(parsed.imports[1].source, "Newtonsoft.Json");
        assert_eq!(
            parsed.imports[1].symbols.iter().collect::<Vec<_>>(),
            vec!["JsonConvert"]
        );
    }

    #[test]
    fn test_public_exports() {
        let parsed = parse();
        let summary: Vec<(&str, SymbolKind)> = parsed
            .exports
            .iter()
            .map(|e| (e.name.as_str(), e.kind))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Cart", SymbolKind::Class),
                ("Count", SymbolKind::Variable),
                ("Total", SymbolKind::Method),
            ]
        );
        assert_eq!(parsed.exports[2].signature, "decimal Total(int discount)");
    }

    #[test]
    fn test_methods_and_calls() {
        let parsed = parse();
        let methods: Vec<(&str, Option<&str>)> = parsed
            .definitions
            .iter()
            .filter(|d| d.kind == SymbolKind::Method)
            .map(|d| (d.name.as_str(), d.parent.as_deref()))
            .collect();
        assert_eq!(
            methods,
            vec![
                ("Cart", Some("Cart")),
                ("Total", Some("Cart")),
                ("Reset", Some("Cart")),
            ]
        );
        let calls: Vec<(&str, Option<&str>)> = parsed
            .calls
            .iter()
            .map(|c| (c.callee.as_str(), c.parent_def.as_deref()))
            .collect();
        assert_eq!(
            calls,
            vec![("Reset", Some("Cart")), ("Console.WriteLine", Some("Total"))]
        );
    }
}
