//! Syntax-tree helpers shared by every language extractor.

use tree_sitter::Node;

/// Iterative depth-first walk returning every node whose kind is in `kinds`,
/// in document order.
pub fn walk<'t>(root: Node<'t>, kinds: &[&str]) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if kinds.contains(&node.kind()) {
            found.push(node);
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    found
}

pub fn children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

pub fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

pub fn find_child<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    children(node).into_iter().find(|c| c.kind() == kind)
}

pub fn children_of_kind<'t>(node: Node<'t>, kinds: &[&str]) -> Vec<Node<'t>> {
    children(node)
        .into_iter()
        .filter(|c| kinds.contains(&c.kind()))
        .collect()
}

/// Raw source text of a node. Invalid UTF-8 is replaced rather than failing.
pub fn text(node: Node<'_>, source: &[u8]) -> String {
    String::from_utf8_lossy(&source[node.byte_range()]).into_owned()
}

pub fn field_text(node: Node<'_>, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field).map(|n| text(n, source))
}

/// 1-based line of the node's first byte.
pub fn line(node: Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

pub fn end_line(node: Node<'_>) -> u32 {
    node.end_position().row as u32 + 1
}

pub fn strip_quotes(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '<' | '>'))
        .to_string()
}

/// Nearest ancestor whose kind is in `kinds`.
pub fn enclosing<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if kinds.contains(&parent.kind()) {
            return Some(parent);
        }
        current = parent.parent();
    }
    None
}

/// Name of the nearest named ancestor in `kinds`. Anonymous matches (lambdas,
/// closures) are skipped in favor of the next named one.
pub fn enclosing_name(node: Node<'_>, kinds: &[&str], source: &[u8]) -> Option<String> {
    let mut current = enclosing(node, kinds);
    while let Some(found) = current {
        if let Some(name) = field_text(found, "name", source) {
            return Some(name);
        }
        current = enclosing(found, kinds);
    }
    None
}

/// Concatenate the raw text of the given fields, skipping missing ones.
pub fn signature_of(node: Node<'_>, fields: &[&str], source: &[u8]) -> String {
    fields
        .iter()
        .filter_map(|f| field_text(node, f, source))
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> tree_sitter::Tree {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .unwrap();
        parser.parse(source, None).unwrap()
    }

    #[test]
    fn test_walk_preserves_document_order() {
        let src = "def a():\n    pass\n\ndef b():\n    def c():\n        pass\n";
        let tree = parse(src);
        let names: Vec<String> = walk(tree.root_node(), &["function_definition"])
            .into_iter()
            .filter_map(|n| field_text(n, "name", src.as_bytes()))
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_enclosing_name_and_lines() {
        let src = "class K:\n    def m(self):\n        run()\n";
        let tree = parse(src);
        let call = walk(tree.root_node(), &["call"])[0];
        assert_eq!(line(call), 3);
        assert_eq!(
            enclosing_name(call, &["function_definition"], src.as_bytes()).as_deref(),
            Some("m")
        );
        assert_eq!(
            enclosing_name(call, &["class_definition"], src.as_bytes()).as_deref(),
            Some("K")
        );
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("'./a'"), "./a");
        assert_eq!(strip_quotes("\"fmt\""), "fmt");
        assert_eq!(strip_quotes("<stdio.h>"), "stdio.h");
    }
}
