//! Per-language symbol extraction into the unified model.
//!
//! Every language implements [`SymbolExtractor`]. The four facets run
//! independently through [`extract`]: a facet that errors or panics is left
//! empty and reported as a [`FacetDiagnostic`], the others are kept.

pub mod c;
pub mod common;
pub mod csharp;
pub mod go;
pub mod java;
pub mod php;
pub mod python;
pub mod ruby;
pub mod rust;
pub mod typescript;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};
use tree_sitter::Node;

use crate::indexer::filesystem::Language;
use crate::models::{Call, Definition, Export, Import, ParsedFile};

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FacetError {
    /// The language has no notion of this facet.
    #[error("not supported for this language")]
    Unsupported,

    #[error("extraction failed: {0}")]
    Failed(String),
}

pub type FacetResult<T> = Result<Vec<T>, FacetError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Facet {
    Imports,
    Exports,
    Definitions,
    Calls,
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Facet::Imports => "imports",
            Facet::Exports => "exports",
            Facet::Definitions => "definitions",
            Facet::Calls => "calls",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FacetDiagnostic {
    pub facet: Facet,
    pub error: FacetError,
}

/// Result of extracting one file.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseOutcome {
    pub parsed: ParsedFile,
    pub diagnostics: Vec<FacetDiagnostic>,
}

pub trait SymbolExtractor {
    fn extract_imports(&self, _root: Node<'_>, _source: &[u8], _path: &str) -> FacetResult<Import> {
        Err(FacetError::Unsupported)
    }

    fn extract_exports(&self, _root: Node<'_>, _source: &[u8], _path: &str) -> FacetResult<Export> {
        Err(FacetError::Unsupported)
    }

    fn extract_definitions(
        &self,
        _root: Node<'_>,
        _source: &[u8],
        _path: &str,
    ) -> FacetResult<Definition> {
        Err(FacetError::Unsupported)
    }

    fn extract_calls(&self, _root: Node<'_>, _source: &[u8], _path: &str) -> FacetResult<Call> {
        Err(FacetError::Unsupported)
    }
}

/// Extract all facets of `tree` with the extractor for `language`.
pub fn extract(
    language: Language,
    tree: &tree_sitter::Tree,
    source: &[u8],
    path: &str,
) -> ParseOutcome {
    match language {
        Language::TypeScript | Language::Tsx | Language::JavaScript => {
            run_facets(&typescript::TypeScriptExtractor, language, tree, source, path)
        }
        Language::Python => run_facets(&python::PythonExtractor, language, tree, source, path),
        Language::Go => run_facets(&go::GoExtractor, language, tree, source, path),
        Language::Rust => run_facets(&rust::RustExtractor, language, tree, source, path),
        Language::Java => run_facets(&java::JavaExtractor, language, tree, source, path),
        Language::C | Language::Cpp => {
            run_facets(&c::CExtractor, language, tree, source, path)
        }
        Language::CSharp => run_facets(&csharp::CSharpExtractor, language, tree, source, path),
        Language::Php => run_facets(&php::PhpExtractor, language, tree, source, path),
        Language::Ruby => run_facets(&ruby::RubyExtractor, language, tree, source, path),
    }
}

pub(crate) fn run_facets<E: SymbolExtractor>(
    extractor: &E,
    language: Language,
    tree: &tree_sitter::Tree,
    source: &[u8],
    path: &str,
) -> ParseOutcome {
    let root = tree.root_node();
    let mut diagnostics = Vec::new();
    let mut parsed = ParsedFile::new(path, language.name());

    parsed.imports = isolate(Facet::Imports, path, &mut diagnostics, || {
        extractor.extract_imports(root, source, path)
    });
    parsed.exports = isolate(Facet::Exports, path, &mut diagnostics, || {
        extractor.extract_exports(root, source, path)
    });
    parsed.definitions = isolate(Facet::Definitions, path, &mut diagnostics, || {
        extractor.extract_definitions(root, source, path)
    });
    parsed.calls = isolate(Facet::Calls, path, &mut diagnostics, || {
        extractor.extract_calls(root, source, path)
    });

    ParseOutcome {
        parsed,
        diagnostics,
    }
}

fn isolate<T, F>(facet: Facet, path: &str, diagnostics: &mut Vec<FacetDiagnostic>, run: F) -> Vec<T>
where
    F: FnOnce() -> FacetResult<T>,
{
    let result = catch_unwind(AssertUnwindSafe(run)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string());
        Err(FacetError::Failed(message))
    });

    match result {
        Ok(items) => items,
        Err(error) => {
            match &error {
                FacetError::Unsupported => debug!("{facet} not extracted for {path}"),
                FacetError::Failed(msg) => warn!("{facet} extraction failed for {path}: {msg}"),
            }
            diagnostics.push(FacetDiagnostic { facet, error });
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SymbolKind;

    struct HalfBroken;

    impl SymbolExtractor for HalfBroken {
        fn extract_imports(&self, _root: Node<'_>, _source: &[u8], _path: &str) -> FacetResult<Import> {
            Ok(vec![Import::new("./x", 1).wildcard()])
        }

        fn extract_exports(&self, _root: Node<'_>, _source: &[u8], _path: &str) -> FacetResult<Export> {
            panic!("grammar drift");
        }

        fn extract_definitions(
            &self,
            _root: Node<'_>,
            _source: &[u8],
            _path: &str,
        ) -> FacetResult<Definition> {
            Err(FacetError::Failed("bad node".into()))
        }
    }

    fn python_tree(src: &str) -> tree_sitter::Tree {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .unwrap();
        parser.parse(src, None).unwrap()
    }

    #[test]
    fn test_failing_facets_do_not_affect_others() {
        let tree = python_tree("x = 1\n");
        let outcome = run_facets(&HalfBroken, Language::Python, &tree, b"x = 1\n", "a.py");
        assert_eq!(outcome.parsed.imports.len(), 1);
        assert!(outcome.parsed.exports.is_empty());
        assert!(outcome.parsed.definitions.is_empty());
        assert!(outcome.parsed.calls.is_empty());

        let facets: Vec<Facet> = outcome.diagnostics.iter().map(|d| d.facet).collect();
        assert_eq!(facets, vec![Facet::Exports, Facet::Definitions, Facet::Calls]);
        assert_eq!(
            outcome.diagnostics[0].error,
            FacetError::Failed("grammar drift".into())
        );
        assert_eq!(outcome.diagnostics[2].error, FacetError::Unsupported);
    }

    #[test]
    fn test_extract_dispatches_by_language() {
        let src = "def helper():\n    pass\n";
        let tree = python_tree(src);
        let outcome = extract(Language::Python, &tree, src.as_bytes(), "pkg/util.py");
        assert!(outcome.diagnostics.is_empty());
        assert_eq!(outcome.parsed.language, "python");
        assert_eq!(outcome.parsed.exports[0].name, "helper");
        assert_eq!(outcome.parsed.exports[0].kind, SymbolKind::Function);
    }
}
