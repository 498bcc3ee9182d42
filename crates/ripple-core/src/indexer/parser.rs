//! Grammar cache and per-file parse orchestration.
//!
//! A [`ParserRegistry`] is built once per process (or per test) and passed by
//! reference. Grammars load lazily on first use; parsers are checked out of a
//! small idle pool so rayon workers never share one.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;
use tree_sitter::Parser;

use crate::errors::{RippleError, RippleResult};
use crate::indexer::extractors::{extract, ParseOutcome};
use crate::indexer::filesystem::{detect_language, Language};

/// Parsers kept per grammar once a worker hands them back.
const MAX_IDLE_PARSERS: usize = 8;

#[derive(Default)]
pub struct ParserRegistry {
    grammars: Mutex<HashMap<Language, tree_sitter::Language>>,
    idle: Mutex<HashMap<Language, Vec<Parser>>>,
}

/// Whether a grammar could be loaded into a parser.
#[derive(Clone, Debug, PartialEq)]
pub struct GrammarCapability {
    pub language: Language,
    pub available: bool,
    pub abi_version: usize,
    pub reason: String,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn grammar(&self, language: Language) -> tree_sitter::Language {
        self.grammars
            .lock()
            .entry(language)
            .or_insert_with(|| language.grammar())
            .clone()
    }

    fn checkout(&self, language: Language) -> RippleResult<Parser> {
        if let Some(parser) = self.idle.lock().get_mut(&language).and_then(Vec::pop) {
            return Ok(parser);
        }
        let mut parser = Parser::new();
        parser
            .set_language(&self.grammar(language))
            .map_err(|e| RippleError::Parse(format!("cannot load {language} grammar: {e}")))?;
        Ok(parser)
    }

    fn checkin(&self, language: Language, parser: Parser) {
        let mut idle = self.idle.lock();
        let pool = idle.entry(language).or_default();
        if pool.len() < MAX_IDLE_PARSERS {
            pool.push(parser);
        }
    }

    /// Parse `source` as `language` and run every extractor facet.
    ///
    /// Syntax errors do not fail the parse; extraction runs over the
    /// best-effort tree.
    pub fn parse_as(
        &self,
        language: Language,
        path: &str,
        source: &[u8],
    ) -> RippleResult<ParseOutcome> {
        let mut parser = self.checkout(language)?;
        let tree = parser.parse(source, None);
        self.checkin(language, parser);

        let tree = tree.ok_or_else(|| RippleError::Parse(format!("parser gave up on {path}")))?;
        if tree.root_node().has_error() {
            debug!("{path} has syntax errors, extracting best effort");
        }
        Ok(extract(language, &tree, source, path))
    }

    /// Parse a file whose language is detected from its extension. Returns
    /// `Ok(None)` for unsupported extensions.
    pub fn parse_file(&self, path: &str, source: &[u8]) -> RippleResult<Option<ParseOutcome>> {
        let Some(language) = detect_language(path) else {
            return Ok(None);
        };
        self.parse_as(language, path, source).map(Some)
    }

    /// Try to load every grammar and report the outcome.
    pub fn capability_report(&self) -> Vec<GrammarCapability> {
        Language::ALL
            .into_iter()
            .map(|language| {
                let grammar = self.grammar(language);
                let abi_version = grammar.version();
                match Parser::new().set_language(&grammar) {
                    Ok(()) => GrammarCapability {
                        language,
                        available: true,
                        abi_version,
                        reason: "ok".to_string(),
                    },
                    Err(e) => GrammarCapability {
                        language,
                        available: false,
                        abi_version,
                        reason: e.to_string(),
                    },
                }
            })
            .collect()
    }

    pub fn idle_parsers(&self, language: Language) -> usize {
        self.idle.lock().get(&language).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_extension_is_none() {
        let registry = ParserRegistry::new();
        assert!(registry.parse_file("README.md", b"# hi").unwrap().is_none());
        assert!(registry.parse_file("Makefile", b"all:").unwrap().is_none());
    }

    #[test]
    fn test_tsx_and_ts_select_different_grammars() {
        let registry = ParserRegistry::new();
        let tsx = "export const App = () => <div>hi</div>;\n";
        let outcome = registry.parse_file("src/App.tsx", tsx.as_bytes()).unwrap().unwrap();
        assert_eq!(outcome.parsed.language, "typescript");
        assert_eq!(outcome.parsed.exports[0].name, "App");

        let ts = "export function f<T>(x: T): T { return <T>x; }\n";
        let outcome = registry.parse_file("src/f.ts", ts.as_bytes()).unwrap().unwrap();
        assert_eq!(outcome.parsed.exports[0].name, "f");
    }

    #[test]
    fn test_malformed_source_still_extracts() {
        let registry = ParserRegistry::new();
        let src = "def ok():\n    pass\n\ndef broken(:\n";
        let outcome = registry.parse_file("a.py", src.as_bytes()).unwrap().unwrap();
        assert!(outcome.parsed.exports.iter().any(|e| e.name == "ok"));
    }

    #[test]
    fn test_parsers_are_pooled() {
        let registry = ParserRegistry::new();
        registry.parse_file("a.go", b"package a\n").unwrap();
        registry.parse_file("b.go", b"package b\n").unwrap();
        assert_eq!(registry.idle_parsers(Language::Go), 1);
        assert_eq!(registry.idle_parsers(Language::Rust), 0);
    }

    #[test]
    fn test_capability_report_covers_every_grammar() {
        let report = ParserRegistry::new().capability_report();
        assert_eq!(report.len(), Language::ALL.len());
        assert!(report.iter().all(|c| c.available), "{report:?}");
    }
}
