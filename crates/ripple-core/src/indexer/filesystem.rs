//! Language detection and project directory scanning.

use std::fmt;
use std::path::{Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::errors::{RippleError, RippleResult};

/// Every language with a dedicated extractor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Go,
    Rust,
    Java,
    C,
    Cpp,
    CSharp,
    Php,
    Ruby,
}

impl Language {
    pub const ALL: [Language; 12] = [
        Language::TypeScript,
        Language::Tsx,
        Language::JavaScript,
        Language::Python,
        Language::Go,
        Language::Rust,
        Language::Java,
        Language::C,
        Language::Cpp,
        Language::CSharp,
        Language::Php,
        Language::Ruby,
    ];

    /// Name written into parsed snapshots. TSX shares the TypeScript name and
    /// only differs in grammar.
    pub fn name(&self) -> &'static str {
        match self {
            Language::TypeScript | Language::Tsx => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "c_sharp",
            Language::Php => "php",
            Language::Ruby => "ruby",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::TypeScript => &["ts", "mts", "cts"],
            Language::Tsx => &["tsx"],
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::Python => &["py"],
            Language::Go => &["go"],
            Language::Rust => &["rs"],
            Language::Java => &["java"],
            Language::C => &["c", "h"],
            Language::Cpp => &["cpp", "cc", "cxx", "hpp", "hh", "hxx"],
            Language::CSharp => &["cs"],
            Language::Php => &["php"],
            Language::Ruby => &["rb"],
        }
    }

    pub fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Language::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
            Language::Php => tree_sitter_php::LANGUAGE_PHP.into(),
            Language::Ruby => tree_sitter_ruby::LANGUAGE.into(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Map a path to a language by its (case-insensitive) extension.
pub fn detect_language(path: &str) -> Option<Language> {
    let ext = Path::new(path).extension()?.to_string_lossy().to_lowercase();
    Language::ALL
        .into_iter()
        .find(|lang| lang.extensions().contains(&ext.as_str()))
}

pub fn compute_content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Directory scanning
// ---------------------------------------------------------------------------

const DEFAULT_SENSITIVE_EXCLUDE_PATTERNS: &[&str] = &[
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*secret*",
    "*secrets*",
    "*credential*",
    "id_rsa",
    "id_dsa",
];

pub const IGNORE_FILE_NAME: &str = ".rippleignore";

/// A source file found on disk, with its path relative to the scan root.
#[derive(Clone, Debug)]
pub struct ScannedFile {
    pub absolute: PathBuf,
    pub relative: String,
    pub language: Language,
    pub size_bytes: u64,
}

/// Walk `root`, honoring `.gitignore` and `.rippleignore`, and return every
/// file with a supported language in path order.
pub fn iter_project_files(root: &Path, exclude_sensitive: bool) -> RippleResult<Vec<ScannedFile>> {
    let mut overrides = OverrideBuilder::new(root);
    if exclude_sensitive {
        for pattern in DEFAULT_SENSITIVE_EXCLUDE_PATTERNS {
            overrides
                .add(&format!("!{pattern}"))
                .map_err(|e| RippleError::Index(format!("bad exclude pattern {pattern}: {e}")))?;
        }
    }
    let overrides = overrides
        .build()
        .map_err(|e| RippleError::Index(e.to_string()))?;

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .parents(false)
        .follow_links(false)
        .add_custom_ignore_filename(IGNORE_FILE_NAME)
        .overrides(overrides)
        .filter_entry(|entry| entry.file_name() != ".git");

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let relative = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        let Some(language) = detect_language(&relative) else {
            continue;
        };
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(ScannedFile {
            absolute: entry.path().to_path_buf(),
            relative,
            language,
            size_bytes,
        });
    }
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}
