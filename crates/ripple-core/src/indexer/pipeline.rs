//! Project-wide parsing with Rayon-based parallelism.

use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::errors::RippleResult;
use crate::indexer::extractors::ParseOutcome;
use crate::indexer::filesystem::iter_project_files;
use crate::indexer::parser::ParserRegistry;

/// Raw bytes of one project file.
#[derive(Clone, Debug)]
pub struct SourceFile {
    pub path: String,
    pub content: Vec<u8>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileFailure {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ParseReport {
    pub parsed: Vec<ParseOutcome>,
    /// Paths with no supported language.
    pub skipped: Vec<String>,
    pub failed: Vec<FileFailure>,
    pub elapsed_ms: i64,
}

enum FileResult {
    Parsed(ParseOutcome),
    Skipped(String),
    Failed(FileFailure),
}

fn parse_worker(registry: &ParserRegistry, file: &SourceFile) -> FileResult {
    match registry.parse_file(&file.path, &file.content) {
        Ok(Some(outcome)) => FileResult::Parsed(outcome),
        Ok(None) => FileResult::Skipped(file.path.clone()),
        Err(e) => FileResult::Failed(FileFailure {
            path: file.path.clone(),
            message: e.to_string(),
        }),
    }
}

/// Parse every file on a pool of `workers` threads. A file that fails is
/// logged and reported, never fatal to the batch. Output keeps input order.
pub fn parse_sources(registry: &ParserRegistry, files: &[SourceFile], workers: usize) -> ParseReport {
    let started = Instant::now();
    if files.is_empty() {
        return ParseReport::default();
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();

    let results: Vec<FileResult> = match pool {
        Ok(pool) => pool.install(|| {
            files
                .par_iter()
                .map(|file| parse_worker(registry, file))
                .collect()
        }),
        Err(e) => {
            warn!("parse pool unavailable, parsing sequentially: {e}");
            files.iter().map(|file| parse_worker(registry, file)).collect()
        }
    };

    let mut report = ParseReport::default();
    for result in results {
        match result {
            FileResult::Parsed(outcome) => report.parsed.push(outcome),
            FileResult::Skipped(path) => report.skipped.push(path),
            FileResult::Failed(failure) => {
                warn!("skipping {}: {}", failure.path, failure.message);
                report.failed.push(failure);
            }
        }
    }
    report.elapsed_ms = started.elapsed().as_millis() as i64;
    info!(
        "parsed {} files ({} skipped, {} failed) in {} ms",
        report.parsed.len(),
        report.skipped.len(),
        report.failed.len(),
        report.elapsed_ms
    );
    report
}

/// Read every supported file under `root`. Unreadable files are logged and
/// left out.
pub fn read_local_sources(root: &Path, exclude_sensitive: bool) -> RippleResult<Vec<SourceFile>> {
    let mut sources = Vec::new();
    for scanned in iter_project_files(root, exclude_sensitive)? {
        match std::fs::read(&scanned.absolute) {
            Ok(content) => sources.push(SourceFile::new(scanned.relative, content)),
            Err(e) => warn!("cannot read {}: {e}", scanned.absolute.display()),
        }
    }
    Ok(sources)
}
