//! Line-level diff of committed content against a draft.
//!
//! Hunks use three lines of context. Line numbers are in new-file numbering;
//! a removed line is attributed to the new-file line it was removed before.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

const CONTEXT_LINES: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HunkType {
    Context,
    Add,
    Remove,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiffHunk {
    pub start_line: u32,
    pub end_line: u32,
    /// Type of the last change in the hunk.
    #[serde(rename = "type")]
    pub hunk_type: HunkType,
    /// Raw `+`/`-`/` ` prefixed lines.
    pub content: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub hunks: Vec<DiffHunk>,
    /// Sorted, deduplicated.
    pub changed_lines: Vec<u32>,
    pub additions: usize,
    pub deletions: usize,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// `---`/`+++` block for `path` followed by every hunk.
    pub fn unified_text(&self, path: &str) -> String {
        let mut out = format!("--- {path}\n+++ {path}\n");
        for hunk in &self.hunks {
            out.push_str(&hunk.content);
            if !hunk.content.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

pub fn generate_diff(original: &str, modified: &str) -> DiffResult {
    let text_diff = TextDiff::from_lines(original, modified);
    let mut result = DiffResult::default();

    for group in text_diff.grouped_ops(CONTEXT_LINES) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        // Unified headers number an empty range from the line before it.
        let new_len = last.new_range().end - first.new_range().start;
        let start = if new_len == 0 {
            first.new_range().start
        } else {
            first.new_range().start + 1
        } as u32;

        let mut hunk = DiffHunk {
            start_line: start,
            end_line: start,
            hunk_type: HunkType::Context,
            content: String::new(),
        };
        let mut line_num = start;

        for op in &group {
            for change in text_diff.iter_changes(op) {
                let prefix = match change.tag() {
                    ChangeTag::Insert => {
                        hunk.hunk_type = HunkType::Add;
                        result.additions += 1;
                        result.changed_lines.push(line_num);
                        line_num += 1;
                        hunk.end_line = line_num;
                        '+'
                    }
                    ChangeTag::Delete => {
                        hunk.hunk_type = HunkType::Remove;
                        result.deletions += 1;
                        result.changed_lines.push(line_num);
                        hunk.end_line = hunk.end_line.max(line_num);
                        '-'
                    }
                    ChangeTag::Equal => {
                        line_num += 1;
                        hunk.end_line = line_num;
                        ' '
                    }
                };
                hunk.content.push(prefix);
                hunk.content.push_str(change.value());
                if change.missing_newline() {
                    hunk.content.push_str("\n\\ No newline at end of file\n");
                }
            }
        }
        result.hunks.push(hunk);
    }

    result.changed_lines.sort_unstable();
    result.changed_lines.dedup();
    result
}
