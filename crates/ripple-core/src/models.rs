//! Shared typed models used across indexing, impact analysis and storage.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Fresh opaque identifier for persisted records.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// String-backed enums
// ---------------------------------------------------------------------------

/// Declares a fieldless enum stored as lowercase text in SQLite and JSON.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} value: {other}", stringify!($name))),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum!(
    /// Kind of a declared or exported symbol.
    SymbolKind {
        Function => "function",
        Class => "class",
        Method => "method",
        Interface => "interface",
        Type => "type",
        Variable => "variable",
        Default => "default",
    }
);

text_enum!(
    /// Provenance of a dependency edge or impact.
    DetectionMethod {
        Parser => "parser",
        Llm => "llm",
    }
);

text_enum!(
    /// Lifecycle of a change request.
    ChangeStatus {
        Draft => "draft",
        PendingAnalysis => "pending_analysis",
        AnalysisComplete => "analysis_complete",
        PendingReview => "pending_review",
        Approved => "approved",
        Rejected => "rejected",
    }
);

text_enum!(
    ComponentStatus {
        Stable => "stable",
        Flagged => "flagged",
        Pending => "pending",
        Locked => "locked",
    }
);

text_enum!(
    /// Project policy on what approval requires.
    StrictnessMode {
        Visibility => "visibility",
        Soft => "soft",
        Full => "full",
    }
);

text_enum!(
    ContributorRole {
        Owner => "owner",
        Contributor => "contributor",
        ReadOnly => "read_only",
    }
);

impl ChangeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

// ---------------------------------------------------------------------------
// Unified symbol model
// ---------------------------------------------------------------------------

/// One import statement. Lines are 1-based.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub source: String,
    #[serde(default)]
    pub symbols: IndexSet<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_wildcard: bool,
    #[serde(default)]
    pub line: u32,
}

impl Import {
    pub fn new(source: impl Into<String>, line: u32) -> Self {
        Self {
            source: source.into(),
            symbols: IndexSet::new(),
            is_default: false,
            is_wildcard: false,
            line,
        }
    }

    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols.extend(symbols.into_iter().map(Into::into));
        self
    }

    pub fn wildcard(mut self) -> Self {
        self.is_wildcard = true;
        self
    }

    /// True when the import binds no explicit names and therefore depends on
    /// the whole target.
    pub fn binds_everything(&self) -> bool {
        self.is_wildcard || self.symbols.is_empty()
    }

    pub fn is_relative(&self) -> bool {
        crate::indexer::imports::is_relative(&self.source)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub line: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub start_line: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub callee: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub parent_def: Option<String>,
}

/// Everything extracted from one source file. This is the cached symbol
/// snapshot stored against a project file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFile {
    pub path: String,
    pub language: String,
    #[serde(default)]
    pub imports: Vec<Import>,
    #[serde(default)]
    pub exports: Vec<Export>,
    #[serde(default)]
    pub definitions: Vec<Definition>,
    #[serde(default)]
    pub calls: Vec<Call>,
}

impl ParsedFile {
    pub fn new(path: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language: language.into(),
            ..Self::default()
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn export_names(&self) -> BTreeSet<&str> {
        self.exports.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn has_default_export(&self) -> bool {
        self.exports.iter().any(|e| e.kind == SymbolKind::Default)
    }
}

// ---------------------------------------------------------------------------
// Dependency graph
// ---------------------------------------------------------------------------

pub const IMPORT_DEPENDENCY: &str = "import";

/// Component-level edge: `source_component_id` imports from
/// `target_component_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub source_component_id: String,
    pub target_component_id: String,
    pub dependency_type: String,
    pub confidence: f64,
    pub detection_method: DetectionMethod,
    pub symbols: BTreeSet<String>,
}

impl DependencyEdge {
    pub fn parser(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_component_id: source.into(),
            target_component_id: target.into(),
            dependency_type: IMPORT_DEPENDENCY.to_string(),
            confidence: 1.0,
            detection_method: DetectionMethod::Parser,
            symbols: BTreeSet::new(),
        }
    }
}

/// An import that did not resolve to a project file.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalDependency {
    pub file_path: String,
    pub source: String,
    pub line: u32,
}

// ---------------------------------------------------------------------------
// Workflow records
// ---------------------------------------------------------------------------

/// File path to the lines in that file that reference changed symbols.
pub type AffectedLines = BTreeMap<String, Vec<u32>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: String,
    pub project_id: String,
    pub component_id: String,
    pub author_id: String,
    pub title: String,
    pub description: String,
    pub status: ChangeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ChangeRequest {
    pub fn new(
        project_id: impl Into<String>,
        component_id: impl Into<String>,
        author_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            project_id: project_id.into(),
            component_id: component_id.into(),
            author_id: author_id.into(),
            title: title.into(),
            description: String::new(),
            status: ChangeStatus::PendingAnalysis,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeImpact {
    pub id: String,
    pub change_request_id: String,
    pub component_id: String,
    pub contributor_id: String,
    pub detection_method: DetectionMethod,
    pub confidence: f64,
    pub affected_lines: AffectedLines,
    pub acknowledged: bool,
    pub dismissed: bool,
    pub auto_confirmed: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub llm_annotation: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ChangeImpact {
    pub fn new(
        change_request_id: impl Into<String>,
        component_id: impl Into<String>,
        contributor_id: impl Into<String>,
        detection_method: DetectionMethod,
    ) -> Self {
        Self {
            id: new_id(),
            change_request_id: change_request_id.into(),
            component_id: component_id.into(),
            contributor_id: contributor_id.into(),
            detection_method,
            confidence: 1.0,
            affected_lines: AffectedLines::new(),
            acknowledged: false,
            dismissed: false,
            auto_confirmed: false,
            acknowledged_at: None,
            llm_annotation: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.acknowledged || self.dismissed
    }
}

// ---------------------------------------------------------------------------
// Project records
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub strictness_mode: StrictnessMode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub status: ComponentStatus,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Contributor {
    pub component_id: String,
    pub user_id: String,
    pub role: ContributorRole,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectFile {
    pub id: String,
    pub project_id: String,
    pub component_id: Option<String>,
    pub path: String,
    pub language: Option<String>,
    pub size_bytes: i64,
    pub storage_key: String,
    pub content_hash: Option<String>,
    pub parsed_symbols: Option<ParsedFile>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileDraft {
    pub id: String,
    pub file_id: String,
    pub author_id: String,
    pub content: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl FileDraft {
    pub fn new(
        file_id: impl Into<String>,
        author_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            file_id: file_id.into(),
            author_id: author_id.into(),
            content: content.into(),
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Point-in-time record of a project's committed files.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectSnapshot {
    pub id: String,
    pub project_id: String,
    pub change_request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotFile {
    pub file_id: String,
    pub path: String,
    pub storage_key: String,
    pub content_hash: Option<String>,
}
