//! Optional LLM enrichment of parser-detected impacts.
//!
//! One completion request per change request. Every failure mode (network,
//! timeout, non-JSON reply) degrades to an empty finding list.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RippleSettings;
use crate::errors::{RippleError, RippleResult};

static JSON_ARRAY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\[.*\]").unwrap());

/// A text completion backend.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, prompt: &str) -> RippleResult<String>;

    fn name(&self) -> &str;
}

/// Ollama `/api/generate` client.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn from_settings(settings: &RippleSettings) -> Self {
        Self::new(
            &settings.ollama_base_url,
            &settings.ollama_model,
            settings.impact_engine_timeout,
        )
    }
}

impl CompletionClient for OllamaClient {
    fn complete(&self, prompt: &str) -> RippleResult<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| RippleError::Llm(format!("Ollama request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(RippleError::Llm(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let json: Value = response
            .json()
            .map_err(|e| RippleError::Llm(format!("Ollama response parse error: {e}")))?;

        Ok(json
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// One location the model believes is affected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LlmFinding {
    pub file: String,
    pub line: u32,
    pub reason: String,
    pub suggested_fix: String,
    /// Model-reported, clamped to `0.0..=1.0`.
    pub confidence: f64,
}

impl LlmFinding {
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let file = object.get("file")?.as_str()?.to_string();
        let line = object.get("line")?.as_u64()?;
        let reason = object.get("reason")?.as_str()?.to_string();
        let suggested_fix = object
            .get("suggested_fix")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let confidence = object
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        Some(Self {
            file,
            line: u32::try_from(line).ok()?,
            reason,
            suggested_fix,
            confidence,
        })
    }
}

pub fn build_prompt(diff: &str, affected_files: &[String]) -> String {
    let files = affected_files
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are analyzing a code change. Here is the diff:\n{diff}\n\n\
         Here are the files that may be affected:\n{files}\n\n\
         For each affected location, respond with JSON only:\n\
         [\n  {{\"file\": \"path\", \"line\": 1, \"reason\": \"str\", \
         \"suggested_fix\": \"str\", \"confidence\": 0.9}}\n]\n"
    )
}

/// Pull the bracketed JSON array out of free text and keep the well-formed
/// entries.
pub fn parse_findings(response: &str) -> Vec<LlmFinding> {
    let Some(found) = JSON_ARRAY_RE.find(response) else {
        debug!("LLM response contained no JSON array");
        return Vec::new();
    };
    let entries: Vec<Value> = match serde_json::from_str(found.as_str()) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("LLM response array is not valid JSON: {e}");
            return Vec::new();
        }
    };
    entries.iter().filter_map(LlmFinding::from_value).collect()
}

/// Ask `client` which locations the diff affects. Never fails.
pub fn annotate(client: &dyn CompletionClient, diff: &str, affected_files: &[String]) -> Vec<LlmFinding> {
    let prompt = build_prompt(diff, affected_files);
    match client.complete(&prompt) {
        Ok(response) => parse_findings(&response),
        Err(e) => {
            warn!("{} impact analysis failed: {e}", client.name());
            Vec::new()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Replies with a fixed text, or fails when `reply` is `None`.
    pub(crate) struct CannedClient {
        pub reply: Option<String>,
    }

    impl CompletionClient for CannedClient {
        fn complete(&self, prompt: &str) -> RippleResult<String> {
            assert!(prompt.contains("Here is the diff"));
            self.reply
                .clone()
                .ok_or_else(|| RippleError::Llm("offline".into()))
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    #[test]
    fn test_parse_findings_from_chatty_reply() {
        let reply = r#"Sure! Here is my analysis:
[
  {"file": "y/app.ts", "line": 4, "reason": "calls helper", "suggested_fix": "pass flag", "confidence": 0.8},
  {"file": "y/other.ts", "line": "x", "reason": "bad line"},
  {"file": "y/more.ts", "line": 9, "reason": "too sure", "confidence": 3.5}
]
Hope this helps."#;
        let findings = parse_findings(reply);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].file, "y/app.ts");
        assert_eq!(findings[0].line, 4);
        assert_eq!(findings[0].suggested_fix, "pass flag");
        assert_eq!(findings[1].confidence, 1.0);
        assert_eq!(findings[1].suggested_fix, "");
    }

    #[test]
    fn test_parse_findings_tolerates_garbage() {
        assert!(parse_findings("no json here").is_empty());
        assert!(parse_findings("[not, valid json]").is_empty());
        assert!(parse_findings("[]").is_empty());
    }

    #[test]
    fn test_annotate_swallows_client_errors() {
        let client = CannedClient { reply: None };
        assert!(annotate(&client, "--- a\n+++ a\n", &["a".into()]).is_empty());

        let client = CannedClient {
            reply: Some(r#"[{"file": "a", "line": 1, "reason": "r", "confidence": 0.4}]"#.into()),
        };
        let findings = annotate(&client, "--- a\n+++ a\n", &["a".into()]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].confidence, 0.4);
    }

    #[test]
    fn test_prompt_lists_files() {
        let prompt = build_prompt("DIFF", &["y/app.ts".into(), "z/lib.py".into()]);
        assert!(prompt.contains("DIFF"));
        assert!(prompt.contains("- y/app.ts\n- z/lib.py"));
        assert!(prompt.contains("\"suggested_fix\""));
    }

    #[test]
    fn test_ollama_client_from_settings() {
        let settings = RippleSettings {
            ollama_base_url: "http://ollama.internal:11434/".into(),
            ..RippleSettings::default()
        };
        let client = OllamaClient::from_settings(&settings);
        assert_eq!(client.base_url, "http://ollama.internal:11434");
        assert_eq!(client.model, settings.ollama_model);
        assert_eq!(client.name(), "ollama");
    }

    #[test]
    fn test_ollama_unreachable_is_an_error() {
        let client = OllamaClient::new("http://127.0.0.1:1", "m", Duration::from_secs(2));
        assert!(matches!(client.complete("hi"), Err(RippleError::Llm(_))));
    }
}
