//! Runtime settings read from `RIPPLE_*` environment variables.

use std::time::Duration;

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "deepseek-coder:6.7b";
pub const DEFAULT_IMPACT_ENGINE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PARSE_WORKERS: usize = 4;
pub const DEFAULT_AUTOCONFIRM_AFTER_HOURS: i64 = 24;
pub const DEFAULT_AUTOCONFIRM_INTERVAL_SECS: u64 = 3600;

#[derive(Clone, Debug, PartialEq)]
pub struct RippleSettings {
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub impact_engine_timeout: Duration,
    pub llm_enabled: bool,
    pub parse_workers: usize,
    pub autoconfirm_after_hours: i64,
    pub autoconfirm_interval: Duration,
    pub exclude_sensitive: bool,
}

impl Default for RippleSettings {
    fn default() -> Self {
        Self {
            ollama_base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            impact_engine_timeout: Duration::from_secs(DEFAULT_IMPACT_ENGINE_TIMEOUT_SECS),
            llm_enabled: true,
            parse_workers: DEFAULT_PARSE_WORKERS,
            autoconfirm_after_hours: DEFAULT_AUTOCONFIRM_AFTER_HOURS,
            autoconfirm_interval: Duration::from_secs(DEFAULT_AUTOCONFIRM_INTERVAL_SECS),
            exclude_sensitive: true,
        }
    }
}

impl RippleSettings {
    /// Load settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup. Missing or unparseable
    /// values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            ollama_base_url: text("RIPPLE_OLLAMA_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.ollama_base_url),
            ollama_model: text("RIPPLE_OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            impact_engine_timeout: text("RIPPLE_IMPACT_ENGINE_TIMEOUT")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.impact_engine_timeout),
            llm_enabled: flag(text("RIPPLE_LLM_ENABLED")),
            parse_workers: text("RIPPLE_PARSE_WORKERS")
                .and_then(|v| v.parse::<usize>().ok())
                .map(|n| n.max(1))
                .unwrap_or(defaults.parse_workers),
            autoconfirm_after_hours: text("RIPPLE_AUTOCONFIRM_AFTER_HOURS")
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|h| *h > 0)
                .unwrap_or(defaults.autoconfirm_after_hours),
            autoconfirm_interval: text("RIPPLE_AUTOCONFIRM_INTERVAL_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.autoconfirm_interval),
            exclude_sensitive: flag(text("RIPPLE_EXCLUDE_SENSITIVE")),
        }
    }
}

/// Boolean env flags default to on; only an explicit negative turns them off.
fn flag(value: Option<String>) -> bool {
    match value {
        Some(val) => {
            let v = val.to_lowercase();
            !matches!(v.as_str(), "0" | "false" | "no" | "off")
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = RippleSettings::from_lookup(|_| None);
        assert_eq!(settings, RippleSettings::default());
        assert_eq!(settings.ollama_model, "deepseek-coder:6.7b");
        assert_eq!(settings.autoconfirm_after_hours, 24);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let settings = RippleSettings::from_lookup(lookup(&[
            ("RIPPLE_OLLAMA_BASE_URL", "http://llm:11434/"),
            ("RIPPLE_IMPACT_ENGINE_TIMEOUT", "5"),
            ("RIPPLE_PARSE_WORKERS", "0"),
            ("RIPPLE_AUTOCONFIRM_AFTER_HOURS", "48"),
        ]));
        assert_eq!(settings.ollama_base_url, "http://llm:11434");
        assert_eq!(settings.impact_engine_timeout, Duration::from_secs(5));
        assert_eq!(settings.parse_workers, 1);
        assert_eq!(settings.autoconfirm_after_hours, 48);
    }

    #[test]
    fn test_flag_parsing() {
        for off in ["0", "false", "No", " OFF "] {
            let settings = RippleSettings::from_lookup(lookup(&[("RIPPLE_LLM_ENABLED", off)]));
            assert!(!settings.llm_enabled, "{off} should disable");
        }
        let settings = RippleSettings::from_lookup(lookup(&[("RIPPLE_LLM_ENABLED", "yes")]));
        assert!(settings.llm_enabled);
    }

    #[test]
    fn test_garbage_values_fall_back() {
        let settings = RippleSettings::from_lookup(lookup(&[
            ("RIPPLE_IMPACT_ENGINE_TIMEOUT", "soon"),
            ("RIPPLE_AUTOCONFIRM_AFTER_HOURS", "-3"),
        ]));
        assert_eq!(settings.impact_engine_timeout, Duration::from_secs(60));
        assert_eq!(settings.autoconfirm_after_hours, 24);
    }
}
