//! Runtime configuration
//!
//! Loaded from the process environment (and `.env` when present).

use crate::audit::DEFAULT_AUDIT_CAPACITY;
use crate::error::AnalysisError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Bound on VALIDATE → RESEARCH transitions per request
    pub max_retries: u32,
    pub top_k: usize,
    pub retrieval_timeout: Duration,
    pub completion_timeout: Duration,
    pub fetch_timeout: Duration,
    pub fetch_max_attempts: u32,
    /// Base delay for rate-limited sources, doubled per attempt
    pub fetch_backoff: Duration,
    pub max_risk_signals: usize,
    pub enable_enrichment: bool,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub news_api_key: Option<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Most recent analyses kept in the audit log; 0 disables recording
    pub audit_capacity: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            top_k: 8,
            retrieval_timeout: Duration::from_secs(10),
            completion_timeout: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(15),
            fetch_max_attempts: 3,
            fetch_backoff: Duration::from_millis(1000),
            max_risk_signals: 4,
            enable_enrichment: true,
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.0-flash".to_string(),
            news_api_key: None,
            chunk_size: 1000,
            chunk_overlap: 200,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

impl AnalysisConfig {
    /// Build configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        Ok(Self {
            max_retries: parse_var("ANALYSIS_MAX_RETRIES", defaults.max_retries)?,
            top_k: parse_var("RETRIEVAL_TOP_K", defaults.top_k)?,
            retrieval_timeout: secs_var("RETRIEVAL_TIMEOUT_SECS", defaults.retrieval_timeout)?,
            completion_timeout: secs_var("COMPLETION_TIMEOUT_SECS", defaults.completion_timeout)?,
            fetch_timeout: secs_var("FETCH_TIMEOUT_SECS", defaults.fetch_timeout)?,
            fetch_max_attempts: parse_var("FETCH_MAX_ATTEMPTS", defaults.fetch_max_attempts)?,
            fetch_backoff: Duration::from_millis(parse_var(
                "FETCH_BACKOFF_MS",
                defaults.fetch_backoff.as_millis() as u64,
            )?),
            max_risk_signals: parse_var("MAX_RISK_SIGNALS", defaults.max_risk_signals)?,
            enable_enrichment: parse_var(
                "ENABLE_GEOPOLITICAL_ANALYSIS",
                defaults.enable_enrichment,
            )?,
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: env::var("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            news_api_key: env::var("NEWS_API_KEY").ok().filter(|k| !k.is_empty()),
            chunk_size: parse_var("CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_var("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            audit_capacity: parse_var("AUDIT_LOG_CAPACITY", defaults.audit_capacity)?,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        AnalysisError::ConfigError(format!("{} has invalid value '{}'", name, raw))
    })
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    parse_var(name, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_workflow_bounds() {
        let config = AnalysisConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.fetch_max_attempts, 3);
        assert!(config.enable_enrichment);
        assert!(config.news_api_key.is_none());
        assert_eq!(config.audit_capacity, DEFAULT_AUDIT_CAPACITY);
    }

    #[test]
    fn test_parse_value_reports_variable() {
        let err = parse_value::<u32>("ANALYSIS_MAX_RETRIES", "two").unwrap_err();
        assert!(err.to_string().contains("ANALYSIS_MAX_RETRIES"));

        let ok: bool = parse_value("ENABLE_GEOPOLITICAL_ANALYSIS", " false ").unwrap();
        assert!(!ok);
    }
}
