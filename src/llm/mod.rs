//! Language-model completion contract
//!
//! Stages talk to a `CompletionModel` through two helpers:
//! `complete_with_retry` (deadline per call, one retry on timeout) and
//! `complete_structured` (JSON output parsed into a typed shape, then
//! checked; any non-conformance is `ShapeMismatch`).

use crate::error::AnalysisError;
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

pub mod mock;
pub use mock::ScriptedModel;

/// Which stage a prompt belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptPurpose {
    Draft,
    Verify,
    Insights,
}

impl fmt::Display for PromptPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PromptPurpose::Draft => "draft",
            PromptPurpose::Verify => "verify",
            PromptPurpose::Insights => "insights",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub purpose: PromptPurpose,
    pub system: String,
    pub user: String,
    /// Ask the backend for a JSON-only response
    pub json_output: bool,
}

impl PromptSpec {
    pub fn text(purpose: PromptPurpose, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            purpose,
            system: system.into(),
            user: user.into(),
            json_output: false,
        }
    }

    pub fn json(purpose: PromptPurpose, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            json_output: true,
            ..Self::text(purpose, system, user)
        }
    }
}

/// Opaque completion backend
#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &PromptSpec) -> Result<String>;
}

/// A typed shape a structured completion must conform to.
pub trait StructuredOutput: DeserializeOwned {
    /// Format instructions embedded in the prompt
    fn shape() -> &'static str;

    /// Constraints serde cannot express (ranges, non-empty fields).
    fn check(&self) -> std::result::Result<(), String>;
}

/// Run one completion under `deadline`, retrying once if it times out.
pub async fn complete_with_retry(
    model: &dyn CompletionModel,
    prompt: &PromptSpec,
    deadline: Duration,
) -> Result<String> {
    let mut last_error = None;

    for attempt in 1..=2u32 {
        match tokio::time::timeout(deadline, model.complete(prompt)).await {
            Ok(Ok(text)) => {
                debug!(model = %model.name(), purpose = %prompt.purpose, attempt, "Completion received");
                return Ok(text);
            }
            Ok(Err(e)) if e.is_timeout() => last_error = Some(e),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                last_error = Some(AnalysisError::CompletionTimeout(format!(
                    "{} {} exceeded {:?}",
                    model.name(),
                    prompt.purpose,
                    deadline
                )))
            }
        }

        warn!(model = %model.name(), purpose = %prompt.purpose, attempt, "Completion timed out");
    }

    Err(last_error.unwrap_or_else(|| {
        AnalysisError::CompletionTimeout(format!("{} {}", model.name(), prompt.purpose))
    }))
}

/// Completion parsed into `T` and checked; non-conforming output is `ShapeMismatch`.
pub async fn complete_structured<T: StructuredOutput>(
    model: &dyn CompletionModel,
    prompt: &PromptSpec,
    deadline: Duration,
) -> Result<T> {
    let raw = complete_with_retry(model, prompt, deadline).await?;
    parse_structured(&raw)
}

pub fn parse_structured<T: StructuredOutput>(raw: &str) -> Result<T> {
    let json = extract_json(raw);

    let value: T = serde_json::from_str(json).map_err(|e| {
        AnalysisError::ShapeMismatch(format!("{} | raw={}", e, abbreviate(raw)))
    })?;

    value.check().map_err(AnalysisError::ShapeMismatch)?;
    Ok(value)
}

/// Strip markdown fences and surrounding prose down to the outermost JSON object.
pub fn extract_json(raw: &str) -> &str {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned,
    }
}

fn abbreviate(raw: &str) -> String {
    let head: String = raw.chars().take(200).collect();
    if head.len() < raw.len() {
        format!("{}...", head)
    } else {
        head
    }
}
