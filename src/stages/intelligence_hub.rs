//! Intelligence Hub stage
//!
//! Structured insights over a validated answer. Failure here only costs
//! richness: the request still returns its verified answer, with no insights.

use crate::error::AnalysisError;
use crate::llm::{complete_structured, CompletionModel, PromptPurpose, PromptSpec, StructuredOutput};
use crate::models::IntelligenceReport;
use crate::stages::render_context;
use crate::state::{VerificationPhase, WorkflowState};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = r#"You are a financial intelligence analyst.
Extract real metrics and insights from the context and the validated answer.
Never invent figures; metric values must appear in the context.
Respond with JSON only."#;

impl StructuredOutput for IntelligenceReport {
    fn shape() -> &'static str {
        r#"{
  "highlights": [
    { "icon": "chart" | "growth" | "calendar" | "alert" | "check" | "globe" | "chain" | "dollar",
      "text": "<highlight>", "metric_value": "<figure from context>" | null }
  ],
  "sentiment": { "score": <integer 0-100>, "direction": "improving" | "stable" | "declining", "description": "<one sentence>" },
  "risk_level": "LOW" | "MED" | "HIGH",
  "risk_factors": [ { "name": "<risk>", "severity": "LOW" | "MED" | "HIGH" } ],
  "suggested_questions": ["<follow-up question>", ...]
}"#
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.sentiment.score > 100 {
            return Err(format!("sentiment score {} outside 0-100", self.sentiment.score));
        }
        if self.sentiment.description.trim().is_empty() {
            return Err("sentiment description is empty".to_string());
        }
        if let Some(empty) = self.highlights.iter().position(|h| h.text.trim().is_empty()) {
            return Err(format!("highlight {} has no text", empty));
        }
        if self.risk_factors.iter().any(|r| r.name.trim().is_empty()) {
            return Err("risk factor without a name".to_string());
        }
        Ok(())
    }
}

pub struct IntelligenceHub {
    model: Arc<dyn CompletionModel>,
    timeout: Duration,
}

impl IntelligenceHub {
    pub fn new(model: Arc<dyn CompletionModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Returns whether insights were attached.
    pub async fn run(&self, state: &mut WorkflowState) -> Result<bool> {
        if state.verification_phase() != VerificationPhase::Passed {
            return Err(AnalysisError::InvalidState(
                "intelligence hub requires a PASS verification".to_string(),
            ));
        }

        let answer = state.draft_answer().unwrap_or_default();
        let user = format!(
            "Context:\n{}\n\nQuestion: {}\nValidated answer: {}\n\nGenerate an intelligence report (highlights, sentiment, risk, follow-up questions) in exactly this JSON shape:\n{}",
            render_context(state),
            state.original_query(),
            answer,
            IntelligenceReport::shape()
        );
        let prompt = PromptSpec::json(PromptPurpose::Insights, SYSTEM_PROMPT, user);

        match complete_structured::<IntelligenceReport>(self.model.as_ref(), &prompt, self.timeout).await {
            Ok(report) => {
                info!(
                    request_id = %state.request_id(),
                    highlights = report.highlights.len(),
                    sentiment = report.sentiment.score,
                    "Insights extracted"
                );
                state.set_insights(report)?;
                Ok(true)
            }
            Err(e) => {
                warn!(request_id = %state.request_id(), error = %e, "Insights unavailable; returning answer without them");
                Ok(false)
            }
        }
    }
}
