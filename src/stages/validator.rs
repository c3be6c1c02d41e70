//! Validator stage
//!
//! The only gate between a draft and the caller. Deterministic grounding
//! rules run first; the model judge is consulted only when they pass, and
//! anything it returns that is not a well-formed verdict counts as FAIL.

use crate::error::AnalysisError;
use crate::llm::{complete_structured, CompletionModel, PromptPurpose, PromptSpec, StructuredOutput};
use crate::models::{RuleCheck, Verification, VerificationStatus};
use crate::stages::render_context;
use crate::state::WorkflowState;
use crate::verification::{create_default_verification_engine, GroundingInput, VerificationEngine};
use crate::Result;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = r#"You are a quality controller for financial answers.

Decide whether every factual claim in the ANSWER is supported by the CONTEXT.
- A figure, date or name not present in the context is unsupported.
- Statements about geopolitical or regulatory risk may be supported by the external risk context.
- An answer that says the document does not contain information which IS in the context also fails.
- On FAIL, name each unsupported claim and the specific fact that would be needed to support the answer.

Respond with JSON only."#;

/// Shape the model judge must produce.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorVerdict {
    pub status: VerificationStatus,
    pub reason: String,
    #[serde(default)]
    pub unsupported_claims: Vec<String>,
    #[serde(default)]
    pub missing_facts: Vec<String>,
}

impl StructuredOutput for ValidatorVerdict {
    fn shape() -> &'static str {
        r#"{
  "status": "PASS" | "FAIL",
  "reason": "<one sentence; on FAIL name the unsupported claim or missing fact>",
  "unsupported_claims": ["<claim>", ...],
  "missing_facts": ["<fact the document would need to state>", ...]
}"#
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.status == VerificationStatus::Fail && self.reason.trim().is_empty() {
            return Err("FAIL verdict without a reason".to_string());
        }
        Ok(())
    }
}

pub struct Validator {
    model: Arc<dyn CompletionModel>,
    engine: VerificationEngine,
    timeout: Duration,
}

impl Validator {
    pub fn new(model: Arc<dyn CompletionModel>, timeout: Duration) -> Self {
        Self {
            model,
            engine: create_default_verification_engine(),
            timeout,
        }
    }

    pub fn with_engine(mut self, engine: VerificationEngine) -> Self {
        self.engine = engine;
        self
    }

    pub async fn run(&self, state: &mut WorkflowState) -> Result<VerificationStatus> {
        let draft = state
            .draft_answer()
            .ok_or_else(|| AnalysisError::InvalidState("validator ran without a draft".to_string()))?
            .to_string();

        let evidence = state.evidence_text();
        let report = self.engine.verify(&GroundingInput {
            draft: &draft,
            passages: state.retrieved_context(),
            evidence: &evidence,
        });

        let verification = if !report.passed() {
            Verification {
                status: VerificationStatus::Fail,
                reason: report.issues.join("; "),
                unsupported_claims: report.unsupported_claims,
                missing_facts: Vec::new(),
                checks: report.checks,
                verified_at: Utc::now(),
            }
        } else {
            self.judge(state, &draft, report.checks).await?
        };

        let status = verification.status;

        info!(
            request_id = %state.request_id(),
            retry_count = state.retry_count(),
            status = %status,
            reason = %verification.reason,
            "Verification complete"
        );

        state.set_verification(verification)?;
        Ok(status)
    }

    async fn judge(
        &self,
        state: &WorkflowState,
        draft: &str,
        mut checks: Vec<RuleCheck>,
    ) -> Result<Verification> {
        let user = format!(
            "CONTEXT:\n{}\n\nQUESTION:\n{}\n\nANSWER:\n{}\n\nRespond in exactly this JSON shape:\n{}",
            render_context(state),
            state.query(),
            draft,
            ValidatorVerdict::shape()
        );
        let prompt = PromptSpec::json(PromptPurpose::Verify, SYSTEM_PROMPT, user);

        let verdict =
            match complete_structured::<ValidatorVerdict>(self.model.as_ref(), &prompt, self.timeout)
                .await
            {
                Ok(verdict) => verdict,
                Err(AnalysisError::ShapeMismatch(detail)) => {
                    warn!(request_id = %state.request_id(), detail = %detail, "Malformed verdict; failing closed");
                    ValidatorVerdict {
                        status: VerificationStatus::Fail,
                        reason: "validator response was not a well-formed verdict".to_string(),
                        unsupported_claims: Vec::new(),
                        missing_facts: Vec::new(),
                    }
                }
                Err(e) => return Err(e),
            };

        checks.push(RuleCheck {
            rule_name: "model_judge".to_string(),
            passed: verdict.status == VerificationStatus::Pass,
            details: verdict.reason.clone(),
        });

        Ok(Verification {
            status: verdict.status,
            reason: verdict.reason,
            unsupported_claims: verdict.unsupported_claims,
            missing_facts: verdict.missing_facts,
            checks,
            verified_at: Utc::now(),
        })
    }
}
