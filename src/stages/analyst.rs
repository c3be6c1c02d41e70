//! Analyst stage: drafts an answer grounded in the held context.

use crate::error::AnalysisError;
use crate::llm::{complete_with_retry, CompletionModel, PromptPurpose, PromptSpec};
use crate::stages::render_context;
use crate::state::WorkflowState;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const SYSTEM_PROMPT: &str = r#"You are a strict financial analyst.

Rules:
- Answer ONLY from the numbered context passages and the external risk context.
- Cite every claim with the passage number in brackets, e.g. [2].
- Quote figures exactly as they appear in the context.
- If the context does not contain the answer, say plainly that the document does not state it. Do not estimate or speculate.
- Use external risk context only for statements about geopolitical or regulatory risk."#;

pub struct Analyst {
    model: Arc<dyn CompletionModel>,
    timeout: Duration,
}

impl Analyst {
    pub fn new(model: Arc<dyn CompletionModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub fn build_prompt(state: &WorkflowState) -> PromptSpec {
        let user = format!(
            "Context:\n{}\n\nQuestion:\n{}\n\nAnswer:",
            render_context(state),
            state.query()
        );
        PromptSpec::text(PromptPurpose::Draft, SYSTEM_PROMPT, user)
    }

    pub async fn run(&self, state: &mut WorkflowState) -> Result<()> {
        let prompt = Self::build_prompt(state);
        let draft = complete_with_retry(self.model.as_ref(), &prompt, self.timeout).await?;
        let draft = draft.trim().to_string();

        if draft.is_empty() {
            return Err(AnalysisError::LlmError("analyst returned an empty draft".to_string()));
        }

        info!(
            request_id = %state.request_id(),
            retry_count = state.retry_count(),
            draft_chars = draft.len(),
            "Draft answer produced"
        );

        state.set_draft(draft);
        Ok(())
    }
}
