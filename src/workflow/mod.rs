//! Workflow engine - the cyclic analysis loop
//!
//! RESEARCH → ANALYZE → VALIDATE → INSIGHTS → DONE
//!                         ↓ FAIL (retry_count < max_retries)
//!                      RESEARCH
//!                         ↓ FAIL (retries exhausted)
//!                   DONE_WITH_WARNING
//!
//! Transitions are a pure function of (phase, state). The retry bound is
//! enforced by `WorkflowState::begin_retry`, so the loop cannot run more than
//! `max_retries + 1` research/validate cycles.

use crate::audit::{AnalysisRecord, AuditLog};
use crate::config::AnalysisConfig;
use crate::enrichment::ContextEnricher;
use crate::error::AnalysisError;
use crate::llm::CompletionModel;
use crate::models::{AnalysisResult, DocumentScope, VerificationStatus};
use crate::retrieval::RetrievalGateway;
use crate::stages::{Analyst, IntelligenceHub, MissingFactHint, QueryRewriter, Researcher, Validator};
use crate::state::{VerificationPhase, WorkflowState};
use crate::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Research,
    Analyze,
    Validate,
    Insights,
    Done,
    DoneWithWarning,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::DoneWithWarning)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Research => "RESEARCH",
            Phase::Analyze => "ANALYZE",
            Phase::Validate => "VALIDATE",
            Phase::Insights => "INSIGHTS",
            Phase::Done => "DONE",
            Phase::DoneWithWarning => "DONE_WITH_WARNING",
        };
        write!(f, "{}", s)
    }
}

/// Next phase given the phase just completed.
pub fn next_phase(phase: Phase, state: &WorkflowState) -> Phase {
    match phase {
        Phase::Research => Phase::Analyze,
        Phase::Analyze => Phase::Validate,
        Phase::Validate => match state.verification_phase() {
            VerificationPhase::Passed => Phase::Insights,
            VerificationPhase::Failed if state.retry_count() < state.max_retries() => {
                Phase::Research
            }
            _ => Phase::DoneWithWarning,
        },
        Phase::Insights => Phase::Done,
        terminal => terminal,
    }
}

/// Sequences the stages for one request at a time; holds no per-request state.
pub struct WorkflowEngine {
    researcher: Researcher,
    analyst: Analyst,
    validator: Validator,
    hub: IntelligenceHub,
    rewriter: Box<dyn QueryRewriter>,
    audit_log: Arc<AuditLog>,
}

impl WorkflowEngine {
    pub fn new(
        researcher: Researcher,
        analyst: Analyst,
        validator: Validator,
        hub: IntelligenceHub,
    ) -> Self {
        Self {
            researcher,
            analyst,
            validator,
            hub,
            rewriter: Box::new(MissingFactHint),
            audit_log: Arc::new(AuditLog::new()),
        }
    }

    /// Wire every stage from configuration.
    pub fn from_config(
        config: &AnalysisConfig,
        gateway: Arc<dyn RetrievalGateway>,
        model: Arc<dyn CompletionModel>,
        enricher: Arc<ContextEnricher>,
    ) -> Self {
        Self::new(
            Researcher::new(gateway, enricher, config.top_k, config.retrieval_timeout),
            Analyst::new(Arc::clone(&model), config.completion_timeout),
            Validator::new(Arc::clone(&model), config.completion_timeout),
            IntelligenceHub::new(model, config.completion_timeout),
        )
        .with_audit_log(Arc::new(AuditLog::with_capacity(config.audit_capacity)))
    }

    pub fn with_rewriter(mut self, rewriter: Box<dyn QueryRewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn with_audit_log(mut self, audit_log: Arc<AuditLog>) -> Self {
        self.audit_log = audit_log;
        self
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit_log
    }

    /// Run the analysis loop for one query against `scope`.
    pub async fn run(
        &self,
        scope: DocumentScope,
        query: &str,
        max_retries: u32,
    ) -> Result<AnalysisResult> {
        let start_time = Instant::now();
        let mut state = WorkflowState::new(scope, query, max_retries);

        info!(
            request_id = %state.request_id(),
            scope = %state.document_scope(),
            max_retries,
            "Analysis started"
        );
        state.record(format!("INPUT: \"{}\" against {}", query, state.document_scope()));

        let mut phase = Phase::Research;

        while !phase.is_terminal() {
            self.execute(phase, &mut state).await?;

            let next = next_phase(phase, &state);

            if phase == Phase::Validate && next == Phase::Research {
                let verification = state.verification().ok_or_else(|| {
                    AnalysisError::InvalidState("retry without a verdict".to_string())
                })?;
                let rewritten = self.rewriter.rewrite(state.original_query(), verification);
                state.begin_retry(rewritten)?;
                state.record(format!(
                    "RETRY {}/{}: query rewritten to \"{}\"",
                    state.retry_count(),
                    state.max_retries(),
                    state.query()
                ));
            }

            debug!(request_id = %state.request_id(), from = %phase, to = %next, "Transition");
            phase = next;
        }

        state.mark_terminal();
        state.record(format!("{}: finished in {} ms", phase, start_time.elapsed().as_millis()));

        self.finish(phase, state).await
    }

    async fn execute(&self, phase: Phase, state: &mut WorkflowState) -> Result<()> {
        match phase {
            Phase::Research => {
                let added = self.researcher.run(state).await?;
                state.record(format!(
                    "RESEARCH: {} new passages ({} held)",
                    added,
                    state.retrieved_context().len()
                ));
                if let Some(bundle) = state.enrichment() {
                    let line = format!(
                        "RESEARCH: {} risk signals for {}",
                        bundle.risk_signals.len(),
                        bundle.entity
                    );
                    state.record(line);
                }
            }
            Phase::Analyze => {
                self.analyst.run(state).await?;
                state.record("ANALYZE: draft answer produced");
            }
            Phase::Validate => {
                let status = self.validator.run(state).await?;
                let reason = state
                    .verification()
                    .map(|v| v.reason.clone())
                    .unwrap_or_default();
                state.record(format!("VALIDATE: {} ({})", status, reason));
            }
            Phase::Insights => {
                let attached = self.hub.run(state).await?;
                state.record(if attached {
                    "INSIGHTS: report attached"
                } else {
                    "INSIGHTS: unavailable, answer returned without insights"
                });
            }
            Phase::Done | Phase::DoneWithWarning => {}
        }
        Ok(())
    }

    async fn finish(&self, phase: Phase, state: WorkflowState) -> Result<AnalysisResult> {
        let verification_status = state
            .verification_status()
            .unwrap_or(VerificationStatus::Fail);
        let verification_reason = state
            .verification()
            .map(|v| v.reason.clone())
            .unwrap_or_default();

        let low_confidence = phase == Phase::DoneWithWarning;
        let warning = low_confidence.then(|| {
            format!(
                "Answer could not be verified against the document after {} retries: {}",
                state.retry_count(),
                verification_reason
            )
        });

        if low_confidence {
            warn!(
                request_id = %state.request_id(),
                retry_count = state.retry_count(),
                reason = %verification_reason,
                "Validation exhausted; returning low-confidence answer"
            );
        }

        let audit_id = Uuid::new_v4();
        let result = AnalysisResult {
            request_id: state.request_id(),
            answer: state.draft_answer().unwrap_or_default().to_string(),
            verification_status,
            verification_reason,
            low_confidence,
            warning,
            insights: state.insights().cloned(),
            retrieved_source_locators: state
                .retrieved_context()
                .iter()
                .map(|p| p.source_locator.clone())
                .collect(),
            enrichment: state.enrichment().cloned(),
            retry_count: state.retry_count(),
            audit_id,
            reasoning_trace: state.trace().to_vec(),
        };

        self.audit_log
            .record(AnalysisRecord::from_result(
                audit_id,
                state.document_scope(),
                state.original_query(),
                &result,
            ))
            .await?;

        info!(
            request_id = %result.request_id,
            status = %result.verification_status,
            retry_count = result.retry_count,
            insights = result.insights.is_some(),
            "Analysis finished"
        );

        Ok(result)
    }
}
