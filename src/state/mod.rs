//! Per-request workflow state
//!
//! One `WorkflowState` is owned by exactly one in-flight request. Fields are
//! private so the mutators below are the only way to change them; each one
//! keeps the invariants (append-only context, monotonic retries, insights
//! only after PASS).

use crate::error::AnalysisError;
use crate::models::{
    DocumentScope, EnrichmentBundle, IntelligenceReport, PassageRef, Verification,
    VerificationStatus,
};
use crate::Result;
use std::collections::HashSet;
use uuid::Uuid;

/// Where the current draft stands with respect to verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationPhase {
    NoDraft,
    Pending,
    Failed,
    Passed,
}

#[derive(Debug)]
pub struct WorkflowState {
    request_id: Uuid,
    query: String,
    original_query: String,
    document_scope: DocumentScope,
    retrieved_context: Vec<PassageRef>,
    seen_locators: HashSet<String>,
    enrichment: Option<EnrichmentBundle>,
    draft_answer: Option<String>,
    verification: Option<Verification>,
    insights: Option<IntelligenceReport>,
    retry_count: u32,
    max_retries: u32,
    terminal: bool,
    trace: Vec<String>,
}

impl WorkflowState {
    pub fn new(document_scope: DocumentScope, query: impl Into<String>, max_retries: u32) -> Self {
        let query = query.into();

        Self {
            request_id: Uuid::new_v4(),
            original_query: query.clone(),
            query,
            document_scope,
            retrieved_context: Vec::new(),
            seen_locators: HashSet::new(),
            enrichment: None,
            draft_answer: None,
            verification: None,
            insights: None,
            retry_count: 0,
            max_retries,
            terminal: false,
            trace: Vec::new(),
        }
    }

    // =============================
    // Accessors
    // =============================

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn original_query(&self) -> &str {
        &self.original_query
    }

    pub fn document_scope(&self) -> &DocumentScope {
        &self.document_scope
    }

    pub fn retrieved_context(&self) -> &[PassageRef] {
        &self.retrieved_context
    }

    pub fn enrichment(&self) -> Option<&EnrichmentBundle> {
        self.enrichment.as_ref()
    }

    pub fn draft_answer(&self) -> Option<&str> {
        self.draft_answer.as_deref()
    }

    pub fn verification(&self) -> Option<&Verification> {
        self.verification.as_ref()
    }

    pub fn insights(&self) -> Option<&IntelligenceReport> {
        self.insights.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn verification_phase(&self) -> VerificationPhase {
        match (&self.draft_answer, &self.verification) {
            (None, _) => VerificationPhase::NoDraft,
            (Some(_), None) => VerificationPhase::Pending,
            (Some(_), Some(v)) if v.passed() => VerificationPhase::Passed,
            (Some(_), Some(_)) => VerificationPhase::Failed,
        }
    }

    /// All retrieved text plus rendered enrichment, used as grounding evidence.
    pub fn evidence_text(&self) -> String {
        let mut evidence: Vec<String> = self
            .retrieved_context
            .iter()
            .map(|p| p.text.clone())
            .collect();

        if let Some(bundle) = &self.enrichment {
            evidence.push(bundle.render());
        }

        evidence.join("\n\n")
    }

    // =============================
    // Mutators
    // =============================

    /// Append passages not already held (by source locator). Returns how many were added.
    pub fn append_passages(&mut self, passages: Vec<PassageRef>) -> usize {
        let before = self.retrieved_context.len();

        for passage in passages {
            if self.seen_locators.insert(passage.source_locator.clone()) {
                self.retrieved_context.push(passage);
            }
        }

        self.retrieved_context.len() - before
    }

    pub fn set_enrichment(&mut self, bundle: Option<EnrichmentBundle>) {
        self.enrichment = bundle;
    }

    /// A new draft invalidates any previous verdict and insights.
    pub fn set_draft(&mut self, answer: String) {
        self.draft_answer = Some(answer);
        self.verification = None;
        self.insights = None;
    }

    pub fn set_verification(&mut self, verification: Verification) -> Result<()> {
        if self.draft_answer.is_none() {
            return Err(AnalysisError::InvalidState(
                "cannot verify before a draft answer exists".to_string(),
            ));
        }
        self.verification = Some(verification);
        Ok(())
    }

    pub fn set_insights(&mut self, report: IntelligenceReport) -> Result<()> {
        if self.verification_phase() != VerificationPhase::Passed {
            return Err(AnalysisError::InvalidState(
                "insights require a PASS verification".to_string(),
            ));
        }
        self.insights = Some(report);
        Ok(())
    }

    /// Move to the next research cycle with a rewritten query.
    pub fn begin_retry(&mut self, rewritten_query: String) -> Result<()> {
        if self.retry_count >= self.max_retries {
            return Err(AnalysisError::ValidationExhausted(format!(
                "retry {} would exceed bound {}",
                self.retry_count + 1,
                self.max_retries
            )));
        }
        if self.verification_phase() != VerificationPhase::Failed {
            return Err(AnalysisError::InvalidState(
                "retry requires a FAIL verification".to_string(),
            ));
        }

        self.retry_count += 1;
        self.query = rewritten_query;
        Ok(())
    }

    pub fn mark_terminal(&mut self) {
        self.terminal = true;
    }

    pub fn record(&mut self, line: impl Into<String>) {
        self.trace.push(line.into());
    }

    pub fn verification_status(&self) -> Option<VerificationStatus> {
        self.verification.as_ref().map(|v| v.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn passage(locator: &str) -> PassageRef {
        PassageRef {
            text: format!("text of {}", locator),
            source_locator: locator.to_string(),
            score: 0.5,
        }
    }

    fn verdict(status: VerificationStatus) -> Verification {
        Verification {
            status,
            reason: "reason".to_string(),
            unsupported_claims: vec![],
            missing_facts: vec![],
            checks: vec![],
            verified_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_dedupes_by_locator() {
        let mut state = WorkflowState::new(DocumentScope::new("doc"), "q", 2);

        assert_eq!(state.append_passages(vec![passage("p1"), passage("p2")]), 2);
        assert_eq!(state.append_passages(vec![passage("p2"), passage("p3")]), 1);

        let locators: Vec<_> = state
            .retrieved_context()
            .iter()
            .map(|p| p.source_locator.as_str())
            .collect();
        assert_eq!(locators, vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn test_insights_require_pass() {
        let mut state = WorkflowState::new(DocumentScope::new("doc"), "q", 2);
        state.set_draft("draft".to_string());
        assert_eq!(state.verification_phase(), VerificationPhase::Pending);

        state.set_verification(verdict(VerificationStatus::Fail)).unwrap();

        let report = IntelligenceReport {
            highlights: vec![],
            sentiment: crate::models::Sentiment {
                score: 50,
                direction: crate::models::SentimentDirection::Stable,
                description: "flat".to_string(),
            },
            risk_level: crate::models::RiskLevel::Low,
            risk_factors: vec![],
            suggested_questions: vec![],
        };
        assert!(state.set_insights(report.clone()).is_err());

        state.set_verification(verdict(VerificationStatus::Pass)).unwrap();
        assert!(state.set_insights(report).is_ok());

        state.set_draft("new draft".to_string());
        assert!(state.insights().is_none());
        assert!(state.verification().is_none());
    }

    #[test]
    fn test_retry_bound_and_monotonic_count() {
        let mut state = WorkflowState::new(DocumentScope::new("doc"), "q", 1);
        assert!(state.begin_retry("q2".to_string()).is_err());

        state.set_draft("draft".to_string());
        state.set_verification(verdict(VerificationStatus::Fail)).unwrap();
        state.begin_retry("q2".to_string()).unwrap();
        assert_eq!(state.retry_count(), 1);
        assert_eq!(state.query(), "q2");
        assert_eq!(state.original_query(), "q");

        let err = state.begin_retry("q3".to_string()).unwrap_err();
        assert!(matches!(err, AnalysisError::ValidationExhausted(_)));
        assert_eq!(state.retry_count(), 1);
    }

    #[test]
    fn test_verification_requires_draft() {
        let mut state = WorkflowState::new(DocumentScope::new("doc"), "q", 2);
        assert!(state.set_verification(verdict(VerificationStatus::Pass)).is_err());
        assert_eq!(state.verification_phase(), VerificationPhase::NoDraft);
    }
}
