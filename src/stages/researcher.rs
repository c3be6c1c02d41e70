//! Researcher stage
//!
//! Retrieves passages for the current query and, once per request, attaches
//! external risk context for the entity the question is about.

use crate::enrichment::{detect_entity, ContextEnricher};
use crate::error::AnalysisError;
use crate::models::Verification;
use crate::retrieval::RetrievalGateway;
use crate::state::WorkflowState;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Turns a FAIL verdict into the query for the next research pass.
pub trait QueryRewriter: Send + Sync {
    fn rewrite(&self, original_query: &str, verification: &Verification) -> String;
}

/// Appends what the validator said was missing to the original question.
///
/// Preference order: missing facts, then unsupported claims, then the bare reason.
/// Unsupported claims contribute only their wording; the rejected figures are
/// dropped so the next search does not chase a number the document lacks.
pub struct MissingFactHint;

impl QueryRewriter for MissingFactHint {
    fn rewrite(&self, original_query: &str, verification: &Verification) -> String {
        let hints: Vec<String> = if !verification.missing_facts.is_empty() {
            verification.missing_facts.clone()
        } else if !verification.unsupported_claims.is_empty() {
            verification
                .unsupported_claims
                .iter()
                .map(|claim| claim_wording(claim))
                .collect()
        } else {
            vec![verification.reason.clone()]
        };

        let hints: Vec<&str> = hints
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .collect();

        if hints.is_empty() {
            original_query.to_string()
        } else {
            format!("{} {}", original_query, hints.join("; "))
        }
    }
}

/// Claim text without figures, currency marks or the rule's "figure" label.
fn claim_wording(claim: &str) -> String {
    claim
        .split_whitespace()
        .filter(|token| !token.chars().any(|c| c.is_ascii_digit()))
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .filter(|token| !matches!(token.to_lowercase().as_str(), "figure" | "figures"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct Researcher {
    gateway: Arc<dyn RetrievalGateway>,
    enricher: Arc<ContextEnricher>,
    top_k: usize,
    timeout: Duration,
}

impl Researcher {
    pub fn new(
        gateway: Arc<dyn RetrievalGateway>,
        enricher: Arc<ContextEnricher>,
        top_k: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            enricher,
            top_k,
            timeout,
        }
    }

    /// Run one research pass. Returns how many new passages were appended.
    pub async fn run(&self, state: &mut WorkflowState) -> Result<usize> {
        let scope = state.document_scope().clone();

        let passages = tokio::time::timeout(
            self.timeout,
            self.gateway.search(&scope, state.query(), self.top_k),
        )
        .await
        .map_err(|_| {
            AnalysisError::RetrievalUnavailable(format!(
                "search in {} exceeded {:?}",
                scope, self.timeout
            ))
        })??;

        let retrieved = passages.len();
        let added = state.append_passages(passages);

        info!(
            request_id = %state.request_id(),
            scope = %scope,
            retry_count = state.retry_count(),
            retrieved,
            added,
            "Research pass complete"
        );

        if state.retry_count() == 0 {
            self.enrich_first_pass(state).await;
        } else {
            self.refresh_enrichment(state).await;
        }

        Ok(added)
    }

    async fn enrich_first_pass(&self, state: &mut WorkflowState) {
        if state.enrichment().is_some() || !self.enricher.is_enabled() {
            return;
        }

        // The question is searched first so its entity wins over one in the passages
        let mut text = state.query().to_string();
        for passage in state.retrieved_context() {
            text.push('\n');
            text.push_str(&passage.text);
        }

        let bundle = self.enricher.enrich(&text).await;
        if bundle.is_none() {
            debug!(request_id = %state.request_id(), "No entity detected; continuing without enrichment");
        }
        state.set_enrichment(bundle);
    }

    /// Refetch only when the rewritten query names a different entity.
    async fn refresh_enrichment(&self, state: &mut WorkflowState) {
        if !self.enricher.is_enabled() {
            return;
        }

        let Some(entity) = detect_entity(state.query()) else {
            return;
        };

        let held = state.enrichment().map(|b| b.entity.as_str());
        if held == Some(entity.as_str()) {
            return;
        }

        info!(
            request_id = %state.request_id(),
            entity = %entity,
            previous = ?held,
            "Rewritten query names a new entity; refreshing enrichment"
        );

        let bundle = self.enricher.fetch_risk_signals(&entity).await;
        state.set_enrichment(Some(bundle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, DocumentScope, VerificationStatus};
    use crate::retrieval::InMemoryVectorIndex;
    use chrono::Utc;

    fn failed(reason: &str, missing: &[&str], unsupported: &[&str]) -> Verification {
        Verification {
            status: VerificationStatus::Fail,
            reason: reason.to_string(),
            unsupported_claims: unsupported.iter().map(|s| s.to_string()).collect(),
            missing_facts: missing.iter().map(|s| s.to_string()).collect(),
            checks: vec![],
            verified_at: Utc::now(),
        }
    }

    async fn researcher_with(chunks: Vec<Chunk>) -> (Researcher, DocumentScope) {
        let index = Arc::new(InMemoryVectorIndex::new());
        let scope = DocumentScope::new("annual-report");
        index.index(&scope, chunks).await.unwrap();

        let researcher = Researcher::new(
            index,
            Arc::new(ContextEnricher::disabled()),
            8,
            Duration::from_secs(1),
        );
        (researcher, scope)
    }

    #[test]
    fn test_missing_fact_hint_preference() {
        let rewriter = MissingFactHint;
        let q = "What was operating margin?";

        assert_eq!(
            rewriter.rewrite(q, &failed("r", &["operating income for FY2024"], &["x"])),
            "What was operating margin? operating income for FY2024"
        );
        assert_eq!(
            rewriter.rewrite(q, &failed("r", &[], &["31.5% operating margin in FY2024"])),
            "What was operating margin? operating margin in"
        );
        assert_eq!(
            rewriter.rewrite(q, &failed("net sales not stated", &[], &[])),
            "What was operating margin? net sales not stated"
        );
        assert_eq!(rewriter.rewrite(q, &failed("  ", &[], &[])), q);
    }

    #[test]
    fn test_missing_fact_hint_drops_rejected_figures() {
        let rewriter = MissingFactHint;
        let q = "What was total revenue?";

        let rewritten = rewriter.rewrite(q, &failed("figure 400 not in evidence", &[], &["figure 400"]));
        assert_eq!(rewritten, q);

        let rewritten = rewriter.rewrite(q, &failed("r", &[], &["Dividend of $1.25 per share"]));
        assert_eq!(rewritten, "What was total revenue? Dividend of per share");
        assert!(!rewritten.contains("1.25"));
    }

    #[tokio::test]
    async fn test_retry_pass_dedupes_by_locator() {
        let (researcher, scope) = researcher_with(vec![
            Chunk::new("Total revenue was $120 million", "page-1/chunk-0"),
            Chunk::new("Operating income reached $30 million", "page-2/chunk-0"),
        ])
        .await;

        let mut state = WorkflowState::new(scope, "total revenue", 2);
        assert_eq!(researcher.run(&mut state).await.unwrap(), 1);

        state.set_draft("draft".to_string());
        state
            .set_verification(failed("missing", &["operating income"], &[]))
            .unwrap();
        state
            .begin_retry("total revenue operating income".to_string())
            .unwrap();

        assert_eq!(researcher.run(&mut state).await.unwrap(), 1);
        assert_eq!(state.retrieved_context().len(), 2);
        assert_eq!(state.retrieved_context()[0].source_locator, "page-1/chunk-0");
    }

    #[tokio::test]
    async fn test_context_grows_monotonically_over_retries() {
        let (researcher, scope) = researcher_with(vec![
            Chunk::new("Total revenue was $120 million", "page-1/chunk-0"),
            Chunk::new("Operating income reached $30 million", "page-2/chunk-0"),
            Chunk::new("Net income was $12 million", "page-3/chunk-0"),
        ])
        .await;

        let mut state = WorkflowState::new(scope, "total revenue", 2);
        researcher.run(&mut state).await.unwrap();
        let mut sizes = vec![state.retrieved_context().len()];

        for query in ["operating income", "total revenue"] {
            state.set_draft("draft".to_string());
            state.set_verification(failed("missing", &[query], &[])).unwrap();
            state.begin_retry(query.to_string()).unwrap();
            researcher.run(&mut state).await.unwrap();
            sizes.push(state.retrieved_context().len());
        }

        assert_eq!(sizes, vec![1, 3, 3]);
        assert!(sizes.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(state.retrieved_context()[0].source_locator, "page-1/chunk-0");
    }

    #[tokio::test]
    async fn test_unavailable_index_is_fatal() {
        let index = Arc::new(InMemoryVectorIndex::new());
        index.set_available(false);
        let researcher = Researcher::new(
            index,
            Arc::new(ContextEnricher::disabled()),
            8,
            Duration::from_secs(1),
        );

        let mut state = WorkflowState::new(DocumentScope::new("doc"), "revenue", 2);
        let err = researcher.run(&mut state).await.unwrap_err();
        assert!(matches!(err, AnalysisError::RetrievalUnavailable(_)));
    }
}
