//! Analysis service - the entry points consumed by outer layers
//!
//! `run_analysis` works against an already-indexed scope. The ephemeral
//! variants index ad-hoc chunks into a fresh namespace that is destroyed on
//! every exit path: normal return, error, or the caller dropping the future.

use crate::config::AnalysisConfig;
use crate::enrichment::ContextEnricher;
use crate::error::AnalysisError;
use crate::ingest::{DocumentStore, PlainTextExtractor, TextExtractor};
use crate::llm::CompletionModel;
use crate::models::{AnalysisResult, Chunk, DocumentScope};
use crate::retrieval::{EphemeralScope, RetrievalGateway};
use crate::workflow::WorkflowEngine;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub struct AnalysisService {
    engine: Arc<WorkflowEngine>,
    gateway: Arc<dyn RetrievalGateway>,
    extractor: Arc<dyn TextExtractor>,
    store: Option<Arc<dyn DocumentStore>>,
    max_retries: u32,
}

impl AnalysisService {
    /// `gateway` must be the one the engine's researcher searches.
    pub fn new(engine: Arc<WorkflowEngine>, gateway: Arc<dyn RetrievalGateway>, max_retries: u32) -> Self {
        Self {
            engine,
            gateway,
            extractor: Arc::new(PlainTextExtractor::default()),
            store: None,
            max_retries,
        }
    }

    pub fn from_config(
        config: &AnalysisConfig,
        gateway: Arc<dyn RetrievalGateway>,
        model: Arc<dyn CompletionModel>,
        enricher: Arc<ContextEnricher>,
    ) -> Result<Self> {
        let engine = WorkflowEngine::from_config(config, Arc::clone(&gateway), model, enricher);
        let extractor = PlainTextExtractor::new(config.chunk_size, config.chunk_overlap)?;

        Ok(Self::new(Arc::new(engine), gateway, config.max_retries).with_extractor(Arc::new(extractor)))
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub async fn run_analysis(
        &self,
        scope: DocumentScope,
        query: &str,
        max_retries: u32,
    ) -> Result<AnalysisResult> {
        self.engine.run(scope, query, max_retries).await
    }

    /// Analyze ad-hoc chunks inside a request-owned namespace.
    pub async fn run_analysis_ephemeral(&self, chunks: Vec<Chunk>, query: &str) -> Result<AnalysisResult> {
        let scope = EphemeralScope::create(Arc::clone(&self.gateway), "upload")?;

        info!(scope = %scope.scope(), chunks = chunks.len(), "Ephemeral analysis started");

        let outcome: Result<AnalysisResult> = async {
            scope.index(chunks).await?;
            self.engine
                .run(scope.scope().clone(), query, self.max_retries)
                .await
        }
        .await;

        let namespace = scope.scope().clone();
        if let Err(e) = scope.destroy().await {
            warn!(scope = %namespace, error = %e, "Ephemeral scope cleanup failed");
        }

        outcome
    }

    /// Extract raw bytes, then analyze them ephemerally.
    pub async fn run_analysis_upload(&self, bytes: &[u8], query: &str) -> Result<AnalysisResult> {
        let chunks = self.extractor.extract(bytes)?;
        self.run_analysis_ephemeral(chunks, query).await
    }

    /// Fetch a stored document's bytes and analyze them ephemerally.
    pub async fn run_analysis_stored(&self, document_id: &str, query: &str) -> Result<AnalysisResult> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| AnalysisError::ConfigError("no document store configured".to_string()))?;

        let bytes = store.get(document_id).await?;
        self.run_analysis_upload(&bytes, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::InMemoryDocumentStore;
    use crate::llm::{PromptPurpose, ScriptedModel};
    use crate::models::{PassageRef, VerificationStatus};
    use crate::retrieval::InMemoryVectorIndex;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Wraps the in-memory index and counts releases.
    struct CountingGateway {
        inner: InMemoryVectorIndex,
        releases: AtomicUsize,
        fail_search: AtomicBool,
        indexed: Mutex<Vec<DocumentScope>>,
    }

    impl CountingGateway {
        fn new() -> Self {
            Self {
                inner: InMemoryVectorIndex::new(),
                releases: AtomicUsize::new(0),
                fail_search: AtomicBool::new(false),
                indexed: Mutex::new(Vec::new()),
            }
        }

        fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }

        fn all_released(&self) -> bool {
            let scopes = self.indexed.lock().unwrap();
            scopes.iter().all(|scope| !self.inner.contains_scope(scope))
        }
    }

    #[async_trait]
    impl RetrievalGateway for CountingGateway {
        async fn search(&self, scope: &DocumentScope, query: &str, top_k: usize) -> Result<Vec<PassageRef>> {
            if self.fail_search.load(Ordering::SeqCst) {
                return Err(AnalysisError::RetrievalUnavailable("index offline".to_string()));
            }
            self.inner.search(scope, query, top_k).await
        }

        async fn index(&self, scope: &DocumentScope, chunks: Vec<Chunk>) -> Result<()> {
            self.indexed.lock().unwrap().push(scope.clone());
            self.inner.index(scope, chunks).await
        }

        async fn release(&self, scope: &DocumentScope) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.inner.release(scope).await
        }
    }

    fn grounded_model() -> ScriptedModel {
        ScriptedModel::new()
            .always(PromptPurpose::Draft, "Net income was $12.5 million [1].")
            .always(PromptPurpose::Verify, r#"{"status": "PASS", "reason": "matches passage 1"}"#)
            .always(PromptPurpose::Insights, "not json")
    }

    fn service(gateway: Arc<CountingGateway>, model: ScriptedModel) -> AnalysisService {
        AnalysisService::from_config(
            &AnalysisConfig::default(),
            gateway,
            Arc::new(model),
            Arc::new(ContextEnricher::disabled()),
        )
        .unwrap()
    }

    fn chunks() -> Vec<Chunk> {
        vec![
            Chunk::new("Net income was $12.5 million for the quarter.", "page-1/chunk-0"),
            Chunk::new("Headcount grew across regions.", "page-2/chunk-0"),
        ]
    }

    #[tokio::test]
    async fn test_ephemeral_success_releases_once() {
        let gateway = Arc::new(CountingGateway::new());
        let service = service(gateway.clone(), grounded_model());

        let result = service
            .run_analysis_ephemeral(chunks(), "What was net income?")
            .await
            .unwrap();

        assert_eq!(result.verification_status, VerificationStatus::Pass);
        assert_eq!(gateway.releases(), 1);
        assert!(gateway.all_released());
    }

    #[tokio::test]
    async fn test_ephemeral_failure_still_releases_once() {
        let gateway = Arc::new(CountingGateway::new());
        gateway.fail_search.store(true, Ordering::SeqCst);
        let service = service(gateway.clone(), grounded_model());

        let err = service
            .run_analysis_ephemeral(chunks(), "What was net income?")
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::RetrievalUnavailable(_)));
        assert_eq!(gateway.releases(), 1);
        assert!(gateway.all_released());
    }

    #[tokio::test]
    async fn test_cancelled_request_still_releases() {
        let gateway = Arc::new(CountingGateway::new());
        let model = grounded_model().with_delay(PromptPurpose::Draft, Duration::from_secs(5));
        let service = service(gateway.clone(), model);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            service.run_analysis_ephemeral(chunks(), "What was net income?"),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gateway.releases(), 1);
        assert!(gateway.all_released());
    }

    #[tokio::test]
    async fn test_concurrent_uploads_are_isolated() {
        let gateway = Arc::new(CountingGateway::new());
        let service = service(gateway.clone(), grounded_model());

        let (a, b) = tokio::join!(
            service.run_analysis_ephemeral(chunks(), "What was net income?"),
            service.run_analysis_ephemeral(chunks(), "What was net income?"),
        );

        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.retrieved_source_locators, b.retrieved_source_locators);
        assert_eq!(gateway.releases(), 2);
        assert!(gateway.all_released());
    }

    #[tokio::test]
    async fn test_stored_document_round_trip() {
        let gateway = Arc::new(CountingGateway::new());
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .insert("10-q", b"Net income was $12.5 million for the quarter.".to_vec())
            .await;
        let service = service(gateway.clone(), grounded_model()).with_store(store);

        let result = service.run_analysis_stored("10-q", "What was net income?").await.unwrap();
        assert_eq!(result.verification_status, VerificationStatus::Pass);
        assert_eq!(result.retrieved_source_locators, vec!["page-1/chunk-0"]);

        let missing = service.run_analysis_stored("10-k", "q").await.unwrap_err();
        assert!(matches!(missing, AnalysisError::DocumentNotFound(_)));
        assert_eq!(gateway.releases(), 1);
    }

    #[tokio::test]
    async fn test_preloaded_scope_is_not_released() {
        let gateway = Arc::new(CountingGateway::new());
        let scope = DocumentScope::new("annual-report");
        gateway.index(&scope, chunks()).await.unwrap();
        let service = service(gateway.clone(), grounded_model());

        let result = service
            .run_analysis(scope.clone(), "What was net income?", 1)
            .await
            .unwrap();

        assert_eq!(result.verification_status, VerificationStatus::Pass);
        assert_eq!(gateway.releases(), 0);
        assert!(gateway.inner.contains_scope(&scope));
    }
}
