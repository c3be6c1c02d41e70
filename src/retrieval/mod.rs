//! Retrieval gateway
//!
//! Contract over a namespaced vector index, plus an in-memory implementation
//! that scores passages by cosine similarity of sparse term vectors.

use crate::error::AnalysisError;
use crate::models::{Chunk, DocumentScope, PassageRef};
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::debug;

pub mod ephemeral;
pub use ephemeral::EphemeralScope;

/// Query / insert / delete contract every index backend must satisfy.
#[async_trait]
pub trait RetrievalGateway: Send + Sync {
    /// Ranked passages for `query` within `scope`. Equal scores keep index order.
    async fn search(
        &self,
        scope: &DocumentScope,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<PassageRef>>;

    async fn index(&self, scope: &DocumentScope, chunks: Vec<Chunk>) -> Result<()>;

    /// Remove every entry in `scope`. Calling it twice is a no-op.
    async fn release(&self, scope: &DocumentScope) -> Result<()>;
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from",
    "how", "in", "is", "it", "of", "on", "or", "the", "to", "was", "were", "what", "when",
    "which", "who", "with",
];

type TermVector = HashMap<String, f32>;

#[derive(Clone)]
struct IndexedChunk {
    chunk: Chunk,
    terms: TermVector,
}

/// In-memory index keyed by scope namespace.
///
/// Each namespace is an immutable snapshot; searches clone the `Arc` and score
/// without holding a lock, and writes only lock their own map entry.
pub struct InMemoryVectorIndex {
    namespaces: DashMap<DocumentScope, Arc<Vec<IndexedChunk>>>,
    available: AtomicBool,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            namespaces: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backing index going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::Relaxed);
    }

    pub fn len(&self, scope: &DocumentScope) -> usize {
        self.namespaces
            .get(scope)
            .map(|chunks| chunks.len())
            .unwrap_or(0)
    }

    pub fn contains_scope(&self, scope: &DocumentScope) -> bool {
        self.namespaces.contains_key(scope)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(AtomicOrdering::Relaxed) {
            Ok(())
        } else {
            Err(AnalysisError::RetrievalUnavailable(
                "in-memory index marked unavailable".to_string(),
            ))
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RetrievalGateway for InMemoryVectorIndex {
    async fn search(
        &self,
        scope: &DocumentScope,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<PassageRef>> {
        self.ensure_available()?;

        let query_terms = term_vector(query);

        let Some(chunks) = self.namespaces.get(scope).map(|entry| Arc::clone(entry.value())) else {
            debug!(scope = %scope, "Search against empty scope");
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &Chunk)> = chunks
            .iter()
            .map(|indexed| (cosine_similarity(&query_terms, &indexed.terms), &indexed.chunk))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        // Stable sort: ties keep insertion order
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let passages: Vec<PassageRef> = scored
            .into_iter()
            .take(top_k)
            .map(|(score, chunk)| PassageRef {
                text: chunk.text.clone(),
                source_locator: chunk.locator.clone(),
                score,
            })
            .collect();

        debug!(scope = %scope, hits = passages.len(), "Search complete");

        Ok(passages)
    }

    async fn index(&self, scope: &DocumentScope, chunks: Vec<Chunk>) -> Result<()> {
        self.ensure_available()?;

        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .map(|chunk| IndexedChunk {
                terms: term_vector(&chunk.text),
                chunk,
            })
            .collect();

        let mut entry = self.namespaces.entry(scope.clone()).or_default();
        Arc::make_mut(entry.value_mut()).extend(indexed);

        Ok(())
    }

    async fn release(&self, scope: &DocumentScope) -> Result<()> {
        self.ensure_available()?;

        let removed = self.namespaces.remove(scope);
        debug!(
            scope = %scope,
            removed = removed.map(|(_, chunks)| chunks.len()).unwrap_or(0),
            "Scope released"
        );
        Ok(())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

fn term_vector(text: &str) -> TermVector {
    let mut terms = TermVector::new();
    for token in tokenize(text) {
        *terms.entry(token).or_insert(0.0) += 1.0;
    }
    terms
}

fn cosine_similarity(a: &TermVector, b: &TermVector) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f32 = small
        .iter()
        .filter_map(|(term, weight)| large.get(term).map(|other| weight * other))
        .sum();

    let norm = |v: &TermVector| v.values().map(|w| w * w).sum::<f32>().sqrt();
    let denom = norm(a) * norm(b);

    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annual_report() -> Vec<Chunk> {
        vec![
            Chunk::new("Total revenue for FY2024 was $394.3 billion", "page-1/chunk-0"),
            Chunk::new("Operating expenses rose on research spending", "page-2/chunk-0"),
            Chunk::new("The board declared a quarterly dividend", "page-3/chunk-0"),
        ]
    }

    #[tokio::test]
    async fn test_search_ranks_relevant_passage_first() {
        let index = InMemoryVectorIndex::new();
        let scope = DocumentScope::new("aapl-10k");
        index.index(&scope, annual_report()).await.unwrap();

        let hits = index
            .search(&scope, "What was total revenue in 2024?", 8)
            .await
            .unwrap();

        assert!(!hits.is_empty());
        assert_eq!(hits[0].source_locator, "page-1/chunk-0");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_equal_scores_keep_index_order() {
        let index = InMemoryVectorIndex::new();
        let scope = DocumentScope::new("dup");
        index
            .index(
                &scope,
                vec![
                    Chunk::new("net income grew", "a"),
                    Chunk::new("net income grew", "b"),
                    Chunk::new("net income grew", "c"),
                ],
            )
            .await
            .unwrap();

        let hits = index.search(&scope, "net income", 2).await.unwrap();
        let locators: Vec<_> = hits.iter().map(|h| h.source_locator.as_str()).collect();
        assert_eq!(locators, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_scopes_are_isolated_and_release_is_idempotent() {
        let index = InMemoryVectorIndex::new();
        let a = DocumentScope::new("a");
        let b = DocumentScope::new("b");
        index.index(&a, annual_report()).await.unwrap();

        assert!(index.search(&b, "revenue", 8).await.unwrap().is_empty());

        index.release(&a).await.unwrap();
        index.release(&a).await.unwrap();
        assert!(!index.contains_scope(&a));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_search_unaffected_by_concurrent_uploads() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let shared = DocumentScope::new("annual-report");
        index.index(&shared, annual_report()).await.unwrap();

        let uploads: Vec<_> = (0..16)
            .map(|_| {
                let index = Arc::clone(&index);
                tokio::spawn(async move {
                    let scope = DocumentScope::ephemeral("upload");
                    index.index(&scope, annual_report()).await.unwrap();
                    index.release(&scope).await.unwrap();
                })
            })
            .collect();

        for _ in 0..16 {
            let hits = index.search(&shared, "total revenue", 8).await.unwrap();
            assert_eq!(hits[0].source_locator, "page-1/chunk-0");
        }

        for upload in uploads {
            upload.await.unwrap();
        }
        assert_eq!(index.len(&shared), 3);
    }

    #[tokio::test]
    async fn test_unavailable_index_surfaces_error() {
        let index = InMemoryVectorIndex::new();
        index.set_available(false);

        let err = index
            .search(&DocumentScope::new("a"), "revenue", 8)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::RetrievalUnavailable(_)));
    }
}
