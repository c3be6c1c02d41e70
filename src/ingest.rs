//! Ingest collaborators: text extraction and raw document storage
//!
//! The workflow only ever sees `Chunk`s; how bytes become text is behind
//! `TextExtractor`, and where bytes live is behind `DocumentStore`.

use crate::error::AnalysisError;
use crate::models::Chunk;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

const PAGE_BREAK: char = '\x0c';

pub trait TextExtractor: Send + Sync {
    /// Ordered chunks with locators
    fn extract(&self, bytes: &[u8]) -> Result<Vec<Chunk>>;
}

/// UTF-8 text split into overlapping windows; form feeds separate pages.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    chunk_size: usize,
    overlap: usize,
}

impl PlainTextExtractor {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(AnalysisError::ConfigError(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                overlap, chunk_size
            )));
        }
        Ok(Self { chunk_size, overlap })
    }

    fn split_page(&self, page: &str) -> Vec<String> {
        let chars: Vec<char> = page.chars().collect();
        let mut windows = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let hard_end = (start + self.chunk_size).min(chars.len());

            // Prefer breaking on whitespace in the back half of the window
            let end = if hard_end < chars.len() {
                (start + self.chunk_size / 2..hard_end)
                    .rev()
                    .find(|&i| chars[i].is_whitespace())
                    .unwrap_or(hard_end)
            } else {
                hard_end
            };

            let text: String = chars[start..end].iter().collect();
            let text = text.trim();
            if !text.is_empty() {
                windows.push(text.to_string());
            }

            if end >= chars.len() {
                break;
            }
            start = end.saturating_sub(self.overlap).max(start + 1);
        }

        windows
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<Chunk>> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| AnalysisError::ExtractionError(format!("document is not UTF-8: {}", e)))?;

        let chunks: Vec<Chunk> = text
            .split(PAGE_BREAK)
            .enumerate()
            .flat_map(|(page, body)| {
                self.split_page(body)
                    .into_iter()
                    .enumerate()
                    .map(move |(i, window)| Chunk::new(window, format!("page-{}/chunk-{}", page + 1, i)))
            })
            .collect();

        if chunks.is_empty() {
            return Err(AnalysisError::ExtractionError(
                "document contains no extractable text".to_string(),
            ));
        }

        debug!(chunks = chunks.len(), bytes = bytes.len(), "Document extracted");
        Ok(chunks)
    }
}

/// Raw bytes by document id
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, document_id: &str) -> Result<Vec<u8>>;
}

pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, document_id: impl Into<String>, bytes: Vec<u8>) {
        self.documents.write().await.insert(document_id.into(), bytes);
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, document_id: &str) -> Result<Vec<u8>> {
        self.documents
            .read()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| AnalysisError::DocumentNotFound(document_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_pages_and_locators() {
        let extractor = PlainTextExtractor::new(40, 10).unwrap();
        let text = "Total revenue was $394.3 billion for the year.\x0cRisk factors include supply chain.";

        let chunks = extractor.extract(text.as_bytes()).unwrap();
        assert_eq!(chunks[0].locator, "page-1/chunk-0");
        assert!(chunks.iter().any(|c| c.locator == "page-2/chunk-0"));
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 40));
    }

    #[test]
    fn test_windows_overlap() {
        let extractor = PlainTextExtractor::new(20, 5).unwrap();
        let windows = extractor.split_page("alpha beta gamma delta epsilon zeta eta theta");

        assert!(windows.len() > 1);
        let first_tail: String = windows[0].split_whitespace().last().unwrap().to_string();
        assert!(windows[1].contains(&first_tail));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_err!(PlainTextExtractor::new(100, 100));
        assert_ok!(PlainTextExtractor::new(100, 99));

        let extractor = PlainTextExtractor::default();
        assert!(matches!(
            extractor.extract(&[0xff, 0xfe]),
            Err(AnalysisError::ExtractionError(_))
        ));
        assert_err!(extractor.extract(b"   \x0c  "));
    }

    #[tokio::test]
    async fn test_document_store_lookup() {
        let store = InMemoryDocumentStore::new();
        store.insert("doc-1", b"hello".to_vec()).await;

        assert_eq!(store.get("doc-1").await.unwrap(), b"hello");
        assert!(matches!(
            store.get("doc-2").await,
            Err(AnalysisError::DocumentNotFound(_))
        ));
    }
}
