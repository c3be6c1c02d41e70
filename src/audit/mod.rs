//! Audit trail of completed analyses
//!
//! Each record carries a SHA-256 over (query, answer, status) so a stored
//! answer can later be checked against tampering. The log keeps at most
//! `capacity` records and evicts the oldest first.

use crate::models::{AnalysisResult, DocumentScope, VerificationStatus};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub audit_id: Uuid,
    pub request_id: Uuid,
    pub document_scope: DocumentScope,
    pub original_query: String,
    pub answer: String,
    pub verification_status: VerificationStatus,
    pub retry_count: u32,
    pub low_confidence: bool,
    pub retrieved_source_locators: Vec<String>,
    pub reasoning_trace: Vec<String>,
    pub answer_hash: String,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn from_result(
        audit_id: Uuid,
        scope: &DocumentScope,
        original_query: &str,
        result: &AnalysisResult,
    ) -> Self {
        Self {
            audit_id,
            request_id: result.request_id,
            document_scope: scope.clone(),
            original_query: original_query.to_string(),
            answer: result.answer.clone(),
            verification_status: result.verification_status,
            retry_count: result.retry_count,
            low_confidence: result.low_confidence,
            retrieved_source_locators: result.retrieved_source_locators.clone(),
            reasoning_trace: result.reasoning_trace.clone(),
            answer_hash: compute_record_hash(original_query, &result.answer, result.verification_status),
            created_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct AuditStore {
    records: HashMap<Uuid, AnalysisRecord>,
    /// Insertion order, oldest at the front
    order: VecDeque<Uuid>,
}

/// Bounded audit trail storage
pub struct AuditLog {
    store: RwLock<AuditStore>,
    capacity: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    /// A capacity of zero keeps nothing.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: RwLock::new(AuditStore::default()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn record(&self, record: AnalysisRecord) -> Result<Uuid> {
        let audit_id = record.audit_id;
        if self.capacity == 0 {
            return Ok(audit_id);
        }

        let mut store = self.store.write().await;
        if store.records.insert(audit_id, record).is_none() {
            store.order.push_back(audit_id);
        }

        while store.order.len() > self.capacity {
            if let Some(evicted) = store.order.pop_front() {
                store.records.remove(&evicted);
                debug!(audit_id = %evicted, "Audit record evicted");
            }
        }

        Ok(audit_id)
    }

    pub async fn get(&self, audit_id: Uuid) -> Result<Option<AnalysisRecord>> {
        let store = self.store.read().await;
        Ok(store.records.get(&audit_id).cloned())
    }

    /// Audit IDs for a document scope, oldest first
    pub async fn list_for_scope(&self, scope: &DocumentScope) -> Result<Vec<Uuid>> {
        let store = self.store.read().await;

        Ok(store
            .order
            .iter()
            .filter(|id| {
                store
                    .records
                    .get(id)
                    .is_some_and(|record| &record.document_scope == scope)
            })
            .copied()
            .collect())
    }

    /// Recompute the answer hash and compare with the stored one.
    pub async fn verify_integrity(&self, audit_id: Uuid) -> Result<bool> {
        let store = self.store.read().await;

        Ok(store.records.get(&audit_id).is_some_and(|record| {
            compute_record_hash(&record.original_query, &record.answer, record.verification_status)
                == record.answer_hash
        }))
    }

    #[cfg(test)]
    async fn tamper(&self, audit_id: Uuid, answer: &str) {
        if let Some(record) = self.store.write().await.records.get_mut(&audit_id) {
            record.answer = answer.to_string();
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 over the JSON triple, streamed straight into the hasher.
pub fn compute_record_hash(query: &str, answer: &str, status: VerificationStatus) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), &(query, answer, status)).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
