//! Ledger Analyst
//!
//! Grounded question answering over financial documents:
//! - Retrieves passages from a namespaced vector index
//! - Attaches external geopolitical risk signals when an entity is detected
//! - Drafts an answer strictly from that context
//! - Verifies every claim before the answer leaves the system
//! - Extracts structured insights from verified answers
//! - Isolates ad-hoc uploads in per-request ephemeral scopes
//!
//! WORKFLOW:
//! RESEARCH → ANALYZE → VALIDATE → INSIGHTS → DONE
//!                ↑__________↓ FAIL (bounded retries) → DONE_WITH_WARNING

pub mod audit;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod gemini;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod retrieval;
pub mod service;
pub mod stages;
pub mod state;
pub mod verification;
pub mod workflow;

pub use error::{AnalysisError, Result};

// Re-export common types
pub use models::*;
pub use service::AnalysisService;
pub use workflow::{Phase, WorkflowEngine};
