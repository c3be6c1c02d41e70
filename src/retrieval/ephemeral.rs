//! Ephemeral retrieval scope
//!
//! An owned handle over a per-upload namespace. `destroy` releases the
//! namespace and deletes the on-disk artifacts; if the handle is dropped
//! without `destroy` (cancelled request, panic) the `Drop` impl schedules
//! the release on the current runtime and the temp directory removes itself.

use crate::error::AnalysisError;
use crate::models::{Chunk, DocumentScope};
use crate::retrieval::RetrievalGateway;
use crate::Result;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ARTIFACT_FILE: &str = "chunks.jsonl";

pub struct EphemeralScope {
    scope: DocumentScope,
    owner: Uuid,
    gateway: Arc<dyn RetrievalGateway>,
    artifacts: Option<TempDir>,
    released: bool,
}

impl EphemeralScope {
    pub fn create(gateway: Arc<dyn RetrievalGateway>, suffix: &str) -> Result<Self> {
        let artifacts = tempfile::Builder::new()
            .prefix("ledger-analyst-")
            .tempdir()
            .map_err(|e| AnalysisError::ScopeError(format!("temp dir: {}", e)))?;

        let scope = DocumentScope::ephemeral(suffix);
        let owner = Uuid::new_v4();

        info!(scope = %scope, owner = %owner, "Ephemeral scope created");

        Ok(Self {
            scope,
            owner,
            gateway,
            artifacts: Some(artifacts),
            released: false,
        })
    }

    pub fn scope(&self) -> &DocumentScope {
        &self.scope
    }

    /// Ownership token of the request holding this scope.
    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn artifact_dir(&self) -> Option<&Path> {
        self.artifacts.as_ref().map(|dir| dir.path())
    }

    /// Persist the chunks next to the scope and index them. Returns the chunk count.
    pub async fn index(&self, chunks: Vec<Chunk>) -> Result<usize> {
        let count = chunks.len();

        if let Some(dir) = &self.artifacts {
            let mut lines = String::new();
            for chunk in &chunks {
                lines.push_str(&serde_json::to_string(chunk)?);
                lines.push('\n');
            }
            tokio::fs::write(dir.path().join(ARTIFACT_FILE), lines).await?;
        }

        self.gateway.index(&self.scope, chunks).await?;

        debug!(scope = %self.scope, chunks = count, "Ephemeral scope indexed");
        Ok(count)
    }

    /// Release the namespace and remove artifacts. Consumes the handle.
    pub async fn destroy(mut self) -> Result<()> {
        // Only mark released once the gateway call returns; a cancelled
        // destroy falls through to Drop.
        let released = self.gateway.release(&self.scope).await;
        self.released = true;

        let removed = match self.artifacts.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        };

        info!(scope = %self.scope, owner = %self.owner, "Ephemeral scope destroyed");

        released?;
        removed.map_err(|e| AnalysisError::ScopeError(format!("artifact cleanup: {}", e)))
    }
}

impl Drop for EphemeralScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let scope = self.scope.clone();
        let gateway = Arc::clone(&self.gateway);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(scope = %scope, "Ephemeral scope dropped without destroy; releasing in background");
                handle.spawn(async move {
                    if let Err(e) = gateway.release(&scope).await {
                        warn!(scope = %scope, error = %e, "Background scope release failed");
                    }
                });
            }
            Err(_) => {
                warn!(scope = %scope, "No runtime available; ephemeral scope entries leaked");
            }
        }
    }
}
