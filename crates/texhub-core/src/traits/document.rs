//! Interface to the external document-editing service.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::id::{DocId, ProjectId};

/// The document-editing service that owns document content and merges
/// updates. The real-time layer only relays to it.
#[async_trait]
pub trait DocumentService: Send + Sync + std::fmt::Debug + 'static {
    /// Fetch a document snapshot for a client joining it.
    async fn get_doc(&self, project_id: ProjectId, doc_id: DocId) -> AppResult<serde_json::Value>;

    /// Hand a client update to the editing service.
    async fn apply_update(
        &self,
        project_id: ProjectId,
        doc_id: DocId,
        update: serde_json::Value,
    ) -> AppResult<()>;
}
