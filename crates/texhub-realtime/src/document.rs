//! HTTP client for the document-updater service.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use texhub_core::error::{AppError, ErrorKind};
use texhub_core::result::AppResult;
use texhub_core::traits::DocumentService;
use texhub_core::types::{DocId, ProjectId};

/// [`DocumentService`] over the document-updater's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpDocumentService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDocumentService {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::with_source(ErrorKind::Configuration, "Failed to build HTTP client", e)
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn doc_url(&self, project_id: ProjectId, doc_id: DocId) -> String {
        format!(
            "{}/project/{}/doc/{}",
            self.base_url,
            project_id.to_hex(),
            doc_id.to_hex()
        )
    }
}

fn upstream(err: reqwest::Error) -> AppError {
    let message = match err.status() {
        Some(status) => format!("Document updater answered {status}"),
        None => "Document updater unreachable".to_string(),
    };
    AppError::with_source(ErrorKind::ExternalService, message, err)
}

#[async_trait]
impl DocumentService for HttpDocumentService {
    async fn get_doc(&self, project_id: ProjectId, doc_id: DocId) -> AppResult<Value> {
        self.client
            .get(self.doc_url(project_id, doc_id))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(upstream)?
            .json::<Value>()
            .await
            .map_err(upstream)
    }

    async fn apply_update(
        &self,
        project_id: ProjectId,
        doc_id: DocId,
        update: Value,
    ) -> AppResult<()> {
        self.client
            .post(format!("{}/update", self.doc_url(project_id, doc_id)))
            .json(&update)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(upstream)?;
        Ok(())
    }
}
