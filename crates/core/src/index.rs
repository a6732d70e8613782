use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// One chunk of source material returned by the index for a query.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    /// Relevance score as reported by the index, if it reports one.
    pub score: Option<f32>,
}

/// Read-only access to the document index. The index itself (ingestion,
/// storage, ranking) lives in a separate service.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Returns the chunks most relevant to `query`, best first.
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>>;
}

/// A `DocumentIndex` backed by an external retrieval service speaking a
/// small JSON protocol: `GET {base}/query?query=...` returning
/// `{"chunks": [{"text": ..., "score": ...}]}`.
pub struct HttpDocumentIndex {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    chunks: Vec<RetrievedChunk>,
}

impl HttpDocumentIndex {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl DocumentIndex for HttpDocumentIndex {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let url = format!("{}/query", self.base_url);
        debug!(%url, %query, "Querying document index.");

        let response = self
            .client
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await
            .context("Failed to reach the document index")?
            .error_for_status()
            .context("Document index returned an error status")?;

        let body: QueryResponse = response
            .json()
            .await
            .context("Document index returned an unreadable body")?;
        Ok(body.chunks)
    }
}
