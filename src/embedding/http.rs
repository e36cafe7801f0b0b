//! `HttpEmbedder` — the reference embedding adapter against an
//! OpenAI-compatible `/embeddings` endpoint. Shares the `reqwest::Client`
//! builder and HTML-sniffing parse style of [`crate::llm::HttpLlmClient`],
//! which is itself grounded on `llm/external.rs`'s `parse_json_response`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::ExtractError;

use super::Embedder;

pub struct HttpEmbedder {
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| ExtractError::UpstreamUnavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
            client,
        })
    }

    async fn call(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>, ExtractError> {
        let request = json!({
            "model": self.model,
            "input": input,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::UpstreamUnavailable(format!("embedding request to {} failed: {e}", self.endpoint)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::UpstreamUnavailable(format!("embedding API error ({status}): {body}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ExtractError::UpstreamUnavailable(format!("failed to read embedding response body: {e}")))?;

        let parsed: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            ExtractError::UpstreamSchema(format!("failed to parse embedding response: {e}. Body: {preview}"))
        })?;

        let mut rows: Vec<(usize, Vec<f32>)> = parsed.data.into_iter().map(|d| (d.index, d.embedding)).collect();
        rows.sort_by_key(|(index, _)| *index);
        Ok(rows.into_iter().map(|(_, v)| v).collect())
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ExtractError> {
        let mut vectors = self.call(json!(text)).await?;
        vectors
            .pop()
            .ok_or_else(|| ExtractError::UpstreamSchema("embedding response contained no vectors".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExtractError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.call(json!(texts)).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
