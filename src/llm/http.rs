//! `HttpLlmClient` — the reference LLM adapter against an OpenAI-compatible
//! `/chat/completions` endpoint. Grounded on
//! `llm/external.rs::ExternalProvider::openai_compatible_generate` (request
//! shape, `reqwest::Client` timeout/connect-timeout builder,
//! HTML-vs-JSON response sniffing in `parse_json_response`), reduced to the
//! single `generate` capability §6 characterises the LLM collaborator by.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::ExtractError;

use super::LlmClient;

pub struct HttpLlmClient {
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    client: Client,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ExtractError::UpstreamUnavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 4096,
            temperature: 0.2,
            client,
        })
    }

    pub fn with_generation_params(mut self, max_tokens: usize, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    async fn parse_json_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExtractError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExtractError::UpstreamUnavailable(format!("failed to read response body: {e}")))?;

        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(ExtractError::UpstreamUnavailable(format!(
                "endpoint returned HTML instead of JSON (HTTP {status}): {preview}"
            )));
        }

        serde_json::from_str::<T>(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            ExtractError::UpstreamSchema(format!("failed to parse JSON (HTTP {status}): {e}. Body: {preview}"))
        })
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, prompt: &str, cancellation: &CancellationToken) -> Result<String, ExtractError> {
        if cancellation.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let request = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let response = tokio::select! {
            result = self.client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send() => result.map_err(|e| {
                    if e.is_timeout() {
                        ExtractError::UpstreamUnavailable(format!("request to {} timed out", self.endpoint))
                    } else if e.is_connect() {
                        ExtractError::UpstreamUnavailable(format!("failed to connect to {}: {e}", self.endpoint))
                    } else {
                        ExtractError::UpstreamUnavailable(format!("request to {} failed: {e}", self.endpoint))
                    }
                })?,
            _ = cancellation.cancelled() => return Err(ExtractError::Cancelled),
        };

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(ExtractError::UpstreamUnavailable(format!("LLM API error ({status}): {error}")));
        }

        let result: ChatCompletionResponse = Self::parse_json_response(response).await?;
        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ExtractError::UpstreamSchema("LLM returned empty choices array".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_cancelled_token_short_circuits_before_any_request() {
        let client = HttpLlmClient::new("http://127.0.0.1:1", "key", "model").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = client.generate("hello", &token).await.unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled));
    }
}
