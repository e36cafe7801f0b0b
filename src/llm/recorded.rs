//! `RecordedLlmClient` — a test double that replays a fixed script of
//! responses keyed by call order, the vehicle that makes each phase testable
//! as a pure function of `(LLM output, inputs)` without a live endpoint.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ExtractError;

use super::LlmClient;

pub struct RecordedLlmClient {
    responses: Mutex<std::collections::VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<String>>,
}

impl RecordedLlmClient {
    /// Build a client that returns `responses[0]` on the first call,
    /// `responses[1]` on the second, and so on. Calling past the end of the
    /// script is a test bug, not a runtime one — it panics.
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.to_string())).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Like [`RecordedLlmClient::new`], but individual script entries can
    /// also be an upstream failure message, for exercising retry/repair
    /// paths.
    pub fn with_results(results: Vec<Result<&str, &str>>) -> Self {
        Self {
            responses: Mutex::new(
                results
                    .into_iter()
                    .map(|r| r.map(|s| s.to_string()).map_err(|e| e.to_string()))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The prompts this client was called with, in call order.
    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LlmClient for RecordedLlmClient {
    async fn generate(&self, prompt: &str, cancellation: &CancellationToken) -> Result<String, ExtractError> {
        if cancellation.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        self.calls.lock().push(prompt.to_string());
        let next = self
            .responses
            .lock()
            .pop_front()
            .expect("RecordedLlmClient called more times than its script provides responses");
        next.map_err(ExtractError::UpstreamSchema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_responses_in_order() {
        let client = RecordedLlmClient::new(vec!["first", "second"]);
        let token = CancellationToken::new();
        assert_eq!(client.generate("a", &token).await.unwrap(), "first");
        assert_eq!(client.generate("b", &token).await.unwrap(), "second");
        assert_eq!(client.recorded_calls(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn a_scripted_failure_surfaces_as_upstream_schema() {
        let client = RecordedLlmClient::with_results(vec![Err("not json")]);
        let token = CancellationToken::new();
        let err = client.generate("prompt", &token).await.unwrap_err();
        assert!(matches!(err, ExtractError::UpstreamSchema(_)));
    }

    #[tokio::test]
    async fn a_cancelled_token_short_circuits_without_consuming_the_script() {
        let client = RecordedLlmClient::new(vec!["unused"]);
        let token = CancellationToken::new();
        token.cancel();
        let err = client.generate("prompt", &token).await.unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled));
        assert!(client.recorded_calls().is_empty());
    }
}
