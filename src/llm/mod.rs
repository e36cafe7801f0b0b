//! The LLM capability (§6): `Generate(ctx, prompt) → text`. The orchestrator
//! depends only on [`LlmClient`]; this crate ships one reference HTTP
//! adapter ([`http::HttpLlmClient`]) and one test double
//! ([`recorded::RecordedLlmClient`]).

mod http;
mod recorded;

pub use http::HttpLlmClient;
pub use recorded::RecordedLlmClient;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ExtractError;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for `prompt`. Implementations must honour
    /// `cancellation` between retries/chunks of work where practical; the
    /// reference HTTP adapter checks it before issuing the request.
    async fn generate(
        &self,
        prompt: &str,
        cancellation: &CancellationToken,
    ) -> Result<String, ExtractError>;
}
