//! The embedding capability (§6): `EmbedText(text) → vector`,
//! `EmbedBatch(texts[])`, `Dimension() → int`. Mirrors the shape of
//! [`crate::llm::LlmClient`]; grounded on the teacher's
//! `embeddings/mod.rs::EmbeddingModel` trait, generalized from a sync
//! query/document-prefixed API to the single async capability the pipeline
//! actually exercises — prefixing, if a model needs it, is the adapter's
//! concern, not the orchestrator's.

mod deterministic;
mod http;

pub use deterministic::DeterministicEmbedder;
pub use http::HttpEmbedder;

use async_trait::async_trait;

use crate::error::ExtractError;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ExtractError>;

    /// Batch form. The default forwards one at a time; adapters that can
    /// genuinely batch (e.g. a single HTTP call for N inputs) should
    /// override it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExtractError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_text(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;
}
