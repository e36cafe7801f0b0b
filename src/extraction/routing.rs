//! Phase 0/1 — Routing (§4.4): for each chunk, ask the LLM which entity
//! types it plausibly describes. Chunks with no accepted candidate are
//! dropped; a per-chunk failure is logged and skipped, never fatal to the
//! invocation (§4.11).

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::json_lenient::{lenient_parse, repair_prompt};
use crate::llm::LlmClient;
use crate::model::{normalize_entity_type, EntityType};
use crate::prompts::{self, ROUTER_PROMPT};
use crate::splitter::SplitParagraph;

#[derive(Debug, Clone)]
pub struct RoutedChunk {
    pub paragraph_id: String,
    pub chunk_id: String,
    pub offsets: (usize, usize),
    pub text: String,
    pub types: Vec<EntityType>,
}

#[derive(Debug, Deserialize)]
struct RouterResponse {
    candidates: Vec<RouterCandidate>,
}

#[derive(Debug, Deserialize)]
struct RouterCandidate {
    #[serde(rename = "type")]
    entity_type: String,
    #[allow(dead_code)]
    confidence: f32,
    #[allow(dead_code)]
    why: String,
}

/// Route every chunk across `paragraphs`, dropping chunks whose router
/// response yields no recognized entity type (including chunks whose LLM
/// call, and repair retry, both fail).
pub async fn route_chunks(
    llm: &dyn LlmClient,
    paragraphs: &[SplitParagraph],
    entity_types: &[EntityType],
    context: &str,
    max_candidates: usize,
    cancellation: &CancellationToken,
) -> Vec<RoutedChunk> {
    let allowed: String = entity_types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ");
    let mut routed = Vec::new();

    for paragraph in paragraphs {
        for chunk in &paragraph.chunks {
            if cancellation.is_cancelled() {
                return routed;
            }

            let prompt = prompts::render(
                ROUTER_PROMPT,
                &[
                    ("entity_types", allowed.as_str()),
                    ("context", context),
                    ("text", chunk.text.as_str()),
                    ("max_candidates", &max_candidates.to_string()),
                ],
            );

            let types = match route_one(llm, &prompt, entity_types, cancellation).await {
                Ok(types) => types,
                Err(error) => {
                    tracing::warn!(chunk_id = %chunk.chunk_id, %error, "phase 1 routing failed for chunk, skipping");
                    Vec::new()
                }
            };

            if types.is_empty() {
                continue;
            }

            routed.push(RoutedChunk {
                paragraph_id: paragraph.paragraph_id.clone(),
                chunk_id: chunk.chunk_id.clone(),
                offsets: (chunk.start, chunk.end),
                text: chunk.text.clone(),
                types,
            });
        }
    }

    routed
}

async fn route_one(
    llm: &dyn LlmClient,
    prompt: &str,
    entity_types: &[EntityType],
    cancellation: &CancellationToken,
) -> Result<Vec<EntityType>, crate::error::ExtractError> {
    let raw = llm.generate(prompt, cancellation).await?;
    let parsed = match lenient_parse::<RouterResponse>(&raw) {
        Ok(parsed) => parsed,
        Err(_) => {
            let repair = repair_prompt(r#"{"candidates": [{"type": "...", "confidence": 0.0, "why": "..."}]}"#, &raw);
            let retried = llm.generate(&repair, cancellation).await?;
            lenient_parse::<RouterResponse>(&retried)?
        }
    };

    let mut types = Vec::new();
    for candidate in parsed.candidates {
        if let Ok(entity_type) = normalize_entity_type(&candidate.entity_type) {
            if entity_types.contains(&entity_type) && !types.contains(&entity_type) {
                types.push(entity_type);
            }
        }
    }
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::RecordedLlmClient;
    use crate::splitter;

    #[tokio::test]
    async fn a_chunk_with_no_accepted_candidates_is_dropped() {
        let llm = RecordedLlmClient::new(vec![r#"{"candidates": []}"#]);
        let paragraphs = splitter::split("Just some plain narration with nothing notable.", 800, 0).unwrap();
        let routed = route_chunks(
            &llm,
            &paragraphs,
            &[EntityType::Character],
            "",
            5,
            &CancellationToken::new(),
        )
        .await;
        assert!(routed.is_empty());
    }

    #[tokio::test]
    async fn a_recognized_candidate_type_produces_a_routed_chunk() {
        let llm = RecordedLlmClient::new(vec![
            r#"{"candidates": [{"type": "character", "confidence": 0.9, "why": "names Aria"}]}"#,
        ]);
        let paragraphs = splitter::split("Aria drew her sword.", 800, 0).unwrap();
        let routed = route_chunks(
            &llm,
            &paragraphs,
            &[EntityType::Character, EntityType::Location],
            "",
            5,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].types, vec![EntityType::Character]);
    }

    #[tokio::test]
    async fn an_upstream_failure_is_skipped_not_fatal() {
        let llm = RecordedLlmClient::with_results(vec![Err("boom"), Err("boom again")]);
        let paragraphs = splitter::split("Aria drew her sword.", 800, 0).unwrap();
        let routed = route_chunks(&llm, &paragraphs, &[EntityType::Character], "", 5, &CancellationToken::new()).await;
        assert!(routed.is_empty());
    }
}
