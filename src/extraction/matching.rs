//! Phase 3 — Entity Matching (§4.6): for each finding, search the vector
//! store for an existing entity it might already be, then let the LLM pick
//! at most one confirmed match from the candidate pool. A failure isolated
//! to one finding yields a result with no candidates — it never aborts the
//! phase (§4.6 "Parallelism").

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::concurrency::bounded_fan_out;
use crate::embedding::Embedder;
use crate::json_lenient::{lenient_parse, repair_prompt};
use crate::llm::LlmClient;
use crate::model::{ChunkType, ConfirmedMatch, Finding, MatchCandidate, MatchResult};
use crate::prompts::{self, ENTITY_MATCH_SELECTOR_PROMPT};
use crate::repository::{ChunkRepository, DocumentRepository, SearchFilters};

#[derive(Debug, Deserialize)]
struct SelectorResponse {
    #[serde(rename = "match")]
    selection: Option<Selection>,
}

#[derive(Debug, Deserialize)]
struct Selection {
    index: usize,
    reason: String,
}

#[allow(clippy::too_many_arguments)]
pub async fn match_findings(
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn Embedder>,
    chunks: Arc<dyn ChunkRepository>,
    documents: Arc<dyn DocumentRepository>,
    tenant_id: Uuid,
    world_id: Option<Uuid>,
    findings: Vec<Finding>,
    min_similarity: f32,
    max_candidates: usize,
    parallelism: usize,
    cancellation: CancellationToken,
) -> Vec<MatchResult> {
    let indexed: Vec<(usize, Finding)> = findings.into_iter().enumerate().collect();

    let results = bounded_fan_out(indexed, parallelism, cancellation.clone(), move |(finding_index, finding)| {
        let llm = llm.clone();
        let embedder = embedder.clone();
        let chunks = chunks.clone();
        let documents = documents.clone();
        let cancellation = cancellation.clone();
        async move {
            match match_one(
                &*llm,
                &*embedder,
                &*chunks,
                &*documents,
                tenant_id,
                world_id,
                &finding,
                min_similarity,
                max_candidates,
                &cancellation,
            )
            .await
            {
                Ok((candidates, confirmed)) => MatchResult { finding_index, candidates, confirmed },
                Err(error) => {
                    tracing::warn!(finding_index, %error, "phase 3 matching failed for finding, isolating");
                    MatchResult { finding_index, candidates: Vec::new(), confirmed: None }
                }
            }
        }
    })
    .await;

    results
        .into_iter()
        .enumerate()
        .map(|(index, result)| result.unwrap_or(MatchResult { finding_index: index, candidates: Vec::new(), confirmed: None }))
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn match_one(
    llm: &dyn LlmClient,
    embedder: &dyn Embedder,
    chunks: &dyn ChunkRepository,
    documents: &dyn DocumentRepository,
    tenant_id: Uuid,
    world_id: Option<Uuid>,
    finding: &Finding,
    min_similarity: f32,
    max_candidates: usize,
    cancellation: &CancellationToken,
) -> Result<(Vec<MatchCandidate>, Option<ConfirmedMatch>), crate::error::ExtractError> {
    let query = if !finding.summary.trim().is_empty() { finding.summary.as_str() } else { finding.name.as_str() };
    if query.trim().is_empty() {
        return Ok((Vec::new(), None));
    }

    let embedding = embedder.embed_text(query).await?;

    let filters = SearchFilters {
        source_types: vec![finding.entity_type.to_source_type()],
        chunk_types: vec![ChunkType::Summary],
        world_ids: world_id.into_iter().collect(),
        ..Default::default()
    };

    let scored = chunks.search_similar(tenant_id, &embedding, max_candidates, None, &filters).await?;

    let mut candidates = Vec::new();
    for scored_chunk in scored {
        let similarity = 1.0 - scored_chunk.distance;
        if similarity < min_similarity {
            continue;
        }
        let Some(document) = documents.get_by_id(tenant_id, scored_chunk.chunk.document_id).await? else { continue };
        candidates.push(MatchCandidate {
            chunk_id: scored_chunk.chunk.id,
            document_id: document.id,
            source_type: document.source_type,
            source_id: document.source_id,
            entity_name: scored_chunk.chunk.entity_name.clone().unwrap_or_default(),
            summary: scored_chunk.chunk.embed_text.clone().unwrap_or_default(),
            similarity,
        });
    }

    if candidates.is_empty() {
        return Ok((candidates, None));
    }

    let rendered_candidates = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| format!("{index}: {} — {}", candidate.entity_name, candidate.summary))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = prompts::render(
        ENTITY_MATCH_SELECTOR_PROMPT,
        &[
            ("finding_name", finding.name.as_str()),
            ("finding_summary", finding.summary.as_str()),
            ("candidates", rendered_candidates.as_str()),
        ],
    );

    let raw = llm.generate(&prompt, cancellation).await?;
    let parsed = match lenient_parse::<SelectorResponse>(&raw) {
        Ok(parsed) => parsed,
        Err(_) => {
            let repair = repair_prompt(r#"{"match": {"index": 0, "reason": "..."} | null}"#, &raw);
            let retried = llm.generate(&repair, cancellation).await?;
            lenient_parse::<SelectorResponse>(&retried)?
        }
    };

    let confirmed = parsed
        .selection
        .filter(|selection| selection.index < candidates.len())
        .map(|selection| {
            let candidate = &candidates[selection.index];
            ConfirmedMatch {
                document_id: candidate.document_id,
                source_type: candidate.source_type,
                source_id: candidate.source_id.clone(),
                reason: selection.reason,
            }
        });

    Ok((candidates, confirmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicEmbedder;
    use crate::model::EntityType;
    use crate::repository::new_pair;

    #[tokio::test]
    async fn a_finding_with_no_summary_and_no_name_yields_no_candidates() {
        let llm: Arc<dyn LlmClient> = Arc::new(crate::llm::RecordedLlmClient::new(vec![]));
        let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder::new(8));
        let (docs, chunks) = new_pair();
        let docs: Arc<dyn DocumentRepository> = Arc::new(docs);
        let chunks: Arc<dyn ChunkRepository> = Arc::new(chunks);

        let finding = Finding { entity_type: EntityType::Character, name: String::new(), summary: String::new(), occurrences: vec![] };
        let results = match_findings(
            llm,
            embedder,
            chunks,
            docs,
            Uuid::new_v4(),
            None,
            vec![finding],
            0.75,
            5,
            2,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].candidates.is_empty());
        assert!(results[0].confirmed.is_none());
    }

    #[tokio::test]
    async fn no_stored_summary_chunks_means_no_candidates_and_no_llm_call() {
        let llm: Arc<dyn LlmClient> = Arc::new(crate::llm::RecordedLlmClient::new(vec![]));
        let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder::new(8));
        let (docs, chunks) = new_pair();
        let docs: Arc<dyn DocumentRepository> = Arc::new(docs);
        let chunks: Arc<dyn ChunkRepository> = Arc::new(chunks);

        let finding = Finding {
            entity_type: EntityType::Character,
            name: "Aria".into(),
            summary: "a knight".into(),
            occurrences: vec![],
        };
        let results =
            match_findings(llm, embedder, chunks, docs, Uuid::new_v4(), None, vec![finding], 0.75, 5, 2, CancellationToken::new())
                .await;

        assert!(results[0].candidates.is_empty());
    }
}
