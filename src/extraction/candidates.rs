//! Phase 2 — Per-Type Entity Extraction (§4.5): for each routed chunk and
//! each type it was routed to, ask a type-specialised extractor for
//! candidates, locate their evidence spans, and merge them across chunks
//! into one [`Finding`] per normalized name.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::ExtractError;
use crate::json_lenient::{lenient_parse, repair_prompt};
use crate::llm::LlmClient;
use crate::model::{normalize_name, EntityType, Finding, Occurrence};
use crate::prompts::{self, ENTITY_EXTRACTOR_PROMPT};

use super::routing::RoutedChunk;

/// §4.5's optional cross-chunk identity callback: when a new candidate's
/// normalized name doesn't exactly match an existing finding, ask this
/// collaborator whether they are nonetheless the same entity before
/// creating a second [`Finding`].
#[async_trait]
pub trait EntityMatcher: Send + Sync {
    async fn same_entity(
        &self,
        entity_type: EntityType,
        candidate_name: &str,
        candidate_summary: &str,
        existing_name: &str,
        existing_summary: &str,
    ) -> Result<bool, ExtractError>;
}

#[derive(Debug, Deserialize)]
struct ExtractorResponse {
    entities: Vec<ExtractorCandidate>,
}

#[derive(Debug, Deserialize)]
struct ExtractorCandidate {
    name: String,
    evidence: String,
    #[serde(default)]
    summary: String,
}

/// Locate `evidence` inside `text`, first by exact substring, then by a
/// trimmed match; `None` means the candidate is dropped (§4.5).
fn locate_evidence(text: &str, evidence: &str) -> Option<(usize, usize)> {
    if let Some(start) = text.find(evidence) {
        return Some((start, start + evidence.len()));
    }
    let trimmed = evidence.trim();
    if trimmed.is_empty() {
        return None;
    }
    text.find(trimmed).map(|start| (start, start + trimmed.len()))
}

/// Run Phase 2 over every routed chunk, sequentially (so each chunk's
/// prompt can reference entities found in preceding chunks), with types for
/// a single chunk extracted in parallel.
pub async fn extract_candidates(
    llm: &dyn LlmClient,
    chunks: &[RoutedChunk],
    context: &str,
    max_candidates_per_chunk: usize,
    matcher: Option<&dyn EntityMatcher>,
    cancellation: &CancellationToken,
) -> Result<Vec<Finding>, ExtractError> {
    let mut findings_by_type: HashMap<EntityType, Vec<Finding>> = HashMap::new();
    let mut index_by_type: HashMap<EntityType, HashMap<String, usize>> = HashMap::new();
    let mut type_order: Vec<EntityType> = Vec::new();

    for chunk in chunks {
        if cancellation.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        // Types for one chunk run concurrently (borrowing `llm` directly —
        // no need for the 'static bound `bounded_fan_out` requires since
        // there is no per-chunk parallelism limit to enforce here);
        // chunks themselves are processed sequentially so each chunk's
        // prompt can reference entities already found in earlier chunks.
        let per_type_futures = chunk.types.iter().copied().map(|entity_type| {
            let known: Vec<&str> = findings_by_type
                .get(&entity_type)
                .map(|findings| findings.iter().map(|f| f.name.as_str()).collect())
                .unwrap_or_default();
            let known_joined = if known.is_empty() { "(none yet)".to_string() } else { known.join(", ") };

            let prompt = prompts::render(
                ENTITY_EXTRACTOR_PROMPT,
                &[
                    ("entity_type", entity_type.as_str()),
                    ("context", context),
                    ("known_entities", known_joined.as_str()),
                    ("text", chunk.text.as_str()),
                    ("max_candidates", &max_candidates_per_chunk.to_string()),
                ],
            );

            async move {
                let raw = llm.generate(&prompt, cancellation).await?;
                let parsed = match lenient_parse::<ExtractorResponse>(&raw) {
                    Ok(parsed) => parsed,
                    Err(_) => {
                        let repair = repair_prompt(
                            r#"{"entities": [{"name": "...", "evidence": "...", "summary": "..."}]}"#,
                            &raw,
                        );
                        let retried = llm.generate(&repair, cancellation).await?;
                        lenient_parse::<ExtractorResponse>(&retried)?
                    }
                };
                Ok::<_, ExtractError>((entity_type, parsed))
            }
        });

        let per_type_results = futures::future::join_all(per_type_futures).await;

        for result in per_type_results {
            let (entity_type, parsed) = result?;
            for candidate in parsed.entities {
                let Some((start, end)) = locate_evidence(&chunk.text, &candidate.evidence) else { continue };
                let occurrence = Occurrence {
                    paragraph_id: chunk.paragraph_id.clone(),
                    chunk_id: chunk.chunk_id.clone(),
                    start_offset: chunk.offsets.0 + start,
                    end_offset: chunk.offsets.0 + end,
                    evidence: candidate.evidence.clone(),
                };

                merge_candidate(
                    &mut findings_by_type,
                    &mut index_by_type,
                    &mut type_order,
                    entity_type,
                    candidate.name,
                    candidate.summary,
                    occurrence,
                    matcher,
                )
                .await?;
            }
        }
    }

    // Flatten in first-seen type order rather than `HashMap` iteration
    // order, which is unspecified and would make the returned vector's
    // type-grouping non-deterministic across runs.
    let mut all_findings = Vec::new();
    for entity_type in type_order {
        if let Some(findings) = findings_by_type.remove(&entity_type) {
            all_findings.extend(findings);
        }
    }
    Ok(all_findings)
}

#[allow(clippy::too_many_arguments)]
async fn merge_candidate(
    findings_by_type: &mut HashMap<EntityType, Vec<Finding>>,
    index_by_type: &mut HashMap<EntityType, HashMap<String, usize>>,
    type_order: &mut Vec<EntityType>,
    entity_type: EntityType,
    name: String,
    summary: String,
    occurrence: Occurrence,
    matcher: Option<&dyn EntityMatcher>,
) -> Result<(), ExtractError> {
    let normalized = normalize_name(&name);
    if !findings_by_type.contains_key(&entity_type) {
        type_order.push(entity_type);
    }
    let findings = findings_by_type.entry(entity_type).or_default();
    let index_map = index_by_type.entry(entity_type).or_default();

    if let Some(&index) = index_map.get(&normalized) {
        merge_into(&mut findings[index], summary, occurrence);
        return Ok(());
    }

    if let Some(matcher) = matcher {
        for (index, existing) in findings.iter().enumerate() {
            if matcher.same_entity(entity_type, &name, &summary, &existing.name, &existing.summary).await? {
                index_map.insert(normalized, index);
                merge_into(&mut findings[index], summary, occurrence);
                return Ok(());
            }
        }
    }

    let new_index = findings.len();
    findings.push(Finding { entity_type, name, summary, occurrences: vec![occurrence] });
    index_map.insert(normalized, new_index);
    Ok(())
}

fn merge_into(finding: &mut Finding, summary: String, occurrence: Occurrence) {
    let already_present = finding.occurrences.iter().any(|existing| {
        existing.chunk_id == occurrence.chunk_id
            && existing.start_offset == occurrence.start_offset
            && existing.end_offset == occurrence.end_offset
    });
    if !already_present {
        finding.occurrences.push(occurrence);
    }
    if !summary.trim().is_empty() {
        finding.summary = summary;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::RecordedLlmClient;

    fn chunk(text: &str, types: Vec<EntityType>) -> RoutedChunk {
        RoutedChunk {
            paragraph_id: "p0".into(),
            chunk_id: "p0-c0".into(),
            offsets: (0, text.len()),
            text: text.to_string(),
            types,
        }
    }

    #[tokio::test]
    async fn a_candidate_with_exact_evidence_produces_a_finding_with_correct_offsets() {
        let llm = RecordedLlmClient::new(vec![
            r#"{"entities": [{"name": "Aria", "evidence": "Aria drew her sword", "summary": "a knight"}]}"#,
        ]);
        let chunks = vec![chunk("Aria drew her sword.", vec![EntityType::Character])];
        let findings = extract_candidates(&llm, &chunks, "", 5, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].name, "Aria");
        assert_eq!(findings[0].occurrences[0].start_offset, 0);
        assert_eq!(findings[0].occurrences[0].end_offset, "Aria drew her sword".len());
    }

    #[tokio::test]
    async fn a_candidate_whose_evidence_is_not_in_the_text_is_dropped() {
        let llm = RecordedLlmClient::new(vec![
            r#"{"entities": [{"name": "Ghost", "evidence": "not actually in the text", "summary": ""}]}"#,
        ]);
        let chunks = vec![chunk("Aria drew her sword.", vec![EntityType::Character])];
        let findings = extract_candidates(&llm, &chunks, "", 5, None, &CancellationToken::new()).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn repeat_mentions_merge_by_normalized_name_and_latest_summary_wins() {
        let llm = RecordedLlmClient::new(vec![
            r#"{"entities": [{"name": "Aria", "evidence": "Aria arrived", "summary": "a traveler"}]}"#,
            r#"{"entities": [{"name": "ARIA", "evidence": "Aria left", "summary": "a knight now"}]}"#,
        ]);
        let chunks = vec![
            RoutedChunk {
                paragraph_id: "p0".into(),
                chunk_id: "p0-c0".into(),
                offsets: (0, 13),
                text: "Aria arrived.".into(),
                types: vec![EntityType::Character],
            },
            RoutedChunk {
                paragraph_id: "p1".into(),
                chunk_id: "p1-c0".into(),
                offsets: (20, 30),
                text: "Aria left.".into(),
                types: vec![EntityType::Character],
            },
        ];
        let findings = extract_candidates(&llm, &chunks, "", 5, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].summary, "a knight now");
        assert_eq!(findings[0].occurrences.len(), 2);
    }
}
