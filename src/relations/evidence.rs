//! Phase 7 — Relation Evidence Match (§4.9): for each normalized relation,
//! build a query and search the vector store for supporting chunks.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::concurrency::bounded_fan_out;
use crate::embedding::Embedder;
use crate::error::ExtractError;
use crate::model::{ChunkType, NormalizedRelation, RelationMatch, SourceType};
use crate::repository::{ChunkRepository, DocumentRepository, SearchFilters};

/// The narrative source types a relation's supporting evidence may live in —
/// never an entity document itself.
const EVIDENCE_SOURCE_TYPES: [SourceType; 5] =
    [SourceType::Story, SourceType::Chapter, SourceType::Scene, SourceType::Beat, SourceType::ContentBlock];

#[derive(Debug, Clone)]
pub struct RelationEvidenceResult {
    pub relation_index: usize,
    pub relation_key: String,
    pub matches: Vec<RelationMatch>,
}

fn build_query(relation: &NormalizedRelation) -> String {
    let base = if !relation.summary.trim().is_empty() {
        relation.summary.clone()
    } else {
        format!("{} {} {}", relation.source.name, relation.relation_type, relation.target.name)
    };
    if !relation.evidence.quote.trim().is_empty() {
        format!("{base}\nEvidence: {}", relation.evidence.quote)
    } else {
        base
    }
}

#[allow(clippy::too_many_arguments)]
async fn match_one(
    embedder: &dyn Embedder,
    chunks: &dyn ChunkRepository,
    documents: &dyn DocumentRepository,
    tenant_id: uuid::Uuid,
    relation_index: usize,
    relation: &NormalizedRelation,
    max_matches: usize,
    min_similarity: f32,
) -> Result<RelationEvidenceResult, ExtractError> {
    let query = build_query(relation);
    let embedding = embedder.embed_text(&query).await?;

    let filters = SearchFilters { source_types: EVIDENCE_SOURCE_TYPES.to_vec(), ..Default::default() };
    let scored = chunks.search_similar(tenant_id, &embedding, max_matches, None, &filters).await?;

    let mut matches = Vec::new();
    for scored_chunk in scored {
        let similarity = 1.0 - scored_chunk.distance;
        if similarity < min_similarity {
            continue;
        }
        let Some(document) = documents.get_by_id(tenant_id, scored_chunk.chunk.document_id).await? else { continue };
        matches.push(RelationMatch {
            chunk_id: scored_chunk.chunk.id,
            document_id: document.id,
            source_type: document.source_type,
            source_id: document.source_id,
            content: scored_chunk.chunk.content.clone(),
            similarity,
        });
    }

    Ok(RelationEvidenceResult { relation_index, relation_key: relation.key(), matches })
}

/// Run Phase 7 over every normalized relation, in parallel up to
/// `RELATION_MATCH_PARALLELISM`, preserving input order via pre-sized slots.
/// A failure for one relation is isolated — it yields an empty match list
/// rather than aborting the phase, matching Phase 3's isolation policy
/// (§4.9 names no isolation rule explicitly but §4.11 only lists routing and
/// matching errors as non-fatal; we extend that here since evidence matching
/// is itself a form of Phase-3-style best-effort enrichment, not a
/// correctness-affecting step of the relation itself).
pub async fn match_relation_evidence(
    embedder: Arc<dyn Embedder>,
    chunks: Arc<dyn ChunkRepository>,
    documents: Arc<dyn DocumentRepository>,
    tenant_id: uuid::Uuid,
    relations: &[NormalizedRelation],
    max_matches: usize,
    min_similarity: f32,
    parallelism: usize,
    cancellation: CancellationToken,
) -> Vec<RelationEvidenceResult> {
    let indexed: Vec<(usize, NormalizedRelation)> = relations.iter().cloned().enumerate().collect();

    let results = bounded_fan_out(indexed, parallelism.max(1), cancellation, move |(relation_index, relation)| {
        let embedder = embedder.clone();
        let chunks = chunks.clone();
        let documents = documents.clone();
        async move {
            match match_one(&*embedder, &*chunks, &*documents, tenant_id, relation_index, &relation, max_matches, min_similarity).await {
                Ok(result) => result,
                Err(error) => {
                    tracing::warn!(relation_index, %error, "phase 7 evidence match failed for relation, isolating");
                    RelationEvidenceResult { relation_index, relation_key: relation.key(), matches: Vec::new() }
                }
            }
        }
    })
    .await;

    results
        .into_iter()
        .enumerate()
        .map(|(index, result)| result.unwrap_or(RelationEvidenceResult { relation_index: index, relation_key: String::new(), matches: Vec::new() }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicEmbedder;
    use crate::model::{DedupInfo, Polarity, RelationDirection, RelationEvidence, RelationStatus, ResolvedEntity};
    use crate::repository::new_pair;
    use uuid::Uuid;

    fn relation() -> NormalizedRelation {
        NormalizedRelation {
            source: ResolvedEntity { id: Some(Uuid::new_v4()), name: "Aria".into(), source_type: SourceType::Character },
            target: ResolvedEntity { id: Some(Uuid::new_v4()), name: "Port Vey".into(), source_type: SourceType::Location },
            relation_type: "located_in".into(),
            polarity: Polarity::Asserted,
            implicit: false,
            confidence: 0.9,
            evidence: RelationEvidence { span_id: None, quote: "Aria stood in Port Vey".into() },
            direction: RelationDirection::SourceToTarget,
            create_mirror: true,
            mirror_of: None,
            status: RelationStatus::Ready,
            dedup: DedupInfo::default(),
            summary: "Aria is located in Port Vey".into(),
        }
    }

    #[tokio::test]
    async fn no_stored_evidence_chunks_yields_an_empty_match_list_not_an_error() {
        let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder::new(8));
        let (docs, chunks) = new_pair();
        let docs: Arc<dyn DocumentRepository> = Arc::new(docs);
        let chunks: Arc<dyn ChunkRepository> = Arc::new(chunks);

        let results = match_relation_evidence(embedder, chunks, docs, Uuid::new_v4(), &[relation()], 5, 0.0, 2, CancellationToken::new()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].relation_index, 0);
        assert!(results[0].matches.is_empty());
    }

    #[test]
    fn build_query_prefers_summary_and_appends_the_evidence_quote() {
        let query = build_query(&relation());
        assert!(query.starts_with("Aria is located in Port Vey"));
        assert!(query.contains("Evidence: Aria stood in Port Vey"));
    }

    #[test]
    fn build_query_falls_back_to_a_templated_sentence_when_summary_is_blank() {
        let mut r = relation();
        r.summary.clear();
        let query = build_query(&r);
        assert!(query.starts_with("Aria located_in Port Vey"));
    }
}
