//! The Orchestrator (§4.11): drives Phases 0–8 in order, fans out by
//! type-pair and by finding, merges results, and emits lifecycle events.
//! Event emission never gates control flow — see [`crate::events`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::embedding::Embedder;
use crate::error::ExtractError;
use crate::events::{EventEmitter, PipelineEvent};
use crate::extraction::{assemble_payload, extract_candidates, match_findings, route_chunks, EntityMatcher};
use crate::llm::LlmClient;
use crate::model::{EntityType, ExtractPayload, SourceType};
use crate::relations::{
    assemble_relations, build_ref_map, discover_relations, match_relation_evidence, normalize_relations,
    DiscoveryContext, DiscoveryText, ExistingRelationKey, RelationDiscoveryInput, SuggestedRelation,
};
use crate::repository::{ChunkRepository, DocumentRepository};
use crate::splitter;

/// Everything the orchestrator needs from the outside world — every field is
/// one of §1's "external collaborators", characterised purely by trait.
pub struct Collaborators {
    pub llm: Arc<dyn LlmClient>,
    pub embedder: Arc<dyn Embedder>,
    pub documents: Arc<dyn DocumentRepository>,
    pub chunks: Arc<dyn ChunkRepository>,
    pub matcher: Option<Arc<dyn EntityMatcher>>,
    pub emitter: Arc<dyn EventEmitter>,
}

/// The per-source-type relation map and optional semantics override that
/// must both be present for Phases 5–8 to run (§4.11 "maps_present").
pub struct RelationSchemas {
    pub suggested_relations_by_source_type: HashMap<SourceType, Vec<SuggestedRelation>>,
    pub relation_type_semantics: Option<HashMap<String, String>>,
}

pub struct ExtractRequest {
    pub tenant_id: Uuid,
    pub world_id: Option<Uuid>,
    pub text: String,
    pub context: String,
    pub entity_types: Vec<EntityType>,
    pub config: PipelineConfig,
    /// `None` means "don't attempt relation extraction at all" — the caller
    /// never supplied relation schemas, so §4.11's `include_relations` is
    /// false. `Some` with an empty suggested map means the schemas were
    /// supplied but `maps_present` is still false; both take the same
    /// entities-only path.
    pub relation_schemas: Option<RelationSchemas>,
    pub existing_relations: HashSet<ExistingRelationKey>,
}

fn validate_request(request: &ExtractRequest) -> Result<(), ExtractError> {
    if request.tenant_id.is_nil() {
        return Err(ExtractError::InvalidInput("tenant_id is required".to_string()));
    }
    if request.entity_types.is_empty() {
        return Err(ExtractError::InvalidInput("entity_types must be non-empty".to_string()));
    }
    Ok(())
}

/// Run the full §4.11 state machine for one invocation, returning the
/// assembled `{entities, relations}` payload.
pub async fn run_extraction(
    collaborators: &Collaborators,
    request: ExtractRequest,
    cancellation: CancellationToken,
) -> Result<ExtractPayload, ExtractError> {
    validate_request(&request)?;

    collaborators.emitter.emit(PipelineEvent::PipelineStart { tenant_id: request.tenant_id.to_string() });

    collaborators.emitter.emit(PipelineEvent::PhaseStart { phase: "split".to_string() });
    let paragraphs = splitter::split(&request.text, request.config.splitting.max_chunk_chars, request.config.splitting.overlap_chars)?;
    collaborators.emitter.emit(PipelineEvent::PhaseDone { phase: "split".to_string() });

    collaborators.emitter.emit(PipelineEvent::PhaseStart { phase: "route".to_string() });
    let routed = route_chunks(
        &*collaborators.llm,
        &paragraphs,
        &request.entity_types,
        &request.context,
        request.config.matching.max_candidates,
        &cancellation,
    )
    .await;
    for chunk in &routed {
        collaborators.emitter.emit(PipelineEvent::RouterChunk {
            chunk_id: chunk.chunk_id.clone(),
            types: chunk.types.iter().map(|t| t.as_str().to_string()).collect(),
        });
    }
    collaborators.emitter.emit(PipelineEvent::PhaseDone { phase: "route".to_string() });

    if routed.is_empty() {
        let payload = ExtractPayload::default();
        collaborators.emitter.emit(PipelineEvent::ResultEntities { entities: payload.entities.clone() });
        collaborators.emitter.emit(PipelineEvent::ResultRelations { relations: payload.relations.clone() });
        return Ok(payload);
    }

    collaborators.emitter.emit(PipelineEvent::PhaseStart { phase: "extract".to_string() });
    let findings = extract_candidates(
        &*collaborators.llm,
        &routed,
        &request.context,
        request.config.matching.max_candidates,
        collaborators.matcher.as_deref(),
        &cancellation,
    )
    .await?;
    collaborators.emitter.emit(PipelineEvent::PhaseDone { phase: "extract".to_string() });

    collaborators.emitter.emit(PipelineEvent::PhaseStart { phase: "match".to_string() });
    let match_results = match_findings(
        collaborators.llm.clone(),
        collaborators.embedder.clone(),
        collaborators.chunks.clone(),
        collaborators.documents.clone(),
        request.tenant_id,
        request.world_id,
        findings.clone(),
        request.config.matching.min_similarity,
        request.config.matching.max_candidates,
        request.config.parallelism.entity_extract,
        cancellation.clone(),
    )
    .await;
    for result in &match_results {
        match &result.confirmed {
            Some(confirmed) => collaborators
                .emitter
                .emit(PipelineEvent::MatchFound { finding_index: result.finding_index, source_id: confirmed.source_id.clone() }),
            None => collaborators.emitter.emit(PipelineEvent::MatchNone { finding_index: result.finding_index }),
        }
    }
    collaborators.emitter.emit(PipelineEvent::PhaseDone { phase: "match".to_string() });

    let entities = assemble_payload(findings.clone(), match_results.clone());

    let maps_present = request
        .relation_schemas
        .as_ref()
        .map(|schemas| !schemas.suggested_relations_by_source_type.is_empty())
        .unwrap_or(false);

    let relations = if maps_present {
        let schemas = request.relation_schemas.as_ref().unwrap();

        collaborators.emitter.emit(PipelineEvent::PhaseStart { phase: "discover".to_string() });
        let discovery_input = RelationDiscoveryInput {
            request_id: Uuid::new_v4().to_string(),
            context: DiscoveryContext { context_type: "document".to_string(), context_id: request.tenant_id.to_string() },
            text: DiscoveryText::FullText { text: request.text.clone() },
            entity_findings: findings.clone(),
            confirmed_matches: match_results.clone(),
            suggested_relations_by_source_type: schemas.suggested_relations_by_source_type.clone(),
            relation_type_semantics: schemas.relation_type_semantics.clone(),
        };
        let candidates =
            discover_relations(collaborators.llm.clone(), &discovery_input, request.config.parallelism.relation_discovery, cancellation.clone())
                .await?;

        let mut pair_order: Vec<(SourceType, SourceType)> = Vec::new();
        let mut pair_counts: HashMap<(SourceType, SourceType), usize> = HashMap::new();
        for candidate in &candidates {
            let key = (candidate.source.entity_type, candidate.target.entity_type);
            if !pair_counts.contains_key(&key) {
                pair_order.push(key);
            }
            *pair_counts.entry(key).or_insert(0) += 1;
        }
        for (source_type, target_type) in pair_order {
            collaborators.emitter.emit(PipelineEvent::RelationDiscoveryBatch {
                source_type: source_type.as_str().to_string(),
                target_type: target_type.as_str().to_string(),
                relation_count: pair_counts[&(source_type, target_type)],
            });
        }
        collaborators.emitter.emit(PipelineEvent::PhaseDone { phase: "discover".to_string() });

        collaborators.emitter.emit(PipelineEvent::PhaseStart { phase: "normalize".to_string() });
        let ref_map = build_ref_map(&findings, &match_results);
        let normalized = normalize_relations(
            Some(collaborators.llm.clone()),
            candidates,
            ref_map,
            request.existing_relations.clone(),
            schemas.relation_type_semantics.clone(),
            request.config.parallelism.relation_normalize,
            cancellation.clone(),
        )
        .await?;
        collaborators.emitter.emit(PipelineEvent::PhaseDone { phase: "normalize".to_string() });

        collaborators.emitter.emit(PipelineEvent::PhaseStart { phase: "evidence".to_string() });
        let evidence = match_relation_evidence(
            collaborators.embedder.clone(),
            collaborators.chunks.clone(),
            collaborators.documents.clone(),
            request.tenant_id,
            &normalized,
            request.config.relation_evidence.max_matches,
            request.config.relation_evidence.min_similarity,
            request.config.parallelism.relation_match,
            cancellation.clone(),
        )
        .await;
        collaborators.emitter.emit(PipelineEvent::PhaseDone { phase: "evidence".to_string() });

        assemble_relations(normalized, evidence)
    } else {
        Vec::new()
    };

    collaborators.emitter.emit(PipelineEvent::ResultEntities { entities: entities.clone() });
    collaborators.emitter.emit(PipelineEvent::ResultRelations { relations: relations.clone() });

    Ok(ExtractPayload { entities, relations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicEmbedder;
    use crate::events::NoopEmitter;
    use crate::llm::RecordedLlmClient;
    use crate::repository::new_pair;

    fn collaborators(llm: RecordedLlmClient) -> Collaborators {
        let (docs, chunks) = new_pair();
        Collaborators {
            llm: Arc::new(llm),
            embedder: Arc::new(DeterministicEmbedder::new(8)),
            documents: Arc::new(docs),
            chunks: Arc::new(chunks),
            matcher: None,
            emitter: Arc::new(NoopEmitter),
        }
    }

    #[tokio::test]
    async fn a_nil_tenant_id_is_rejected_before_any_phase_runs() {
        let collaborators = collaborators(RecordedLlmClient::new(vec![]));
        let request = ExtractRequest {
            tenant_id: Uuid::nil(),
            world_id: None,
            text: "Aria drew her sword.".into(),
            context: String::new(),
            entity_types: vec![EntityType::Character],
            config: PipelineConfig::default(),
            relation_schemas: None,
            existing_relations: HashSet::new(),
        };
        let err = run_extraction(&collaborators, request, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ExtractError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn text_with_no_routable_chunks_returns_an_empty_payload() {
        let collaborators = collaborators(RecordedLlmClient::new(vec![r#"{"candidates": []}"#]));
        let request = ExtractRequest {
            tenant_id: Uuid::new_v4(),
            world_id: None,
            text: "Nothing notable happens here.".into(),
            context: String::new(),
            entity_types: vec![EntityType::Character],
            config: PipelineConfig::default(),
            relation_schemas: None,
            existing_relations: HashSet::new(),
        };
        let payload = run_extraction(&collaborators, request, CancellationToken::new()).await.unwrap();
        assert!(payload.entities.is_empty());
        assert!(payload.relations.is_empty());
    }

    #[tokio::test]
    async fn entities_only_run_skips_relation_phases_when_no_schema_is_supplied() {
        let llm = RecordedLlmClient::new(vec![
            r#"{"candidates": [{"type": "character", "confidence": 0.9, "why": "names Aria"}]}"#,
            r#"{"entities": [{"name": "Aria", "evidence": "Aria drew her sword", "summary": "a knight"}]}"#,
        ]);
        let collaborators = collaborators(llm);
        let request = ExtractRequest {
            tenant_id: Uuid::new_v4(),
            world_id: None,
            text: "Aria drew her sword.".into(),
            context: String::new(),
            entity_types: vec![EntityType::Character],
            config: PipelineConfig::default(),
            relation_schemas: None,
            existing_relations: HashSet::new(),
        };
        let payload = run_extraction(&collaborators, request, CancellationToken::new()).await.unwrap();
        assert_eq!(payload.entities.len(), 1);
        assert_eq!(payload.entities[0].name, "Aria");
        assert!(payload.relations.is_empty());
    }
}
