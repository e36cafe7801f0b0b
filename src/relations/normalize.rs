//! Phase 6 — Relation Normalization (§4.8): resolve refs, downgrade/upgrade
//! `custom:*` against the relation-type dictionary, dedupe against existing
//! relations, and synthesize the application-side mirror for custom types.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::concurrency::bounded_fan_out;
use crate::error::ExtractError;
use crate::llm::LlmClient;
use crate::model::{
    DedupInfo, EntityRef, NormalizedRelation, RelationCandidate, RelationDirection, RelationStatus,
    ResolvedEntity,
};
use crate::prompts::{self, CUSTOM_RELATION_SUMMARY_PROMPT};
use crate::relation_types;

use super::relation_type_allowed;

/// `(source_id, target_id, relation_type)` — the identity of a relation
/// already on record, used for the §4.8 step-5 dedup check. Context scoping
/// beyond the relation type, if a caller needs it, is the caller's to fold
/// into the relation_type string before calling.
pub type ExistingRelationKey = (Uuid, Uuid, String);

fn reverse_direction(direction: RelationDirection) -> RelationDirection {
    match direction {
        RelationDirection::SourceToTarget => RelationDirection::TargetToSource,
        RelationDirection::TargetToSource => RelationDirection::SourceToTarget,
        RelationDirection::Undirected => RelationDirection::Undirected,
    }
}

fn resolve(ref_map: &HashMap<EntityRef, ResolvedEntity>, entity_ref: &EntityRef, fallback_source_type: crate::model::SourceType) -> ResolvedEntity {
    ref_map.get(entity_ref).cloned().unwrap_or_else(|| ResolvedEntity {
        id: None,
        name: entity_ref.0.clone(),
        source_type: fallback_source_type,
    })
}

/// Normalize one candidate into zero, one, or two (primary + custom mirror)
/// [`NormalizedRelation`]s, in emission order.
async fn normalize_one(
    llm: Option<Arc<dyn LlmClient>>,
    candidate: RelationCandidate,
    ref_map: &HashMap<EntityRef, ResolvedEntity>,
    existing: &HashSet<ExistingRelationKey>,
    semantics_overrides: &HashMap<String, String>,
    cancellation: &CancellationToken,
) -> Result<Vec<NormalizedRelation>, ExtractError> {
    let source_type = candidate.source.entity_type;
    let target_type = candidate.target.entity_type;

    // Step 2: custom downgrade/upgrade against the dictionary.
    let (relation_type, is_custom) = if let Some(name) = candidate.relation_type.strip_prefix("custom:") {
        if relation_types::lookup(name).is_some() {
            (name.to_string(), false)
        } else {
            (candidate.relation_type.clone(), true)
        }
    } else if relation_types::lookup(&candidate.relation_type).is_some() {
        (candidate.relation_type.clone(), false)
    } else {
        (format!("custom:{}", candidate.relation_type), true)
    };

    // Step 3: non-custom types must be allowed for this exact pair.
    if !is_custom && !relation_type_allowed(source_type, target_type, &relation_type) {
        return Ok(Vec::new());
    }

    // Step 4: resolve refs, decide readiness.
    let source = resolve(ref_map, &candidate.source.entity_ref, source_type);
    let target = resolve(ref_map, &candidate.target.entity_ref, target_type);
    let status = if source.id.is_some() && target.id.is_some() { RelationStatus::Ready } else { RelationStatus::PendingEntities };

    // Step 5: existing-relation dedup, only meaningful once both ids resolve.
    let mut dedup = DedupInfo::default();
    if status == RelationStatus::Ready {
        let key = (source.id.unwrap(), target.id.unwrap(), relation_type.clone());
        if existing.contains(&key) {
            dedup = DedupInfo { is_duplicate: true, reason: Some("existing_relation".to_string()) };
        }
    }

    // Step 6: direction and mirror-creation flag from the dictionary; custom
    // types default to source-to-target and never ask the caller to mirror —
    // their mirror is synthesized below instead.
    let def = relation_types::lookup(&relation_type);
    let direction = def.map(|d| d.preferred_direction).unwrap_or(RelationDirection::SourceToTarget);
    let create_mirror = !is_custom && def.map(|d| d.mirror.is_some()).unwrap_or(false);

    // Step 7: summary.
    let summary = if let Some(template) = semantics_overrides.get(&relation_type) {
        template.replace("{source_name}", &source.name).replace("{target_name}", &target.name)
    } else if let Some(def) = def {
        def.semantics.replace("{source_name}", &source.name).replace("{target_name}", &target.name)
    } else if let Some(llm) = &llm {
        let prompt = prompts::render(
            CUSTOM_RELATION_SUMMARY_PROMPT,
            &[("relation_type", relation_type.as_str()), ("source_name", source.name.as_str()), ("target_name", target.name.as_str())],
        );
        llm.generate(&prompt, cancellation).await?.trim().trim_matches('"').to_string()
    } else {
        format!("{} is related to {}.", source.name, target.name)
    };

    let primary = NormalizedRelation {
        source,
        target,
        relation_type,
        polarity: candidate.polarity,
        implicit: candidate.implicit,
        confidence: candidate.confidence,
        evidence: candidate.evidence,
        direction,
        create_mirror,
        mirror_of: None,
        status,
        dedup,
        summary,
    };

    // Step 8: custom types get a reversed-direction companion the caller
    // doesn't have to synthesize themselves.
    if is_custom {
        let mirror_of = primary.key();
        let mirror = NormalizedRelation {
            source: primary.target.clone(),
            target: primary.source.clone(),
            relation_type: primary.relation_type.clone(),
            polarity: primary.polarity,
            implicit: primary.implicit,
            confidence: primary.confidence,
            evidence: primary.evidence.clone(),
            direction: reverse_direction(primary.direction),
            create_mirror: false,
            mirror_of: Some(mirror_of),
            status: primary.status,
            dedup: primary.dedup.clone(),
            summary: primary.summary.clone(),
        };
        Ok(vec![primary, mirror])
    } else {
        Ok(vec![primary])
    }
}

/// Run Phase 6 over every Phase-5 candidate, in parallel up to
/// `RELATION_NORMALIZE_PARALLELISM`, preserving input order (primary relation
/// followed immediately by its custom mirror, per §4.8's final-ordering rule).
pub async fn normalize_relations(
    llm: Option<Arc<dyn LlmClient>>,
    candidates: Vec<RelationCandidate>,
    ref_map: HashMap<EntityRef, ResolvedEntity>,
    existing_relations: HashSet<ExistingRelationKey>,
    semantics_overrides: Option<HashMap<String, String>>,
    parallelism: usize,
    cancellation: CancellationToken,
) -> Result<Vec<NormalizedRelation>, ExtractError> {
    let ref_map = Arc::new(ref_map);
    let existing_relations = Arc::new(existing_relations);
    let semantics_overrides = Arc::new(semantics_overrides.unwrap_or_default());

    let results = bounded_fan_out(candidates, parallelism.max(1), cancellation.clone(), move |candidate| {
        let llm = llm.clone();
        let ref_map = ref_map.clone();
        let existing_relations = existing_relations.clone();
        let semantics_overrides = semantics_overrides.clone();
        let cancellation = cancellation.clone();
        async move { normalize_one(llm, candidate, &ref_map, &existing_relations, &semantics_overrides, &cancellation).await }
    })
    .await;

    let mut normalized = Vec::new();
    for result in results {
        match result {
            Ok(Ok(group)) => normalized.extend(group),
            Ok(Err(error)) | Err(error) => return Err(error),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, Polarity, RelationEndpointRef, RelationEvidence, SourceType};

    fn candidate(relation_type: &str, source_type: SourceType, target_type: SourceType) -> RelationCandidate {
        RelationCandidate {
            source: RelationEndpointRef { entity_ref: EntityRef::finding(EntityType::Character, 0), entity_type: source_type },
            target: RelationEndpointRef { entity_ref: EntityRef::finding(EntityType::Location, 0), entity_type: target_type },
            relation_type: relation_type.to_string(),
            polarity: Polarity::Asserted,
            implicit: false,
            confidence: 0.9,
            evidence: RelationEvidence { span_id: None, quote: "Aria stood in Port Vey".to_string() },
        }
    }

    fn ref_map_with_both_resolved() -> HashMap<EntityRef, ResolvedEntity> {
        let mut map = HashMap::new();
        map.insert(
            EntityRef::finding(EntityType::Character, 0),
            ResolvedEntity { id: Some(Uuid::new_v4()), name: "Aria".into(), source_type: SourceType::Character },
        );
        map.insert(
            EntityRef::finding(EntityType::Location, 0),
            ResolvedEntity { id: Some(Uuid::new_v4()), name: "Port Vey".into(), source_type: SourceType::Location },
        );
        map
    }

    #[tokio::test]
    async fn a_custom_relation_disallowed_for_its_pair_is_dropped() {
        // "contains" requires source_type=location; here source_type is character, so
        // after downgrading the name it still fails the allowed-pair check and is dropped.
        let candidates = vec![candidate("custom:contains", SourceType::Character, SourceType::Location)];
        let out = normalize_relations(None, candidates, ref_map_with_both_resolved(), HashSet::new(), None, 2, CancellationToken::new())
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn located_in_downgrade_for_an_allowed_pair_keeps_the_plain_name() {
        let candidates = vec![candidate("custom:located_in", SourceType::Character, SourceType::Location)];
        let out = normalize_relations(None, candidates, ref_map_with_both_resolved(), HashSet::new(), None, 2, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].relation_type, "located_in");
        assert!(out[0].create_mirror);
        assert_eq!(out[0].status, RelationStatus::Ready);
    }

    #[tokio::test]
    async fn an_unresolved_endpoint_yields_pending_entities_status() {
        let candidates = vec![candidate("located_in", SourceType::Character, SourceType::Location)];
        let out = normalize_relations(None, candidates, HashMap::new(), HashSet::new(), None, 2, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].status, RelationStatus::PendingEntities);
    }

    #[tokio::test]
    async fn a_genuinely_custom_relation_synthesizes_a_reversed_mirror_immediately_after() {
        let candidates = vec![candidate("custom:haunts", SourceType::Character, SourceType::Location)];
        let out = normalize_relations(None, candidates, ref_map_with_both_resolved(), HashSet::new(), None, 2, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].relation_type, "custom:haunts");
        assert!(!out[0].create_mirror);
        assert!(out[0].mirror_of.is_none());
        assert_eq!(out[1].mirror_of, Some(out[0].key()));
        assert_eq!(out[1].source.name, out[0].target.name);
        assert_eq!(out[1].target.name, out[0].source.name);
        assert!(!out[1].create_mirror);
    }

    #[tokio::test]
    async fn an_existing_relation_is_flagged_as_a_duplicate() {
        let ref_map = ref_map_with_both_resolved();
        let source_id = ref_map.get(&EntityRef::finding(EntityType::Character, 0)).unwrap().id.unwrap();
        let target_id = ref_map.get(&EntityRef::finding(EntityType::Location, 0)).unwrap().id.unwrap();
        let mut existing = HashSet::new();
        existing.insert((source_id, target_id, "located_in".to_string()));

        let candidates = vec![candidate("located_in", SourceType::Character, SourceType::Location)];
        let out = normalize_relations(None, candidates, ref_map, existing, None, 2, CancellationToken::new()).await.unwrap();
        assert!(out[0].dedup.is_duplicate);
        assert_eq!(out[0].dedup.reason.as_deref(), Some("existing_relation"));
    }
}
