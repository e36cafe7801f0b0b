//! Relation-side phases (§4.7–§4.10, Phases 5–8): discovery, normalization,
//! evidence matching, and final assembly.

pub mod assembly;
pub mod discovery;
pub mod evidence;
pub mod normalize;

pub use assembly::assemble_relations;
pub use discovery::{discover_relations, DiscoveryContext, DiscoveryText, RelationDiscoveryInput, Span, SuggestedRelation};
pub use evidence::{match_relation_evidence, RelationEvidenceResult};
pub use normalize::{normalize_relations, ExistingRelationKey};

use std::collections::HashMap;

use crate::model::{EntityRef, EntityType, Finding, MatchResult, ResolvedEntity, SourceType};
use crate::relation_types;

/// Is `relation_type` (a non-`custom:*` name) declared in the dictionary and
/// allowed for this exact `(source_type, target_type)` pair? Used by Phase 5
/// to reject hallucinated relation type names and by Phase 6 to decide
/// whether a candidate needs downgrading to `custom:<name>`.
pub fn relation_type_allowed(source_type: SourceType, target_type: SourceType, relation_type: &str) -> bool {
    relation_types::lookup(relation_type)
        .map(|def| def.allows(source_type, target_type))
        .unwrap_or(false)
}

/// Assign every finding the same `finding:<type>:<per-type index>` ref its
/// entity-type bucket would have received during Phase 2's accumulation —
/// computed here from `findings`' order directly, so every phase that needs
/// refs agrees without threading index bookkeeping through every call.
pub fn finding_refs(findings: &[Finding]) -> Vec<EntityRef> {
    let mut next_index_by_type: HashMap<EntityType, usize> = HashMap::new();
    findings
        .iter()
        .map(|finding| {
            let index = next_index_by_type.entry(finding.entity_type).or_insert(0);
            let entity_ref = EntityRef::finding(finding.entity_type, *index);
            *index += 1;
            entity_ref
        })
        .collect()
}

/// §9 "arena-plus-index": build the flat `ref → {id, name, type}` map Phase 6
/// resolves `RelationEndpointRef`s against, from the same findings (and their
/// Phase-3 matches) Phase 5 was given. A finding with no confirmed match
/// resolves to `id: None` (§3 invariant c drives `status=pending_entities`
/// from that); a finding with a confirmed match resolves to the matched
/// document's id and the matched source type, keeping the finding's own name.
pub fn build_ref_map(findings: &[Finding], matches: &[MatchResult]) -> HashMap<EntityRef, ResolvedEntity> {
    let refs = finding_refs(findings);
    let confirmed_by_index: HashMap<usize, &MatchResult> = matches.iter().map(|m| (m.finding_index, m)).collect();

    findings
        .iter()
        .zip(refs.into_iter())
        .enumerate()
        .map(|(index, (finding, entity_ref))| {
            let resolved = match confirmed_by_index.get(&index).and_then(|m| m.confirmed.as_ref()) {
                Some(confirmed) => ResolvedEntity {
                    id: Some(confirmed.document_id),
                    name: finding.name.clone(),
                    source_type: confirmed.source_type,
                },
                None => ResolvedEntity { id: None, name: finding.name.clone(), source_type: finding.entity_type.to_source_type() },
            };
            (entity_ref, resolved)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_are_indexed_per_entity_type_not_globally() {
        let findings = vec![
            Finding { entity_type: EntityType::Character, name: "a".into(), summary: String::new(), occurrences: vec![] },
            Finding { entity_type: EntityType::Location, name: "b".into(), summary: String::new(), occurrences: vec![] },
            Finding { entity_type: EntityType::Character, name: "c".into(), summary: String::new(), occurrences: vec![] },
        ];
        let refs = finding_refs(&findings);
        assert_eq!(refs[0].0, "finding:character:0");
        assert_eq!(refs[1].0, "finding:location:0");
        assert_eq!(refs[2].0, "finding:character:1");
    }

    #[test]
    fn build_ref_map_resolves_a_confirmed_match_and_leaves_an_unmatched_finding_pending() {
        let findings = vec![
            Finding { entity_type: EntityType::Character, name: "Aria".into(), summary: String::new(), occurrences: vec![] },
            Finding { entity_type: EntityType::Location, name: "Port Vey".into(), summary: String::new(), occurrences: vec![] },
        ];
        let document_id = uuid::Uuid::new_v4();
        let matches = vec![MatchResult {
            finding_index: 0,
            candidates: vec![],
            confirmed: Some(crate::model::ConfirmedMatch {
                document_id,
                source_type: SourceType::Character,
                source_id: "char-1".into(),
                reason: "same name".into(),
            }),
        }];
        let ref_map = build_ref_map(&findings, &matches);
        let aria = ref_map.get(&EntityRef::finding(EntityType::Character, 0)).unwrap();
        assert_eq!(aria.id, Some(document_id));
        let port_vey = ref_map.get(&EntityRef::finding(EntityType::Location, 0)).unwrap();
        assert!(port_vey.id.is_none());
    }
}
