//! Phase 8 — Assembly (§4.10): merge normalized relations with their
//! Phase-7 match arrays by `relation_index`, preserving Phase 6's ordering.

use std::collections::HashMap;

use crate::model::{FinalRelation, NormalizedRelation};

use super::evidence::RelationEvidenceResult;

pub fn assemble_relations(relations: Vec<NormalizedRelation>, evidence: Vec<RelationEvidenceResult>) -> Vec<FinalRelation> {
    let mut matches_by_index: HashMap<usize, Vec<crate::model::RelationMatch>> =
        evidence.into_iter().map(|e| (e.relation_index, e.matches)).collect();

    relations
        .into_iter()
        .enumerate()
        .map(|(index, relation)| FinalRelation { relation, matches: matches_by_index.remove(&index).unwrap_or_default() })
        .collect()
}
