//! Phase 4 — Entity Payload Assembly: zip each [`Finding`] with its
//! [`MatchResult`] (by `finding_index`) into the [`EntityResult`] shape the
//! orchestrator returns to the caller.

use crate::model::{EntityResult, Finding, MatchResult};

pub fn assemble_payload(findings: Vec<Finding>, matches: Vec<MatchResult>) -> Vec<EntityResult> {
    let mut matched_by_index: std::collections::HashMap<usize, MatchResult> =
        matches.into_iter().map(|m| (m.finding_index, m)).collect();

    findings
        .into_iter()
        .enumerate()
        .map(|(index, finding)| {
            let confirmed = matched_by_index.remove(&index).and_then(|m| m.confirmed);
            EntityResult {
                entity_type: finding.entity_type,
                name: finding.name,
                summary: finding.summary,
                occurrences: finding.occurrences,
                matched: confirmed,
            }
        })
        .collect()
}
