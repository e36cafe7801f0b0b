//! Phase 5 — Relation Discovery (§4.7): one LLM prompt per type-pair found
//! among the entity findings, validated and cross-pair deduplicated.
//!
//! **Open question resolved here** (spec is silent on how `spans` mode spans
//! tie back to the findings that motivate §4.7's "the spans whose evidence
//! originates from findings of those types"): each [`Span`] optionally
//! carries the [`EntityRef`] of the finding it was derived from, set by
//! whatever caller converts occurrences into spans. A pair's prompt then
//! includes only spans with no `finding_ref` (context spans) or a
//! `finding_ref` naming a finding of one of the pair's two types.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::concurrency::bounded_fan_out;
use crate::error::ExtractError;
use crate::json_lenient::{lenient_parse, repair_prompt};
use crate::llm::LlmClient;
use crate::model::{
    normalize_polarity, normalize_source_type, EntityRef, EntityType, Finding, MatchResult,
    RelationCandidate, RelationEndpointRef, RelationEvidence, SourceType,
};
use crate::prompts::{self, RELATION_DISCOVERY_PROMPT};

use super::finding_refs;

/// One span the `spans`-mode prompt can cite by id.
#[derive(Debug, Clone)]
pub struct Span {
    pub span_id: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// The finding this span evidences, if any — see module docs.
    pub finding_ref: Option<EntityRef>,
}

#[derive(Debug, Clone)]
pub enum DiscoveryText {
    FullText { text: String },
    Spans { spans: Vec<Span> },
}

#[derive(Debug, Clone)]
pub struct DiscoveryContext {
    pub context_type: String,
    pub context_id: String,
}

/// An entry in the `suggested_relations_by_source_type` map: one relation
/// type this source type is permitted to assert toward `target_type`.
#[derive(Debug, Clone)]
pub struct SuggestedRelation {
    pub target_type: SourceType,
    pub relation_type: String,
}

#[derive(Debug, Clone)]
pub struct RelationDiscoveryInput {
    pub request_id: String,
    pub context: DiscoveryContext,
    pub text: DiscoveryText,
    pub entity_findings: Vec<Finding>,
    pub confirmed_matches: Vec<MatchResult>,
    pub suggested_relations_by_source_type: HashMap<SourceType, Vec<SuggestedRelation>>,
    /// Per-relation-type semantics overrides consumed by Phase 6's summary
    /// step; threaded through here unused — Phase 5 only validates and
    /// discovers candidates.
    pub relation_type_semantics: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    relations: Vec<RawRelation>,
}

#[derive(Debug, Deserialize)]
struct RawRelation {
    source: RawRef,
    target: RawRef,
    relation_type: String,
    polarity: String,
    implicit: bool,
    confidence: f32,
    evidence: RawEvidence,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    #[serde(rename = "ref")]
    entity_ref: String,
    #[serde(rename = "type")]
    entity_type: String,
}

#[derive(Debug, Deserialize)]
struct RawEvidence {
    span_id: Option<String>,
    quote: String,
}

fn validate_input(input: &RelationDiscoveryInput) -> Result<(), ExtractError> {
    match &input.text {
        DiscoveryText::Spans { spans } if spans.is_empty() => {
            return Err(ExtractError::InvalidInput("spans mode requires at least one span".into()));
        }
        DiscoveryText::FullText { text } if text.trim().is_empty() => {
            return Err(ExtractError::InvalidInput("full_text mode requires non-blank text".into()));
        }
        _ => {}
    }
    if input.entity_findings.is_empty() {
        return Err(ExtractError::InvalidInput("relation discovery requires at least one entity finding".into()));
    }
    if input.suggested_relations_by_source_type.is_empty() {
        return Err(ExtractError::InvalidInput("suggested_relations_by_source_type must be non-empty".into()));
    }
    Ok(())
}

/// The distinct `(source_type, target_type)` pairs to prompt for: every pair
/// of entity types present among the findings where the source type has a
/// suggested-relations entry.
fn type_pairs(
    findings: &[Finding],
    suggested: &HashMap<SourceType, Vec<SuggestedRelation>>,
) -> Vec<(EntityType, EntityType)> {
    let present: HashSet<EntityType> = findings.iter().map(|f| f.entity_type).collect();
    let mut pairs = Vec::new();
    for &source in &present {
        if !suggested.contains_key(&source.to_source_type()) {
            continue;
        }
        for &target in &present {
            pairs.push((source, target));
        }
    }
    pairs
}

fn render_findings(findings: &[Finding], refs: &[EntityRef], entity_type: EntityType) -> String {
    let lines: Vec<String> = findings
        .iter()
        .zip(refs.iter())
        .filter(|(f, _)| f.entity_type == entity_type)
        .map(|(f, r)| format!("{} — {} — {}", r.0, f.name, f.summary))
        .collect();
    if lines.is_empty() {
        "(none)".to_string()
    } else {
        lines.join("\n")
    }
}

fn render_text_block(text: &DiscoveryText, source_refs: &HashSet<EntityRef>, target_refs: &HashSet<EntityRef>) -> String {
    match text {
        DiscoveryText::FullText { text } => text.clone(),
        DiscoveryText::Spans { spans } => spans
            .iter()
            .filter(|s| match &s.finding_ref {
                None => true,
                Some(r) => source_refs.contains(r) || target_refs.contains(r),
            })
            .map(|s| format!("{}: {}", s.span_id, s.text))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// One fully-rendered type-pair job, already carrying everything
/// `validate_pair_relations` needs so the job closure itself stays `'static`.
struct PairJob {
    source_type: SourceType,
    target_type: SourceType,
    prompt: String,
    /// Non-`custom:*` relation types the suggested map permits for this
    /// exact pair — §4.7(d)'s admission list, not the relation-type
    /// dictionary (that belongs to Phase 6).
    allowed: Vec<String>,
}

/// Run Phase 5: discover relation candidates across all applicable
/// type-pairs, validate, and cross-pair deduplicate.
pub async fn discover_relations(
    llm: Arc<dyn LlmClient>,
    input: &RelationDiscoveryInput,
    parallelism: usize,
    cancellation: CancellationToken,
) -> Result<Vec<RelationCandidate>, ExtractError> {
    validate_input(input)?;

    let refs = finding_refs(&input.entity_findings);
    let pairs = type_pairs(&input.entity_findings, &input.suggested_relations_by_source_type);

    let spans_mode = matches!(input.text, DiscoveryText::Spans { .. });
    let known_span_ids: HashSet<String> = match &input.text {
        DiscoveryText::Spans { spans } => spans.iter().map(|s| s.span_id.clone()).collect(),
        DiscoveryText::FullText { .. } => HashSet::new(),
    };

    let jobs: Vec<PairJob> = pairs
        .into_iter()
        .map(|(source_type, target_type)| {
            let source_refs: HashSet<EntityRef> = input
                .entity_findings
                .iter()
                .zip(refs.iter())
                .filter(|(f, _)| f.entity_type == source_type)
                .map(|(_, r)| r.clone())
                .collect();
            let target_refs: HashSet<EntityRef> = input
                .entity_findings
                .iter()
                .zip(refs.iter())
                .filter(|(f, _)| f.entity_type == target_type)
                .map(|(_, r)| r.clone())
                .collect();

            let allowed: Vec<String> = input
                .suggested_relations_by_source_type
                .get(&source_type.to_source_type())
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|e| e.target_type == target_type.to_source_type())
                        .map(|e| e.relation_type.clone())
                        .collect()
                })
                .unwrap_or_default();

            let prompt = prompts::render(
                RELATION_DISCOVERY_PROMPT,
                &[
                    ("source_type", source_type.as_str()),
                    ("target_type", target_type.as_str()),
                    ("allowed_relation_types", allowed.join(", ").as_str()),
                    ("source_findings", render_findings(&input.entity_findings, &refs, source_type).as_str()),
                    ("target_findings", render_findings(&input.entity_findings, &refs, target_type).as_str()),
                    ("text", render_text_block(&input.text, &source_refs, &target_refs).as_str()),
                ],
            );

            PairJob { source_type: source_type.to_source_type(), target_type: target_type.to_source_type(), prompt, allowed }
        })
        .collect();

    let known_span_ids = Arc::new(known_span_ids);

    let results = bounded_fan_out(jobs, parallelism.max(1), cancellation.clone(), move |job| {
        let llm = llm.clone();
        let cancellation = cancellation.clone();
        let known_span_ids = known_span_ids.clone();
        async move {
            let raw = llm.generate(&job.prompt, &cancellation).await?;
            let parsed = match lenient_parse::<DiscoveryResponse>(&raw) {
                Ok(parsed) => parsed,
                Err(_) => {
                    let repair = repair_prompt(
                        r#"{"relations": [{"source": {"ref": "...", "type": "..."}, "target": {"ref": "...", "type": "..."}, "relation_type": "...", "polarity": "asserted", "implicit": false, "confidence": 0.5, "evidence": {"span_id": null, "quote": "..."}}]}"#,
                        &raw,
                    );
                    let retried = llm.generate(&repair, &cancellation).await?;
                    lenient_parse::<DiscoveryResponse>(&retried)?
                }
            };
            validate_pair_relations(parsed.relations, job.source_type, job.target_type, spans_mode, &known_span_ids, &job.allowed)
        }
    })
    .await;

    // First error wins (by pair order); later errors are swallowed per §4.7.
    let mut all_candidates = Vec::new();
    for result in results {
        match result {
            Ok(Ok(candidates)) => all_candidates.extend(candidates),
            Ok(Err(error)) => return Err(error),
            Err(error) => return Err(error),
        }
    }

    let mut seen = HashSet::new();
    let mut deduped = Vec::new();
    for candidate in all_candidates {
        let key = candidate.discovery_dedup_key();
        if seen.insert(key) {
            deduped.push(candidate);
        }
    }
    Ok(deduped)
}

fn validate_pair_relations(
    raw_relations: Vec<RawRelation>,
    expected_source_type: SourceType,
    expected_target_type: SourceType,
    spans_mode: bool,
    known_span_ids: &HashSet<String>,
    allowed: &[String],
) -> Result<Vec<RelationCandidate>, ExtractError> {
    let mut out = Vec::new();
    for raw in raw_relations {
        if raw.source.entity_type.trim().is_empty() || raw.target.entity_type.trim().is_empty() {
            continue;
        }
        let Ok(source_type) = normalize_source_type(&raw.source.entity_type) else { continue };
        let Ok(target_type) = normalize_source_type(&raw.target.entity_type) else { continue };
        if source_type != expected_source_type || target_type != expected_target_type {
            continue;
        }

        if spans_mode {
            match &raw.evidence.span_id {
                Some(id) if known_span_ids.contains(id) => {}
                _ => continue,
            }
        }
        if raw.evidence.quote.trim().is_empty() {
            continue;
        }

        let is_custom = raw.relation_type.starts_with("custom:");
        // §4.7(d): the model may invent a relation type outside the
        // suggested map for this pair even though the prompt listed only
        // the allowed ones — recheck here. Phase 6 is where dictionary
        // membership gets checked, not here.
        if !is_custom && !allowed.iter().any(|a| a == &raw.relation_type) {
            continue;
        }

        let Ok(polarity) = normalize_polarity(&raw.polarity) else { continue };

        out.push(RelationCandidate {
            source: RelationEndpointRef { entity_ref: EntityRef(raw.source.entity_ref), entity_type: source_type },
            target: RelationEndpointRef { entity_ref: EntityRef(raw.target.entity_ref), entity_type: target_type },
            relation_type: raw.relation_type,
            polarity,
            implicit: raw.implicit,
            confidence: raw.confidence.clamp(0.0, 1.0),
            evidence: RelationEvidence { span_id: raw.evidence.span_id, quote: raw.evidence.quote },
        });
    }
    Ok(out)
}
