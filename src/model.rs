//! The closed data model shared by every phase: documents, chunks, findings,
//! matches, and relations, plus the exhaustive tagged enums used at every
//! JSON/DB boundary instead of bare strings.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExtractError;

/// The kind of upstream entity a [`Document`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Story,
    Chapter,
    Scene,
    Beat,
    ContentBlock,
    World,
    Character,
    Location,
    Event,
    Artifact,
    Faction,
    Lore,
    Relation,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Story => "story",
            SourceType::Chapter => "chapter",
            SourceType::Scene => "scene",
            SourceType::Beat => "beat",
            SourceType::ContentBlock => "content_block",
            SourceType::World => "world",
            SourceType::Character => "character",
            SourceType::Location => "location",
            SourceType::Event => "event",
            SourceType::Artifact => "artifact",
            SourceType::Faction => "faction",
            SourceType::Lore => "lore",
            SourceType::Relation => "relation",
        }
    }
}

/// Normalize a raw source/entity-type token into a [`SourceType`].
///
/// This is the single place the `artefact ↔ artifact` mapping (and the
/// `organization|group → faction` Phase-5 synonym mapping) is performed —
/// every phase boundary calls through here instead of comparing raw strings.
pub fn normalize_source_type(raw: &str) -> Result<SourceType, ExtractError> {
    let lowered = raw.trim().to_lowercase();
    Ok(match lowered.as_str() {
        "story" => SourceType::Story,
        "chapter" => SourceType::Chapter,
        "scene" => SourceType::Scene,
        "beat" => SourceType::Beat,
        "content_block" | "contentblock" => SourceType::ContentBlock,
        "world" => SourceType::World,
        "character" => SourceType::Character,
        "location" => SourceType::Location,
        "event" => SourceType::Event,
        // The extraction vocabulary spells this "artefact"; storage spells it
        // "artifact". Both map to the same tag.
        "artifact" | "artefact" => SourceType::Artifact,
        "faction" | "organization" | "organisation" | "group" => SourceType::Faction,
        "lore" => SourceType::Lore,
        "relation" => SourceType::Relation,
        other => {
            return Err(ExtractError::InvalidInput(format!(
                "unknown source type: {other}"
            )));
        }
    })
}

/// The kind of entity a Phase-2 [`Finding`] candidate can be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Character,
    Location,
    Artefact,
    Faction,
    Event,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Character => "character",
            EntityType::Location => "location",
            EntityType::Artefact => "artefact",
            EntityType::Faction => "faction",
            EntityType::Event => "event",
        }
    }

    /// §4.6 step 2: `entity_type → source_type` mapping used by Phase 3 to
    /// select which documents a finding may be matched against.
    pub fn to_source_type(&self) -> SourceType {
        match self {
            EntityType::Character => SourceType::Character,
            EntityType::Location => SourceType::Location,
            EntityType::Artefact => SourceType::Artifact,
            EntityType::Faction => SourceType::Faction,
            EntityType::Event => SourceType::Event,
        }
    }
}

pub fn normalize_entity_type(raw: &str) -> Result<EntityType, ExtractError> {
    let lowered = raw.trim().to_lowercase();
    Ok(match lowered.as_str() {
        "character" => EntityType::Character,
        "location" => EntityType::Location,
        "artefact" | "artifact" => EntityType::Artefact,
        "faction" | "organization" | "organisation" | "group" => EntityType::Faction,
        "event" => EntityType::Event,
        other => {
            return Err(ExtractError::InvalidInput(format!(
                "unknown entity type: {other}"
            )));
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Raw,
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Asserted,
    Negated,
    Conditional,
}

pub fn normalize_polarity(raw: &str) -> Result<Polarity, ExtractError> {
    match raw.trim().to_lowercase().as_str() {
        "asserted" => Ok(Polarity::Asserted),
        "negated" => Ok(Polarity::Negated),
        "conditional" => Ok(Polarity::Conditional),
        other => Err(ExtractError::InvalidInput(format!("unknown polarity: {other}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationDirection {
    SourceToTarget,
    TargetToSource,
    Undirected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationStatus {
    Ready,
    PendingEntities,
}

/// A per-tenant, per-source-entity container of chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub source_type: SourceType,
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// The unique-scoping key `(tenant_id, source_type, source_id)`.
    pub fn source_key(&self) -> (Uuid, SourceType, &str) {
        (self.tenant_id, self.source_type, self.source_id.as_str())
    }
}

/// A contiguous byte range of a [`Document`]'s content with a vector and
/// metadata — the unit of embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: u32,
    pub content: String,
    pub embedding: Vec<f32>,
    pub token_count: usize,
    pub chunk_type: Option<ChunkType>,
    pub embed_text: Option<String>,
    pub entity_name: Option<String>,
    pub world_id: Option<Uuid>,
    pub world_name: Option<String>,
    pub world_genre: Option<String>,
    pub scene_id: Option<Uuid>,
    pub beat_id: Option<Uuid>,
    pub beat_type: Option<String>,
    pub beat_intent: Option<String>,
    pub characters: HashSet<String>,
    pub location_id: Option<Uuid>,
    pub location_name: Option<String>,
    pub timeline: Option<String>,
    pub pov_character: Option<String>,
    pub content_type: Option<String>,
    pub content_kind: Option<String>,
    pub importance: Option<f32>,
    pub related_characters: HashSet<String>,
    pub related_locations: HashSet<String>,
    pub related_artifacts: HashSet<String>,
    pub related_events: HashSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// A bare raw chunk with only the fields §4.3 always sets; callers
    /// overwrite the entity-specific metadata fields afterwards.
    pub fn new_raw(document_id: Uuid, chunk_index: u32, content: String, embedding: Vec<f32>) -> Self {
        let token_count = content.len() / 4;
        Self {
            id: Uuid::new_v4(),
            document_id,
            chunk_index,
            content,
            embedding,
            token_count,
            chunk_type: Some(ChunkType::Raw),
            embed_text: None,
            entity_name: None,
            world_id: None,
            world_name: None,
            world_genre: None,
            scene_id: None,
            beat_id: None,
            beat_type: None,
            beat_intent: None,
            characters: HashSet::new(),
            location_id: None,
            location_name: None,
            timeline: None,
            pov_character: None,
            content_type: None,
            content_kind: None,
            importance: None,
            related_characters: HashSet::new(),
            related_locations: HashSet::new(),
            related_artifacts: HashSet::new(),
            related_events: HashSet::new(),
            created_at: Utc::now(),
        }
    }
}

/// An occurrence of a [`Finding`] in the source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occurrence {
    pub paragraph_id: String,
    pub chunk_id: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub evidence: String,
}

/// A Phase-2 entity candidate with all its occurrences across chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub entity_type: EntityType,
    pub name: String,
    pub summary: String,
    pub occurrences: Vec<Occurrence>,
}

/// Lowercase + strip outer quotation marks — the normalization key used to
/// deduplicate findings within one `(entity_type)` bucket.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    let stripped = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(trimmed);
    stripped.to_lowercase()
}

/// A Phase-3 candidate document a [`Finding`] might resolve to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub source_type: SourceType,
    pub source_id: String,
    pub entity_name: String,
    pub summary: String,
    pub similarity: f32,
}

/// The Phase-3 resolution linking a [`Finding`] to a pre-existing document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmedMatch {
    pub document_id: Uuid,
    pub source_type: SourceType,
    pub source_id: String,
    pub reason: String,
}

/// Outcome of matching one finding: at most one confirmed match, plus the
/// candidate pool it was chosen from (for observability / debugging).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub finding_index: usize,
    pub candidates: Vec<MatchCandidate>,
    pub confirmed: Option<ConfirmedMatch>,
}

/// An opaque intra-invocation correlator for an entity:
/// `finding:<type>:<index>` or `match:<type>:<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef(pub String);

impl EntityRef {
    pub fn finding(entity_type: EntityType, index: usize) -> Self {
        Self(format!("finding:{}:{}", entity_type.as_str(), index))
    }

    pub fn matched(entity_type: EntityType, index: usize) -> Self {
        Self(format!("match:{}:{}", entity_type.as_str(), index))
    }
}

/// A typed endpoint reference used by Phase-5 relation candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationEndpointRef {
    #[serde(rename = "ref")]
    pub entity_ref: EntityRef,
    #[serde(rename = "type")]
    pub entity_type: SourceType,
}

/// A piece of Phase-5 evidence: either a span id (spans mode) or a raw quote
/// (full-text mode), always carrying the literal quoted text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationEvidence {
    pub span_id: Option<String>,
    pub quote: String,
}

/// A Phase-5 relation candidate, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationCandidate {
    pub source: RelationEndpointRef,
    pub target: RelationEndpointRef,
    pub relation_type: String,
    pub polarity: Polarity,
    pub implicit: bool,
    pub confidence: f32,
    pub evidence: RelationEvidence,
}

impl RelationCandidate {
    /// §3(e): the dedup key `source.ref|target.ref|relation_type`.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.source.entity_ref.0, self.target.entity_ref.0, self.relation_type
        )
    }

    /// §4.7's full cross-pair dedup key, including the evidence locator.
    pub fn discovery_dedup_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.dedup_key(),
            self.evidence.span_id.clone().unwrap_or_default(),
            self.evidence.quote
        )
    }
}

/// A resolved entity reference: `ref → {id, name, type}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub id: Option<Uuid>,
    pub name: String,
    pub source_type: SourceType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupInfo {
    pub is_duplicate: bool,
    pub reason: Option<String>,
}

impl Default for DedupInfo {
    fn default() -> Self {
        Self {
            is_duplicate: false,
            reason: None,
        }
    }
}

/// A Phase-6 normalized relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRelation {
    pub source: ResolvedEntity,
    pub target: ResolvedEntity,
    pub relation_type: String,
    pub polarity: Polarity,
    pub implicit: bool,
    pub confidence: f32,
    pub evidence: RelationEvidence,
    pub direction: RelationDirection,
    /// True iff this type defines a mirror the *caller* is expected to
    /// create (declared-mirror case); false for synthesized custom mirrors,
    /// which already exist as their own `NormalizedRelation`. See DESIGN.md
    /// "Custom-relation mirror asymmetry".
    pub create_mirror: bool,
    pub mirror_of: Option<String>,
    pub status: RelationStatus,
    pub dedup: DedupInfo,
    pub summary: String,
}

impl NormalizedRelation {
    /// The same dedup key shape as [`RelationCandidate::dedup_key`], computed
    /// from resolved names since normalized relations no longer carry refs.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.source.name, self.target.name, self.relation_type
        )
    }
}

/// A Phase-7 evidence match for one normalized relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationMatch {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub source_type: SourceType,
    pub source_id: String,
    pub content: String,
    pub similarity: f32,
}

/// Phase 8: `NormalizedRelation ⊕ {matches}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalRelation {
    #[serde(flatten)]
    pub relation: NormalizedRelation,
    pub matches: Vec<RelationMatch>,
}

/// The top-level result of one orchestrator invocation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractPayload {
    pub entities: Vec<EntityResult>,
    pub relations: Vec<FinalRelation>,
}

/// Phase 4's per-finding assembled entity payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityResult {
    pub entity_type: EntityType,
    pub name: String,
    pub summary: String,
    pub occurrences: Vec<Occurrence>,
    pub matched: Option<ConfirmedMatch>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("story" => SourceType::Story)]
    #[test_case("CHAPTER" => SourceType::Chapter)]
    #[test_case("  scene  " => SourceType::Scene)]
    #[test_case("content_block" => SourceType::ContentBlock)]
    #[test_case("contentblock" => SourceType::ContentBlock)]
    #[test_case("artifact" => SourceType::Artifact)]
    #[test_case("artefact" => SourceType::Artifact)]
    #[test_case("organization" => SourceType::Faction)]
    #[test_case("organisation" => SourceType::Faction)]
    #[test_case("group" => SourceType::Faction)]
    #[test_case("faction" => SourceType::Faction)]
    fn normalize_source_type_accepts_known_tokens_and_synonyms(raw: &str) -> SourceType {
        normalize_source_type(raw).unwrap()
    }

    #[test_case("asserted" => Polarity::Asserted)]
    #[test_case("Negated" => Polarity::Negated)]
    #[test_case(" conditional " => Polarity::Conditional)]
    fn normalize_polarity_accepts_known_tokens(raw: &str) -> Polarity {
        normalize_polarity(raw).unwrap()
    }

    #[test]
    fn normalizes_artefact_and_artifact_to_the_same_tag() {
        assert_eq!(normalize_source_type("artefact").unwrap(), SourceType::Artifact);
        assert_eq!(normalize_source_type("artifact").unwrap(), SourceType::Artifact);
    }

    #[test]
    fn normalizes_organization_synonyms_to_faction() {
        assert_eq!(normalize_source_type("organization").unwrap(), SourceType::Faction);
        assert_eq!(normalize_source_type("group").unwrap(), SourceType::Faction);
    }

    #[test]
    fn rejects_unknown_source_type() {
        assert!(normalize_source_type("spaceship").is_err());
    }

    #[test]
    fn normalize_name_strips_quotes_and_lowercases() {
        assert_eq!(normalize_name("\"Aria\""), "aria");
        assert_eq!(normalize_name("Aria"), "aria");
        assert_eq!(normalize_name("  ARIA  "), "aria");
    }

    #[test]
    fn normalize_polarity_accepts_the_three_known_values() {
        assert_eq!(normalize_polarity("asserted").unwrap(), Polarity::Asserted);
        assert_eq!(normalize_polarity("Negated").unwrap(), Polarity::Negated);
        assert!(normalize_polarity("maybe").is_err());
    }

    #[test]
    fn entity_ref_format() {
        assert_eq!(
            EntityRef::finding(EntityType::Character, 2).0,
            "finding:character:2"
        );
        assert_eq!(
            EntityRef::matched(EntityType::Location, 0).0,
            "match:location:0"
        );
    }
}
