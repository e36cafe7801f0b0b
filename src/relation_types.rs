//! The relation-type dictionary (§4.8): a static, embedded registry of the
//! 25 canonical relation templates, each with its allowed `(source_type,
//! target_type)` pairs, optional mirror name, preferred direction, and a
//! semantics template string. Built once behind a `OnceLock` rather than
//! loaded from a file — prompts and reference data are compiled into the
//! binary the same way the teacher embeds its system prompts.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::model::{RelationDirection, SourceType};

#[derive(Debug, Clone)]
pub struct RelationTypeDef {
    pub name: &'static str,
    pub allowed_pairs: &'static [(SourceType, SourceType)],
    pub mirror: Option<&'static str>,
    pub preferred_direction: RelationDirection,
    pub semantics: &'static str,
}

impl RelationTypeDef {
    pub fn allows(&self, source_type: SourceType, target_type: SourceType) -> bool {
        self.allowed_pairs.iter().any(|(s, t)| *s == source_type && *t == target_type)
    }
}

use SourceType::{Artifact, Character, Event, Faction, Location};

static DEFS: &[RelationTypeDef] = &[
    RelationTypeDef {
        name: "parent_of",
        allowed_pairs: &[(Character, Character), (Faction, Faction)],
        mirror: Some("child_of"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} is the parent of {target_name}",
    },
    RelationTypeDef {
        name: "child_of",
        allowed_pairs: &[(Character, Character), (Faction, Faction)],
        mirror: Some("parent_of"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} is a child of {target_name}",
    },
    RelationTypeDef {
        name: "member_of",
        allowed_pairs: &[(Character, Faction)],
        mirror: Some("has_member"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} is a member of {target_name}",
    },
    RelationTypeDef {
        name: "has_member",
        allowed_pairs: &[(Faction, Character)],
        mirror: Some("member_of"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} has {target_name} as a member",
    },
    RelationTypeDef {
        name: "located_in",
        allowed_pairs: &[
            (Character, Location),
            (Artifact, Location),
            (Event, Location),
            (Faction, Location),
            (Location, Location),
        ],
        mirror: Some("contains"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} is located in {target_name}",
    },
    RelationTypeDef {
        name: "contains",
        allowed_pairs: &[
            (Location, Character),
            (Location, Artifact),
            (Location, Event),
            (Location, Faction),
            (Location, Location),
        ],
        mirror: Some("located_in"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} contains {target_name}",
    },
    RelationTypeDef {
        name: "owns",
        allowed_pairs: &[(Character, Artifact), (Faction, Artifact)],
        mirror: Some("owned_by"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} owns {target_name}",
    },
    RelationTypeDef {
        name: "owned_by",
        allowed_pairs: &[(Artifact, Character), (Artifact, Faction)],
        mirror: Some("owns"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} is owned by {target_name}",
    },
    RelationTypeDef {
        name: "allied_with",
        allowed_pairs: &[(Faction, Faction), (Character, Character)],
        mirror: None,
        preferred_direction: RelationDirection::Undirected,
        semantics: "{source_name} is allied with {target_name}",
    },
    RelationTypeDef {
        name: "enemy_of",
        allowed_pairs: &[(Faction, Faction), (Character, Character)],
        mirror: None,
        preferred_direction: RelationDirection::Undirected,
        semantics: "{source_name} is an enemy of {target_name}",
    },
    RelationTypeDef {
        name: "married_to",
        allowed_pairs: &[(Character, Character)],
        mirror: None,
        preferred_direction: RelationDirection::Undirected,
        semantics: "{source_name} is married to {target_name}",
    },
    RelationTypeDef {
        name: "sibling_of",
        allowed_pairs: &[(Character, Character)],
        mirror: None,
        preferred_direction: RelationDirection::Undirected,
        semantics: "{source_name} is a sibling of {target_name}",
    },
    RelationTypeDef {
        name: "mentor_of",
        allowed_pairs: &[(Character, Character)],
        mirror: Some("apprentice_of"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} is a mentor of {target_name}",
    },
    RelationTypeDef {
        name: "apprentice_of",
        allowed_pairs: &[(Character, Character)],
        mirror: Some("mentor_of"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} is an apprentice of {target_name}",
    },
    RelationTypeDef {
        name: "leads",
        allowed_pairs: &[(Character, Character), (Character, Faction)],
        mirror: Some("follows"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} leads {target_name}",
    },
    RelationTypeDef {
        name: "follows",
        allowed_pairs: &[(Character, Character)],
        mirror: Some("leads"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} follows {target_name}",
    },
    RelationTypeDef {
        name: "created_by",
        allowed_pairs: &[(Artifact, Character), (Event, Character)],
        mirror: Some("creator_of"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} was created by {target_name}",
    },
    RelationTypeDef {
        name: "creator_of",
        allowed_pairs: &[(Character, Artifact), (Character, Event)],
        mirror: Some("created_by"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} is the creator of {target_name}",
    },
    RelationTypeDef {
        name: "works_for",
        allowed_pairs: &[(Character, Faction), (Character, Character)],
        mirror: Some("employs"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} works for {target_name}",
    },
    RelationTypeDef {
        name: "employs",
        allowed_pairs: &[(Faction, Character), (Character, Character)],
        mirror: Some("works_for"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} employs {target_name}",
    },
    RelationTypeDef {
        name: "participant_in",
        allowed_pairs: &[(Character, Event), (Faction, Event)],
        mirror: Some("hosts_event"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} is a participant in {target_name}",
    },
    RelationTypeDef {
        name: "hosts_event",
        allowed_pairs: &[(Location, Event), (Faction, Event)],
        mirror: Some("participant_in"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} hosts {target_name}",
    },
    RelationTypeDef {
        name: "precedes",
        allowed_pairs: &[(Event, Event)],
        mirror: Some("succeeds"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} precedes {target_name}",
    },
    RelationTypeDef {
        name: "succeeds",
        allowed_pairs: &[(Event, Event)],
        mirror: Some("precedes"),
        preferred_direction: RelationDirection::SourceToTarget,
        semantics: "{source_name} succeeds {target_name}",
    },
    RelationTypeDef {
        name: "related_to",
        allowed_pairs: &[
            (Character, Character),
            (Character, Location),
            (Character, Artifact),
            (Character, Faction),
            (Character, Event),
            (Location, Location),
            (Artifact, Artifact),
            (Faction, Faction),
            (Event, Event),
        ],
        mirror: None,
        preferred_direction: RelationDirection::Undirected,
        semantics: "{source_name} is related to {target_name}",
    },
];

static REGISTRY: OnceLock<HashMap<&'static str, &'static RelationTypeDef>> = OnceLock::new();

fn registry() -> &'static HashMap<&'static str, &'static RelationTypeDef> {
    REGISTRY.get_or_init(|| DEFS.iter().map(|def| (def.name, def)).collect())
}

pub fn lookup(name: &str) -> Option<&'static RelationTypeDef> {
    registry().get(name).copied()
}

pub fn all() -> impl Iterator<Item = &'static RelationTypeDef> {
    DEFS.iter()
}
