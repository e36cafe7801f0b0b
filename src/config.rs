//! Typed pipeline configuration: parallelism knobs, chunking/matching
//! defaults, environment overrides, and validation — in the style of the
//! teacher's `RAGConfig`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub parallelism: ParallelismConfig,
    pub splitting: SplittingConfig,
    pub matching: MatchingConfig,
    pub relation_evidence: RelationEvidenceConfig,
    pub embedding_dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParallelismConfig {
    /// §5/§6 `ENTITY_EXTRACT_PARALLELISM` — bounds Phase 3 finding matching.
    pub entity_extract: usize,
    /// §5/§6 `RELATION_DISCOVERY_PARALLELISM` — bounds Phase 5 type-pair prompts.
    pub relation_discovery: usize,
    /// §5/§6 `RELATION_NORMALIZE_PARALLELISM` — bounds Phase 6 normalization.
    pub relation_normalize: usize,
    /// §5/§6 `RELATION_MATCH_PARALLELISM` — bounds Phase 7 evidence matching.
    pub relation_match: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SplittingConfig {
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingConfig {
    pub min_similarity: f32,
    pub max_candidates: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationEvidenceConfig {
    pub max_matches: usize,
    pub min_similarity: f32,
}

impl PipelineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.parallelism.entity_extract == 0 {
            return Err("parallelism.entity_extract must be > 0".into());
        }
        if self.parallelism.relation_discovery == 0 {
            return Err("parallelism.relation_discovery must be > 0".into());
        }
        if self.parallelism.relation_normalize == 0 {
            return Err("parallelism.relation_normalize must be > 0".into());
        }
        if self.parallelism.relation_match == 0 {
            return Err("parallelism.relation_match must be > 0".into());
        }
        if self.splitting.max_chunk_chars == 0 {
            return Err("splitting.max_chunk_chars must be > 0".into());
        }
        if self.splitting.overlap_chars >= self.splitting.max_chunk_chars {
            return Err("splitting.overlap_chars must be < max_chunk_chars".into());
        }
        if !(0.0..=1.0).contains(&self.matching.min_similarity) {
            return Err("matching.min_similarity must be in [0.0, 1.0]".into());
        }
        if self.matching.max_candidates == 0 {
            return Err("matching.max_candidates must be > 0".into());
        }
        if self.embedding_dimension == 0 {
            return Err("embedding_dimension must be > 0".into());
        }
        Ok(())
    }

    /// Read the four parallelism knobs from the environment (§6), falling
    /// back to `std::thread::available_parallelism()` for the CPU-scaled
    /// defaults and the fixed default of 2 for relation discovery. Unset or
    /// unparseable values fall back rather than erroring, per §6 ("unset
    /// falls back to the per-phase defaults above").
    pub fn from_env() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let read = |var: &str, default: usize| -> usize {
            std::env::var(var)
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        Self {
            parallelism: ParallelismConfig {
                entity_extract: read("ENTITY_EXTRACT_PARALLELISM", cpu_count),
                relation_discovery: read("RELATION_DISCOVERY_PARALLELISM", 2),
                relation_normalize: read("RELATION_NORMALIZE_PARALLELISM", cpu_count),
                relation_match: read("RELATION_MATCH_PARALLELISM", cpu_count),
            },
            ..Default::default()
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallelism: ParallelismConfig {
                entity_extract: 4,
                relation_discovery: 2,
                relation_normalize: 4,
                relation_match: 4,
            },
            splitting: SplittingConfig {
                max_chunk_chars: 800,
                overlap_chars: 0,
            },
            matching: MatchingConfig {
                min_similarity: 0.75,
                max_candidates: 5,
            },
            relation_evidence: RelationEvidenceConfig {
                max_matches: 5,
                min_similarity: 0.0,
            },
            embedding_dimension: 768,
        }
    }
}
