//! `DeterministicEmbedder` — a test double producing a stable hash-of-text
//! unit vector, so embedding-dependent tests (matching, clustering) never
//! need network access and are reproducible across runs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::ExtractError;

use super::Embedder;

pub struct DeterministicEmbedder {
    dimension: usize,
}

impl DeterministicEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for DeterministicEmbedder {
    fn default() -> Self {
        Self::new(768)
    }
}

#[async_trait]
impl Embedder for DeterministicEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ExtractError> {
        let mut vector = Vec::with_capacity(self.dimension);
        let mut seed = {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            hasher.finish()
        };

        for _ in 0..self.dimension {
            // xorshift64 — cheap, deterministic, good enough spread for a test double.
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let unit = (seed as f64 / u64::MAX as f64) * 2.0 - 1.0;
            vector.push(unit as f32);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
