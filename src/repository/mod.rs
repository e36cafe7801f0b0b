//! The two repository capabilities (§6): `DocumentRepository` and
//! `ChunkRepository`, the orchestrator's only view onto persistence.
//! Grounded on `storage/lance_store.rs`'s `LanceStore` (search/filter/upsert
//! shape), generalized from a single LanceDB-backed struct into a pair of
//! `#[async_trait]` traits so the pipeline never depends on a concrete
//! database.

mod memory;

pub use memory::{new_pair, InMemoryChunkRepository, InMemoryDocumentRepository};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExtractError;
use crate::model::{Chunk, Document, SourceType};

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn create(&self, document: Document) -> Result<Document, ExtractError>;
    async fn get_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Document>, ExtractError>;
    async fn get_by_source(
        &self,
        tenant_id: Uuid,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<Document>, ExtractError>;
    async fn update(&self, document: Document) -> Result<Document, ExtractError>;
    async fn list_by_tenant(&self, tenant_id: Uuid, limit: usize, offset: usize) -> Result<Vec<Document>, ExtractError>;
    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<(), ExtractError>;
}

/// All-AND-composed, all-optional row filters for [`ChunkRepository::search_similar`].
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub source_types: Vec<SourceType>,
    pub chunk_types: Vec<crate::model::ChunkType>,
    pub beat_types: Vec<String>,
    pub scene_ids: Vec<Uuid>,
    pub location_ids: Vec<Uuid>,
    pub characters: Vec<String>,
    pub story_id: Option<Uuid>,
    pub world_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

/// Opaque `(distance, chunk_id)` pagination cursor, base64-url (no padding)
/// encoded per §6.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Cursor {
    pub distance: f32,
    pub chunk_id: Uuid,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("Cursor always serializes");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str) -> Result<Self, ExtractError> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|e| ExtractError::InvalidInput(format!("invalid cursor encoding: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| ExtractError::InvalidInput(format!("invalid cursor payload: {e}")))
    }

    /// True when `self` should be included after `cursor` under the
    /// ascending `(distance, chunk_id)` ordering: `distance > cursor.distance`,
    /// or equal distance with `chunk_id > cursor.chunk_id`.
    pub fn admits(&self, distance: f32, chunk_id: Uuid) -> bool {
        distance > self.distance || (distance == self.distance && chunk_id > self.chunk_id)
    }
}

#[async_trait]
pub trait ChunkRepository: Send + Sync {
    async fn create(&self, chunk: Chunk) -> Result<Chunk, ExtractError>;

    /// Persist every chunk or none — the transactional batch write §4.3
    /// step 5 requires.
    async fn create_batch(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>, ExtractError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Chunk>, ExtractError>;

    /// Ordered ascending by `chunk_index`.
    async fn list_by_document(&self, document_id: Uuid) -> Result<Vec<Chunk>, ExtractError>;

    async fn delete_by_document(&self, document_id: Uuid) -> Result<(), ExtractError>;

    async fn search_similar(
        &self,
        tenant_id: Uuid,
        query_embedding: &[f32],
        limit: usize,
        cursor: Option<Cursor>,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, ExtractError>;
}

/// `1 - cosine_similarity`, clamped to `[0, 2]`. Zero vectors are maximally
/// distant from everything including themselves (`distance = 1.0`), never a
/// division-by-zero panic.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (norm_a * norm_b)).clamp(0.0, 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cosine_distance_of_identical_vectors_is_zero() {
        let v = vec![1.0, 2.0, 3.0];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_of_opposite_vectors_is_two() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_distance(&a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_handles_zero_vectors_without_panicking() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_distance(&a, &b), 1.0);
    }

    #[test]
    fn cursor_round_trips_through_its_encoding() {
        let cursor = Cursor { distance: 0.42, chunk_id: Uuid::new_v4() };
        let encoded = cursor.encode();
        assert!(!encoded.contains('='));
        let decoded = Cursor::decode(&encoded).unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn cursor_admits_strictly_greater_distance() {
        let id = Uuid::new_v4();
        let cursor = Cursor { distance: 0.5, chunk_id: id };
        assert!(cursor.admits(0.6, Uuid::new_v4()));
        assert!(!cursor.admits(0.4, Uuid::new_v4()));
    }

    #[test]
    fn cursor_tie_breaks_on_chunk_id_at_equal_distance() {
        let low_id = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let high_id = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        let cursor = Cursor { distance: 0.5, chunk_id: low_id };
        assert!(cursor.admits(0.5, high_id));
        assert!(!cursor.admits(0.5, low_id));
    }

    proptest! {
        /// §8 round-trip: `decode(encode(cursor)) == cursor` for arbitrary
        /// `(distance, chunk_id)` pairs, not just the one hand-picked above.
        #[test]
        fn cursor_round_trips_for_arbitrary_values(
            distance in -1000.0f32..1000.0,
            id_bytes in proptest::array::uniform16(any::<u8>()),
        ) {
            let cursor = Cursor { distance, chunk_id: Uuid::from_bytes(id_bytes) };
            let decoded = Cursor::decode(&cursor.encode()).unwrap();
            prop_assert_eq!(cursor, decoded);
        }
    }
}
