//! `InMemoryDocumentRepository` / `InMemoryChunkRepository` — the reference,
//! process-local implementation of the two repository capabilities.
//! Grounded on `storage/lance_store.rs`'s filter/upsert shape, rewritten
//! over a `parking_lot::RwLock<Vec<_>>` (no ANN index) per §4.2's documented
//! reference-implementation contract: `O(n)` cosine scan, exact ordering and
//! cursor semantics.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::ExtractError;
use crate::model::{Chunk, Document, SourceType};

use super::{cosine_distance, ChunkRepository, Cursor, DocumentRepository, ScoredChunk, SearchFilters};

/// Build a document repository and a chunk repository that share the same
/// underlying document table, so `search_similar`'s tenant join sees
/// documents created through either handle.
pub fn new_pair() -> (InMemoryDocumentRepository, InMemoryChunkRepository) {
    let documents = Arc::new(RwLock::new(Vec::new()));
    let chunks = Arc::new(RwLock::new(Vec::new()));
    (
        InMemoryDocumentRepository { documents: documents.clone() },
        InMemoryChunkRepository { chunks, documents },
    )
}

pub struct InMemoryDocumentRepository {
    documents: Arc<RwLock<Vec<Document>>>,
}

impl InMemoryDocumentRepository {
    pub fn new() -> Self {
        Self { documents: Arc::new(RwLock::new(Vec::new())) }
    }
}

impl Default for InMemoryDocumentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn create(&self, document: Document) -> Result<Document, ExtractError> {
        let mut documents = self.documents.write();
        if documents.iter().any(|d| d.source_key() == document.source_key()) {
            return Err(ExtractError::InvalidInput(format!(
                "document already exists for source key {:?}",
                document.source_key()
            )));
        }
        documents.push(document.clone());
        Ok(document)
    }

    async fn get_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Document>, ExtractError> {
        Ok(self.documents.read().iter().find(|d| d.tenant_id == tenant_id && d.id == id).cloned())
    }

    async fn get_by_source(
        &self,
        tenant_id: Uuid,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<Document>, ExtractError> {
        Ok(self
            .documents
            .read()
            .iter()
            .find(|d| d.tenant_id == tenant_id && d.source_type == source_type && d.source_id == source_id)
            .cloned())
    }

    async fn update(&self, document: Document) -> Result<Document, ExtractError> {
        let mut documents = self.documents.write();
        let slot = documents
            .iter_mut()
            .find(|d| d.tenant_id == document.tenant_id && d.id == document.id)
            .ok_or_else(|| ExtractError::NotFound(format!("document {} not found", document.id)))?;
        *slot = document.clone();
        Ok(document)
    }

    async fn list_by_tenant(&self, tenant_id: Uuid, limit: usize, offset: usize) -> Result<Vec<Document>, ExtractError> {
        let mut matching: Vec<Document> = self.documents.read().iter().filter(|d| d.tenant_id == tenant_id).cloned().collect();
        matching.sort_by_key(|d| d.created_at);
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<(), ExtractError> {
        let mut documents = self.documents.write();
        let before = documents.len();
        documents.retain(|d| !(d.tenant_id == tenant_id && d.id == id));
        if documents.len() == before {
            return Err(ExtractError::NotFound(format!("document {id} not found")));
        }
        Ok(())
    }
}

pub struct InMemoryChunkRepository {
    chunks: Arc<RwLock<Vec<Chunk>>>,
    documents: Arc<RwLock<Vec<Document>>>,
}

impl InMemoryChunkRepository {
    /// A standalone chunk repository backed by its own empty document table
    /// — convenient for tests that only exercise chunk operations directly
    /// and never need tenant-scoped search.
    pub fn new() -> Self {
        Self { chunks: Arc::new(RwLock::new(Vec::new())), documents: Arc::new(RwLock::new(Vec::new())) }
    }

    fn owning_document(&self, document_id: Uuid) -> Option<Document> {
        self.documents.read().iter().find(|d| d.id == document_id).cloned()
    }
}

impl Default for InMemoryChunkRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkRepository for InMemoryChunkRepository {
    async fn create(&self, chunk: Chunk) -> Result<Chunk, ExtractError> {
        self.chunks.write().push(chunk.clone());
        Ok(chunk)
    }

    async fn create_batch(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>, ExtractError> {
        let mut guard = self.chunks.write();
        guard.extend(chunks.iter().cloned());
        Ok(chunks)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Chunk>, ExtractError> {
        Ok(self.chunks.read().iter().find(|c| c.id == id).cloned())
    }

    async fn list_by_document(&self, document_id: Uuid) -> Result<Vec<Chunk>, ExtractError> {
        let mut matching: Vec<Chunk> = self.chunks.read().iter().filter(|c| c.document_id == document_id).cloned().collect();
        matching.sort_by_key(|c| c.chunk_index);
        Ok(matching)
    }

    async fn delete_by_document(&self, document_id: Uuid) -> Result<(), ExtractError> {
        self.chunks.write().retain(|c| c.document_id != document_id);
        Ok(())
    }

    async fn search_similar(
        &self,
        tenant_id: Uuid,
        query_embedding: &[f32],
        limit: usize,
        cursor: Option<Cursor>,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, ExtractError> {
        let chunks = self.chunks.read().clone();
        let mut scored: Vec<ScoredChunk> = Vec::new();

        for chunk in chunks {
            let Some(document) = self.owning_document(chunk.document_id) else { continue };
            if document.tenant_id != tenant_id {
                continue;
            }
            if !filters.source_types.is_empty() && !filters.source_types.contains(&document.source_type) {
                continue;
            }
            if !filters.chunk_types.is_empty() {
                match chunk.chunk_type {
                    Some(ct) if filters.chunk_types.contains(&ct) => {}
                    _ => continue,
                }
            }
            if !filters.beat_types.is_empty() {
                match &chunk.beat_type {
                    Some(bt) if filters.beat_types.contains(bt) => {}
                    _ => continue,
                }
            }
            if !filters.scene_ids.is_empty() {
                match chunk.scene_id {
                    Some(id) if filters.scene_ids.contains(&id) => {}
                    _ => continue,
                }
            }
            if !filters.location_ids.is_empty() {
                match chunk.location_id {
                    Some(id) if filters.location_ids.contains(&id) => {}
                    _ => continue,
                }
            }
            if !filters.characters.is_empty() && filters.characters.iter().all(|c| !chunk.characters.contains(c)) {
                continue;
            }
            if !filters.world_ids.is_empty() {
                match chunk.world_id {
                    Some(id) if filters.world_ids.contains(&id) => {}
                    _ => continue,
                }
            }
            if let Some(story_id) = filters.story_id {
                if document.source_type != SourceType::Story || document.id != story_id {
                    continue;
                }
            }

            let distance = cosine_distance(query_embedding, &chunk.embedding);
            if let Some(cursor) = cursor {
                if !cursor.admits(distance, chunk.id) {
                    continue;
                }
            }
            scored.push(ScoredChunk { chunk, distance });
        }

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChunkType;
    use chrono::Utc;
    use std::collections::HashMap;

    fn test_document(tenant_id: Uuid, source_id: &str) -> Document {
        Document {
            id: Uuid::new_v4(),
            tenant_id,
            source_type: SourceType::Character,
            source_id: source_id.to_string(),
            title: source_id.to_string(),
            content: "content".into(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_by_source_is_tenant_and_type_scoped() {
        let (docs, _chunks) = new_pair();
        let tenant = Uuid::new_v4();
        let other_tenant = Uuid::new_v4();
        let document = docs.create(test_document(tenant, "char-1")).await.unwrap();

        assert_eq!(
            docs.get_by_source(tenant, SourceType::Character, "char-1").await.unwrap().map(|d| d.id),
            Some(document.id)
        );
        assert!(docs.get_by_source(other_tenant, SourceType::Character, "char-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn creating_a_duplicate_source_key_is_rejected() {
        let (docs, _chunks) = new_pair();
        let tenant = Uuid::new_v4();
        docs.create(test_document(tenant, "char-1")).await.unwrap();
        let err = docs.create(test_document(tenant, "char-1")).await.unwrap_err();
        assert!(matches!(err, ExtractError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn search_similar_orders_by_ascending_distance_then_chunk_id() {
        let (docs, chunks) = new_pair();
        let tenant = Uuid::new_v4();
        let document = docs.create(test_document(tenant, "char-1")).await.unwrap();

        for embedding in [vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]] {
            let chunk = Chunk::new_raw(document.id, 0, "x".into(), embedding);
            chunks.create(chunk).await.unwrap();
        }

        let results = chunks
            .search_similar(tenant, &[1.0, 0.0], 10, None, &SearchFilters::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!((results[0].distance).abs() < 1e-6);
    }

    #[tokio::test]
    async fn cursor_pagination_yields_disjoint_ascending_pages() {
        let (docs, chunks) = new_pair();
        let tenant = Uuid::new_v4();
        let document = docs.create(test_document(tenant, "char-1")).await.unwrap();

        // Five chunks with distinct distances from the query vector.
        for angle in [0.0_f32, 0.2, 0.4, 0.6, 0.8] {
            let embedding = vec![angle.cos(), angle.sin()];
            chunks.create(Chunk::new_raw(document.id, 0, "x".into(), embedding)).await.unwrap();
        }

        let query = vec![1.0, 0.0];
        let filters = SearchFilters::default();

        let page1 = chunks.search_similar(tenant, &query, 2, None, &filters).await.unwrap();
        assert_eq!(page1.len(), 2);
        let cursor = Cursor { distance: page1[1].distance, chunk_id: page1[1].chunk.id };

        let page2 = chunks.search_similar(tenant, &query, 2, Some(cursor), &filters).await.unwrap();
        assert_eq!(page2.len(), 2);
        let cursor2 = Cursor { distance: page2[1].distance, chunk_id: page2[1].chunk.id };

        let page3 = chunks.search_similar(tenant, &query, 2, Some(cursor2), &filters).await.unwrap();
        assert_eq!(page3.len(), 1);

        let mut all_ids: Vec<Uuid> = page1.iter().chain(page2.iter()).chain(page3.iter()).map(|s| s.chunk.id).collect();
        all_ids.sort();
        all_ids.dedup();
        assert_eq!(all_ids.len(), 5);
    }

    #[tokio::test]
    async fn chunk_type_filter_excludes_non_matching_chunks() {
        let (docs, chunks) = new_pair();
        let tenant = Uuid::new_v4();
        let document = docs.create(test_document(tenant, "char-1")).await.unwrap();

        let mut summary_chunk = Chunk::new_raw(document.id, 0, "summary".into(), vec![1.0, 0.0]);
        summary_chunk.chunk_type = Some(ChunkType::Summary);
        chunks.create(summary_chunk).await.unwrap();
        chunks.create(Chunk::new_raw(document.id, 1, "raw".into(), vec![0.9, 0.1])).await.unwrap();

        let filters = SearchFilters { chunk_types: vec![ChunkType::Summary], ..Default::default() };
        let results = chunks.search_similar(tenant, &[1.0, 0.0], 10, None, &filters).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_type, Some(ChunkType::Summary));
    }

    #[tokio::test]
    async fn delete_by_document_removes_only_that_documents_chunks() {
        let (docs, chunks) = new_pair();
        let tenant = Uuid::new_v4();
        let doc_a = docs.create(test_document(tenant, "a")).await.unwrap();
        let doc_b = docs.create(test_document(tenant, "b")).await.unwrap();
        chunks.create(Chunk::new_raw(doc_a.id, 0, "a".into(), vec![1.0])).await.unwrap();
        chunks.create(Chunk::new_raw(doc_b.id, 0, "b".into(), vec![1.0])).await.unwrap();

        chunks.delete_by_document(doc_a.id).await.unwrap();

        assert!(chunks.list_by_document(doc_a.id).await.unwrap().is_empty());
        assert_eq!(chunks.list_by_document(doc_b.id).await.unwrap().len(), 1);
    }
}
