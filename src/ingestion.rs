//! Ingestion Pipeline (§4.3): turns one external source entity into a
//! Document plus its chunks. Grounded on `indexing.rs`'s batch-indexing
//! shape (progress emission via [`crate::events::EventEmitter`], a single
//! pipeline entry point fed by a caller-supplied payload) generalized from
//! filesystem walking to a single `SourceEntity` value object, since this
//! crate's external collaborator is a domain row, not a file.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::ExtractError;
use crate::model::{Chunk, ChunkType, Document, EntityType, SourceType};
use crate::repository::{ChunkRepository, DocumentRepository};
use crate::splitter;

/// §4.3 step 3: stamp the entity-specific metadata §4.3 requires onto a
/// freshly split chunk. `entity.attributes` is free-form (the caller's
/// domain row shape), so well-known keys are read off it by name; anything
/// absent or unparsable is left at `Chunk::new_raw`'s defaults rather than
/// failing ingestion over it.
fn apply_entity_metadata(chunk: &mut Chunk, entity: &SourceEntity) {
    chunk.entity_name = Some(entity.name.clone());

    let attrs = &entity.attributes;
    chunk.world_id = attrs.get("world_id").and_then(|v| Uuid::parse_str(v).ok());
    chunk.world_name = attrs.get("world_name").cloned();
    chunk.world_genre = attrs.get("world_genre").cloned();
    chunk.scene_id = attrs.get("scene_id").and_then(|v| Uuid::parse_str(v).ok());
    chunk.beat_id = attrs.get("beat_id").and_then(|v| Uuid::parse_str(v).ok());
    chunk.beat_type = attrs.get("beat_type").cloned();
    chunk.beat_intent = attrs.get("beat_intent").cloned();
    chunk.location_id = attrs.get("location_id").and_then(|v| Uuid::parse_str(v).ok());
    chunk.location_name = attrs.get("location_name").cloned();
    chunk.timeline = attrs.get("timeline").cloned();
    chunk.pov_character = attrs.get("pov_character").cloned();
    chunk.content_type = attrs.get("content_type").cloned();
    chunk.content_kind = attrs.get("content_kind").cloned();
    chunk.importance = attrs.get("importance").and_then(|v| v.parse::<f32>().ok());

    chunk.characters = split_list(attrs.get("characters")).chain(entity.related_names.iter().cloned()).collect();
    chunk.related_characters = split_list(attrs.get("related_characters")).collect();
    chunk.related_locations = split_list(attrs.get("related_locations")).collect();
    chunk.related_artifacts = split_list(attrs.get("related_artifacts")).collect();
    chunk.related_events = split_list(attrs.get("related_events")).collect();
}

fn split_list(raw: Option<&String>) -> impl Iterator<Item = String> + '_ {
    raw.into_iter()
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// The caller-supplied shape of one entity to ingest. Building one from a
/// concrete domain row (a `character` table, a `scene` table, …) is the
/// caller's job — this pipeline only knows how to turn the value object
/// into a Document and its chunks.
#[derive(Debug, Clone)]
pub struct SourceEntity {
    pub entity_type: EntityType,
    pub name: String,
    pub attributes: HashMap<String, String>,
    pub parent: Option<Box<SourceEntity>>,
    pub related_names: Vec<String>,
    pub content_blocks: Vec<String>,
}

impl SourceEntity {
    /// The canonical content string §4.3 step 1 describes: name, attributes,
    /// parent hierarchy, related entity names.
    pub fn canonical_content(&self) -> String {
        let mut lines = vec![self.name.clone()];

        let mut attribute_keys: Vec<&String> = self.attributes.keys().collect();
        attribute_keys.sort();
        for key in attribute_keys {
            lines.push(format!("{key}: {}", self.attributes[key]));
        }

        let mut ancestor = self.parent.as_deref();
        let mut hierarchy = Vec::new();
        while let Some(entity) = ancestor {
            hierarchy.push(entity.name.clone());
            ancestor = entity.parent.as_deref();
        }
        if !hierarchy.is_empty() {
            hierarchy.reverse();
            lines.push(format!("Part of: {}", hierarchy.join(" > ")));
        }

        if !self.related_names.is_empty() {
            lines.push(format!("Related: {}", self.related_names.join(", ")));
        }

        lines.join("\n")
    }
}

/// Optional summary step (§4.3 step 4). Wiring one in produces additional
/// `chunk_type="summary"` chunks; without one, ingestion only produces raw
/// chunks.
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn generate_summary(
        &self,
        entity_type: EntityType,
        name: &str,
        contents: &[String],
        max_items: usize,
    ) -> Result<Vec<String>, ExtractError>;
}

pub struct IngestionPipeline {
    documents: Arc<dyn DocumentRepository>,
    chunks: Arc<dyn ChunkRepository>,
    embedder: Arc<dyn Embedder>,
    summary_generator: Option<Arc<dyn SummaryGenerator>>,
    max_chunk_chars: usize,
    overlap_chars: usize,
}

impl IngestionPipeline {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        chunks: Arc<dyn ChunkRepository>,
        embedder: Arc<dyn Embedder>,
        max_chunk_chars: usize,
        overlap_chars: usize,
    ) -> Self {
        Self {
            documents,
            chunks,
            embedder,
            summary_generator: None,
            max_chunk_chars,
            overlap_chars,
        }
    }

    pub fn with_summary_generator(mut self, generator: Arc<dyn SummaryGenerator>) -> Self {
        self.summary_generator = Some(generator);
        self
    }

    /// Ingest `entity` under `(tenant_id, source_type, source_id)`, returning
    /// the upserted document. At-most-one document per source key; chunks
    /// are fully replaced on reingestion.
    pub async fn ingest(
        &self,
        tenant_id: Uuid,
        source_type: SourceType,
        source_id: &str,
        title: &str,
        entity: SourceEntity,
    ) -> Result<Document, ExtractError> {
        let content = entity.canonical_content();

        let existing = self.documents.get_by_source(tenant_id, source_type, source_id).await?;
        let document = match existing {
            Some(mut existing) => {
                existing.title = title.to_string();
                existing.content = content.clone();
                existing.updated_at = Utc::now();
                self.chunks.delete_by_document(existing.id).await?;
                self.documents.update(existing).await?
            }
            None => {
                let now = Utc::now();
                self.documents
                    .create(Document {
                        id: Uuid::new_v4(),
                        tenant_id,
                        source_type,
                        source_id: source_id.to_string(),
                        title: title.to_string(),
                        content: content.clone(),
                        metadata: HashMap::new(),
                        created_at: now,
                        updated_at: now,
                    })
                    .await?
            }
        };

        let mut chunks = self.raw_chunks(&document, &content, &entity).await?;

        if let Some(generator) = &self.summary_generator {
            let mut contents = vec![content.clone()];
            contents.extend(entity.content_blocks.iter().cloned());
            let summaries = generator
                .generate_summary(entity.entity_type, &entity.name, &contents, 3)
                .await?;

            if let Some(mut template) = chunks.first().cloned() {
                apply_entity_metadata(&mut template, &entity);
                let next_index = chunks.len() as u32;
                for (offset, summary) in summaries.into_iter().enumerate() {
                    let mut summary_chunk = template.clone();
                    summary_chunk.id = Uuid::new_v4();
                    summary_chunk.chunk_index = next_index + offset as u32;
                    summary_chunk.chunk_type = Some(ChunkType::Summary);
                    summary_chunk.embedding = self.embedder.embed_text(&summary).await?;
                    summary_chunk.token_count = summary.len() / 4;
                    summary_chunk.content = summary.clone();
                    summary_chunk.embed_text = Some(summary);
                    summary_chunk.created_at = Utc::now();
                    chunks.push(summary_chunk);
                }
            }
        }

        self.chunks.create_batch(chunks).await?;
        Ok(document)
    }

    /// §4.3 step 3: split content into paragraphs, embed each non-empty one
    /// as a raw chunk, and attach the entity's metadata. Raw chunks never
    /// carry `embed_text` — it is reserved for the summary step.
    async fn raw_chunks(&self, document: &Document, content: &str, entity: &SourceEntity) -> Result<Vec<Chunk>, ExtractError> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let paragraphs = splitter::split(content, self.max_chunk_chars, self.overlap_chars)?;
        let mut chunks = Vec::new();
        let mut index = 0u32;

        for paragraph in paragraphs {
            if paragraph.text.trim().is_empty() {
                continue;
            }
            let embedding = self.embedder.embed_text(&paragraph.text).await?;
            let mut chunk = Chunk::new_raw(document.id, index, paragraph.text.clone(), embedding);
            apply_entity_metadata(&mut chunk, entity);
            chunks.push(chunk);
            index += 1;
        }

        Ok(chunks)
    }
}
