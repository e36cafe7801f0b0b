//! Narrative entity/relation extraction core: ingests narrative prose and
//! resolves it into a structured graph of entities and relations via a
//! nine-phase LLM-orchestrated pipeline, grounded against a tenant-scoped
//! vector store of previously-indexed content.
//!
//! The HTTP transport, concrete LLM/embedder providers, and the database
//! driver are external collaborators — see [`llm`], [`embedding`], and
//! [`repository`] for the capability traits this crate characterises them by.

pub mod concurrency;
pub mod config;
pub mod embedding;
pub mod error;
pub mod events;
pub mod extraction;
pub mod ingestion;
pub mod json_lenient;
pub mod llm;
pub mod model;
pub mod orchestrator;
pub mod prompts;
pub mod relation_types;
pub mod relations;
pub mod repository;
pub mod splitter;

pub use config::PipelineConfig;
pub use error::ExtractError;
pub use events::{EventEmitter, NoopEmitter, PipelineEvent};
pub use model::{EntityResult, ExtractPayload, FinalRelation};
pub use orchestrator::{run_extraction, Collaborators, ExtractRequest, RelationSchemas};

pub use uuid::Uuid;
