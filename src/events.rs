//! Event Emitter (§2, §6): a typed side-channel for pipeline progress. Event
//! emission never alters pipeline results — sinks are a capability passed by
//! the caller, no-op by default.
//!
//! Grounded directly on `chat/mod.rs`'s `EventEmitter` trait / `NoopEmitter`,
//! generalized from an untyped `emit(&str, Value)` into the typed
//! [`PipelineEvent`] catalogue §6 names for the streaming endpoint, while
//! keeping the same serializable `event`/`data` shape for SSE framing done
//! by the (external) HTTP layer.

use serde::Serialize;
use serde_json::Value;

use crate::model::{EntityResult, FinalRelation};

/// The SSE event catalogue named in §6: `pipeline.start`, `router.chunk`,
/// `phase.start`, `phase.done`, `match.found`, `match.none`,
/// `relation.discovery.batch`, `result_entities`, `result_relations`, `error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum PipelineEvent {
    #[serde(rename = "pipeline.start")]
    PipelineStart { tenant_id: String },
    #[serde(rename = "router.chunk")]
    RouterChunk { chunk_id: String, types: Vec<String> },
    #[serde(rename = "phase.start")]
    PhaseStart { phase: String },
    #[serde(rename = "phase.done")]
    PhaseDone { phase: String },
    #[serde(rename = "match.found")]
    MatchFound { finding_index: usize, source_id: String },
    #[serde(rename = "match.none")]
    MatchNone { finding_index: usize },
    #[serde(rename = "relation.discovery.batch")]
    RelationDiscoveryBatch {
        source_type: String,
        target_type: String,
        relation_count: usize,
    },
    #[serde(rename = "result_entities")]
    ResultEntities { entities: Vec<EntityResult> },
    #[serde(rename = "result_relations")]
    ResultRelations { relations: Vec<FinalRelation> },
    #[serde(rename = "error")]
    Error { message: String },
}

impl PipelineEvent {
    /// The bare event-name string, for transports that frame `event:`/`data:`
    /// separately rather than via the tagged-enum JSON shape above.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::PipelineStart { .. } => "pipeline.start",
            PipelineEvent::RouterChunk { .. } => "router.chunk",
            PipelineEvent::PhaseStart { .. } => "phase.start",
            PipelineEvent::PhaseDone { .. } => "phase.done",
            PipelineEvent::MatchFound { .. } => "match.found",
            PipelineEvent::MatchNone { .. } => "match.none",
            PipelineEvent::RelationDiscoveryBatch { .. } => "relation.discovery.batch",
            PipelineEvent::ResultEntities { .. } => "result_entities",
            PipelineEvent::ResultRelations { .. } => "result_relations",
            PipelineEvent::Error { .. } => "error",
        }
    }

    pub fn data(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.get("data").cloned())
            .unwrap_or(Value::Null)
    }
}

pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// No-op emitter for non-streaming contexts.
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: PipelineEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingEmitter {
        events: Mutex<Vec<String>>,
    }

    impl EventEmitter for RecordingEmitter {
        fn emit(&self, event: PipelineEvent) {
            self.events.lock().unwrap().push(event.name().to_string());
        }
    }

    #[test]
    fn noop_emitter_drops_everything() {
        let emitter = NoopEmitter;
        emitter.emit(PipelineEvent::PhaseStart { phase: "split".into() });
        // No observable state; the assertion here is just that it doesn't panic.
    }

    #[test]
    fn event_name_matches_the_spec_catalogue() {
        let recorder = RecordingEmitter { events: Mutex::new(Vec::new()) };
        recorder.emit(PipelineEvent::PipelineStart { tenant_id: "t1".into() });
        recorder.emit(PipelineEvent::MatchNone { finding_index: 0 });
        recorder.emit(PipelineEvent::Error { message: "boom".into() });
        let events = recorder.events.into_inner().unwrap();
        assert_eq!(events, vec!["pipeline.start", "match.none", "error"]);
    }

    #[test]
    fn data_extracts_the_payload_without_the_tag() {
        let event = PipelineEvent::MatchFound { finding_index: 3, source_id: "abc".into() };
        let data = event.data();
        assert_eq!(data["finding_index"], 3);
        assert_eq!(data["source_id"], "abc");
    }
}
