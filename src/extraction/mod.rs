//! Entity-side phases (§4.4–§4.6, Phases 1–4): routing, per-type
//! extraction, matching against the vector store, and payload assembly.

pub mod candidates;
pub mod matching;
pub mod payload;
pub mod routing;

pub use candidates::{extract_candidates, EntityMatcher};
pub use matching::match_findings;
pub use payload::assemble_payload;
pub use routing::{route_chunks, RoutedChunk};
