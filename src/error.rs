//! The crate's single closed error taxonomy (§7). Every public function in
//! this crate returns `Result<_, ExtractError>`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// Missing tenant/world/text, bad UUID, unknown entity type.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// LLM or embedder transport failed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// LLM output unparseable even after the single repair attempt.
    #[error("upstream returned unparseable output: {0}")]
    UpstreamSchema(String),

    /// A repository operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The caller's context was cancelled mid-invocation.
    #[error("cancelled")]
    Cancelled,

    /// A repository lookup found nothing.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ExtractError {
    /// §7 "User-visible behaviour": the HTTP status the (external) transport
    /// layer should map this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            ExtractError::InvalidInput(_) => 400,
            ExtractError::NotFound(_) => 404,
            ExtractError::Cancelled => 499,
            ExtractError::UpstreamUnavailable(_)
            | ExtractError::UpstreamSchema(_)
            | ExtractError::Storage(_) => 500,
        }
    }

    /// `{error: string}` JSON error body.
    pub fn to_error_body(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }

    /// Per §7, `Cancelled` is not a failure in the API sense — the streaming
    /// endpoint just stops emitting events and the non-streaming endpoint
    /// returns no body. Callers use this to distinguish the two cases.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExtractError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_table() {
        assert_eq!(ExtractError::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(ExtractError::NotFound("x".into()).status_code(), 404);
        assert_eq!(ExtractError::Storage("x".into()).status_code(), 500);
        assert_eq!(ExtractError::UpstreamUnavailable("x".into()).status_code(), 500);
        assert_eq!(ExtractError::UpstreamSchema("x".into()).status_code(), 500);
    }

    #[test]
    fn error_body_shape() {
        let err = ExtractError::InvalidInput("missing tenant".into());
        let body = err.to_error_body();
        assert_eq!(body["error"], "invalid input: missing tenant");
    }

    #[test]
    fn cancelled_is_not_a_generic_failure() {
        assert!(ExtractError::Cancelled.is_cancelled());
        assert!(!ExtractError::Storage("x".into()).is_cancelled());
    }
}
