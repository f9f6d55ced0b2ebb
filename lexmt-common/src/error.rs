//! Common error types for lexmt

use thiserror::Error;

/// Common result type for lexmt operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared across the pipeline, preprocessing, and harness.
///
/// Recovery boundary is the segment: everything below it is either retried
/// or surfaced as one of these variants, and the harness maps the variant
/// to a per-sample `error_kind` without aborting the batch.
#[derive(Error, Debug)]
pub enum Error {
    /// LLM / embedding / vector-DB endpoint failed after local retries
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Model returned text that failed schema validation even after repair
    #[error("Malformed model output: {0}")]
    MalformedModelOutput(String),

    /// Model returned a well-formed but empty result
    #[error("Empty result from agent {0}")]
    EmptyResult(String),

    /// A refinement layer failed; the segment stops at the last good translation
    #[error("Layer {layer} failed: {reason}")]
    LayerFailure { layer: String, reason: String },

    /// Segment rejected before any model call (e.g. empty source)
    #[error("Invalid input: {0}")]
    InputInvalid(String),

    /// Configuration rejected at startup; maps to exit code 2
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable kind recorded in run artifacts.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UpstreamUnavailable(_) => "upstream_unavailable",
            Error::MalformedModelOutput(_) => "malformed_model_output",
            Error::EmptyResult(_) => "empty_result",
            Error::LayerFailure { .. } => "layer_failure",
            Error::InputInvalid(_) => "input_invalid",
            Error::Config(_) => "config_invalid",
            Error::Database(_) => "database",
            Error::Io(_) => "io",
            Error::Serde(_) => "serde",
            Error::Internal(_) => "internal",
        }
    }

    /// True for failures worth retrying at the client level.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::UpstreamUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(Error::InputInvalid("x".into()).kind(), "input_invalid");
        assert_eq!(
            Error::LayerFailure {
                layer: "syntax".into(),
                reason: "boom".into()
            }
            .kind(),
            "layer_failure"
        );
        assert_eq!(Error::Config("bad".into()).kind(), "config_invalid");
    }

    #[test]
    fn only_upstream_errors_are_transient() {
        assert!(Error::UpstreamUnavailable("503".into()).is_transient());
        assert!(!Error::MalformedModelOutput("{".into()).is_transient());
        assert!(!Error::InputInvalid("".into()).is_transient());
    }
}
