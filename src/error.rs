//! Stage-level error type for the ingestion and query pipelines.
//!
//! Each pipeline stage reports one of a fixed set of outcomes so callers
//! can match on them instead of inspecting message text. The HTTP layer
//! turns these into status codes in [`crate::server`].

use thiserror::Error;

/// Pipeline stage that produced an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Registry,
    Language,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Registry => "filings registry",
            Stage::Language => "language model",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A filing, company, or document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{stage} request failed: {source}")]
    Upstream {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    /// Model output did not match the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl PipelineError {
    pub fn registry(source: impl Into<anyhow::Error>) -> Self {
        Self::Upstream {
            stage: Stage::Registry,
            source: source.into(),
        }
    }

    pub fn language(source: impl Into<anyhow::Error>) -> Self {
        Self::Upstream {
            stage: Stage::Language,
            source: source.into(),
        }
    }

    pub fn storage(source: impl Into<anyhow::Error>) -> Self {
        Self::Storage(source.into())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Success / skip / failure counts for batch operations that keep going
/// past individual bad items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_message_names_stage() {
        let err = PipelineError::language(anyhow::anyhow!("HTTP 503"));
        assert_eq!(err.to_string(), "language model request failed: HTTP 503");
    }

    #[test]
    fn test_registry_error_names_stage() {
        let err = PipelineError::registry(anyhow::anyhow!("HTTP 429"));
        assert_eq!(err.to_string(), "filings registry request failed: HTTP 429");
    }
}
