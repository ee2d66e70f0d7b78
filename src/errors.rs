//! Typed error hierarchy for draftline.
//!
//! Three enums cover the three layers a run passes through:
//! - `AiError`: a single call to a language-model provider
//! - `StepError`: one attempt of one step, classified for the retry policy
//! - `EngineError`: everything the executor, fan-out and pipeline surface

use std::time::Duration;

use thiserror::Error;

/// Errors from a language-model provider call.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("{provider}: missing API key (set {env_var})")]
    MissingApiKey {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("{provider}: HTTP {status}: {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider}: request failed: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider}: malformed response: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },
}

impl AiError {
    /// Rate limits, server errors, transport failures, timeouts and garbled
    /// payloads are worth another attempt. Other 4xx responses are not.
    pub fn is_retriable(&self) -> bool {
        match self {
            AiError::MissingApiKey { .. } => false,
            AiError::Http { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            AiError::Transport { .. } | AiError::Timeout { .. } | AiError::Malformed { .. } => true,
        }
    }
}

/// Outcome of a single failed step attempt.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Retriable(String),

    #[error("{0}")]
    NonRetriable(String),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl StepError {
    pub fn retriable(message: impl Into<String>) -> Self {
        StepError::Retriable(message.into())
    }

    pub fn non_retriable(message: impl Into<String>) -> Self {
        StepError::NonRetriable(message.into())
    }

    pub fn is_retriable(&self) -> bool {
        !matches!(self, StepError::NonRetriable(_))
    }
}

impl From<AiError> for StepError {
    fn from(err: AiError) -> Self {
        if err.is_retriable() {
            StepError::Retriable(err.to_string())
        } else {
            StepError::NonRetriable(err.to_string())
        }
    }
}

/// Errors surfaced by the execution engine and the pipelines built on it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Article {id} not found")]
    ArticleNotFound { id: String },

    #[error("Run {id} not found")]
    RunNotFound { id: String },

    #[error("Run {run_id} has failed; refusing to start step {step}")]
    RunFailed { run_id: String, step: String },

    #[error("Step {step} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("Step {step} exhausted {attempts} attempts: {source}")]
    Exhausted {
        step: String,
        attempts: u32,
        #[source]
        source: StepError,
    },

    #[error("Fan-in for {stage} failed: {message}")]
    FanIn { stage: String, message: String },

    #[error("Context key {key} is already set")]
    ContextOverwrite { key: String },

    #[error("Context key {key} is missing")]
    ContextMissing { key: String },

    #[error("Output of step {step} does not match its type: {source}")]
    Codec {
        step: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl EngineError {
    /// Validation errors are raised before a run row exists, so the failure
    /// hook has nothing to mark.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::ArticleNotFound { .. }
        )
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ai_error_rate_limit_is_retriable() {
        let err = AiError::Http {
            provider: "anthropic",
            status: 429,
            body: "slow down".into(),
        };
        assert!(err.is_retriable());
        assert!(matches!(StepError::from(err), StepError::Retriable(_)));
    }

    #[test]
    fn test_ai_error_bad_request_is_not_retriable() {
        let err = AiError::Http {
            provider: "openai",
            status: 400,
            body: "bad schema".into(),
        };
        assert!(!err.is_retriable());
        let step_err = StepError::from(err);
        assert!(matches!(step_err, StepError::NonRetriable(_)));
        assert!(step_err.to_string().contains("HTTP 400"));
    }

    #[test]
    fn test_ai_error_server_and_timeout_are_retriable() {
        assert!(
            AiError::Http {
                provider: "anthropic",
                status: 529,
                body: "overloaded".into()
            }
            .is_retriable()
        );
        assert!(AiError::Timeout { provider: "openai" }.is_retriable());
        assert!(
            !AiError::MissingApiKey {
                provider: "anthropic",
                env_var: "ANTHROPIC_API_KEY"
            }
            .is_retriable()
        );
    }

    #[test]
    fn test_step_timeout_is_retriable() {
        let err = StepError::Timeout(Duration::from_secs(3));
        assert!(err.is_retriable());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::Exhausted {
            step: "draft-article".into(),
            attempts: 3,
            source: StepError::retriable("HTTP 503"),
        };
        let msg = err.to_string();
        assert!(msg.contains("draft-article"));
        assert!(msg.contains("3 attempts"));
        assert!(!err.is_validation());
        assert!(EngineError::Validation("no sources".into()).is_validation());
    }
}
