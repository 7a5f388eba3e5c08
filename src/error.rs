//! Error taxonomy for the processing pipeline and its polling contract.
//!
//! [`DigestError`] covers everything a caller of the task manager can see:
//! bad submit parameters, unknown ids, and results requested too early.
//! [`ProviderError`] covers failures of the external summarization
//! capability; it never reaches a poller directly — the worker translates it
//! into a terminal `Failed` task state, and pollers observe it through the
//! task's `error` field.

use thiserror::Error;

/// Caller-visible errors returned by the task manager operations.
#[derive(Debug, Error)]
pub enum DigestError {
    /// Malformed or unknown submit parameters. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown task or workspace id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Result requested before the task completed. Poll again.
    #[error("not ready: {0}")]
    NotReady(String),

    /// Surfaced only on synchronous paths (e.g. the one-shot CLI run);
    /// async tasks record this in their terminal state instead.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Failures of the external summarization capability.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider endpoint returned a non-success HTTP status.
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The call exceeded the per-call timeout.
    #[error("provider call timed out after {0}s")]
    Timeout(u64),

    /// Connection-level failure (DNS, TLS, reset).
    #[error("provider network error: {0}")]
    Network(String),

    /// The provider answered but the completion was empty or blank.
    #[error("provider returned empty completion")]
    EmptyCompletion,

    /// The response body could not be interpreted.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// The summarizer is configured off.
    #[error("summarizer provider is disabled")]
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display_carries_status() {
        let e = ProviderError::Http {
            status: 429,
            message: "rate limited".to_string(),
        };
        assert!(e.to_string().contains("429"));
        assert!(e.to_string().contains("rate limited"));
    }

    #[test]
    fn digest_error_wraps_provider() {
        let e: DigestError = ProviderError::EmptyCompletion.into();
        assert!(matches!(e, DigestError::Provider(_)));
    }
}
