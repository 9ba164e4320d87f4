//! Crate-wide error taxonomy (spec §7).
//!
//! `AgentError` is the single error type returned across component boundaries.
//! Narrower module-local errors (`ToolSourceError`, `CheckpointError`) convert into
//! it via `From` at their call site rather than being matched by string.

use thiserror::Error;

/// The error taxonomy from spec §7, used to drive retry/propagation decisions
/// rather than matched by message text.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Connection, SSL, DNS, or timeout failure reaching a remote service.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The remote service returned a rate-limit response. Surfaced immediately, never retried.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// A model invocation exceeded `model_timeout`.
    #[error("model timeout after {0:?}")]
    ModelTimeout(std::time::Duration),

    /// The tool aggregator reported zero healthy tools.
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    /// A tool handler returned `success=false`.
    #[error("tool '{tool}' failed: {message}")]
    ToolError { tool: String, message: String },

    /// Tool arguments failed schema validation.
    #[error("schema error for tool '{tool}': {message}")]
    SchemaError { tool: String, message: String },

    /// A configured cost/token budget was exceeded.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Caller-supplied input failed validation (e.g. malformed thread_id).
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A referenced thread, document, or segment does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An attachment could not be decoded or exceeded size limits.
    #[error("attachment error: {0}")]
    AttachmentError(String),

    /// A required prompt template variable was missing.
    #[error("missing prompt variable: {0}")]
    MissingVariable(String),

    /// Anything not covered above; preserves the underlying cause.
    #[error("internal error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl AgentError {
    /// Retryable per §7 propagation rules: transport failures and (once) model timeouts.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::TransportError(_) | AgentError::ModelTimeout(_))
    }

    /// True for errors that terminate the request with `error` rather than being
    /// recorded and continued past (§7: SchemaError/ValidationError/BudgetExceeded).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentError::SchemaError { .. }
                | AgentError::ValidationError(_)
                | AgentError::BudgetExceeded(_)
        )
    }

    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        AgentError::Internal(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: transport and model-timeout errors are retryable; schema/validation/budget are not.
    #[test]
    fn is_retryable_matches_taxonomy() {
        assert!(AgentError::TransportError("x".into()).is_retryable());
        assert!(AgentError::ModelTimeout(std::time::Duration::from_secs(1)).is_retryable());
        assert!(!AgentError::RateLimit("x".into()).is_retryable());
        assert!(!AgentError::ValidationError("x".into()).is_retryable());
    }

    /// **Scenario**: schema/validation/budget errors are terminal; tool errors are not.
    #[test]
    fn is_terminal_matches_taxonomy() {
        assert!(AgentError::SchemaError {
            tool: "t".into(),
            message: "m".into()
        }
        .is_terminal());
        assert!(AgentError::ValidationError("x".into()).is_terminal());
        assert!(AgentError::BudgetExceeded("x".into()).is_terminal());
        assert!(!AgentError::ToolError {
            tool: "t".into(),
            message: "m".into()
        }
        .is_terminal());
    }
}
