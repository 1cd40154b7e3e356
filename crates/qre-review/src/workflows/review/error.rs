use super::findings::rules::RuleError;
use super::repository::RepositoryError;

/// Errors surfaced by the review workflow services.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    /// Deliberately carries no detail so callers cannot probe for valid tokens.
    #[error("upload link is invalid or has expired")]
    InvalidToken,
    #[error("upload quota exhausted for this link")]
    QuotaExceeded,
    #[error("cannot {action} a finding that is {from}")]
    InvalidTransition {
        action: &'static str,
        from: &'static str,
    },
    #[error("finding {finding_id} exceeds the senior-review thresholds and must be escalated")]
    EscalationRequired { finding_id: String },
    #[error("cannot {action} an evidence request that is {from}")]
    InvalidRequestState {
        action: &'static str,
        from: &'static str,
    },
    #[error("reprocessing for {target} is already running")]
    ConcurrencyConflict { target: String },
    #[error("reprocessing job {job_id} failed: {message}")]
    JobExecution { job_id: String, message: String },
    #[error("timed out after {waited_secs}s waiting for reprocessing of {target}")]
    JobTimedOut { target: String, waited_secs: u64 },
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ReviewError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
