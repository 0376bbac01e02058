use thiserror::Error;

/// Failure talking to the exam service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("{operation} failed: {message}")]
    Transient { operation: &'static str, message: String },
    #[error("{operation} rejected with status {status}: {detail}")]
    Rejected { operation: &'static str, status: u16, detail: String },
    #[error("{operation} returned an unreadable body: {message}")]
    Decode { operation: &'static str, message: String },
}

impl BackendError {
    /// Timeouts, connection failures and 5xx responses are worth another try.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Timeout { .. } | BackendError::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors surfaced by engine operations and recorded on engine state for rendering.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("cannot take exam: {reason}")]
    CannotTakeExam { reason: String },
    #[error("an attempt is already in progress")]
    AttemptInProgress,
    #[error("there is no attempt to act on")]
    NoActiveAttempt,
    #[error("attempt is not in progress")]
    NotInProgress,
    #[error("a submission is already in flight")]
    SubmissionInFlight,
    #[error("exam is invalid: {0}")]
    InvalidExam(String),
    #[error("cannot restore shuffle layout: {0}")]
    ShuffleUnavailable(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Backend(err) if err.is_retryable())
    }

    /// Terminal for the attempt: the presentation layer should leave the exam view.
    pub fn is_eligibility(&self) -> bool {
        matches!(self, EngineError::CannotTakeExam { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        let timeout = EngineError::from(BackendError::Timeout { operation: "save_progress" });
        assert!(timeout.is_retryable());

        let rejected = EngineError::from(BackendError::Rejected {
            operation: "submit",
            status: 409,
            detail: "already submitted".to_string(),
        });
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.to_string(), "submit rejected with status 409: already submitted");
    }

    #[test]
    fn eligibility_is_distinct_from_network_failure() {
        let ineligible = EngineError::CannotTakeExam { reason: "Maximum attempts reached".into() };
        assert!(ineligible.is_eligibility());
        assert!(!ineligible.is_retryable());
        assert!(!EngineError::from(BackendError::Timeout { operation: "start" }).is_eligibility());
    }
}
