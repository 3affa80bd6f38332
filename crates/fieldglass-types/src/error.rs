use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The closed set of failure kinds that drive the step graph's conditional
/// edges. The engine routes on `kind`, never on `message` text — see
/// `ErrorKind::retryable` for the disposition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ToolFailure,
    ActionFailure,
    PerceptionFailure,
    ModelFailure,
    PlanningFailure,
    VerificationFailure,
    CancelRequested,
    BudgetExhausted,
    PolicyViolation,
}

impl ErrorKind {
    /// Default retry disposition for this kind, ignoring the `ModelFailure`
    /// transient heuristic (callers constructing a `ModelFailure` should set
    /// `retryable` explicitly via [`ErrorRecord::model_failure`]).
    pub fn default_retryable(self) -> bool {
        match self {
            ErrorKind::ToolFailure
            | ErrorKind::ActionFailure
            | ErrorKind::PerceptionFailure
            | ErrorKind::VerificationFailure => true,
            ErrorKind::ModelFailure => true,
            ErrorKind::PlanningFailure
            | ErrorKind::CancelRequested
            | ErrorKind::BudgetExhausted
            | ErrorKind::PolicyViolation => false,
        }
    }
}

/// A typed failure record carried through the graph instead of `anyhow::Error`,
/// so routing never has to re-parse a message string.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            retryable: kind.default_retryable(),
            kind,
            message: message.into(),
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Classify a model backend failure using the transient heuristic:
    /// network timeouts, connection resets, 5xx, and rate limiting
    /// are retryable; other 4xx are not.
    pub fn model_failure(message: impl Into<String>, status: Option<u16>) -> Self {
        let message = message.into();
        let retryable = match status {
            Some(status) if status >= 500 => true,
            Some(429) => true,
            Some(status) if (400..500).contains(&status) => false,
            _ => true, // network errors, timeouts: no status code, assume transient
        };
        Self {
            kind: ErrorKind::ModelFailure,
            message,
            retryable,
            context: HashMap::new(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::CancelRequested, "cancellation observed at node boundary")
    }

    pub fn budget_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BudgetExhausted, message)
    }

    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PolicyViolation, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_failure_5xx_is_retryable() {
        let err = ErrorRecord::model_failure("server error", Some(503));
        assert!(err.retryable);
    }

    #[test]
    fn model_failure_429_is_retryable() {
        let err = ErrorRecord::model_failure("rate limited", Some(429));
        assert!(err.retryable);
    }

    #[test]
    fn model_failure_4xx_is_not_retryable() {
        let err = ErrorRecord::model_failure("bad request", Some(400));
        assert!(!err.retryable);
    }

    #[test]
    fn model_failure_without_status_is_retryable() {
        let err = ErrorRecord::model_failure("connection reset", None);
        assert!(err.retryable);
    }

    #[test]
    fn terminal_kinds_default_non_retryable() {
        assert!(!ErrorKind::PlanningFailure.default_retryable());
        assert!(!ErrorKind::CancelRequested.default_retryable());
        assert!(!ErrorKind::BudgetExhausted.default_retryable());
        assert!(!ErrorKind::PolicyViolation.default_retryable());
    }
}
