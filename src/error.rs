// Failure taxonomy shared by the upstream client, the mapper and the booking workflow
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FailureKind {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream rejected: {status} - {message}")]
    UpstreamRejected { status: u16, message: String },

    #[error("Mapping degraded: {0}")]
    MappingDegraded(String),
}

impl FailureKind {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        FailureKind::UpstreamRejected {
            status,
            message: message.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::ConfigurationError(_) => "configuration_error",
            FailureKind::Transport(_) => "transport",
            FailureKind::UpstreamRejected { .. } => "upstream_rejected",
            FailureKind::MappingDegraded(_) => "mapping_degraded",
        }
    }

    // Status the routing layer answers with when this failure ends an operation
    pub fn http_status(&self) -> u16 {
        match self {
            FailureKind::ConfigurationError(_) => 400,
            FailureKind::Transport(_) => 502,
            FailureKind::UpstreamRejected { status, .. } if *status >= 400 => *status,
            FailureKind::UpstreamRejected { .. } => 502,
            FailureKind::MappingDegraded(_) => 500,
        }
    }
}

impl From<reqwest::Error> for FailureKind {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FailureKind::rejected(status.as_u16(), err.to_string()),
            None => FailureKind::Transport(err.to_string()),
        }
    }
}

// Errors raised while delivering a notification to a secondary channel
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Channel rejected message: {status} - {message}")]
    Rejected { status: u16, message: String },

    #[error("Dispatch cancelled")]
    Cancelled,
}

impl NotifyError {
    // Only faults below HTTP are retried; an answered request is final whatever its status.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotifyError::Delivery(_))
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Delivery(err.to_string())
    }
}

// Raised when a booking record is asked to move along an edge its lifecycle does not have
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("Illegal booking transition from {from} to {to}")]
    Illegal { from: String, to: String },
}

impl From<TransitionError> for FailureKind {
    fn from(err: TransitionError) -> Self {
        FailureKind::ConfigurationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_rejected_display_carries_status() {
        let kind = FailureKind::rejected(401, "Invalid signature");
        assert_eq!(kind.to_string(), "Upstream rejected: 401 - Invalid signature");
        assert_eq!(kind.label(), "upstream_rejected");
    }

    #[test_case(FailureKind::ConfigurationError("empty id".into()), 400; "#1 bad input")]
    #[test_case(FailureKind::Transport("timeout".into()), 502; "#2 transport")]
    #[test_case(FailureKind::rejected(401, "FAIL_SIGNATURE"), 401; "#3 upstream http status")]
    #[test_case(FailureKind::rejected(200, "NOTFOUND"), 502; "#4 upstream document error")]
    fn test_http_status(kind: FailureKind, expected: u16) {
        assert_eq!(kind.http_status(), expected);
    }

    #[test_case(NotifyError::Delivery("reset".into()), true; "#1 delivery")]
    #[test_case(NotifyError::Rejected { status: 400, message: "can't parse entities".into() }, false; "#2 rejected")]
    #[test_case(NotifyError::NotConfigured("chat".into()), false; "#3 not configured")]
    #[test_case(NotifyError::Cancelled, false; "#4 cancelled")]
    fn test_notify_retryable(err: NotifyError, expected: bool) {
        assert_eq!(err.is_retryable(), expected);
    }
}
