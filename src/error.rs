//! Failure taxonomy shared by every step handler.

use thiserror::Error;

/// Why a step failed.
#[derive(Debug, Error)]
pub enum StepError {
    /// Network-level failure of the HTTP call.
    #[error("transport error: {0}")]
    Transport(String),
    /// A step needed a response but the last request produced none.
    #[error("No HTTP response received from\nRequest:  {method} {url}{}", cause_suffix(.cause))]
    NoResponse {
        method: String,
        url: String,
        cause: Option<String>,
    },
    #[error("{0}")]
    Assertion(String),
    /// Extraction target not found in the response.
    #[error("lookup failed: {0}")]
    Lookup(String),
    #[error("token verification failed: {0}")]
    Verification(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A request body fragment did not parse as a JSON object.
    #[error("invalid request body: {0}")]
    Template(String),
    #[error("no step matches: {0}")]
    UnknownStep(String),
}

fn cause_suffix(cause: &Option<String>) -> String {
    cause
        .as_deref()
        .map(|c| format!("\nError:    {c}"))
        .unwrap_or_default()
}

/// Return type of every step handler.
pub type StepResult<T = ()> = std::result::Result<T, StepError>;

impl StepError {
    pub(crate) fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }

    pub(crate) fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_response_names_request() {
        let err = StepError::NoResponse {
            method: "GET".into(),
            url: "/api/status".into(),
            cause: None,
        };
        assert_eq!(
            err.to_string(),
            "No HTTP response received from\nRequest:  GET /api/status"
        );
    }

    #[test]
    fn test_no_response_includes_cause() {
        let err = StepError::NoResponse {
            method: "POST".into(),
            url: "/login".into(),
            cause: Some("connection refused".into()),
        };
        assert!(err.to_string().ends_with("\nError:    connection refused"));
    }

    #[test]
    fn test_lookup_variant_format() {
        let err = StepError::lookup("no link with rel 'self'");
        assert_eq!(err.to_string(), "lookup failed: no link with rel 'self'");
    }
}
