//! Error types for Prime Brief.

use thiserror::Error;

/// Input field rejected by the validator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Name of the offending field (`topic`, `recipient_email`, ...)
    pub field: &'static str,
    /// Human-readable reason
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Failure talking to the search provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("search unavailable: {message}")]
pub struct SearchError {
    /// HTTP status, when the provider answered at all
    pub status: Option<u16>,
    pub message: String,
    /// Whether the failure is worth another attempt (timeouts, 429, 5xx)
    pub transient: bool,
}

/// Failure talking to the LLM provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("LLM error: {message}")]
pub struct LlmError {
    pub status: Option<u16>,
    pub message: String,
    pub transient: bool,
}

/// Failure handing a message to the SMTP relay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SmtpError {
    pub message: String,
    /// Connection and 4xx failures; 5xx rejections are permanent
    pub transient: bool,
}

/// Errors that can occur during a Prime Brief run.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad user input, never retried
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration missing or malformed
    #[error("configuration error: {0}")]
    Config(String),

    /// Search provider failed after retries
    #[error(transparent)]
    SearchUnavailable(#[from] SearchError),

    /// LLM provider failed after retries
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// No usable sources or findings could be gathered
    #[error("research incomplete: {0}")]
    ResearchIncomplete(String),

    /// Summarizer could not produce a report
    #[error("summarization failed: {0}")]
    SummarizationFailed(String),

    /// SMTP delivery failed
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    /// Maximum agent iterations reached
    #[error("maximum iterations ({0}) reached")]
    MaxIterations(usize),

    /// Agent output did not match its schema or type
    #[error("invalid agent output: {0}")]
    InvalidOutput(String),

    /// Writing the download artifact failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a bounded retry may succeed where this attempt failed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::SearchUnavailable(e) => e.transient,
            Error::Llm(e) => e.transient,
            _ => false,
        }
    }
}

/// Result type for Prime Brief operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_field() {
        let err: Error = ValidationError::new("topic", "Research topic is required").into();
        assert_eq!(
            err.to_string(),
            "invalid input: topic: Research topic is required"
        );
    }

    #[test]
    fn test_transient_classification() {
        let transient = Error::Llm(LlmError {
            status: Some(429),
            message: "rate limited".to_string(),
            transient: true,
        });
        let permanent = Error::SearchUnavailable(SearchError {
            status: Some(403),
            message: "invalid API key".to_string(),
            transient: false,
        });

        assert!(transient.is_transient());
        assert!(!permanent.is_transient());
        assert!(!Error::MaxIterations(5).is_transient());
    }
}
