pub mod gemini;
pub mod mock;
pub mod ollama;
pub mod parser;
pub mod prompt;
pub mod types;

pub use gemini::*;
pub use mock::*;
pub use ollama::*;
pub use parser::*;
pub use prompt::*;
pub use types::*;

use thiserror::Error;

/// Failure of a single `(model, prompt)` generation call.
///
/// The variants are the retry classes the fallback selector acts on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Quota exhausted for {model}: {message}")]
    QuotaExhausted { model: String, message: String },

    #[error("Model {model} not found")]
    NotFound { model: String },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Generation failed: {0}")]
    Other(String),
}

impl GenerationError {
    /// Map a non-success HTTP response to a retry class.
    ///
    /// Body markers are checked as well because some gateways return 400/500
    /// wrappers around the upstream status.
    pub fn from_status(model: &str, status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(300).collect();
        if status == 404 || body.contains("NOT_FOUND") {
            return Self::NotFound {
                model: model.to_string(),
            };
        }
        if status == 503 || body.contains("UNAVAILABLE") {
            return Self::Unavailable(format!("status {status}: {snippet}"));
        }
        if status == 429 {
            if body.to_ascii_lowercase().contains("quota") {
                return Self::QuotaExhausted {
                    model: model.to_string(),
                    message: snippet,
                };
            }
            return Self::RateLimited(snippet);
        }
        Self::Other(format!("status {status}: {snippet}"))
    }

    /// Map a transport-level reqwest failure.
    ///
    /// The request URL is dropped from the message; it may carry credentials.
    pub fn from_transport(base_url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Unavailable(format!("request to {base_url} timed out"))
        } else if err.is_connect() {
            Self::Other(format!("cannot connect to {base_url}"))
        } else {
            Self::Other(format!("request to {base_url} failed: {}", err.without_url()))
        }
    }

    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::NotFound { .. } => "not_found",
            Self::Unavailable(_) => "unavailable",
            Self::RateLimited(_) => "rate_limited",
            Self::EmptyResponse => "empty_response",
            Self::Other(_) => "other",
        }
    }
}

/// Model output that could not be turned into records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Model output is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Model output is JSON but not an array")]
    NotAnArray,
}
