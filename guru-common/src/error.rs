//! Error types shared by the Travel Guru crates.

use thiserror::Error;

/// Result alias over [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can surface at a service boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Webhook request failed authentication
    #[error("Unauthorized webhook: {0}")]
    Unauthorized(String),

    /// Malformed inbound request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Twilio or the language model returned an error
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Upstream call exceeded its deadline
    #[error("Upstream call timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another error with a note on where it happened
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap this error with a note on where it happened.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// HTTP status a handler should answer with.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized(_) => 403,
            Self::BadRequest(_) => 400,
            Self::Upstream(_) => 502,
            Self::Timeout => 504,
            Self::WithContext { source, .. } => source.status_code(),
            Self::Config(_) | Self::Io(_) | Self::Json(_) => 500,
        }
    }
}
