use thiserror::Error;

use crate::auth::AuthError;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Listing {target} returned status {status}: {body}")]
    StatusError {
        target: String,
        status: u16,
        body: String,
    },

    #[error("Rate limited while listing {0}")]
    RateLimited(String),

    #[error("Cycle detected: {id} already appears on path {}", path.join(" -> "))]
    CycleDetected { id: String, path: Vec<String> },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error(transparent)]
    AuthError(#[from] AuthError),
}

impl FetchError {
    /// Transport failures, throttling and server-side errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::StatusError { status, .. } => *status >= 500,
            FetchError::RateLimited(_) => true,
            FetchError::AuthError(e) => e.is_retryable(),
            FetchError::CycleDetected { .. }
            | FetchError::InvalidUrl(_)
            | FetchError::DecodeError(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
