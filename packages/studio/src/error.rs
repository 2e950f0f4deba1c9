//! Error types for the rule studio.
//!
//! Local validation failures never reach the network; everything the
//! backend rejects is carried as [`StudioError::Backend`] with the
//! server's own message.

use thiserror::Error;

/// Generic message shown when a request failed below the HTTP layer.
pub const GENERIC_FAILURE: &str = "Request failed, please try again";

/// Message shown instead of the error banner when the backend answered 401.
pub const UNAUTHORIZED_MESSAGE: &str = "Please log in to manage rules";

#[derive(Debug, Error)]
pub enum StudioError {
    /// Rejected locally before any request was sent.
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    /// The backend answered 401.
    #[error("unauthorized")]
    Unauthorized,

    /// Non-2xx answer with a message extracted from the body.
    #[error("backend error (status {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to parse backend response: {0}")]
    ResponseParse(String),

    #[error("retries exhausted after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StudioError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        StudioError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StudioError::Validation { .. })
    }

    /// Text for a user-facing banner.
    ///
    /// Backend and validation messages are passed through verbatim;
    /// transport and parse failures collapse into [`GENERIC_FAILURE`].
    pub fn user_message(&self) -> String {
        match self {
            StudioError::Validation { message, .. } => message.clone(),
            StudioError::Backend { message, .. } => message.clone(),
            StudioError::Unauthorized => UNAUTHORIZED_MESSAGE.to_string(),
            StudioError::Config(message) => message.clone(),
            StudioError::Io(e) => e.to_string(),
            StudioError::Network(_)
            | StudioError::ResponseParse(_)
            | StudioError::RetriesExhausted { .. } => GENERIC_FAILURE.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StudioError>;
