//! Client error types.

use crate::types::ErrorDocument;

/// Errors produced by the requester and JSON transport.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token error: {0}")]
    Token(#[from] ascflow_token::TokenError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success status with a JSON error envelope.
    #[error("API error {status} from {url}: {body}")]
    Api {
        status: u16,
        url: String,
        errors: ErrorDocument,
        body: String,
    },

    /// Non-success status with a body that is not JSON.
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("unexpected payload from {url}: {detail}")]
    UnexpectedPayload { url: String, detail: String },

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

impl ClientError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Decoded error envelope, when the server sent one.
    pub fn errors(&self) -> Option<&ErrorDocument> {
        match self {
            Self::Api { errors, .. } => Some(errors),
            _ => None,
        }
    }

    /// True when the decoded envelope's first error reports status 500.
    ///
    /// The API occasionally returns these while an asset is still being
    /// processed; callers that poll treat them as "try again".
    pub fn is_transient_server(&self) -> bool {
        self.errors().and_then(ErrorDocument::first_status) == Some(500)
    }
}
