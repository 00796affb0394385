//! Error types shared across the job pipeline.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Why an external tool invocation failed.
#[derive(Debug, thiserror::Error)]
pub enum ToolFailure {
    #[error("exited with code {0}")]
    Exit(i32),
    #[error("terminated by signal")]
    Signal,
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("failed to spawn: {0}")]
    Spawn(std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Workspace allocation failure. Fatal for the request, never retried.
    #[error("workspace allocation failed: {0}")]
    Resource(std::io::Error),

    #[error("file exceeds the {limit_mb} MB limit")]
    PayloadTooLarge { limit_mb: u64 },

    #[error("unsupported file type: {name}")]
    UnsupportedType { name: String },

    #[error("{tool} {reason}")]
    Tool { tool: String, reason: ToolFailure },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::Resource(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::UnsupportedType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::Tool { .. } => StatusCode::BAD_GATEWAY,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
