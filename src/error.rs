//! Error handling for the occupancy poller

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame fetch did not complete within its timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Connection refused, reset, DNS failure, truncated body...
    #[error("Transport error: {0}")]
    Transport(String),

    /// Camera answered with a non-success status
    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// Bytes could not be interpreted as an image
    #[error("Decode error: {0}")]
    Decode(String),

    /// Vision back-end failure (not the camera's fault)
    #[error("Estimator error: {0}")]
    Estimator(String),

    /// Time-series write failure
    #[error("Metric sink error: {0}")]
    Sink(String),

    /// Reboot command failure
    #[error("Reboot error: {0}")]
    Reboot(String),

    /// Alert delivery failure
    #[error("Notify error: {0}")]
    Notify(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify a reqwest failure against a camera endpoint.
    pub fn from_fetch(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(format!("{}: {}", url, e))
        } else if let Some(status) = e.status() {
            Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            Error::Transport(format!("{}: {}", url, e))
        }
    }

    /// Whether another fetch attempt in the same cycle may succeed.
    ///
    /// Only network-level failures qualify. Decode and back-end failures are
    /// final for the current cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Transport(_) | Error::HttpStatus { .. } => true,
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Error::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            Error::Timeout(_)
            | Error::Transport(_)
            | Error::HttpStatus { .. }
            | Error::Http(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Error::Decode(_) | Error::Estimator(_) => (StatusCode::BAD_GATEWAY, "ESTIMATOR_ERROR"),
            Error::Sink(_) => (StatusCode::BAD_GATEWAY, "SINK_ERROR"),
            Error::Reboot(_) | Error::Notify(_) => (StatusCode::BAD_GATEWAY, "DEVICE_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let message = self.to_string();

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
