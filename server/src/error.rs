//! Error types for the Studio server.
//!
//! Each module owns a `thiserror` enum for its own failure modes
//! ([`crate::config::ConfigError`], [`crate::store::StoreError`],
//! [`crate::tracker::TrackerError`], [`crate::workspace::WorkspaceError`],
//! [`crate::applog::LogError`], [`crate::auth::AuthError`],
//! [`crate::scrape::ScrapeError`]). Route handlers
//! return [`ServerError`], which every module error converts into and which
//! renders itself as a JSON error response.
//!
//! # Example
//!
//! ```rust
//! use axum::http::StatusCode;
//! use studio_server::error::ServerError;
//!
//! let err = ServerError::validation("title is required");
//! assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
//! assert!(err.is_client_error());
//! ```

use std::error::Error;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::applog::LogError;
use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::scrape::ScrapeError;
use crate::store::StoreError;
use crate::tracker::TrackerError;
use crate::workspace::WorkspaceError;

/// Top-level error type for the Studio server.
///
/// # Error Categories
///
/// - **Client errors**: validation, authentication, unknown records, paths
///   outside the workspace
/// - **Server errors**: configuration, filesystem, store and upstream failures
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error during server initialization.
    Config(ConfigError),

    /// Request body or query failed validation.
    Validation(String),

    /// Missing or invalid credentials.
    Auth(String),

    /// The referenced record or file does not exist.
    NotFound(String),

    /// A file path escapes the workspace root.
    OutOfScope,

    /// A filesystem operation failed.
    Io(String),

    /// A remote page could not be fetched.
    Upstream(String),

    /// Unexpected internal failure.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Validation(msg) => write!(f, "{msg}"),
            Self::Auth(msg) => write!(f, "{msg}"),
            Self::NotFound(msg) => write!(f, "{msg}"),
            Self::OutOfScope => write!(f, "path must stay within the workspace"),
            Self::Io(msg) => write!(f, "{msg}"),
            Self::Upstream(msg) => write!(f, "{msg}"),
            Self::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl ServerError {
    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a new authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Creates a new not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::OutOfScope => StatusCode::FORBIDDEN,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for the JSON body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "server_error",
            Self::Validation(_) => "invalid_request",
            Self::Auth(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::OutOfScope => "out_of_scope",
            Self::Io(_) => "io_error",
            Self::Upstream(_) => "upstream_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Returns `true` if this error indicates a client-side problem.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Auth(_) | Self::NotFound(_) | Self::OutOfScope
        )
    }

    /// Returns `true` if this error indicates a server-side problem.
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<TrackerError> for ServerError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(_) => Self::NotFound("Task not found.".to_string()),
            TrackerError::Store(err) => err.into(),
        }
    }
}

impl From<WorkspaceError> for ServerError {
    fn from(err: WorkspaceError) -> Self {
        if err.is_out_of_scope() {
            Self::OutOfScope
        } else if err.is_not_found() {
            Self::NotFound(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl From<LogError> for ServerError {
    fn from(err: LogError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<ScrapeError> for ServerError {
    fn from(err: ScrapeError) -> Self {
        match err {
            ScrapeError::InvalidUrl => Self::Validation(err.to_string()),
            ScrapeError::Configuration(_) => Self::Internal(err.to_string()),
            ScrapeError::UpstreamStatus(_) | ScrapeError::Timeout(_) | ScrapeError::Request(_) => {
                Self::Upstream(err.to_string())
            }
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err.to_string())
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Request failed");
        }
        let body = ErrorResponse::new(self.to_string()).with_code(self.code());
        (status, Json(body)).into_response()
    }
}

/// A specialized Result type for route handlers.
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ServerError::validation("title is required");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "title is required");
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn tracker_not_found_maps_to_404() {
        let err: ServerError = TrackerError::NotFound(9).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Task not found.");
    }

    #[test]
    fn store_not_found_maps_to_404_and_others_to_500() {
        let err: ServerError = StoreError::NotFound {
            entity: "client",
            id: 3,
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "client 3 not found");

        let err: ServerError = StoreError::Poisoned.into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn workspace_errors_map_by_kind() {
        let escape: ServerError = WorkspaceError::OutOfScope {
            requested: "../etc/passwd".to_string(),
        }
        .into();
        assert_eq!(escape.status_code(), StatusCode::FORBIDDEN);
        assert!(!escape.to_string().contains("etc"));

        let missing: ServerError = WorkspaceError::Io {
            path: "a.txt".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        }
        .into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let denied: ServerError = WorkspaceError::Io {
            path: "a.txt".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert_eq!(denied.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(denied.to_string(), "a.txt: denied");
    }

    #[test]
    fn auth_error_maps_to_401() {
        let err: ServerError = AuthError::InvalidPasscode.into();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn scrape_errors_map_to_400_and_502() {
        let bad: ServerError = ScrapeError::InvalidUrl.into();
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(bad.to_string(), "Valid http/https URL is required.");

        let upstream: ServerError = ScrapeError::UpstreamStatus(404).into();
        assert_eq!(upstream.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(upstream.code(), "upstream_error");
        assert!(upstream.is_server_error());
    }

    #[test]
    fn client_and_server_error_partition() {
        assert!(ServerError::OutOfScope.is_client_error());
        assert!(ServerError::not_found("x").is_client_error());
        assert!(ServerError::internal("x").is_server_error());
        assert!(ServerError::Io("x".to_string()).is_server_error());
        assert!(ServerError::Config(ConfigError::MissingEnvVar("X".to_string())).is_server_error());
    }

    #[test]
    fn config_error_is_source() {
        let err = ServerError::Config(ConfigError::MissingEnvVar("PORT".to_string()));
        assert!(err.source().is_some());
        assert!(ServerError::OutOfScope.source().is_none());
    }

    #[tokio::test]
    async fn into_response_writes_json_body() {
        let response = ServerError::OutOfScope.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "path must stay within the workspace");
        assert_eq!(value["code"], "out_of_scope");
    }
}
