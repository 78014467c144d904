/// Error types for the HTTP daemon
use atelier_core::{ConfigError, ErrorKind, WorkflowError};
use hyper::StatusCode;
use serde_json::json;
use thiserror::Error;

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Daemon error types
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Missing or invalid caller identity
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// No route for the path
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    /// Known path, unsupported method
    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },

    /// Malformed request body or query
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Failure reported by a workflow operation
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Server error
    #[error("Server error: {0}")]
    ServerError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Request exceeded the configured timeout
    #[error("Operation timed out")]
    Timeout,
}

impl DaemonError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DaemonError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DaemonError::AuthError(_) => StatusCode::UNAUTHORIZED,
            DaemonError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            DaemonError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            DaemonError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DaemonError::Workflow(e) => match e.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::AlreadyExists => StatusCode::CONFLICT,
                ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            DaemonError::ServerError(_) | DaemonError::IoError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            DaemonError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Stable error kind string
    pub fn kind(&self) -> String {
        match self {
            DaemonError::ConfigError(_) => "config".to_string(),
            DaemonError::AuthError(_) => "unauthorized".to_string(),
            DaemonError::RouteNotFound(_) => "not_found".to_string(),
            DaemonError::MethodNotAllowed { .. } => "method_not_allowed".to_string(),
            DaemonError::InvalidRequest(_) => "bad_request".to_string(),
            DaemonError::Workflow(e) => e.kind().to_string(),
            DaemonError::ServerError(_) | DaemonError::IoError(_) => "internal".to_string(),
            DaemonError::Timeout => "timeout".to_string(),
        }
    }

    /// Convert to the JSON error body
    pub fn to_json(&self) -> serde_json::Value {
        let message = match self {
            // Details of internal failures stay in the logs
            DaemonError::ServerError(_) | DaemonError::IoError(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        json!({
            "error": {
                "kind": self.kind(),
                "message": message,
            }
        })
    }
}

impl From<ConfigError> for DaemonError {
    fn from(e: ConfigError) -> Self {
        DaemonError::ConfigError(e.to_string())
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::InvalidRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_errors_map_to_status() {
        let err: DaemonError = WorkflowError::AlreadyExists("project p-1".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.kind(), "already_exists");

        let err: DaemonError = WorkflowError::forbidden("nope").into();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err: DaemonError = WorkflowError::InvalidTransition {
            from: "completed".to_string(),
            to: "pending".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_body_shape() {
        let body = DaemonError::AuthError("missing identity".to_string()).to_json();
        assert_eq!(body["error"]["kind"], "unauthorized");
        assert_eq!(
            body["error"]["message"],
            "Authentication error: missing identity"
        );

        let body = DaemonError::ServerError("socket closed".to_string()).to_json();
        assert_eq!(body["error"]["message"], "Internal server error");
    }
}
