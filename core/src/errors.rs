/// Error types for the Atelier workflow coordinator.
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::error;

/// Stable error kind surfaced to callers of every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    AlreadyExists,
    BadRequest,
    Conflict,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Forbidden => write!(f, "forbidden"),
            ErrorKind::AlreadyExists => write!(f, "already_exists"),
            ErrorKind::BadRequest => write!(f, "bad_request"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Core error type for workflow operations.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// Get the stable kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::NotFound(_) => ErrorKind::NotFound,
            WorkflowError::Forbidden(_) => ErrorKind::Forbidden,
            WorkflowError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            WorkflowError::BadRequest(_) => ErrorKind::BadRequest,
            WorkflowError::InvalidTransition { .. } => ErrorKind::BadRequest,
            WorkflowError::DependencyCycle(_) => ErrorKind::Conflict,
            WorkflowError::Conflict(_) => ErrorKind::Conflict,
            WorkflowError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        WorkflowError::NotFound(format!("{} {}", what, id))
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        WorkflowError::Forbidden(msg.into())
    }
}

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Core error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown reference: {0}")]
    InvalidReference(String),

    #[error("Dependency cycle: {0}")]
    Cycle(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::UniqueViolation(db.message().to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for WorkflowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => WorkflowError::NotFound(msg),
            StoreError::UniqueViolation(msg) => WorkflowError::AlreadyExists(msg),
            StoreError::Conflict(msg) => WorkflowError::Conflict(msg),
            StoreError::InvalidReference(msg) => WorkflowError::BadRequest(msg),
            StoreError::Cycle(msg) => WorkflowError::DependencyCycle(msg),
            other => {
                error!(error = %other, "store failure");
                WorkflowError::Internal("unexpected store failure".to_string())
            }
        }
    }
}

/// Error type for dependency graph operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    #[error("Self-loop detected: {0}")]
    SelfLoop(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node: {0}")]
    DuplicateNode(String),
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

impl From<GraphError> for WorkflowError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::CycleDetected(msg) => WorkflowError::DependencyCycle(msg),
            GraphError::SelfLoop(id) => {
                WorkflowError::DependencyCycle(format!("{} depends on itself", id))
            }
            GraphError::NodeNotFound(id) => WorkflowError::NotFound(id),
            GraphError::DuplicateNode(id) => {
                WorkflowError::BadRequest(format!("duplicate node {}", id))
            }
        }
    }
}

impl From<GraphError> for StoreError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::CycleDetected(path) => StoreError::Cycle(path),
            GraphError::SelfLoop(id) => StoreError::Cycle(format!("{} depends on itself", id)),
            GraphError::NodeNotFound(id) => StoreError::InvalidReference(id),
            GraphError::DuplicateNode(id) => {
                StoreError::UniqueViolation(format!("duplicate node {}", id))
            }
        }
    }
}

/// Error type for configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
