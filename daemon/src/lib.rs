/// Atelier Daemon: HTTP surface for stage workflow coordination
/// Serves instantiation, stage updates, assignment and schedule analytics over JSON
pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use auth::{AuthManager, Claims};
pub use config::{AuthConfig, DaemonConfig, LoggingConfig, ServerConfig};
pub use errors::{DaemonError, DaemonResult};
pub use handlers::ApiHandlers;
pub use server::{ApiServer, Route};
pub use types::{AssignRequest, AssignedQuery, HealthResponse, UpdateWorkflowRequest};

/// Daemon version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
