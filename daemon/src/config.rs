/// Daemon configuration
use crate::errors::{DaemonError, DaemonResult};
use atelier_core::AtelierConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_JWT_SECRET: &str = "default-secret-change-in-production";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Storage, catalog, analyzer and pagination settings
    #[serde(default)]
    pub atelier: AtelierConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub http_addr: String,
    /// HTTP server port
    pub http_port: u16,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            http_addr: "127.0.0.1".to_string(),
            http_port: 8080,
            request_timeout_secs: 30,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require JWT bearer tokens; gateway identity headers are trusted otherwise
    pub enabled: bool,
    /// JWT secret key
    pub jwt_secret: String,
    /// Token expiry in seconds
    pub token_expiry_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            enabled: false,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            token_expiry_secs: 3600,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// `pretty` or `compact`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> DaemonResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DaemonError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content)
            .map_err(|e| DaemonError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Load from TOML file or use defaults
    pub fn load_or_default(path: Option<&Path>) -> DaemonResult<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> DaemonResult<()> {
        if self.server.http_port == 0 {
            return Err(DaemonError::ConfigError(
                "http_port must be non-zero".to_string(),
            ));
        }

        if self.server.request_timeout_secs == 0 {
            return Err(DaemonError::ConfigError(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "compact") {
            return Err(DaemonError::ConfigError(format!(
                "logging.format must be pretty or compact, got {}",
                self.logging.format
            )));
        }

        if self.auth.enabled && self.auth.jwt_secret == DEFAULT_JWT_SECRET {
            return Err(DaemonError::ConfigError(
                "JWT secret must be changed from default when auth is enabled".to_string(),
            ));
        }

        self.atelier.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_port_check() {
        let mut config = DaemonConfig::default();
        config.server.http_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_secret_rejected_with_auth() {
        let mut config = DaemonConfig::default();
        config.auth.enabled = true;
        assert!(config.validate().is_err());

        config.auth.jwt_secret = "a-real-secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_embedded_core_config_validated() {
        let mut config = DaemonConfig::default();
        config.atelier.storage.max_connections = 0;
        assert!(matches!(
            config.validate(),
            Err(DaemonError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [server]
            http_port = 9000

            [atelier.storage]
            database_url = "sqlite::memory:"
            "#
        )
        .unwrap();

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.server.http_port, 9000);
        assert_eq!(config.server.http_addr, "127.0.0.1");
        assert_eq!(config.atelier.storage.database_url, "sqlite::memory:");
        assert!(!config.auth.enabled);
    }
}
