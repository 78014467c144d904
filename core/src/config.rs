/// Configuration for the workflow coordinator.
/// Handles loading, parsing and validation of the `[atelier]` TOML settings.
use crate::catalog::TemplateCatalog;
use crate::errors::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AtelierConfig {
    /// Storage and persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Stage template catalog settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Schedule analysis settings
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Listing pagination limits
    #[serde(default)]
    pub pagination: PaginationConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// sqlx connection URL, e.g. `sqlite://atelier.db`
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://atelier.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

/// Catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogConfig {
    /// Optional TOML file with template sets; the built-in set is used otherwise
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Version to activate instead of the file's own choice
    #[serde(default)]
    pub active_version: Option<String>,
}

/// Analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Effort assumed for tasks without an estimate
    #[serde(default = "default_estimated_hours")]
    pub default_estimated_hours: f64,

    /// Tasks due within this many days are schedule-sensitive
    #[serde(default = "default_due_soon_window_days")]
    pub due_soon_window_days: i64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            default_estimated_hours: default_estimated_hours(),
            due_soon_window_days: default_due_soon_window_days(),
        }
    }
}

fn default_estimated_hours() -> f64 {
    8.0
}

fn default_due_soon_window_days() -> i64 {
    7
}

/// Pagination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_per_page")]
    pub default_per_page: u32,

    #[serde(default = "default_max_per_page")]
    pub max_per_page: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_per_page: default_per_page(),
            max_per_page: default_max_per_page(),
        }
    }
}

fn default_per_page() -> u32 {
    20
}

fn default_max_per_page() -> u32 {
    100
}

impl PaginationConfig {
    /// Clamp a requested page size into `1..=max_per_page`
    pub fn per_page(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_per_page)
            .clamp(1, self.max_per_page.max(1))
    }
}

impl AtelierConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AtelierConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load from a TOML file or use defaults
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                debug!("using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.storage.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.database_url must not be empty".to_string(),
            ));
        }
        if self.storage.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "storage.max_connections must be greater than 0".to_string(),
            ));
        }
        let hours = self.analyzer.default_estimated_hours;
        if hours.is_nan() || hours <= 0.0 {
            return Err(ConfigError::Invalid(
                "analyzer.default_estimated_hours must be positive".to_string(),
            ));
        }
        if self.analyzer.due_soon_window_days < 0 {
            return Err(ConfigError::Invalid(
                "analyzer.due_soon_window_days must not be negative".to_string(),
            ));
        }
        if self.pagination.default_per_page > self.pagination.max_per_page {
            return Err(ConfigError::Invalid(
                "pagination.default_per_page must be <= pagination.max_per_page".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the template catalog described by this configuration
    pub fn build_catalog(&self) -> ConfigResult<TemplateCatalog> {
        let mut catalog = match &self.catalog.path {
            Some(path) => TemplateCatalog::load(path)?,
            None => TemplateCatalog::default(),
        };
        if let Some(version) = &self.catalog.active_version {
            catalog.activate(version)?;
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AtelierConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.analyzer.default_estimated_hours, 8.0);
        assert_eq!(config.analyzer.due_soon_window_days, 7);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AtelierConfig = toml::from_str(
            r#"
            [storage]
            database_url = "sqlite::memory:"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.database_url, "sqlite::memory:");
        assert_eq!(config.storage.max_connections, 5);
        assert_eq!(config.pagination.max_per_page, 100);
    }

    #[test]
    fn test_validation_rejects_zero_connections() {
        let mut config = AtelierConfig::default();
        config.storage.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unusable_default_hours() {
        for hours in [0.0, -4.0, f64::NAN] {
            let mut config = AtelierConfig::default();
            config.analyzer.default_estimated_hours = hours;
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_per_page_clamped() {
        let pagination = PaginationConfig::default();
        assert_eq!(pagination.per_page(None), 20);
        assert_eq!(pagination.per_page(Some(0)), 1);
        assert_eq!(pagination.per_page(Some(500)), 100);
    }

    #[test]
    fn test_build_catalog_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[sets]]
            version = "mini"

            [[sets.stages]]
            key = "consultation"
            stage_name = "Consultation"
            sort_order = 1
            typical_duration_days = 1
            "#
        )
        .unwrap();

        let mut config = AtelierConfig::default();
        config.catalog.path = Some(file.path().to_path_buf());
        let catalog = config.build_catalog().unwrap();
        assert_eq!(catalog.active().version, "mini");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = AtelierConfig::load(Path::new("/nonexistent/atelier.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
