//! Configuration loading and resolution
//!
//! Config file location follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. `RECON_CONFIG` environment variable
//! 3. `<config_dir>/recon-gateway/config.toml`
//! 4. Compiled defaults (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "RECON_CONFIG";

/// Top-level gateway configuration (`config.toml`)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    pub http: HttpConfig,
    /// Per-source tables, keyed by data source name (`[datasources.solr]`)
    pub datasources: HashMap<String, DataSourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8182,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Result cache settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entries older than this are dropped by the next sweep
    pub lifetime_secs: u64,
    /// Entry bound enforced at sweep time
    pub max_size: usize,
    /// Wake interval of the background sweep
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lifetime_secs: 1800,
            max_size: 10_000,
            sweep_interval_secs: 60,
        }
    }
}

/// Worker pool sizing and hysteresis settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub initial_size: usize,
    pub shrink_cooldown_secs: u64,
    pub grow_cooldown_secs: u64,
    pub reset_cooldown_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 4,
            shrink_cooldown_secs: 30,
            grow_cooldown_secs: 600,
            reset_cooldown_secs: 3600,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Outbound HTTP settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Delay before the single retry round of a batch
    pub retry_delay_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 20,
            read_timeout_secs: 20,
            retry_delay_ms: 1500,
            user_agent: concat!("recon-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Strategy for a name field that holds several values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiValueStrategy {
    /// Join every value with the configured delimiter
    #[default]
    Concat,
    /// Keep only the first value
    First,
}

/// One `[datasources.<name>]` table
///
/// Keys not used by a given source are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    /// Display name override
    pub name: Option<String>,
    pub enabled: bool,
    /// Query URL template (`{{QUERY}}`, `{{ROWS}}`)
    pub url: Option<String>,
    /// Document view URL template (`{{id}}`)
    pub url_document: Option<String>,
    pub field_id: Option<String>,
    pub field_name: Option<String>,
    pub field_name_multivalue_strategy: MultiValueStrategy,
    pub field_name_multivalue_delimiter: String,
    pub nametype_id: Option<String>,
    pub nametype_name: Option<String>,
    /// Overrides `[pool] initial_size` for this source
    pub pool_size: Option<usize>,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            name: None,
            enabled: true,
            url: None,
            url_document: None,
            field_id: None,
            field_name: None,
            field_name_multivalue_strategy: MultiValueStrategy::default(),
            field_name_multivalue_delimiter: ", ".to_string(),
            nametype_id: None,
            nametype_name: None,
            pool_size: None,
        }
    }
}

impl GatewayConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Resolve and load configuration following the documented priority order
    ///
    /// An explicitly named file (CLI or env) must exist and parse. The
    /// platform default location is optional.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            info!(path = %path.display(), "Loading config from command line argument");
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            info!(path = %path.display(), "Loading config from {}", CONFIG_ENV_VAR);
            return Self::from_file(&path);
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                info!(path = %path.display(), "Loading config from default location");
                return Self::from_file(&path);
            }
            debug!(path = %path.display(), "No config file at default location");
        }

        info!("Using built-in configuration defaults");
        Ok(Self::default())
    }

    /// Settings table for one data source (defaults when absent)
    pub fn datasource(&self, name: &str) -> DataSourceConfig {
        self.datasources.get(name).cloned().unwrap_or_default()
    }
}

/// Platform config file location (`~/.config/recon-gateway/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("recon-gateway").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.cache.lifetime_secs, 1800);
        assert_eq!(config.cache.max_size, 10_000);
        assert_eq!(config.cache.sweep_interval_secs, 60);
        assert_eq!(config.pool.initial_size, 4);
        assert_eq!(config.pool.shrink_cooldown_secs, 30);
        assert_eq!(config.pool.grow_cooldown_secs, 600);
        assert_eq!(config.pool.reset_cooldown_secs, 3600);
        assert_eq!(config.http.retry_delay_ms, 1500);
        assert_eq!(config.http.connect_timeout_secs, 20);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [cache]
            lifetime_secs = 60

            [server]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.lifetime_secs, 60);
        assert_eq!(config.cache.max_size, 10_000);
        assert!(config.cache.enabled);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_datasource_tables() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [datasources.solr]
            name = "Library Catalog"
            url = "http://localhost:8983/solr/select?q={{QUERY}}&rows={{ROWS}}"
            field_id = "id"
            field_name = "title_display"
            field_name_multivalue_strategy = "first"
            "#,
        )
        .unwrap();

        let solr = config.datasource("solr");
        assert_eq!(solr.name.as_deref(), Some("Library Catalog"));
        assert_eq!(solr.field_name_multivalue_strategy, MultiValueStrategy::First);
        assert_eq!(solr.field_name_multivalue_delimiter, ", ");

        let missing = config.datasource("orcid");
        assert!(missing.enabled);
        assert!(missing.url.is_none());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = GatewayConfig::from_toml_str("[cache\nlifetime_secs = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    #[serial]
    fn test_load_prefers_cli_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pool]\ninitial_size = 2").unwrap();

        std::env::remove_var(CONFIG_ENV_VAR);
        let config = GatewayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.pool.initial_size, 2);
    }

    #[test]
    #[serial]
    fn test_load_from_env_var() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http]\nretry_delay_ms = 10").unwrap();

        std::env::set_var(CONFIG_ENV_VAR, file.path());
        let config = GatewayConfig::load(None).unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.http.retry_delay_ms, 10);
    }

    #[test]
    #[serial]
    fn test_load_missing_explicit_file_fails() {
        std::env::remove_var(CONFIG_ENV_VAR);
        let result = GatewayConfig::load(Some(Path::new("/nonexistent/recon/config.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
