//! Configuration loader
//!
//! Loads configuration from an optional `.env` file followed by the process
//! environment. Every `from_env` has a `from_lookup` twin taking a variable
//! lookup closure so values can be supplied without touching the process
//! environment.

use std::path::{Path, PathBuf};

use super::dto::{BrokerConfig, DatabaseConfig, LoggingConfig, RelayConfigDto, ServerConfigDto};
use super::error::{ConfigError, Result};
use super::validator::validate_server_config;

/// Configuration loader
///
/// This loader handles loading configuration from:
/// 1. .env file (optional)
/// 2. Environment variables
///
/// `dotenv` never overrides variables already present in the environment,
/// so an exported variable wins over the same key in the file.
///
/// # Example
///
/// ```
/// use library_shared::config::ConfigLoader;
///
/// // Without .env file
/// let loader = ConfigLoader::new(None);
///
/// // With .env file
/// let loader = ConfigLoader::new(Some(".env".into()));
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_file_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(env_file_path: Option<PathBuf>) -> Self {
        Self { env_file_path }
    }

    /// Load and validate the server configuration
    ///
    /// # Returns
    ///
    /// `Ok(ServerConfigDto)` if configuration is valid and complete
    /// `Err(ConfigError)` if required configuration is missing or invalid
    pub fn load_server_config(&self) -> Result<ServerConfigDto> {
        if let Some(path) = &self.env_file_path {
            self.load_env_file(path)?;
        }

        let config = ServerConfigDto::from_env()?;
        validate_server_config(&config)?;

        Ok(config)
    }

    fn load_env_file(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ConfigError::EnvFileLoad {
                path: path.to_path_buf(),
                source: dotenv::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path.display()),
                )),
            });
        }

        dotenv::from_path(path).map_err(|e| ConfigError::EnvFileLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }
}

impl Default for ConfigLoader {
    /// Equivalent to `ConfigLoader::new(None)`
    fn default() -> Self {
        Self::new(None)
    }
}

// ============================================================================
// Implementation: ServerConfigDto
// ============================================================================

impl ServerConfigDto {
    /// Build server configuration from environment variables
    ///
    /// # Required Environment Variables
    ///
    /// - `LIBRARY_DATABASE_URL`: PostgreSQL connection string
    /// - `LIBRARY_NATS_URL`: NATS connection URL
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database: DatabaseConfig::from_lookup(&lookup)?,
            broker: BrokerConfig::from_lookup(&lookup)?,
            relay: RelayConfigDto::from_lookup(&lookup)?,
            logging: LoggingConfig::from_lookup(&lookup)?,
        })
    }
}

// ============================================================================
// Implementation: DatabaseConfig
// ============================================================================

impl DatabaseConfig {
    /// # Required Variables
    ///
    /// - `LIBRARY_DATABASE_URL`
    ///
    /// # Optional Variables
    ///
    /// - `LIBRARY_DB_POOL_SIZE`: Default 20
    /// - `LIBRARY_DB_MIN_IDLE`: Default 2
    /// - `LIBRARY_DB_CONNECT_TIMEOUT_SECS`: Default 30
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = required_var(&lookup, "LIBRARY_DATABASE_URL")?;

        Ok(Self {
            url,
            pool_size: parse_optional_var(&lookup, "LIBRARY_DB_POOL_SIZE", 20)?,
            min_idle: parse_optional_var(&lookup, "LIBRARY_DB_MIN_IDLE", 2)?,
            connect_timeout_secs: parse_optional_var(
                &lookup,
                "LIBRARY_DB_CONNECT_TIMEOUT_SECS",
                30,
            )?,
        })
    }
}

// ============================================================================
// Implementation: BrokerConfig
// ============================================================================

impl BrokerConfig {
    /// # Required Variables
    ///
    /// - `LIBRARY_NATS_URL`: comma-separated for clusters
    ///
    /// # Optional Variables
    ///
    /// - `LIBRARY_NATS_CONNECT_TIMEOUT_SECS`: Default 5
    /// - `LIBRARY_NATS_NAME`: Default "library-relay"
    /// - `LIBRARY_BROKER_EXCHANGE`: Default "library.events"
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let urls_str = required_var(&lookup, "LIBRARY_NATS_URL")?;

        let urls: Vec<String> = urls_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if urls.is_empty() {
            return Err(ConfigError::InvalidValue {
                var: "LIBRARY_NATS_URL".to_string(),
                value: urls_str,
            });
        }

        Ok(Self {
            urls,
            connect_timeout_secs: parse_optional_var(
                &lookup,
                "LIBRARY_NATS_CONNECT_TIMEOUT_SECS",
                5,
            )?,
            connection_name: lookup("LIBRARY_NATS_NAME")
                .unwrap_or_else(|| "library-relay".to_string()),
            exchange: lookup("LIBRARY_BROKER_EXCHANGE")
                .unwrap_or_else(|| crate::event_topics::DEFAULT_EXCHANGE.to_string()),
        })
    }
}

// ============================================================================
// Implementation: RelayConfigDto
// ============================================================================

impl RelayConfigDto {
    /// Every variable is optional; see [`RelayConfigDto::default`] for values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            batch_size: parse_optional_var(
                &lookup,
                "LIBRARY_OUTBOX_BATCH_SIZE",
                defaults.batch_size,
            )?,
            poll_interval_ms: parse_optional_var(
                &lookup,
                "LIBRARY_OUTBOX_POLL_INTERVAL_MS",
                defaults.poll_interval_ms,
            )?,
            lease_secs: parse_optional_var(
                &lookup,
                "LIBRARY_OUTBOX_LEASE_SECS",
                defaults.lease_secs,
            )?,
            send_timeout_ms: parse_optional_var(
                &lookup,
                "LIBRARY_OUTBOX_SEND_TIMEOUT_MS",
                defaults.send_timeout_ms,
            )?,
            max_attempts: parse_optional_var(
                &lookup,
                "LIBRARY_OUTBOX_MAX_ATTEMPTS",
                defaults.max_attempts,
            )?,
            backoff_base_ms: parse_optional_var(
                &lookup,
                "LIBRARY_OUTBOX_BACKOFF_BASE_MS",
                defaults.backoff_base_ms,
            )?,
            backoff_max_ms: parse_optional_var(
                &lookup,
                "LIBRARY_OUTBOX_BACKOFF_MAX_MS",
                defaults.backoff_max_ms,
            )?,
            listen_enabled: parse_flag(
                &lookup,
                "LIBRARY_OUTBOX_LISTEN",
                defaults.listen_enabled,
            )?,
        })
    }
}

// ============================================================================
// Implementation: LoggingConfig
// ============================================================================

impl LoggingConfig {
    /// - `RUST_LOG`: Log level (default: "info")
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            level: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn required_var<F>(lookup: &F, var: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            var: var.to_string(),
        })
}

/// Parse optional variable with default value. A present but malformed
/// value is an error rather than a silent fallback.
fn parse_optional_var<F, T>(lookup: &F, var: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
        }),
    }
}

fn parse_flag<F>(lookup: &F, var: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1") | Some("true") => Ok(true),
        Some("0") | Some("false") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: format!("{} (must be 0 or 1)", other),
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("LIBRARY_DATABASE_URL", "postgres://localhost/library"),
            ("LIBRARY_NATS_URL", "nats://localhost:4222"),
        ]
    }

    #[test]
    fn test_config_loader_new() {
        let loader = ConfigLoader::new(None);
        assert!(loader.env_file_path.is_none());

        let loader = ConfigLoader::new(Some(PathBuf::from(".env")));
        assert!(loader.env_file_path.is_some());
    }

    #[test]
    fn test_config_loader_default() {
        let loader = ConfigLoader::default();
        assert!(loader.env_file_path.is_none());
    }

    #[test]
    fn test_missing_env_file_is_reported() {
        let loader = ConfigLoader::new(Some(PathBuf::from("/nonexistent/library.env")));
        let err = loader.load_server_config().unwrap_err();
        assert!(matches!(err, ConfigError::EnvFileLoad { .. }));
    }

    #[test]
    fn test_env_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "LIBRARY_TEST_ENV_FILE_MARKER=loaded").unwrap();

        let loader = ConfigLoader::new(Some(file.path().to_path_buf()));
        loader.load_env_file(file.path()).unwrap();

        assert_eq!(
            std::env::var("LIBRARY_TEST_ENV_FILE_MARKER").unwrap(),
            "loaded"
        );
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ServerConfigDto::from_lookup(lookup_from(&minimal())).unwrap();

        assert_eq!(config.database.pool_size, 20);
        assert_eq!(config.broker.urls, vec!["nats://localhost:4222"]);
        assert_eq!(config.broker.exchange, "library.events");
        assert_eq!(config.relay.batch_size, 100);
        assert_eq!(config.relay.max_attempts, 10);
        assert!(config.relay.listen_enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_database_url() {
        let lookup = lookup_from(&[("LIBRARY_NATS_URL", "nats://localhost:4222")]);
        let err = ServerConfigDto::from_lookup(lookup).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingRequired { ref var } if var == "LIBRARY_DATABASE_URL")
        );
    }

    #[test]
    fn test_missing_nats_url() {
        let lookup = lookup_from(&[("LIBRARY_DATABASE_URL", "postgres://localhost/library")]);
        let err = ServerConfigDto::from_lookup(lookup).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingRequired { ref var } if var == "LIBRARY_NATS_URL")
        );
    }

    #[test]
    fn test_nats_multiple_urls() {
        let lookup = lookup_from(&[(
            "LIBRARY_NATS_URL",
            "nats://nats1:4222, nats://nats2:4222,,nats://nats3:4222",
        )]);
        let config = BrokerConfig::from_lookup(lookup).unwrap();
        assert_eq!(config.urls.len(), 3);
        assert_eq!(config.urls[1], "nats://nats2:4222");
    }

    #[test]
    fn test_relay_overrides() {
        let mut pairs = minimal();
        pairs.extend([
            ("LIBRARY_OUTBOX_BATCH_SIZE", "25"),
            ("LIBRARY_OUTBOX_MAX_ATTEMPTS", "3"),
            ("LIBRARY_OUTBOX_LISTEN", "0"),
            ("LIBRARY_BROKER_EXCHANGE", "catalog.events"),
        ]);
        let config = ServerConfigDto::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(config.relay.batch_size, 25);
        assert_eq!(config.relay.max_attempts, 3);
        assert!(!config.relay.listen_enabled);
        assert_eq!(config.broker.exchange, "catalog.events");
    }

    #[test]
    fn test_malformed_number_fails_fast() {
        let mut pairs = minimal();
        pairs.push(("LIBRARY_OUTBOX_BATCH_SIZE", "lots"));
        let err = ServerConfigDto::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref var, ref value }
                if var == "LIBRARY_OUTBOX_BATCH_SIZE" && value == "lots"
        ));
    }

    #[test]
    fn test_malformed_flag_fails_fast() {
        let lookup = lookup_from(&[("LIBRARY_OUTBOX_LISTEN", "maybe")]);
        assert!(RelayConfigDto::from_lookup(lookup).is_err());
    }
}
