//! Configuration loading and constants.
//!
//! Loads worker configuration from TOML files and defines constants for
//! listener timeouts, the port scan window, ACME directories, logging format,
//! and default paths. `WorkerConfig` is the root configuration struct; it is
//! built once at startup and only read afterwards.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::mode::{Environment, ListenPolicy};

// =============================================================================
// Listener Timeouts
// =============================================================================
// Bound how long a slow or stalled client can hold a connection.

/// Time allowed for a client to send request headers
pub const HTTP_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for producing a response
pub const HTTP_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connections with no read or write activity for this long are closed
pub const HTTP_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// Port Binding
// =============================================================================

/// Number of candidate ports scanned above the configured port.
/// Lets several workers share one host without external port allocation.
pub const PORT_WINDOW_LEN: u16 = 100;

// =============================================================================
// ACME
// =============================================================================

/// Let's Encrypt production directory
pub const LETS_ENCRYPT_PRODUCTION_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory (untrusted certificates, relaxed rate limits)
pub const LETS_ENCRYPT_STAGING_URL: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Default on-disk cache for issued certificates and the ACME account key
pub const DEFAULT_CERT_CACHE_DIR: &str = "assets/cache";

// =============================================================================
// Shutdown
// =============================================================================

/// Deadline given to the monitoring server when the worker shuts down
pub const MONITORING_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "worker_net=debug";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Deployment environment (production, staging, development)
    #[serde(default)]
    pub environment: Environment,
    /// Network listener configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Monitoring endpoint configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    /// First port of the HTTP scan window
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    /// First port of the HTTPS scan window
    #[serde(default = "ServerConfig::default_https_port")]
    pub https_port: u16,
    /// Static certificate chain (PEM). Empty means automatic certificates.
    #[serde(default)]
    pub https_chain: String,
    /// Static private key (PEM). Empty means automatic certificates.
    #[serde(default)]
    pub https_key: String,
    #[serde(default)]
    pub acme: AcmeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            https_port: Self::default_https_port(),
            https_chain: String::new(),
            https_key: String::new(),
            acme: AcmeConfig::default(),
        }
    }
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        9000
    }

    fn default_https_port() -> u16 {
        443
    }

    /// Check if a static certificate was asked for (chain or key set).
    /// Automatic certificates are only used when both are empty.
    pub fn wants_static_certificate(&self) -> bool {
        !self.https_chain.is_empty() || !self.https_key.is_empty()
    }

    /// Check if a complete static certificate pair is configured
    pub fn has_static_certificate(&self) -> bool {
        !self.https_chain.is_empty() && !self.https_key.is_empty()
    }
}

/// Automatic certificate settings
#[derive(Debug, Clone, Deserialize)]
pub struct AcmeConfig {
    /// Hostnames certificates may be issued for
    #[serde(default)]
    pub domains: Vec<String>,
    /// Contact address registered with the ACME account
    pub email: Option<String>,
    #[serde(default = "AcmeConfig::default_cache_dir")]
    pub cache_dir: String,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            email: None,
            cache_dir: Self::default_cache_dir(),
        }
    }
}

impl AcmeConfig {
    fn default_cache_dir() -> String {
        DEFAULT_CERT_CACHE_DIR.to_string()
    }
}

/// Monitoring endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "MonitoringConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "MonitoringConfig::default_port")]
    pub port: u16,
    /// Path prefix for monitoring routes (e.g. "/worker")
    #[serde(default)]
    pub url_prefix: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            port: Self::default_port(),
            url_prefix: String::new(),
        }
    }
}

impl MonitoringConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_port() -> u16 {
        6601
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }
}

impl WorkerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that only matter for the resolved policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.listen_policy() != ListenPolicy::TlsWithRedirect {
            return Ok(());
        }

        if self.server.wants_static_certificate() {
            if !self.server.has_static_certificate() {
                return Err(ConfigError::Validation(
                    "server.https_chain and server.https_key must be set together".to_string(),
                ));
            }
            return Ok(());
        }

        if self.server.acme.domains.is_empty() {
            return Err(ConfigError::Validation(format!(
                "environment '{}' requires TLS: set server.https_chain/https_key or list server.acme.domains",
                self.environment
            )));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
