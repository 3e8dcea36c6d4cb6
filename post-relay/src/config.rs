//! Configuration loading for the relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable consulted when `[server] session_secret` is absent.
pub const SESSION_SECRET_ENV: &str = "BLINDPOST_SESSION_SECRET";

/// Shortest session secret accepted, in decoded bytes. 64 is recommended.
const MIN_SESSION_SECRET_LEN: usize = 32;

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Federation configuration.
    pub federation: FederationConfig,
    /// Long-poll configuration.
    pub longpoll: LongpollConfig,
    /// Rate limiting configuration.
    pub limits: LimitsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Domain or IP federation peers reach this server at (default: localhost).
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Base64 session-token secret. When absent, the
    /// `BLINDPOST_SESSION_SECRET` environment variable is consulted.
    pub session_secret: Option<String>,
}

impl ServerConfig {
    /// Resolve the session-token secret from the config file or environment.
    ///
    /// # Errors
    ///
    /// Returns an error if no secret is configured, it is not valid base64,
    /// or it decodes to fewer than 32 bytes.
    pub fn resolve_session_secret(&self) -> Result<Vec<u8>, ConfigError> {
        let encoded = match &self.session_secret {
            Some(value) => value.clone(),
            None => std::env::var(SESSION_SECRET_ENV).map_err(|_| {
                ConfigError::Invalid(format!(
                    "session secret missing: set [server] session_secret or {SESSION_SECRET_ENV}"
                ))
            })?,
        };
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| ConfigError::Invalid("session secret is not valid base64".to_string()))?;
        if bytes.len() < MIN_SESSION_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "session secret must decode to at least {MIN_SESSION_SECRET_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Maximum decoded blob size on the generic relay path (default: 8MB).
    #[serde(default = "default_max_blob_len")]
    pub max_blob_len: usize,
}

/// Federation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Enable relaying to and from peer servers (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Request timeout for peer servers in seconds (default: 15).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Domains never accepted as federation targets or origins.
    #[serde(default)]
    pub blacklisted_domains: Vec<String>,
    /// CIDR networks never accepted as federation targets or origins
    /// (default: RFC-private and reserved ranges).
    #[serde(default = "default_blacklisted_networks")]
    pub blacklisted_networks: Vec<String>,
}

/// Long-poll configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LongpollConfig {
    /// Drain attempts per long-poll request (default: 30).
    #[serde(default = "default_longpoll_attempts")]
    pub attempts: u32,
    /// Pause between drain attempts in milliseconds (default: 1000).
    #[serde(default = "default_longpoll_interval_ms")]
    pub interval_ms: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Global request budget per second across all callers (default: 200).
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,
    /// Per-identity submission budget per minute (default: 120).
    #[serde(default = "default_submissions_per_minute")]
    pub submissions_per_minute: u32,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_domain() -> String {
    "localhost".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("relay.db")
}

fn default_max_blob_len() -> usize {
    8 * 1024 * 1024 // 8MB
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_blacklisted_networks() -> Vec<String> {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.168.0.0/16",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_longpoll_attempts() -> u32 {
    30
}

fn default_longpoll_interval_ms() -> u64 {
    1000
}

fn default_global_requests_per_second() -> u32 {
    200
}

fn default_submissions_per_minute() -> u32 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: default_bind_address(),
                domain: default_domain(),
                session_secret: None,
            },
            storage: StorageConfig {
                database: default_database_path(),
                max_blob_len: default_max_blob_len(),
            },
            federation: FederationConfig {
                enabled: false,
                request_timeout_secs: default_request_timeout_secs(),
                blacklisted_domains: Vec::new(),
                blacklisted_networks: default_blacklisted_networks(),
            },
            longpoll: LongpollConfig {
                attempts: default_longpoll_attempts(),
                interval_ms: default_longpoll_interval_ms(),
            },
            limits: LimitsConfig {
                global_requests_per_second: default_global_requests_per_second(),
                submissions_per_minute: default_submissions_per_minute(),
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A configured value is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.server.domain, "localhost");
        assert!(!config.federation.enabled);
        assert_eq!(config.longpoll.attempts, 30);
        assert_eq!(config.storage.max_blob_len, 8 * 1024 * 1024);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:9000"
domain = "relay.example.org"

[storage]
database = "/data/relay.db"
max_blob_len = 2097152

[federation]
enabled = true
blacklisted_domains = ["evil.example"]

[longpoll]
attempts = 10
interval_ms = 250

[limits]
submissions_per_minute = 30
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.server.domain, "relay.example.org");
        assert_eq!(config.storage.database, PathBuf::from("/data/relay.db"));
        assert_eq!(config.storage.max_blob_len, 2097152);
        assert!(config.federation.enabled);
        assert_eq!(config.federation.blacklisted_domains, vec!["evil.example"]);
        assert_eq!(config.longpoll.attempts, 10);
        assert_eq!(config.limits.submissions_per_minute, 30);
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let toml = r#"
[server]
[storage]
[federation]
[longpoll]
[limits]
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.limits.global_requests_per_second, 200);
        assert_eq!(config.longpoll.interval_ms, 1000);
        assert!(config
            .federation
            .blacklisted_networks
            .contains(&"127.0.0.0/8".to_string()));
    }

    #[test]
    fn config_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            "[server]\ndomain = \"relay.example.org\"\n[storage]\n[federation]\n[longpoll]\n[limits]\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.domain, "relay.example.org");
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");

        let missing = Config::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn session_secret_from_config_value() {
        let mut config = Config::default();
        config.server.session_secret = Some(BASE64.encode([7u8; 64]));
        let secret = config.server.resolve_session_secret().unwrap();
        assert_eq!(secret, vec![7u8; 64]);
    }

    #[test]
    fn session_secret_rejects_bad_values() {
        let mut config = Config::default();
        config.server.session_secret = Some("not base64 !!!".to_string());
        assert!(config.server.resolve_session_secret().is_err());

        config.server.session_secret = Some(BASE64.encode([0u8; 8]));
        assert!(config.server.resolve_session_secret().is_err());
    }

    #[test]
    fn session_secret_from_environment() {
        std::env::set_var(SESSION_SECRET_ENV, BASE64.encode([9u8; 48]));
        let config = Config::default();
        let secret = config.server.resolve_session_secret().unwrap();
        assert_eq!(secret, vec![9u8; 48]);
        std::env::remove_var(SESSION_SECRET_ENV);
    }
}
