//! Outreach configuration system.
//!
//! TOML file with serde field defaults, loaded from `~/.outreach/config.toml`
//! unless `OUTREACH_CONFIG` points elsewhere. Credentials are taken from the
//! environment when the file leaves them blank, so a config file never has
//! to hold an API key.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OutreachError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutreachConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl OutreachConfig {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist. Env credentials are applied either way.
    pub fn load() -> Result<Self> {
        let path = std::env::var("OUTREACH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OutreachError::Config(format!("failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| OutreachError::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Default config path (~/.outreach/config.toml).
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// The Outreach home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".outreach")
    }

    /// Fill blank credentials from the environment.
    pub fn apply_env(&mut self) {
        if self.provider.resend_api_key.is_empty() {
            if let Ok(key) = std::env::var("RESEND_API_KEY") {
                self.provider.resend_api_key = key;
            }
        }
        if self.provider.smtp_host.is_empty() {
            if let Ok(host) = std::env::var("SMTP_HOST") {
                self.provider.smtp_host = host;
            }
        }
        if self.provider.smtp_user.is_empty() {
            if let Ok(user) = std::env::var("SMTP_USER") {
                self.provider.smtp_user = user;
            }
        }
        if self.provider.smtp_pass.is_empty() {
            if let Ok(pass) = std::env::var("SMTP_PASS") {
                self.provider.smtp_pass = pass;
            }
        }
        if self.gateway.dispatch_secret.is_empty() {
            if let Ok(secret) = std::env::var("OUTREACH_DISPATCH_SECRET") {
                self.gateway.dispatch_secret = secret;
            }
        }
    }
}

/// Delivery provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Force a specific adapter: "resend", "smtp", or "mock".
    /// Empty means auto-select by configured credentials.
    #[serde(default)]
    pub adapter: String,
    /// From address used for all outbound mail.
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub resend_api_key: String,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: String,
    #[serde(default)]
    pub smtp_pass: String,
}

fn default_from_email() -> String {
    "noreply@outreach.local".into()
}
fn default_smtp_port() -> u16 {
    587
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            adapter: String::new(),
            from_email: default_from_email(),
            from_name: String::new(),
            resend_api_key: String::new(),
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_user: String::new(),
            smtp_pass: String::new(),
        }
    }
}

/// Dispatcher loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Max due jobs fetched per invocation.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Attempt ceiling for new jobs.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Retry backoff base: attempt N is retried after N * this many seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// A `processing` job whose lock is older than this is reclaimed.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
    /// Bounded per-invocation worker pool.
    #[serde(default = "default_workers")]
    pub workers: u32,
    /// Per-send timeout so one stuck job cannot stall a batch.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

fn default_batch_size() -> u32 {
    10
}
fn default_max_attempts() -> u32 {
    5
}
fn default_retry_delay_secs() -> u64 {
    120
}
fn default_stale_lock_secs() -> u64 {
    600
}
fn default_workers() -> u32 {
    4
}
fn default_send_timeout_secs() -> u64 {
    30
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            stale_lock_secs: default_stale_lock_secs(),
            workers: default_workers(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Shared secret expected in the X-Dispatch-Secret header.
    /// Empty disables auth (development only).
    #[serde(default)]
    pub dispatch_secret: String,
}

fn default_port() -> u16 {
    8484
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            dispatch_secret: String::new(),
        }
    }
}

/// Job store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path; empty means `~/.outreach/outreach.db`.
    #[serde(default)]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
        }
    }
}

impl StoreConfig {
    /// Resolve the database path, falling back to the home default.
    pub fn resolved_path(&self) -> PathBuf {
        if self.db_path.is_empty() {
            OutreachConfig::home_dir().join("outreach.db")
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OutreachConfig::default();
        assert_eq!(config.dispatcher.batch_size, 10);
        assert_eq!(config.dispatcher.max_attempts, 5);
        assert_eq!(config.dispatcher.retry_delay_secs, 120);
        assert_eq!(config.gateway.port, 8484);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [provider]
            adapter = "mock"
            from_email = "hello@agency.example"

            [dispatcher]
            batch_size = 25
            workers = 2

            [gateway]
            port = 9000
            dispatch_secret = "s3cret"
        "#;

        let config: OutreachConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.provider.adapter, "mock");
        assert_eq!(config.provider.from_email, "hello@agency.example");
        assert_eq!(config.dispatcher.batch_size, 25);
        assert_eq!(config.dispatcher.workers, 2);
        // untouched sections keep their defaults
        assert_eq!(config.dispatcher.max_attempts, 5);
        assert_eq!(config.gateway.dispatch_secret, "s3cret");
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: OutreachConfig = toml::from_str("").unwrap();
        assert_eq!(config.dispatcher.stale_lock_secs, 600);
        assert_eq!(config.provider.smtp_port, 587);
    }

    #[test]
    fn test_home_dir() {
        let home = OutreachConfig::home_dir();
        assert!(home.to_string_lossy().contains("outreach"));
    }
}
