//! Configuration for the pairing service.

use crate::pairing::{default_confirmation_message, PairingSettings};
use crate::session::RegistrySettings;
use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Pairing flow timings
    #[serde(default)]
    pub pairing: PairingConfig,

    /// Protocol gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Archive configuration
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Admin facade configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Take the source address from X-Forwarded-For
    #[serde(default)]
    pub trust_proxy: bool,

    /// Include internal error details in responses
    #[serde(default)]
    pub expose_errors: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Time before an unfinished session expires
    #[serde(default = "default_session_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Concurrent live sessions allowed per source address
    #[serde(default = "default_max_per_source")]
    pub max_per_source: usize,

    /// Recent sessions listed in stats
    #[serde(default = "default_stats_sample_size")]
    pub stats_sample_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairingConfig {
    #[serde(default = "default_code_request_delay", with = "humantime_serde")]
    pub code_request_delay: Duration,

    #[serde(default = "default_code_request_timeout", with = "humantime_serde")]
    pub code_request_timeout: Duration,

    #[serde(default = "default_confirm_delay", with = "humantime_serde")]
    pub confirm_delay: Duration,

    #[serde(default = "default_close_delay", with = "humantime_serde")]
    pub close_delay: Duration,

    #[serde(default = "default_cleanup_delay", with = "humantime_serde")]
    pub post_success_cleanup_delay: Duration,

    /// Message sent to the linked account
    #[serde(default = "default_confirmation_message")]
    pub confirmation_message: String,

    /// Comma-separated browser triple, e.g. "Ubuntu,Chrome,20.0.04"
    #[serde(default = "default_browser")]
    pub browser: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Protocol gateway base URL
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Event poll interval
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// HTTP request timeout
    #[serde(default = "default_gateway_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Records kept in memory
    #[serde(default = "default_archive_limit")]
    pub limit: usize,

    /// Directory for archive records (in-memory only if unset)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Shared secret for the admin endpoints. Admin access is disabled when unset.
    #[serde(default)]
    pub key: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute per source address
    #[serde(default = "default_per_source_rpm")]
    pub per_source_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            trust_proxy: false,
            expose_errors: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: default_session_timeout(),
            max_per_source: default_max_per_source(),
            stats_sample_size: default_stats_sample_size(),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            code_request_delay: default_code_request_delay(),
            code_request_timeout: default_code_request_timeout(),
            confirm_delay: default_confirm_delay(),
            close_delay: default_close_delay(),
            post_success_cleanup_delay: default_cleanup_delay(),
            confirmation_message: default_confirmation_message(),
            browser: default_browser(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            poll_interval: default_poll_interval(),
            timeout: default_gateway_timeout(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            limit: default_archive_limit(),
            dir: None,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_source_per_minute: default_per_source_rpm(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    3000
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_max_per_source() -> usize {
    3
}

fn default_stats_sample_size() -> usize {
    10
}

fn default_code_request_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_code_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_confirm_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_close_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_cleanup_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_browser() -> String {
    "Ubuntu,Chrome,20.0.04".into()
}

fn default_gateway_url() -> String {
    "http://link-gateway:8080".into()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_gateway_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_archive_limit() -> usize {
    1000
}

fn default_per_source_rpm() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    // Phone-like values must stay strings
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Address the server binds to.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address {:?}", self.server.listen_addr))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Registry limits derived from the session and archive sections.
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            timeout: self.session.timeout,
            max_per_source: self.session.max_per_source,
            stats_sample_size: self.session.stats_sample_size,
            archive_limit: self.archive.limit,
            archive_dir: self.archive.dir.clone(),
        }
    }

    /// Pairing flow settings.
    pub fn pairing_settings(&self) -> PairingSettings {
        PairingSettings {
            code_request_delay: self.pairing.code_request_delay,
            code_request_timeout: self.pairing.code_request_timeout,
            confirm_delay: self.pairing.confirm_delay,
            close_delay: self.pairing.close_delay,
            post_success_cleanup_delay: self.pairing.post_success_cleanup_delay,
            confirmation_message: self.pairing.confirmation_message.clone(),
            browser: self
                .pairing
                .browser
                .split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn from_overrides(overrides: &[(&str, &str)]) -> Config {
        let mut builder = config::Config::builder();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap().try_deserialize().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_overrides(&[]);

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.session.timeout, Duration::from_secs(180));
        assert_eq!(config.session.max_per_source, 3);
        assert!(config.admin.key.is_none());
        assert_eq!(
            config.pairing_settings().browser,
            vec!["Ubuntu", "Chrome", "20.0.04"]
        );
    }

    #[test]
    fn test_overrides() {
        let config = from_overrides(&[
            ("session.timeout", "5m"),
            ("session.max_per_source", "5"),
            ("pairing.confirm_delay", "250ms"),
            ("admin.key", "hunter2"),
            ("archive.dir", "/var/lib/pairing/archive"),
        ]);

        assert_eq!(config.session.timeout, Duration::from_secs(300));
        assert_eq!(config.registry_settings().max_per_source, 5);
        assert_eq!(
            config.pairing_settings().confirm_delay,
            Duration::from_millis(250)
        );
        assert_eq!(
            config.admin.key.as_ref().unwrap().expose_secret(),
            "hunter2"
        );
        assert_eq!(
            config.registry_settings().archive_dir,
            Some(PathBuf::from("/var/lib/pairing/archive"))
        );
    }

    #[test]
    fn test_socket_addr() {
        let config = from_overrides(&[("server.listen_addr", "127.0.0.1"), ("server.port", "8080")]);
        assert_eq!(
            config.socket_addr().unwrap(),
            SocketAddr::from(([127, 0, 0, 1], 8080))
        );

        let config = from_overrides(&[("server.listen_addr", "localhost:3000")]);
        let err = config.socket_addr().unwrap_err();
        assert!(err.to_string().contains("localhost:3000"));
    }
}
