mod file_config;

pub use file_config::{FileConfig, RetryConfig};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub outbound_notifications_url: Option<String>,
    pub gateway_auth_token: Option<String>,
    pub gateway_timeout_secs: u64,
    pub api_platform_events_url: Option<String>,
    pub events_timeout_secs: u64,
    pub notifications_per_request: usize,
    pub notification_ttl_secs: u64,
    pub allowed_user_agents: Vec<String>,
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,

    // External collaborators
    pub outbound_notifications_url: String,
    pub gateway_auth_token: String,
    pub gateway_timeout_secs: u64,
    pub api_platform_events_url: String,
    pub events_timeout_secs: u64,

    // Notification lifecycle
    pub notifications_per_request: usize,
    pub notification_ttl_secs: u64,
    pub retry: RetrySettings,

    // Inbound policy
    pub allowed_user_agents: Vec<String>,

    // Message-at-rest encryption key (32 bytes, hex or base64)
    pub encryption_key: String,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
    pub retry_window_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1,
            max_backoff_secs: 3600,
            backoff_multiplier: 5.0,
            retry_window_secs: 6 * 60 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present. Missing mandatory
    /// options are fatal here, before anything is wired up.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let outbound_notifications_url = file
            .outbound_notifications_url
            .or_else(|| cli.outbound_notifications_url.clone())
            .ok_or_else(|| anyhow::anyhow!("outbound_notifications_url must be specified"))?;

        let gateway_auth_token = file
            .gateway_auth_token
            .or_else(|| cli.gateway_auth_token.clone())
            .ok_or_else(|| anyhow::anyhow!("gateway_auth_token must be specified"))?;

        let api_platform_events_url = file
            .api_platform_events_url
            .or_else(|| cli.api_platform_events_url.clone())
            .ok_or_else(|| anyhow::anyhow!("api_platform_events_url must be specified"))?;

        let encryption_key = file
            .encryption_key
            .or_else(|| cli.encryption_key.clone())
            .ok_or_else(|| anyhow::anyhow!("encryption_key must be specified"))?;

        let gateway_timeout_secs = file.gateway_timeout_secs.unwrap_or(cli.gateway_timeout_secs);
        let events_timeout_secs = file.events_timeout_secs.unwrap_or(cli.events_timeout_secs);
        let notifications_per_request = file
            .notifications_per_request
            .unwrap_or(cli.notifications_per_request);
        let notification_ttl_secs = file
            .notification_ttl_secs
            .unwrap_or(cli.notification_ttl_secs);

        let allowed_user_agents = file
            .allowed_user_agents
            .unwrap_or_else(|| cli.allowed_user_agents.clone());

        // Retry settings - merge file config with defaults
        let retry_file = file.retry.unwrap_or_default();
        let retry_defaults = RetrySettings::default();
        let retry = RetrySettings {
            initial_backoff_secs: retry_file
                .initial_backoff_secs
                .unwrap_or(retry_defaults.initial_backoff_secs),
            max_backoff_secs: retry_file
                .max_backoff_secs
                .unwrap_or(retry_defaults.max_backoff_secs),
            backoff_multiplier: retry_file
                .backoff_multiplier
                .unwrap_or(retry_defaults.backoff_multiplier),
            retry_window_secs: retry_file
                .retry_window_secs
                .unwrap_or(retry_defaults.retry_window_secs),
            sweep_interval_secs: retry_file
                .sweep_interval_secs
                .unwrap_or(retry_defaults.sweep_interval_secs),
        };

        Ok(Self {
            db_dir,
            port,
            logging_level,
            outbound_notifications_url,
            gateway_auth_token,
            gateway_timeout_secs,
            api_platform_events_url,
            events_timeout_secs,
            notifications_per_request,
            notification_ttl_secs,
            retry,
            allowed_user_agents,
            encryption_key,
        })
    }

    pub fn hub_db_path(&self) -> PathBuf {
        self.db_dir.join("hub.db")
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
