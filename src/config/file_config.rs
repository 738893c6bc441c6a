use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub logging_level: Option<String>,

    // External collaborators
    pub outbound_notifications_url: Option<String>,
    pub gateway_auth_token: Option<String>,
    pub gateway_timeout_secs: Option<u64>,
    pub api_platform_events_url: Option<String>,
    pub events_timeout_secs: Option<u64>,

    // Notification lifecycle
    pub notifications_per_request: Option<usize>,
    pub notification_ttl_secs: Option<u64>,

    // Inbound policy
    pub allowed_user_agents: Option<Vec<String>>,

    // Message-at-rest encryption key (32 bytes, hex or base64)
    pub encryption_key: Option<String>,

    // Feature configs
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub retry_window_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

impl FileConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path.as_ref()))
    }
}
