use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod boxes;
mod callback;
mod clients;
mod config;
mod delivery;
mod encryption;
mod events;
mod gateway;
mod hub_store;
mod notifications;
mod push;
mod retry;
mod server;
mod sqlite_persistence;

use callback::CallbackValidator;
use config::{AppConfig, CliConfig, FileConfig};
use delivery::DeliveryCoordinator;
use encryption::MessageCipher;
use events::EventsConnector;
use gateway::PushGatewayClient;
use hub_store::SqliteHubStore;
use push::PushDispatcher;
use retry::{RetryPolicy, RetrySweeper};
use server::{run_server, RequestsLoggingLevel, ServerConfig};

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the hub database file.
    #[clap(long)]
    pub db_dir: Option<PathBuf>,

    /// Path to an optional TOML config file. File values override CLI values.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 6701)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Base URL of the external push gateway.
    #[clap(long)]
    pub outbound_notifications_url: Option<String>,

    /// Authorization token for gateway calls.
    #[clap(long)]
    pub gateway_auth_token: Option<String>,

    /// Timeout in seconds for gateway requests.
    #[clap(long, default_value_t = 30)]
    pub gateway_timeout_secs: u64,

    /// Base URL of the application-events service.
    #[clap(long)]
    pub api_platform_events_url: Option<String>,

    /// Timeout in seconds for events-service requests.
    #[clap(long, default_value_t = 10)]
    pub events_timeout_secs: u64,

    /// Default number of notifications returned per list request.
    #[clap(long, default_value_t = 100)]
    pub notifications_per_request: usize,

    /// Seconds a notification lives before physical deletion.
    #[clap(long, default_value_t = 2_592_000)]
    pub notification_ttl_secs: u64,

    /// User agents allowed to create boxes.
    #[clap(long)]
    pub allowed_user_agents: Vec<String>,

    /// Message-at-rest encryption key (32 bytes, hex or base64).
    #[clap(long)]
    pub encryption_key: Option<String>,
}

impl CliArgs {
    fn into_cli_config(self) -> (CliConfig, Option<PathBuf>) {
        let config_path = self.config.clone();
        let cli = CliConfig {
            db_dir: self.db_dir,
            port: self.port,
            logging_level: self.logging_level,
            outbound_notifications_url: self.outbound_notifications_url,
            gateway_auth_token: self.gateway_auth_token,
            gateway_timeout_secs: self.gateway_timeout_secs,
            api_platform_events_url: self.api_platform_events_url,
            events_timeout_secs: self.events_timeout_secs,
            notifications_per_request: self.notifications_per_request,
            notification_ttl_secs: self.notification_ttl_secs,
            allowed_user_agents: self.allowed_user_agents,
            encryption_key: self.encryption_key,
        };
        (cli, config_path)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let (cli, config_path) = cli_args.into_cli_config();
    let file_config = config_path
        .map(FileConfig::load)
        .transpose()
        .context("Failed to load config file")?;
    let config = AppConfig::resolve(&cli, file_config)?;

    let cipher = MessageCipher::from_key_string(&config.encryption_key)
        .context("Invalid encryption key")?;

    info!("Opening hub database at {:?}...", config.hub_db_path());
    let hub_store = Arc::new(SqliteHubStore::new(
        config.hub_db_path(),
        cipher,
        config.notification_ttl_secs,
    )?);

    info!(
        "Push gateway configured at {}",
        config.outbound_notifications_url
    );
    let push_gateway = Arc::new(PushGatewayClient::new(
        config.outbound_notifications_url.clone(),
        config.gateway_auth_token.clone(),
        config.gateway_timeout_secs,
    )?);
    let events_sink = Arc::new(EventsConnector::new(
        config.api_platform_events_url.clone(),
        config.events_timeout_secs,
    )?);

    let dispatcher = Arc::new(PushDispatcher::new(hub_store.clone(), push_gateway.clone()));
    let coordinator = Arc::new(DeliveryCoordinator::new(
        hub_store.clone(),
        hub_store.clone(),
        dispatcher.clone(),
    ));
    let callback_validator = Arc::new(CallbackValidator::new(
        hub_store.clone(),
        push_gateway,
        events_sink,
    ));

    // Retry sweeper runs until the shutdown token fires
    let policy = RetryPolicy {
        initial_backoff: Duration::from_secs(config.retry.initial_backoff_secs),
        max_backoff: Duration::from_secs(config.retry.max_backoff_secs),
        multiplier: config.retry.backoff_multiplier,
        jitter: 0.1,
    };
    let sweeper = RetrySweeper::new(
        hub_store.clone(),
        dispatcher,
        policy,
        Duration::from_secs(config.retry.retry_window_secs),
        Duration::from_secs(config.retry.sweep_interval_secs),
        Duration::from_secs(config.notification_ttl_secs),
    );
    let shutdown_token = CancellationToken::new();
    let sweeper_token = shutdown_token.clone();
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweeper_token).await;
    });

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        allowed_user_agents: config.allowed_user_agents.clone(),
        notifications_per_request: config.notifications_per_request,
    };

    let server_shutdown_token = shutdown_token.clone();
    let ctrl_c_token = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            ctrl_c_token.cancel();
        }
    });

    info!("Ready to serve at port {}!", config.port);
    run_server(
        hub_store.clone(),
        hub_store,
        coordinator,
        callback_validator,
        server_config,
        env!("GIT_HASH").to_string(),
        async move { server_shutdown_token.cancelled().await },
    )
    .await?;

    shutdown_token.cancel();
    let _ = sweeper_handle.await;
    info!("Shutdown complete");
    Ok(())
}
