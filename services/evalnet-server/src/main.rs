//! EvalNet Server
//!
//! Hosts the validator coordination core: validator websockets, the
//! administrative scoring endpoints and the periodic weight broadcast.
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings (passwords required)
//! BAN_PASSWORD=... APPROVAL_PASSWORD=... evalnet-server
//!
//! # Start with a config file
//! evalnet-server --config /path/to/config.toml
//!
//! # Local development without admin passwords
//! evalnet-server --dev-mode --log-level debug
//!
//! # Environment overrides
//! EVALNET__COORDINATOR__WEIGHT_INTERVAL_MINUTES=5 evalnet-server
//! ```

mod config;

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use evalnet_api::{create_router, AdminCredentials, ApiConfig, AppState};
use evalnet_coordinator::{Coordinator, DEFAULT_MIN_VALIDATORS};
use evalnet_store::MemoryStore;

use crate::config::ServerConfig;

// =============================================================================
// CLI Arguments
// =============================================================================

/// EvalNet Server - validator coordination service
#[derive(Parser, Debug)]
#[command(name = "evalnet-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "EVALNET_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "EVALNET_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "EVALNET_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "EVALNET_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "EVALNET_LOG_FORMAT")]
    log_format: Option<String>,

    /// Password for banning agents
    #[arg(long, env = "BAN_PASSWORD", hide_env_values = true)]
    ban_password: Option<String>,

    /// Password for approving and re-evaluating versions
    #[arg(long, env = "APPROVAL_PASSWORD", hide_env_values = true)]
    approval_password: Option<String>,

    /// Minutes between weight broadcasts
    #[arg(long, env = "EVALNET_WEIGHT_INTERVAL_MINUTES")]
    weight_interval_minutes: Option<u64>,

    /// Enable development mode (admin passwords may be empty)
    #[arg(long, env = "EVALNET_DEV_MODE")]
    dev_mode: bool,
}

impl Args {
    /// Apply CLI overrides on top of the loaded configuration
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(password) = self.ban_password {
            config.admin.ban_password = password;
        }
        if let Some(password) = self.approval_password {
            config.admin.approval_password = password;
        }
        if let Some(minutes) = self.weight_interval_minutes {
            config.coordinator.weight_interval_minutes = minutes;
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let dev_mode = args.dev_mode;

    let mut server_config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut server_config);

    init_logging(&server_config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        dev_mode,
        "Starting EvalNet server"
    );

    validate_config(&server_config, dev_mode)?;

    let store = Arc::new(MemoryStore::new());
    let coordinator = Arc::new(Coordinator::new(store, server_config.coordinator.clone()));
    coordinator.start();

    let admin = AdminCredentials::new(
        server_config.admin.ban_password.clone(),
        server_config.admin.approval_password.clone(),
    );
    let state = Arc::new(AppState::new(coordinator.clone(), admin));

    let api_config = ApiConfig {
        enable_cors: server_config.api.enable_cors,
        cors_origins: server_config.api.cors_origins.clone(),
        enable_tracing: server_config.api.enable_tracing,
    };
    let app = create_router(state, api_config);

    let addr = server_config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        host = %server_config.server.host,
        port = %server_config.server.port,
        weight_interval_minutes = server_config.coordinator.weight_interval_minutes,
        "Server listening"
    );

    let shutdown_timeout = server_config.server.shutdown_timeout();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            if tokio::time::timeout(shutdown_timeout, coordinator.shutdown())
                .await
                .is_err()
            {
                tracing::warn!(
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Coordinator did not stop within the shutdown timeout"
                );
            }
        })
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize tracing/logging
fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .try_init()?;
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true))
                .try_init()?;
        }
    }

    Ok(())
}

/// Validate configuration
fn validate_config(config: &ServerConfig, dev_mode: bool) -> anyhow::Result<()> {
    if !dev_mode {
        if config.admin.ban_password.is_empty() {
            anyhow::bail!("Ban password is empty. Set BAN_PASSWORD or run with --dev-mode.");
        }
        if config.admin.approval_password.is_empty() {
            anyhow::bail!("Approval password is empty. Set APPROVAL_PASSWORD or run with --dev-mode.");
        }
    } else if config.admin.ban_password.is_empty() || config.admin.approval_password.is_empty() {
        tracing::warn!("Running with an empty admin password");
    }

    let coordinator = &config.coordinator;
    if coordinator.weight_interval_minutes == 0 {
        anyhow::bail!("Weight interval must be at least one minute");
    }
    if coordinator.channel_capacity == 0 {
        anyhow::bail!("Validator channel capacity must be positive");
    }
    if coordinator.consensus.min_validators < DEFAULT_MIN_VALIDATORS {
        anyhow::bail!(
            "Consensus needs at least {} validators per version, got {}",
            DEFAULT_MIN_VALIDATORS,
            coordinator.consensus.min_validators
        );
    }
    if !(0.0..1.0).contains(&coordinator.consensus.tolerance) {
        anyhow::bail!(
            "Consensus tolerance must be in [0, 1), got {}",
            coordinator.consensus.tolerance
        );
    }

    Ok(())
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_passwords() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.admin.ban_password = "ban".to_string();
        config.admin.approval_password = "approve".to_string();
        config
    }

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["evalnet-server", "--port", "8080", "--weight-interval-minutes", "5"]);
        assert_eq!(args.port, Some(8080));
        assert_eq!(args.weight_interval_minutes, Some(5));
    }

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "evalnet-server",
            "--host",
            "127.0.0.1",
            "--ban-password",
            "from-cli",
            "--log-format",
            "json",
        ]);
        let mut config = ServerConfig::default();
        args.apply(&mut config);

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.admin.ban_password, "from-cli");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_passwords_rejected_outside_dev_mode() {
        let config = ServerConfig::default();
        assert!(validate_config(&config, false).is_err());
        assert!(validate_config(&config, true).is_ok());
        assert!(validate_config(&config_with_passwords(), false).is_ok());
    }

    #[test]
    fn test_invalid_coordinator_settings_rejected() {
        let mut config = config_with_passwords();
        config.coordinator.weight_interval_minutes = 0;
        assert!(validate_config(&config, false).is_err());

        let mut config = config_with_passwords();
        config.coordinator.consensus.tolerance = 1.5;
        assert!(validate_config(&config, false).is_err());

        let mut config = config_with_passwords();
        config.coordinator.consensus.min_validators = 1;
        assert!(validate_config(&config, false).is_err());

        let mut config = config_with_passwords();
        config.coordinator.consensus.min_validators = 3;
        assert!(validate_config(&config, false).is_ok());
    }
}
