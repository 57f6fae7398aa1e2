//! Workload manager server binary.
//!
//! Owns the state store connection for one server process. It recovers
//! every persisted object at startup and then polls for jobs and
//! reservations that peer servers changed, until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `wlm-config.yaml` (or `$WLM_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL`, migrate, and prepare statements
//! 4. Recover the server record, schedulers, nodes, jobs and reservations
//! 5. Poll for changed rows on the configured interval
//! 6. Close the connection on Ctrl-C

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wlm_db::{ExitOnFatal, PgStore};
use wlm_server::{ServerContext, WlmConfig};

use crate::error::EngineError;

/// Config file used when `WLM_CONFIG` is not set.
const DEFAULT_CONFIG_PATH: &str = "wlm-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, connecting, recovery or a refresh
/// poll fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, config_path) = load_config()?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("wlm-engine starting");
    let source = config_path
        .as_ref()
        .map_or_else(|| "defaults".to_owned(), |path| path.display().to_string());
    info!(source = %source, "Configuration loaded");
    info!(
        server = config.server.name,
        index = config.server.index,
        poll_interval_ms = config.server.poll_interval_ms,
        "Server identity"
    );

    // 3. Connect.
    let store = PgStore::connect(&config.database.postgres())
        .await
        .map_err(EngineError::from)?;

    // 4. Recover.
    let mut context = ServerContext::from_config(store, &config, Arc::new(ExitOnFatal));
    let report = context.recover_all().await.map_err(EngineError::from)?;
    info!(
        jobs = report.jobs,
        reservations = report.resvs,
        nodes = report.nodes,
        "Recovery complete, entering refresh loop"
    );

    // 5. Poll until interrupted.
    let mut ticker = tokio::time::interval(config.server.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match context.poll_changed().await {
                    Ok(report) => tracing::debug!(
                        jobs_seen = report.jobs_seen,
                        resvs_seen = report.resvs_seen,
                        failed = report.failed,
                        "Refresh poll complete"
                    ),
                    Err(e) => {
                        tracing::error!(error = %e, "Refresh poll failed, stopping");
                        return Err(EngineError::from(e).into());
                    }
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
                }
                info!("Shutdown requested");
                break;
            }
        }
    }

    // 6. Close.
    context
        .into_conn()
        .close()
        .await
        .map_err(EngineError::from)?;
    info!("wlm-engine shutdown complete");
    Ok(())
}

/// Load configuration from `$WLM_CONFIG` or `wlm-config.yaml`, falling back
/// to defaults when the file does not exist. Returns the path that was read.
fn load_config() -> Result<(WlmConfig, Option<PathBuf>), EngineError> {
    let path = std::env::var_os("WLM_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        let config = WlmConfig::from_file(&path)?;
        Ok((config, Some(path)))
    } else {
        let mut config = WlmConfig::default();
        config.database.apply_env_overrides();
        Ok((config, None))
    }
}
