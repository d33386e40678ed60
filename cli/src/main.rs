use crate::cli_options::{CliCommand, CliOptions};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use feature_store_core::FeatureStore;
use feature_store_core::config::StoreConfig;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli_options;

const FEATURE_REPO_DIR_ENV_VAR_NAME: &str = "FEATURE_REPO_DIR";
const FEATURE_STORE_YAML_ENV_VAR_NAME: &str = "FEATURE_STORE_YAML";
const DEFAULT_FEATURE_STORE_FILE_NAME: &str = "feature_store.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    let CliOptions {
        chdir,
        log_level,
        feature_store_yaml,
        command,
    } = CliOptions::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::from(log_level).into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cwd =
        if let Some(path) = chdir.or_else(|| std::env::var(FEATURE_REPO_DIR_ENV_VAR_NAME).ok()) {
            PathBuf::from(path)
        } else {
            std::env::current_dir()?
        };

    let feature_store_yaml = feature_store_yaml
        .or(std::env::var(FEATURE_STORE_YAML_ENV_VAR_NAME).ok())
        .unwrap_or(DEFAULT_FEATURE_STORE_FILE_NAME.to_string());
    let config_path = cwd.join(&feature_store_yaml);
    let yaml_str = fs::read_to_string(&config_path)
        .with_context(|| format!("Cannot read configuration {}", config_path.display()))?;
    let store_config = StoreConfig::from_yaml_str(&yaml_str)?;

    match command {
        CliCommand::Serve {
            host,
            port,
            key,
            cert,
            metrics_enabled,
        } => {
            if key.is_some() != cert.is_some() {
                return Err(anyhow!(
                    "Both --key and --cert must be provided to enable TLS"
                ));
            }
            tracing::info!("Start serving on {}:{}", host, port);
            let tls_enabled = key.is_some() && cert.is_some();
            let feature_store = FeatureStore::from_config(&store_config).await?;
            let server_config = rest_server::server::ServerConfig {
                host,
                port,
                tls_enabled,
                tls_cert_path: cert,
                tls_key_path: key,
            };
            let handler = axum_server::Handle::new();
            let server = rest_server::server::start_server(
                server_config,
                feature_store,
                metrics_enabled,
                handler.clone(),
            );
            tokio::select! {
                res = server => res?,
                signal = shutdown_signal() => {
                    tracing::info!("Received {}, shutting down...", signal?);
                    handler.graceful_shutdown(Some(Duration::from_secs(5)));
                }
            }
        }
    }
    Ok(())
}

/// Resolves with the name of the first shutdown signal received.
#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        res = tokio::signal::ctrl_c() => res.map(|_| "Ctrl+C").map_err(Into::into),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
