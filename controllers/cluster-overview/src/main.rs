//! Cluster Overview Controller
//!
//! Keeps a warm set of watch caches for every cluster in the clusters file
//! and periodically logs an overview of each one:
//! - nodes (ready / total), pods by phase
//! - namespaces and services
//! - deployments, jobs and cron jobs
//!
//! Configuration:
//! - `CLUSTERS_FILE` (required): YAML list of clusters and their credentials
//! - `REPORT_INTERVAL_SECS` (default 60)
//! - `SYNC_TIMEOUT_SECS` (default 10)
//! - `RUST_LOG` (default `info`)

mod backoff;
mod config;
mod controller;
mod error;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls transport needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Cluster Overview Controller");

    let config = Config::from_env()?;
    let clusters = config::load_clusters(&config.clusters_file)?;

    info!("Configuration:");
    info!("  Clusters file: {}", config.clusters_file.display());
    info!("  Clusters: {}", clusters.len());
    info!("  Report interval: {:?}", config.report_interval);
    info!("  Sync timeout: {:?}", config.sync_timeout);

    if clusters.is_empty() {
        return Err(ControllerError::InvalidConfig(format!(
            "{} lists no clusters",
            config.clusters_file.display()
        )));
    }

    let controller = Controller::new(&config, clusters);
    controller.run().await?;

    info!("Cluster Overview Controller stopped");
    Ok(())
}
