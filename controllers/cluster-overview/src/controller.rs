//! Main controller implementation.
//!
//! Spawns one task per configured cluster. Each task registers its cluster
//! with the shared `ClusterRegistry` (retrying failed client creation with a
//! Fibonacci backoff), waits for the initial listing, then logs an overview
//! snapshot on every report tick. Ctrl-C cancels the tasks and stops the
//! registry.

use crate::backoff::FibonacciBackoff;
use crate::config::Config;
use crate::error::ControllerError;
use cluster_cache::{
    CacheError, ClientFactory, ClusterCredential, ClusterRegistry, KubeClientFactory,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const RETRY_MIN_SECS: u64 = 1;
const RETRY_MAX_SECS: u64 = 60;

/// Drives the registry for a fixed list of clusters.
pub struct Controller {
    registry: Arc<ClusterRegistry>,
    clusters: Vec<ClusterCredential>,
    report_interval: Duration,
    sync_timeout: Duration,
    shutdown: CancellationToken,
}

impl Controller {
    /// Creates a controller backed by real Kubernetes clients.
    pub fn new(config: &Config, clusters: Vec<ClusterCredential>) -> Self {
        Self::with_factory(config, clusters, Arc::new(KubeClientFactory::new()))
    }

    pub fn with_factory(
        config: &Config,
        clusters: Vec<ClusterCredential>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            registry: Arc::new(ClusterRegistry::new(factory)),
            clusters,
            report_interval: config.report_interval,
            sync_timeout: config.sync_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Runs until Ctrl-C or the shutdown token fires, then stops every cluster.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Cluster overview controller running for {} clusters", self.clusters.len());

        let tasks: Vec<JoinHandle<()>> = self
            .clusters
            .iter()
            .cloned()
            .map(|credential| {
                tokio::spawn(keep_cluster_warm(
                    self.registry.clone(),
                    credential,
                    self.report_interval,
                    self.sync_timeout,
                    self.shutdown.child_token(),
                ))
            })
            .collect();

        let signal = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                result
            }
            () = self.shutdown.cancelled() => Ok(()),
        };

        self.shutdown.cancel();
        self.registry.stop().await;

        let mut failed = None;
        for task in tasks {
            if let Err(e) = task.await {
                error!("Cluster task failed: {}", e);
                failed = Some(ControllerError::Task(e.to_string()));
            }
        }

        signal?;
        match failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Register one cluster and report its overview until cancelled.
async fn keep_cluster_warm(
    registry: Arc<ClusterRegistry>,
    credential: ClusterCredential,
    report_interval: Duration,
    sync_timeout: Duration,
    cancel: CancellationToken,
) {
    let label = credential.label();
    let mut backoff = FibonacciBackoff::new(RETRY_MIN_SECS, RETRY_MAX_SECS);

    let runtime = loop {
        match registry.ensure_for_cluster(&credential).await {
            Ok(runtime) => {
                backoff.reset();
                break runtime;
            }
            Err(e) if e.is_retryable() => {
                let delay = backoff.next_backoff();
                warn!("Cluster {} unavailable, retrying in {:?}: {}", label, delay, e);
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                error!("Skipping cluster {}: {}", label, e);
                return;
            }
        }
    };

    if runtime.wait_for_sync(&cancel, sync_timeout).await {
        info!("Cluster {} caches ready", label);
    } else if !cancel.is_cancelled() {
        info!("Cluster {} not synced after {:?}, continuing in background", label, sync_timeout);
    }

    let mut ticker = tokio::time::interval(report_interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => report(&registry, &credential, &cancel).await,
        }
    }
}

async fn report(registry: &ClusterRegistry, credential: &ClusterCredential, cancel: &CancellationToken) {
    match registry.overview_snapshot(cancel, credential.id).await {
        Ok(snapshot) => match serde_json::to_string(&snapshot) {
            Ok(json) => info!("Overview of cluster {}: {}", credential.label(), json),
            Err(e) => warn!("Failed to encode overview of cluster {}: {}", credential.label(), e),
        },
        Err(CacheError::CacheNotReady(_)) => {
            info!("Cluster {} caches not ready yet", credential.label());
        }
        Err(e) => warn!("No overview for cluster {}: {}", credential.label(), e),
    }
}
