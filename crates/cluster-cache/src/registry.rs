//! Cluster registry.
//!
//! Maps cluster ids to their runtimes. Each id owns a construct-once slot,
//! so concurrent first requests for the same cluster share one factory call,
//! one runtime and one watcher startup, while other clusters never wait on
//! that construction.
//!
//! Locking: the map sits behind a `tokio::sync::RwLock`. Lookups of running
//! clusters share the read lock. The write lock is held only to insert or
//! drain slots, never across client construction or cache waits.

use crate::client::ClientFactory;
use crate::credential::{ClusterCredential, ClusterId};
use crate::error::CacheError;
use crate::kind::TrackedResource;
use crate::runtime::ClusterRuntime;
use crate::snapshot::OverviewSnapshot;
use crate::sync::wait_for_sync;
use crate::view::ResourceView;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long an overview request waits for a cluster's caches
pub const SNAPSHOT_SYNC_TIMEOUT: Duration = Duration::from_secs(2);

type Slot = Arc<OnceCell<Arc<ClusterRuntime>>>;

/// Registry of live cluster runtimes.
pub struct ClusterRegistry {
    factory: Arc<dyn ClientFactory>,
    runtimes: RwLock<HashMap<ClusterId, Slot>>,
}

impl fmt::Debug for ClusterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("ClusterRegistry");
        match self.runtimes.try_read() {
            Ok(runtimes) => out.field("slots", &runtimes.len()),
            Err(_) => out.field("slots", &"<locked>"),
        };
        out.finish_non_exhaustive()
    }
}

impl ClusterRegistry {
    /// Empty registry building clients through `factory`.
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Return the runtime for the credential's cluster, creating it and
    /// starting its watchers on first use.
    ///
    /// Factory failures come back as `ClientCreation` and leave nothing
    /// registered, so the call can simply be repeated.
    pub async fn ensure_for_cluster(
        &self,
        credential: &ClusterCredential,
    ) -> Result<Arc<ClusterRuntime>, CacheError> {
        let id = credential.id;
        loop {
            if let Some(runtime) = self.runtime(id).await {
                // A caller dropped between init and start leaves watchers pending
                if runtime.start_watchers() {
                    warn!("Started pending watchers for cluster {}", id);
                } else {
                    debug!("Reusing runtime for cluster {}", id);
                }
                return Ok(runtime);
            }

            let slot = {
                let mut runtimes = self.runtimes.write().await;
                let slot = runtimes.entry(id).or_default();
                if slot.get().is_some_and(|runtime| runtime.is_stopped()) {
                    debug!("Replacing stopped runtime for cluster {}", id);
                    *slot = Slot::default();
                }
                slot.clone()
            };

            let runtime = match slot.get_or_try_init(|| self.create_runtime(credential)).await {
                Ok(runtime) => runtime.clone(),
                Err(e) => {
                    self.discard_empty_slot(id, &slot).await;
                    return Err(e);
                }
            };

            if runtime.is_stopped() {
                // Stopped right after init; the next pass replaces the slot
                continue;
            }

            if self.holds_slot(id, &slot).await {
                runtime.start_watchers();
                return Ok(runtime);
            }

            // stop() drained the slot while it was being filled
            warn!("Registry stopped while creating cluster {}, retrying", id);
            runtime.stop();
        }
    }

    async fn create_runtime(
        &self,
        credential: &ClusterCredential,
    ) -> Result<Arc<ClusterRuntime>, CacheError> {
        info!("Creating runtime for cluster {}", credential.label());
        let client = self
            .factory
            .build_client(credential)
            .await
            .map_err(|e| CacheError::ClientCreation {
                cluster: credential.id,
                source: Box::new(e),
            })?;
        debug!("Client for cluster {} targets {}", credential.id, client.server_url);
        Ok(Arc::new(ClusterRuntime::new(credential.id, client)))
    }

    async fn holds_slot(&self, id: ClusterId, slot: &Slot) -> bool {
        let runtimes = self.runtimes.read().await;
        runtimes
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    async fn discard_empty_slot(&self, id: ClusterId, slot: &Slot) {
        let mut runtimes = self.runtimes.write().await;
        let empty = runtimes
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if empty {
            runtimes.remove(&id);
        }
    }

    /// The live runtime for `id`. Stopped runtimes count as absent.
    pub async fn runtime(&self, id: ClusterId) -> Option<Arc<ClusterRuntime>> {
        let runtimes = self.runtimes.read().await;
        runtimes
            .get(&id)
            .and_then(|slot| slot.get())
            .filter(|runtime| !runtime.is_stopped())
            .cloned()
    }

    /// Ids of every cluster with a live runtime, sorted.
    pub async fn cluster_ids(&self) -> Vec<ClusterId> {
        let runtimes = self.runtimes.read().await;
        let mut ids: Vec<ClusterId> = runtimes
            .iter()
            .filter(|(_, slot)| slot.get().is_some_and(|runtime| !runtime.is_stopped()))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live clusters.
    pub async fn len(&self) -> usize {
        self.cluster_ids().await.len()
    }

    /// Whether no cluster has a live runtime.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cancel every runtime's watchers and drop them from the registry.
    pub async fn stop(&self) {
        let drained: Vec<(ClusterId, Slot)> = {
            let mut runtimes = self.runtimes.write().await;
            runtimes.drain().collect()
        };

        for (id, slot) in drained {
            match slot.get() {
                Some(runtime) if runtime.is_stopped() => {
                    debug!("Runtime for cluster {} already stopped", id);
                }
                Some(runtime) => runtime.stop(),
                None => debug!("Dropping uninitialized slot for cluster {}", id),
            }
        }
        info!("Cluster registry stopped");
    }

    /// Aggregate overview of one cluster, read entirely from cache.
    ///
    /// Fails with `ClusterNotInitialized` for clusters never passed to
    /// `ensure_for_cluster`, and with `CacheNotReady` when the caches have not
    /// finished their initial listing within `SNAPSHOT_SYNC_TIMEOUT`.
    pub async fn overview_snapshot(
        &self,
        ctx: &CancellationToken,
        id: ClusterId,
    ) -> Result<OverviewSnapshot, CacheError> {
        let runtime = self
            .runtime(id)
            .await
            .ok_or(CacheError::ClusterNotInitialized(id))?;

        if !wait_for_sync(ctx, &runtime, SNAPSHOT_SYNC_TIMEOUT).await {
            return Err(CacheError::CacheNotReady(id));
        }

        Ok(OverviewSnapshot::collect(id, runtime.caches()))
    }

    /// Read-only view of kind `K` on cluster `id`; `None` if the cluster is
    /// not registered.
    pub async fn typed_view<K: TrackedResource>(&self, id: ClusterId) -> Option<ResourceView<K>> {
        self.runtime(id).await.and_then(|runtime| runtime.view::<K>())
    }

    /// Node view for cluster `id`.
    pub async fn nodes(&self, id: ClusterId) -> Option<ResourceView<Node>> {
        self.typed_view(id).await
    }

    /// Pod view for cluster `id`.
    pub async fn pods(&self, id: ClusterId) -> Option<ResourceView<Pod>> {
        self.typed_view(id).await
    }

    /// Namespace view for cluster `id`.
    pub async fn namespaces(&self, id: ClusterId) -> Option<ResourceView<Namespace>> {
        self.typed_view(id).await
    }

    /// Service view for cluster `id`.
    pub async fn services(&self, id: ClusterId) -> Option<ResourceView<Service>> {
        self.typed_view(id).await
    }

    /// Deployment view for cluster `id`.
    pub async fn deployments(&self, id: ClusterId) -> Option<ResourceView<Deployment>> {
        self.typed_view(id).await
    }

    /// Job view for cluster `id`.
    pub async fn jobs(&self, id: ClusterId) -> Option<ResourceView<Job>> {
        self.typed_view(id).await
    }

    /// CronJob view for cluster `id`.
    pub async fn cron_jobs(&self, id: ClusterId) -> Option<ResourceView<CronJob>> {
        self.typed_view(id).await
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
