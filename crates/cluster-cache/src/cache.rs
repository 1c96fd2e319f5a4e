//! Per-kind watch caches.
//!
//! Each tracked kind is mirrored by a `kube_runtime` reflector: a watcher
//! stream feeds a `Writer`, and callers read the paired `Store`. The watcher
//! resumes from the last seen resource version and re-lists on its own when
//! the API server reports the version as expired, so no periodic full
//! re-list is scheduled here.

use crate::credential::ClusterId;
use crate::error::CacheError;
use crate::kind::{ResourceKind, TrackedResource};
use crate::view::ResourceView;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};
use kube::{Api, Client};
use kube_runtime::reflector::{self, Store, store::Writer};
use kube_runtime::{WatchStreamExt, watcher};
use std::any::Any;
use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spawns one watcher task when called with that watcher's cancellation token.
pub(crate) type Launcher = Box<dyn FnOnce(CancellationToken) -> JoinHandle<()> + Send>;

/// Local mirror of one resource kind on one cluster.
pub struct WatchCache<K: TrackedResource> {
    cluster: ClusterId,
    store: Store<K>,
    terminated: Arc<AtomicBool>,
}

impl<K: TrackedResource> Clone for WatchCache<K> {
    fn clone(&self) -> Self {
        Self {
            cluster: self.cluster,
            store: self.store.clone(),
            terminated: self.terminated.clone(),
        }
    }
}

impl<K: TrackedResource> fmt::Debug for WatchCache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchCache")
            .field("cluster", &self.cluster)
            .field("kind", &K::KIND)
            .field("objects", &self.store.len())
            .field("terminated", &self.terminated.load(Ordering::Acquire))
            .finish()
    }
}

impl<K: TrackedResource> WatchCache<K> {
    pub(crate) fn new(cluster: ClusterId) -> (Self, Writer<K>) {
        let (store, writer) = reflector::store();
        let cache = Self {
            cluster,
            store,
            terminated: Arc::new(AtomicBool::new(false)),
        };
        (cache, writer)
    }

    /// Kind mirrored by this cache.
    pub fn kind(&self) -> ResourceKind {
        K::KIND
    }

    /// Current contents of the cache.
    ///
    /// Fails once the watcher feeding this cache has exited, since its
    /// contents no longer track the cluster.
    pub fn list(&self) -> Result<Vec<Arc<K>>, CacheError> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(CacheError::CacheUnavailable {
                cluster: self.cluster,
                kind: K::KIND,
            });
        }
        Ok(self.store.state())
    }

    /// Read-only view over the same store.
    pub fn view(&self) -> ResourceView<K> {
        ResourceView::new(self.store.clone())
    }

    /// Resolves to `true` once the initial listing has been received, or
    /// `false` if the writer went away before that.
    pub(crate) fn ready(&self) -> BoxFuture<'static, bool> {
        let store = self.store.clone();
        async move { store.wait_until_ready().await.is_ok() }.boxed()
    }

    #[cfg(test)]
    pub(crate) fn mark_terminated(&self) {
        self.terminated.store(true, Ordering::Release);
    }

    fn launcher(&self, client: &Client, writer: Writer<K>) -> Launcher {
        let cache = self.clone();
        let api: Api<K> = Api::all(client.clone());
        Box::new(move |cancel| tokio::spawn(cache.run_watcher(api, writer, cancel)))
    }

    async fn run_watcher(self, api: Api<K>, writer: Writer<K>, cancel: CancellationToken) {
        let _guard = TerminationGuard(self.terminated.clone());
        let cluster = self.cluster;
        info!("Starting {} watcher for cluster {}", K::KIND, cluster);

        let mut events = pin!(
            watcher(api, watcher::Config::default())
                .default_backoff()
                .reflect(writer)
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Stopping {} watcher for cluster {}", K::KIND, cluster);
                    break;
                }
                event = events.next() => match event {
                    Some(Ok(watcher::Event::InitDone)) => {
                        info!("{} initial listing received for cluster {}", K::KIND, cluster);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("{} watcher error for cluster {}: {}", K::KIND, cluster, e);
                    }
                    None => {
                        warn!("{} watch stream ended for cluster {}", K::KIND, cluster);
                        break;
                    }
                },
            }
        }
    }
}

/// Flags the cache as terminated when its watcher task ends, panics included.
struct TerminationGuard(Arc<AtomicBool>);

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// The full set of caches kept for one cluster.
#[derive(Debug, Clone)]
pub struct WatchCaches {
    /// Cluster nodes
    pub nodes: WatchCache<Node>,
    /// Pods in every namespace
    pub pods: WatchCache<Pod>,
    /// Namespaces
    pub namespaces: WatchCache<Namespace>,
    /// Services in every namespace
    pub services: WatchCache<Service>,
    /// Deployments in every namespace
    pub deployments: WatchCache<Deployment>,
    /// Jobs in every namespace
    pub jobs: WatchCache<Job>,
    /// CronJobs in every namespace
    pub cron_jobs: WatchCache<CronJob>,
}

/// Write halves of `WatchCaches`, consumed when the watchers start.
pub(crate) struct CacheWriters {
    pub(crate) nodes: Writer<Node>,
    pub(crate) pods: Writer<Pod>,
    pub(crate) namespaces: Writer<Namespace>,
    pub(crate) services: Writer<Service>,
    pub(crate) deployments: Writer<Deployment>,
    pub(crate) jobs: Writer<Job>,
    pub(crate) cron_jobs: Writer<CronJob>,
}

impl WatchCaches {
    pub(crate) fn new(cluster: ClusterId) -> (Self, CacheWriters) {
        let (nodes, nodes_writer) = WatchCache::new(cluster);
        let (pods, pods_writer) = WatchCache::new(cluster);
        let (namespaces, namespaces_writer) = WatchCache::new(cluster);
        let (services, services_writer) = WatchCache::new(cluster);
        let (deployments, deployments_writer) = WatchCache::new(cluster);
        let (jobs, jobs_writer) = WatchCache::new(cluster);
        let (cron_jobs, cron_jobs_writer) = WatchCache::new(cluster);

        let caches = Self {
            nodes,
            pods,
            namespaces,
            services,
            deployments,
            jobs,
            cron_jobs,
        };
        let writers = CacheWriters {
            nodes: nodes_writer,
            pods: pods_writer,
            namespaces: namespaces_writer,
            services: services_writer,
            deployments: deployments_writer,
            jobs: jobs_writer,
            cron_jobs: cron_jobs_writer,
        };
        (caches, writers)
    }

    /// Typed access to the cache for `K`.
    pub fn cache<K: TrackedResource>(&self) -> Option<&WatchCache<K>> {
        let cache: &dyn Any = match K::KIND {
            ResourceKind::Node => &self.nodes,
            ResourceKind::Pod => &self.pods,
            ResourceKind::Namespace => &self.namespaces,
            ResourceKind::Service => &self.services,
            ResourceKind::Deployment => &self.deployments,
            ResourceKind::Job => &self.jobs,
            ResourceKind::CronJob => &self.cron_jobs,
        };
        cache.downcast_ref::<WatchCache<K>>()
    }

    /// One readiness future per kind, in `ResourceKind::ALL` order.
    pub(crate) fn readiness(&self) -> Vec<BoxFuture<'static, bool>> {
        vec![
            self.nodes.ready(),
            self.pods.ready(),
            self.namespaces.ready(),
            self.services.ready(),
            self.deployments.ready(),
            self.jobs.ready(),
            self.cron_jobs.ready(),
        ]
    }

    /// Pair every cache with a launcher for its watcher.
    pub(crate) fn launchers(&self, client: &Client, writers: CacheWriters) -> Vec<Launcher> {
        debug!("Preparing {} watchers", ResourceKind::ALL.len());
        vec![
            self.nodes.launcher(client, writers.nodes),
            self.pods.launcher(client, writers.pods),
            self.namespaces.launcher(client, writers.namespaces),
            self.services.launcher(client, writers.services),
            self.deployments.launcher(client, writers.deployments),
            self.jobs.launcher(client, writers.jobs),
            self.cron_jobs.launcher(client, writers.cron_jobs),
        ]
    }
}

/// Feed a writer the events of a complete initial listing.
#[cfg(test)]
pub(crate) fn seed<K: TrackedResource>(writer: &mut Writer<K>, objects: Vec<K>) {
    writer.apply_watcher_event(&watcher::Event::Init);
    for object in objects {
        writer.apply_watcher_event(&watcher::Event::InitApply(object));
    }
    writer.apply_watcher_event(&watcher::Event::InitDone);
}
