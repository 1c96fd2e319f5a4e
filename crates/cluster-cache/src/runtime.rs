//! Live state for one cluster.
//!
//! A `ClusterRuntime` bundles the client, the per-kind caches, and the
//! cancellation token that stops every watcher of the cluster. The registry
//! owns runtimes; request handlers only ever hold `Arc` references.

use crate::cache::{Launcher, WatchCaches};
use crate::client::ClusterClient;
use crate::credential::ClusterId;
use crate::kind::TrackedResource;
use crate::view::ResourceView;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PHASE_CREATED: u8 = 0;
const PHASE_STARTING: u8 = 1;
const PHASE_WATCHING: u8 = 2;

/// Lifecycle of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Client built, watchers not launched
    Created,
    /// Watchers are being launched
    Starting,
    /// All watchers launched; `synced` once every cache has listed
    Watching {
        /// Every cache has received its initial listing
        synced: bool,
    },
    /// Cancelled. Terminal.
    Stopped,
}

/// The live bundle for one cluster.
pub struct ClusterRuntime {
    id: ClusterId,
    client: ClusterClient,
    caches: WatchCaches,
    pending: Mutex<Option<Vec<Launcher>>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    phase: AtomicU8,
    synced: Arc<watch::Sender<bool>>,
    sync_task_running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ClusterRuntime {
    /// Create a runtime with one (not yet running) watch cache per kind.
    pub fn new(id: ClusterId, client: ClusterClient) -> Self {
        let (caches, writers) = WatchCaches::new(id);
        let launchers = caches.launchers(&client.client, writers);
        let (synced, _) = watch::channel(false);

        Self {
            id,
            client,
            caches,
            pending: Mutex::new(Some(launchers)),
            watchers: Mutex::new(Vec::new()),
            phase: AtomicU8::new(PHASE_CREATED),
            synced: Arc::new(synced),
            sync_task_running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// Cluster this runtime mirrors.
    pub fn id(&self) -> ClusterId {
        self.id
    }

    /// Client for live API calls (mutations never go through the cache).
    pub fn client(&self) -> &ClusterClient {
        &self.client
    }

    /// Per-kind caches, for aggregate reads.
    pub fn caches(&self) -> &WatchCaches {
        &self.caches
    }

    /// Read-only view over the cache for `K`.
    pub fn view<K: TrackedResource>(&self) -> Option<ResourceView<K>> {
        self.caches.cache::<K>().map(|cache| cache.view())
    }

    /// Launch every watcher. Only the first call does anything; it returns
    /// `true` when this call launched them.
    pub fn start_watchers(&self) -> bool {
        let Some(launchers) = lock(&self.pending).take() else {
            return false;
        };
        if self.cancel.is_cancelled() {
            debug!("Cluster {} stopped before its watchers started", self.id);
            return false;
        }

        self.phase.store(PHASE_STARTING, Ordering::Release);
        let handles: Vec<JoinHandle<()>> = launchers
            .into_iter()
            .map(|launch| launch(self.cancel.child_token()))
            .collect();
        let count = handles.len();
        lock(&self.watchers).extend(handles);
        self.phase.store(PHASE_WATCHING, Ordering::Release);

        info!("Started {} watchers for cluster {}", count, self.id);
        true
    }

    /// Whether `start_watchers` has launched the watchers.
    pub fn is_started(&self) -> bool {
        self.phase.load(Ordering::Acquire) != PHASE_CREATED
    }

    /// Number of watcher tasks ever launched for this runtime.
    pub fn watcher_count(&self) -> usize {
        lock(&self.watchers).len()
    }

    /// Number of watcher tasks still running.
    pub fn running_watchers(&self) -> usize {
        lock(&self.watchers)
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Whether every cache has received its initial listing.
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RuntimeState {
        if self.cancel.is_cancelled() {
            return RuntimeState::Stopped;
        }
        match self.phase.load(Ordering::Acquire) {
            PHASE_CREATED => RuntimeState::Created,
            PHASE_STARTING => RuntimeState::Starting,
            _ => RuntimeState::Watching {
                synced: self.is_synced(),
            },
        }
    }

    /// Wait until every cache has its initial listing. See [`crate::sync::wait_for_sync`].
    pub async fn wait_for_sync(&self, ctx: &CancellationToken, timeout: Duration) -> bool {
        crate::sync::wait_for_sync(ctx, self, timeout).await
    }

    /// Cancel every watcher. Safe to call more than once.
    ///
    /// Only the registry stops runtimes, as part of removing them.
    pub(crate) fn stop(&self) {
        if self.cancel.is_cancelled() {
            debug!("Cluster {} already stopped", self.id);
            return;
        }
        self.cancel.cancel();
        info!("Stopped runtime for cluster {}", self.id);
    }

    /// Whether the runtime has been stopped. Terminal.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn synced_sender(&self) -> &Arc<watch::Sender<bool>> {
        &self.synced
    }

    pub(crate) fn sync_task_flag(&self) -> &Arc<AtomicBool> {
        &self.sync_task_running
    }
}

impl fmt::Debug for ClusterRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterRuntime")
            .field("id", &self.id)
            .field("client", &self.client)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for ClusterRuntime {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeCluster;
    use crate::kind::ResourceKind;
    use k8s_openapi::api::core::v1::Pod;

    fn runtime(fake: &FakeCluster) -> ClusterRuntime {
        ClusterRuntime::new(ClusterId(1), fake.cluster_client(ClusterId(1)))
    }

    #[tokio::test]
    async fn test_new_runtime_is_created_not_started() {
        let fake = FakeCluster::unreachable();
        let runtime = runtime(&fake);

        assert_eq!(runtime.state(), RuntimeState::Created);
        assert!(!runtime.is_started());
        assert_eq!(runtime.watcher_count(), 0);
        assert!(runtime.view::<Pod>().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watchers_start_once() {
        let fake = FakeCluster::unreachable();
        let runtime = runtime(&fake);

        assert!(runtime.start_watchers());
        assert!(!runtime.start_watchers());
        assert_eq!(runtime.watcher_count(), ResourceKind::ALL.len());
        assert_eq!(runtime.state(), RuntimeState::Watching { synced: false });
    }

    #[tokio::test]
    async fn test_stop_cancels_watchers() {
        let fake = FakeCluster::unreachable();
        let runtime = runtime(&fake);
        runtime.start_watchers();

        runtime.stop();
        runtime.stop();

        assert_eq!(runtime.state(), RuntimeState::Stopped);
        for _ in 0..100 {
            if runtime.running_watchers() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runtime.running_watchers(), 0);
    }

    #[tokio::test]
    async fn test_stopped_runtime_never_starts() {
        let fake = FakeCluster::unreachable();
        let runtime = runtime(&fake);
        runtime.stop();

        assert!(!runtime.start_watchers());
        assert_eq!(runtime.watcher_count(), 0);
    }
}
