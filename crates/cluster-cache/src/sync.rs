//! Cache sync coordination.
//!
//! `wait_for_sync` is the only call in this crate that blocks a request
//! path, and it is always bounded. The wait is scoped to one runtime, so a
//! cluster that never answers cannot hold up reads of any other cluster.

use crate::runtime::ClusterRuntime;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wait until every watch cache of `runtime` has received its initial listing.
///
/// Returns `true` once the runtime is synced. Returns `false` when `timeout`
/// elapses or `ctx` is cancelled first; that only means "not ready yet", and
/// the background sync keeps going for a later call.
pub async fn wait_for_sync(
    ctx: &CancellationToken,
    runtime: &ClusterRuntime,
    timeout: Duration,
) -> bool {
    if runtime.is_synced() {
        return true;
    }

    spawn_sync_task(runtime);

    let mut synced = runtime.synced_sender().subscribe();
    let became_synced = async move {
        let ready = synced.wait_for(|synced| *synced).await.is_ok();
        ready
    };
    tokio::select! {
        result = tokio::time::timeout(timeout, became_synced) => {
            let ready = result.unwrap_or(false);
            if !ready {
                debug!("Cluster {} not synced within {:?}", runtime.id(), timeout);
            }
            ready
        }
        () = ctx.cancelled() => {
            debug!("Sync wait for cluster {} cancelled by caller", runtime.id());
            false
        }
    }
}

/// Start the background task that flips `synced`, unless one is running.
fn spawn_sync_task(runtime: &ClusterRuntime) {
    let running = runtime.sync_task_flag().clone();
    if running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }

    let id = runtime.id();
    let readiness = runtime.caches().readiness();
    let synced = runtime.synced_sender().clone();
    let cancel = runtime.cancellation().clone();

    tokio::spawn(async move {
        tokio::select! {
            results = futures::future::join_all(readiness) => {
                if results.into_iter().all(|ready| ready) {
                    // Monotonic: nothing ever sends `false`.
                    synced.send_replace(true);
                    info!("Caches synced for cluster {}", id);
                } else {
                    warn!("A watcher for cluster {} went away before its initial listing", id);
                    running.store(false, Ordering::Release);
                }
            }
            () = cancel.cancelled() => {
                debug!("Sync task for cluster {} cancelled", id);
                running.store(false, Ordering::Release);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::ClusterId;
    use crate::mock::FakeCluster;
    use crate::runtime::RuntimeState;
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::time::Instant;

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_zero_timeout_on_never_started_runtime_returns_false() {
        let fake = FakeCluster::new();
        let runtime = ClusterRuntime::new(ClusterId(1), fake.cluster_client(ClusterId(1)));

        let started = Instant::now();
        let ready = wait_for_sync(&CancellationToken::new(), &runtime, Duration::ZERO).await;

        assert!(!ready);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(runtime.state(), RuntimeState::Created);
    }

    #[tokio::test]
    async fn test_caller_cancellation_ends_wait() {
        let fake = FakeCluster::unreachable();
        let runtime = ClusterRuntime::new(ClusterId(2), fake.cluster_client(ClusterId(2)));
        runtime.start_watchers();

        let ctx = CancellationToken::new();
        ctx.cancel();
        let started = Instant::now();
        let ready = wait_for_sync(&ctx, &runtime, Duration::from_secs(30)).await;

        assert!(!ready);
        assert!(started.elapsed() < Duration::from_secs(5));
        runtime.stop();
    }

    #[tokio::test]
    async fn test_synced_is_monotonic() {
        let fake = FakeCluster::new().with(namespace("default"));
        let runtime = ClusterRuntime::new(ClusterId(3), fake.cluster_client(ClusterId(3)));
        runtime.start_watchers();
        let ctx = CancellationToken::new();

        assert!(wait_for_sync(&ctx, &runtime, Duration::from_secs(10)).await);
        assert_eq!(runtime.state(), RuntimeState::Watching { synced: true });

        fake.insert(namespace("kube-system"));
        for _ in 0..3 {
            assert!(wait_for_sync(&ctx, &runtime, Duration::ZERO).await);
            assert!(runtime.is_synced());
        }
        runtime.stop();
    }

    #[tokio::test]
    async fn test_timeout_leaves_background_sync_running() {
        let fake = FakeCluster::new();
        let runtime = ClusterRuntime::new(ClusterId(4), fake.cluster_client(ClusterId(4)));
        let ctx = CancellationToken::new();

        // Not started yet: the first wait gives up.
        assert!(!wait_for_sync(&ctx, &runtime, Duration::from_millis(20)).await);

        // The sync task spawned by the first wait finishes once watchers run.
        runtime.start_watchers();
        assert!(wait_for_sync(&ctx, &runtime, Duration::from_secs(10)).await);
        runtime.stop();
    }
}
