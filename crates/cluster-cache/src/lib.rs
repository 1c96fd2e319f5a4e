//! Multi-cluster watch-cache manager
//!
//! Keeps one set of Kubernetes watch caches per managed cluster and serves
//! reads from memory:
//! - `ClusterRegistry`: construct-once runtimes keyed by `ClusterId`
//! - `ClusterRuntime`: client, caches and watchers of one cluster
//! - `wait_for_sync`: bounded wait for a cluster's initial listings
//! - `OverviewSnapshot`: aggregate counts computed from cache only
//!
//! Writes never go through the caches; use `ClusterRuntime::client`.

pub mod cache;
pub mod client;
pub mod credential;
pub mod error;
pub mod kind;
pub mod registry;
pub mod runtime;
pub mod snapshot;
pub mod sync;
pub mod view;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use cache::{WatchCache, WatchCaches};
pub use client::{ClientFactory, ClusterClient, KubeClientFactory};
pub use credential::{ClusterCredential, ClusterId};
pub use error::CacheError;
pub use kind::{ResourceKind, TrackedResource};
pub use registry::{ClusterRegistry, SNAPSHOT_SYNC_TIMEOUT};
pub use runtime::{ClusterRuntime, RuntimeState};
pub use snapshot::OverviewSnapshot;
pub use sync::wait_for_sync;
pub use view::ResourceView;
