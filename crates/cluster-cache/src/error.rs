//! Cluster cache errors

use crate::credential::ClusterId;
use crate::kind::ResourceKind;
use thiserror::Error;

/// Errors that can occur while managing per-cluster watch caches
#[derive(Debug, Error)]
pub enum CacheError {
    /// The credential is missing fields or carries an unparsable kubeconfig.
    /// Not retryable until the credential is fixed.
    #[error("Invalid cluster credential: {0}")]
    AuthConfig(String),

    /// Kubernetes client construction error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The client factory failed for a cluster
    #[error("Failed to create client for cluster {cluster}: {source}")]
    ClientCreation {
        /// Cluster whose client could not be built
        cluster: ClusterId,
        /// Why the factory failed
        #[source]
        source: Box<CacheError>,
    },

    /// A snapshot or view was requested before `ensure_for_cluster`
    #[error("Cluster {0} has not been initialized")]
    ClusterNotInitialized(ClusterId),

    /// Initial listing did not finish within the wait bound
    #[error("Caches for cluster {0} are not ready yet")]
    CacheNotReady(ClusterId),

    /// The watcher behind one resource kind is no longer running
    #[error("{kind} cache for cluster {cluster} is unavailable")]
    CacheUnavailable {
        /// Cluster the cache belongs to
        cluster: ClusterId,
        /// Kind whose watcher exited
        kind: ResourceKind,
    },
}

impl CacheError {
    /// Whether calling again later can succeed without changing the credential.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            CacheError::ClientCreation { source, .. } => source.is_retryable(),
            CacheError::Kube(_) | CacheError::CacheNotReady(_) => true,
            CacheError::AuthConfig(_)
            | CacheError::ClusterNotInitialized(_)
            | CacheError::CacheUnavailable { .. } => false,
        }
    }
}
