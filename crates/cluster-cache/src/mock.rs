//! Test doubles for the client factory and the Kubernetes API.
//!
//! `FakeCluster` is an in-process API server: it answers list requests from
//! objects seeded by the test and holds watch requests open, which is enough
//! for a reflector to complete its initial listing. `MockClientFactory`
//! hands out clients wired to fake clusters and counts how often it was
//! asked to build one.

use crate::client::{ClientFactory, ClusterClient};
use crate::credential::{ClusterCredential, ClusterId};
use crate::error::CacheError;
use http::header::{CONTENT_TYPE, HeaderValue};
use kube::client::Body;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// In-memory Kubernetes API server for tests.
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    objects: Arc<Mutex<HashMap<String, Vec<serde_json::Value>>>>,
    requests: Arc<AtomicUsize>,
    unreachable: bool,
}

impl FakeCluster {
    /// A cluster that answers every list, with no objects yet
    pub fn new() -> Self {
        Self::default()
    }

    /// A cluster that never answers any request
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Seed an object (builder form)
    #[must_use]
    pub fn with<K>(self, object: K) -> Self
    where
        K: kube::Resource<DynamicType = ()> + serde::Serialize,
    {
        self.insert(object);
        self
    }

    /// Seed an object. Visible to lists made after this call.
    pub fn insert<K>(&self, object: K)
    where
        K: kube::Resource<DynamicType = ()> + serde::Serialize,
    {
        let path = K::url_path(&(), None);
        // k8s-openapi types always serialize
        let Ok(value) = serde_json::to_value(&object) else {
            return;
        };
        lock(&self.objects).entry(path).or_default().push(value);
    }

    /// Number of requests received so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// A `kube::Client` whose transport is this fake.
    pub fn client(&self) -> kube::Client {
        let cluster = self.clone();
        let service = tower::service_fn(move |request: http::Request<Body>| {
            let cluster = cluster.clone();
            async move { cluster.respond(request).await }
        });
        kube::Client::new(service, "default")
    }

    /// `ClusterClient` for cluster `id` backed by this fake.
    pub fn cluster_client(&self, id: ClusterId) -> ClusterClient {
        ClusterClient {
            client: self.client(),
            server_url: format!("https://cluster-{}.fake.local", id),
            default_namespace: "default".to_string(),
        }
    }

    async fn respond(&self, request: http::Request<Body>) -> Result<http::Response<String>, Infallible> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let is_watch = request
            .uri()
            .query()
            .is_some_and(|query| query.split('&').any(|pair| pair == "watch=true"));
        if self.unreachable || is_watch {
            // Hold the request open like a watch with no events
            futures::future::pending::<()>().await;
        }

        let items = lock(&self.objects)
            .get(request.uri().path())
            .cloned()
            .unwrap_or_default();
        let body = serde_json::json!({
            "apiVersion": "v1",
            "kind": "List",
            "metadata": { "resourceVersion": "1" },
            "items": items,
        });

        let mut response = http::Response::new(body.to_string());
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(response)
    }
}

/// Client factory for tests.
#[derive(Debug, Default)]
pub struct MockClientFactory {
    clusters: Mutex<HashMap<ClusterId, FakeCluster>>,
    rejected: Mutex<HashSet<ClusterId>>,
    builds: AtomicUsize,
    build_delay: Option<Duration>,
}

impl MockClientFactory {
    /// Factory serving empty clusters until told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every build, to widen race windows
    #[must_use]
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    /// Serve `cluster` for credentials with this id. Unregistered ids get
    /// an empty, reachable cluster.
    pub fn register(&self, id: impl Into<ClusterId>, cluster: FakeCluster) {
        lock(&self.clusters).insert(id.into(), cluster);
    }

    /// Fail builds for this id with an `AuthConfig` error
    pub fn reject(&self, id: impl Into<ClusterId>) {
        lock(&self.rejected).insert(id.into());
    }

    /// Accept builds for this id again
    pub fn accept(&self, id: impl Into<ClusterId>) {
        lock(&self.rejected).remove(&id.into());
    }

    /// Number of `build_client` calls so far
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ClientFactory for MockClientFactory {
    async fn build_client(&self, credential: &ClusterCredential) -> Result<ClusterClient, CacheError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.rejected).contains(&credential.id) {
            return Err(CacheError::AuthConfig(format!(
                "credential for cluster {} rejected",
                credential.id
            )));
        }

        let cluster = lock(&self.clusters)
            .entry(credential.id)
            .or_default()
            .clone();
        Ok(cluster.cluster_client(credential.id))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
