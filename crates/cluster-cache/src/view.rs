//! Read-only typed views over a cluster's caches.
//!
//! Views reflect whatever the watcher has seen so far, which may be nothing
//! before the initial listing completes. Callers that need a settled view go
//! through `wait_for_sync` first.

use crate::kind::TrackedResource;
use kube::ResourceExt;
use kube::core::SelectorExt;
use kube_runtime::reflector::{ObjectRef, Store};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Read-only access to one resource kind on one cluster.
pub struct ResourceView<K: TrackedResource> {
    store: Store<K>,
}

impl<K: TrackedResource> Clone for ResourceView<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<K: TrackedResource> fmt::Debug for ResourceView<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceView")
            .field("kind", &K::KIND)
            .field("objects", &self.store.len())
            .finish()
    }
}

impl<K: TrackedResource> ResourceView<K> {
    pub(crate) fn new(store: Store<K>) -> Self {
        Self { store }
    }

    /// Every cached object.
    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    /// Cached objects accepted by `predicate`.
    pub fn list_by<F>(&self, predicate: F) -> Vec<Arc<K>>
    where
        F: Fn(&K) -> bool,
    {
        self.store
            .state()
            .into_iter()
            .filter(|object| predicate(object))
            .collect()
    }

    /// Cached objects whose labels match `selector`.
    ///
    /// Takes a `kube::core::Selector` or a single `Expression`. A k8s
    /// `LabelSelector` (such as a deployment's `spec.selector`) converts with
    /// `Selector::try_from`.
    pub fn list_matching<S>(&self, selector: &S) -> Vec<Arc<K>>
    where
        S: SelectorExt<Search = BTreeMap<String, String>>,
    {
        self.list_by(|object| selector.matches(object.labels()))
    }

    /// Cached objects in one namespace.
    pub fn in_namespace(&self, namespace: &str) -> Vec<Arc<K>> {
        self.list_by(|object| object.namespace().as_deref() == Some(namespace))
    }

    /// Look up one object. `namespace` is `None` for cluster scoped kinds.
    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>> {
        let mut key = ObjectRef::<K>::new(name);
        if let Some(namespace) = namespace {
            key = key.within(namespace);
        }
        self.store.get(&key)
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the cache holds no objects.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{WatchCache, seed};
    use crate::credential::ClusterId;
    use k8s_openapi::api::core::v1::Pod;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
    use kube::core::{Expression, Selector};

    fn pod(namespace: &str, name: &str, app: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), app.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn seeded_view() -> ResourceView<Pod> {
        let (cache, mut writer) = WatchCache::<Pod>::new(ClusterId(1));
        seed(
            &mut writer,
            vec![
                pod("shop", "web-1", "web"),
                pod("shop", "web-2", "web"),
                pod("shop", "db-0", "postgres"),
                pod("ops", "web-0", "web"),
            ],
        );
        cache.view()
    }

    #[test]
    fn test_view_before_listing_is_empty() {
        let (cache, _writer) = WatchCache::<Pod>::new(ClusterId(1));
        let view = cache.view();
        assert!(view.is_empty());
        assert!(view.list().is_empty());
    }

    #[test]
    fn test_list_and_get() {
        let view = seeded_view();
        assert_eq!(view.len(), 4);
        assert!(view.get(Some("shop"), "db-0").is_some());
        assert!(view.get(Some("ops"), "db-0").is_none());
    }

    #[test]
    fn test_list_matching_selector() {
        let view = seeded_view();
        let selector = Selector::from(Expression::Equal("app".to_string(), "web".to_string()));
        assert_eq!(view.list_matching(&selector).len(), 3);

        let label_selector = LabelSelector {
            match_labels: Some(BTreeMap::from([("app".to_string(), "postgres".to_string())])),
            ..Default::default()
        };
        let selector = Selector::try_from(label_selector).unwrap();
        let matched = view.list_matching(&selector);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name_any(), "db-0");
    }

    #[test]
    fn test_in_namespace_and_predicate() {
        let view = seeded_view();
        assert_eq!(view.in_namespace("shop").len(), 3);
        assert_eq!(view.in_namespace("missing").len(), 0);
        let web_outside_shop = view.list_by(|p| {
            p.labels().get("app").map(String::as_str) == Some("web")
                && p.namespace().as_deref() != Some("shop")
        });
        assert_eq!(web_outside_shop.len(), 1);
    }
}
