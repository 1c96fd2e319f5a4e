//! Resource kinds mirrored for every cluster.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};
use serde::Serialize;
use std::fmt;

/// One tracked resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    /// `v1/Node`
    Node,
    /// `v1/Pod`
    Pod,
    /// `v1/Namespace`
    Namespace,
    /// `v1/Service`
    Service,
    /// `apps/v1/Deployment`
    Deployment,
    /// `batch/v1/Job`
    Job,
    /// `batch/v1/CronJob`
    CronJob,
}

impl ResourceKind {
    /// Every kind a cluster runtime watches, in startup order.
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Node,
        ResourceKind::Pod,
        ResourceKind::Namespace,
        ResourceKind::Service,
        ResourceKind::Deployment,
        ResourceKind::Job,
        ResourceKind::CronJob,
    ];

    /// Kubernetes kind name.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Node => "Node",
            ResourceKind::Pod => "Pod",
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Service => "Service",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Job => "Job",
            ResourceKind::CronJob => "CronJob",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binds a k8s-openapi type to its `ResourceKind`.
///
/// Implemented for exactly the kinds a runtime watches, so typed lookups
/// cannot ask for a kind that has no cache.
pub trait TrackedResource:
    kube::Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Kind this type is cached as
    const KIND: ResourceKind;
}

macro_rules! tracked {
    ($ty:ty, $kind:expr) => {
        impl TrackedResource for $ty {
            const KIND: ResourceKind = $kind;
        }
    };
}

tracked!(Node, ResourceKind::Node);
tracked!(Pod, ResourceKind::Pod);
tracked!(Namespace, ResourceKind::Namespace);
tracked!(Service, ResourceKind::Service);
tracked!(Deployment, ResourceKind::Deployment);
tracked!(Job, ResourceKind::Job);
tracked!(CronJob, ResourceKind::CronJob);
