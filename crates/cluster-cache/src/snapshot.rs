//! Overview snapshots computed from cache contents.
//!
//! A snapshot is recomputed on every call and never stored. Each section is
//! read independently: a kind whose cache is unavailable is left out and
//! the remaining sections are still reported.

use crate::cache::{WatchCache, WatchCaches};
use crate::credential::ClusterId;
use crate::kind::TrackedResource;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Point-in-time rollup of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewSnapshot {
    /// Cluster the snapshot describes
    pub cluster_id: ClusterId,
    /// When the caches were read
    pub generated_at: DateTime<Utc>,
    /// Node readiness; `None` when that cache could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeSummary>,
    /// Pod phases
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pods: Option<PodSummary>,
    /// Namespace count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<usize>,
    /// Service count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<usize>,
    /// Deployment availability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployments: Option<DeploymentSummary>,
    /// Job outcomes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<JobSummary>,
    /// Cron job schedule state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_jobs: Option<CronJobSummary>,
}

/// Nodes by readiness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    /// All nodes
    pub total: usize,
    /// Nodes whose `Ready` condition is `True`
    pub ready: usize,
}

/// Pods by phase. Phases other than the four known ones land in `unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PodSummary {
    /// All pods
    pub total: usize,
    /// Phase `Running`
    pub running: usize,
    /// Phase `Pending`
    pub pending: usize,
    /// Phase `Succeeded`
    pub succeeded: usize,
    /// Phase `Failed`
    pub failed: usize,
    /// Missing or unrecognised phase
    pub unknown: usize,
}

/// Deployments by availability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentSummary {
    /// All deployments
    pub total: usize,
    /// Deployments with at least as many available replicas as desired
    pub available: usize,
}

/// Jobs by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    /// All jobs
    pub total: usize,
    /// Neither complete nor failed
    pub active: usize,
    /// `Complete` condition is `True`
    pub succeeded: usize,
    /// `Failed` condition is `True`
    pub failed: usize,
}

/// Cron jobs by schedule state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CronJobSummary {
    /// All cron jobs
    pub total: usize,
    /// `spec.suspend` is set
    pub suspended: usize,
}

impl OverviewSnapshot {
    /// Aggregate the current contents of `caches`. No remote calls.
    pub fn collect(cluster_id: ClusterId, caches: &WatchCaches) -> Self {
        Self {
            cluster_id,
            generated_at: Utc::now(),
            nodes: section(cluster_id, &caches.nodes, NodeSummary::tally),
            pods: section(cluster_id, &caches.pods, PodSummary::tally),
            namespaces: section(cluster_id, &caches.namespaces, |objects| objects.len()),
            services: section(cluster_id, &caches.services, |objects| objects.len()),
            deployments: section(cluster_id, &caches.deployments, DeploymentSummary::tally),
            jobs: section(cluster_id, &caches.jobs, JobSummary::tally),
            cron_jobs: section(cluster_id, &caches.cron_jobs, CronJobSummary::tally),
        }
    }
}

fn section<K, T>(
    cluster_id: ClusterId,
    cache: &WatchCache<K>,
    summarize: impl FnOnce(&[Arc<K>]) -> T,
) -> Option<T>
where
    K: TrackedResource,
{
    match cache.list() {
        Ok(objects) => Some(summarize(&objects)),
        Err(e) => {
            warn!("Omitting {} from overview of cluster {}: {}", cache.kind(), cluster_id, e);
            None
        }
    }
}

impl NodeSummary {
    /// Count ready nodes.
    pub fn tally(nodes: &[Arc<Node>]) -> Self {
        Self {
            total: nodes.len(),
            ready: nodes.iter().filter(|node| node_is_ready(node)).count(),
        }
    }
}

/// A node is ready when it carries a `Ready` condition with status `True`.
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "Ready" && condition.status == "True")
        })
}

impl PodSummary {
    /// Count pods by phase.
    pub fn tally(pods: &[Arc<Pod>]) -> Self {
        let mut summary = Self {
            total: pods.len(),
            ..Default::default()
        };
        for pod in pods {
            let phase = pod.status.as_ref().and_then(|status| status.phase.as_deref());
            match phase {
                Some("Running") => summary.running += 1,
                Some("Pending") => summary.pending += 1,
                Some("Succeeded") => summary.succeeded += 1,
                Some("Failed") => summary.failed += 1,
                _ => summary.unknown += 1,
            }
        }
        summary
    }
}

impl DeploymentSummary {
    /// Count fully available deployments.
    pub fn tally(deployments: &[Arc<Deployment>]) -> Self {
        let available = deployments
            .iter()
            .filter(|deployment| {
                // `spec.replicas` defaults to 1 when unset
                let desired = deployment
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.replicas)
                    .unwrap_or(1);
                let available = deployment
                    .status
                    .as_ref()
                    .and_then(|status| status.available_replicas)
                    .unwrap_or(0);
                available >= desired
            })
            .count();
        Self {
            total: deployments.len(),
            available,
        }
    }
}

impl JobSummary {
    /// Classify jobs by their terminal conditions.
    pub fn tally(jobs: &[Arc<Job>]) -> Self {
        let mut summary = Self {
            total: jobs.len(),
            ..Default::default()
        };
        for job in jobs {
            if job_has_condition(job, "Complete") {
                summary.succeeded += 1;
            } else if job_has_condition(job, "Failed") {
                summary.failed += 1;
            } else {
                summary.active += 1;
            }
        }
        summary
    }
}

fn job_has_condition(job: &Job, type_: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == type_ && condition.status == "True")
        })
}

impl CronJobSummary {
    /// Count suspended cron jobs.
    pub fn tally(cron_jobs: &[Arc<CronJob>]) -> Self {
        Self {
            total: cron_jobs.len(),
            suspended: cron_jobs
                .iter()
                .filter(|cron_job| {
                    cron_job
                        .spec
                        .as_ref()
                        .and_then(|spec| spec.suspend)
                        .unwrap_or(false)
                })
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::seed;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::api::core::v1::{Namespace, NodeCondition, NodeStatus, PodStatus, Service};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        }
    }

    fn node(name: &str, ready: Option<&str>) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: ready.map(|status| {
                    vec![NodeCondition {
                        type_: "Ready".to_string(),
                        status: status.to_string(),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(name: &str, phase: Option<&str>) -> Pod {
        Pod {
            metadata: meta(name),
            status: Some(PodStatus {
                phase: phase.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn deployment(name: &str, replicas: Option<i32>, available: Option<i32>) -> Deployment {
        Deployment {
            metadata: meta(name),
            spec: Some(DeploymentSpec {
                replicas,
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                available_replicas: available,
                ..Default::default()
            }),
        }
    }

    fn job(name: &str, condition: Option<&str>) -> Job {
        Job {
            metadata: meta(name),
            status: Some(JobStatus {
                conditions: condition.map(|type_| {
                    vec![JobCondition {
                        type_: type_.to_string(),
                        status: "True".to_string(),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn arcs<K>(objects: Vec<K>) -> Vec<Arc<K>> {
        objects.into_iter().map(Arc::new).collect()
    }

    #[test]
    fn test_node_readiness() {
        let nodes = arcs(vec![
            node("a", Some("True")),
            node("b", Some("True")),
            node("c", Some("True")),
            node("d", Some("False")),
            node("e", None),
        ]);
        assert_eq!(NodeSummary::tally(&nodes), NodeSummary { total: 5, ready: 3 });
    }

    #[test]
    fn test_unrecognized_pod_phase_counts_as_unknown() {
        let pods = arcs(vec![
            pod("a", Some("Running")),
            pod("b", Some("Running")),
            pod("c", Some("Running")),
            pod("d", Some("Pending")),
            pod("e", Some("CrashLoop")),
        ]);
        let summary = PodSummary::tally(&pods);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.running, 3);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.failed + summary.succeeded, 0);
    }

    #[test]
    fn test_pod_without_phase_is_unknown() {
        let pods = arcs(vec![pod("a", None), pod("b", Some("Unknown")), pod("c", Some("Failed"))]);
        let summary = PodSummary::tally(&pods);
        assert_eq!(summary.unknown, 2);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_deployment_availability() {
        let deployments = arcs(vec![
            deployment("web", Some(3), Some(3)),
            deployment("api", Some(3), Some(1)),
            deployment("worker", None, Some(1)),
            deployment("paused", Some(0), None),
        ]);
        assert_eq!(
            DeploymentSummary::tally(&deployments),
            DeploymentSummary { total: 4, available: 3 }
        );
    }

    #[test]
    fn test_job_outcomes() {
        let jobs = arcs(vec![
            job("done", Some("Complete")),
            job("broken", Some("Failed")),
            job("running", None),
        ]);
        assert_eq!(
            JobSummary::tally(&jobs),
            JobSummary { total: 3, active: 1, succeeded: 1, failed: 1 }
        );
    }

    #[test]
    fn test_unavailable_kind_is_omitted_not_fatal() {
        let (caches, mut writers) = WatchCaches::new(ClusterId(8));
        seed(&mut writers.nodes, vec![node("a", Some("True"))]);
        seed(&mut writers.pods, vec![pod("p", Some("Running"))]);
        seed(&mut writers.namespaces, vec![Namespace { metadata: meta("default"), ..Default::default() }]);
        seed(&mut writers.services, vec![Service { metadata: meta("kubernetes"), ..Default::default() }]);
        seed(&mut writers.deployments, vec![deployment("web", Some(1), Some(1))]);
        caches.deployments.mark_terminated();

        let snapshot = OverviewSnapshot::collect(ClusterId(8), &caches);

        assert_eq!(snapshot.cluster_id, ClusterId(8));
        assert_eq!(snapshot.nodes, Some(NodeSummary { total: 1, ready: 1 }));
        assert_eq!(snapshot.pods.map(|p| p.running), Some(1));
        assert_eq!(snapshot.namespaces, Some(1));
        assert_eq!(snapshot.services, Some(1));
        assert_eq!(snapshot.deployments, None);
        assert_eq!(snapshot.jobs.map(|j| j.total), Some(0));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("deployments").is_none());
        assert_eq!(json["nodes"]["ready"], 1);
        assert_eq!(json["clusterId"], 8);
    }
}
