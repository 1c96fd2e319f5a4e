//! Controller configuration.
//!
//! Settings come from environment variables; the fleet itself is listed in a
//! YAML clusters file:
//!
//! ```yaml
//! clusters:
//!   - id: 1
//!     name: edge-a
//!     kubeconfig_path: edge-a.yaml
//!   - id: 2
//!     server: https://10.0.0.2:6443
//!     token_env: EDGE_B_TOKEN
//!     ca_file: edge-b-ca.pem
//! ```
//!
//! Relative paths are resolved against the directory of the clusters file.

use crate::error::ControllerError;
use cluster_cache::{ClusterCredential, ClusterId};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_REPORT_INTERVAL_SECS: u64 = 60;
const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 10;

/// Runtime settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub clusters_file: PathBuf,
    /// Time between overview reports per cluster
    pub report_interval: Duration,
    /// How long startup waits for a cluster's initial listing
    pub sync_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let clusters_file = lookup("CLUSTERS_FILE").ok_or_else(|| {
            ControllerError::InvalidConfig(
                "CLUSTERS_FILE environment variable is required".to_string(),
            )
        })?;

        Ok(Self {
            clusters_file: PathBuf::from(clusters_file),
            report_interval: seconds(&lookup, "REPORT_INTERVAL_SECS", DEFAULT_REPORT_INTERVAL_SECS)?,
            sync_timeout: seconds(&lookup, "SYNC_TIMEOUT_SECS", DEFAULT_SYNC_TIMEOUT_SECS)?,
        })
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, ControllerError> {
    let Some(raw) = lookup(key) else {
        return Ok(Duration::from_secs(default));
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(ControllerError::InvalidConfig(format!(
            "{} must be a positive number of seconds, got {:?}",
            key, raw
        ))),
        Ok(secs) => Ok(Duration::from_secs(secs)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClustersFile {
    clusters: Vec<ClusterEntry>,
}

/// One cluster in the clusters file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClusterEntry {
    id: u64,
    name: Option<String>,
    kubeconfig: Option<String>,
    kubeconfig_path: Option<PathBuf>,
    server: Option<String>,
    token: Option<String>,
    token_env: Option<String>,
    ca_file: Option<PathBuf>,
    /// Inline PEM
    ca_data: Option<String>,
}

/// Read the clusters file and turn every entry into a credential.
pub fn load_clusters(path: &Path) -> Result<Vec<ClusterCredential>, ControllerError> {
    let yaml = read(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_clusters(&yaml, base_dir, |key| std::env::var(key).ok())
}

fn parse_clusters(
    yaml: &str,
    base_dir: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Vec<ClusterCredential>, ControllerError> {
    let file: ClustersFile = serde_yaml::from_str(yaml)?;

    let mut seen = HashSet::new();
    let mut credentials = Vec::with_capacity(file.clusters.len());
    for entry in file.clusters {
        if !seen.insert(entry.id) {
            return Err(ControllerError::InvalidConfig(format!(
                "cluster id {} is listed more than once",
                entry.id
            )));
        }
        credentials.push(entry.into_credential(base_dir, &env)?);
    }
    Ok(credentials)
}

impl ClusterEntry {
    fn into_credential(
        self,
        base_dir: &Path,
        env: &impl Fn(&str) -> Option<String>,
    ) -> Result<ClusterCredential, ControllerError> {
        let id = ClusterId(self.id);
        let invalid = |msg: &str| ControllerError::InvalidConfig(format!("cluster {}: {}", id, msg));

        let kubeconfig = match (self.kubeconfig, self.kubeconfig_path) {
            (Some(_), Some(_)) => return Err(invalid("set only one of kubeconfig and kubeconfig_path")),
            (Some(inline), None) => Some(inline),
            (None, Some(path)) => Some(read(&base_dir.join(path))?),
            (None, None) => None,
        };

        let mut credential = match (kubeconfig, self.server) {
            (Some(_), Some(_)) => return Err(invalid("set either a kubeconfig or a server, not both")),
            (Some(kubeconfig), None) => ClusterCredential::from_kubeconfig(id, kubeconfig),
            (None, Some(server)) => {
                let token = match (self.token, self.token_env) {
                    (Some(_), Some(_)) => return Err(invalid("set only one of token and token_env")),
                    (Some(token), None) => token,
                    (None, Some(var)) => env(&var).ok_or_else(|| {
                        invalid(&format!("environment variable {} is not set", var))
                    })?,
                    (None, None) => return Err(invalid("server requires token or token_env")),
                };
                ClusterCredential::from_token(id, server, token)
            }
            (None, None) => return Err(invalid("needs kubeconfig, kubeconfig_path or server")),
        };

        let ca_bundle = match (self.ca_data, self.ca_file) {
            (Some(_), Some(_)) => return Err(invalid("set only one of ca_data and ca_file")),
            (Some(pem), None) => Some(pem.into_bytes()),
            (None, Some(path)) => Some(read(&base_dir.join(path))?.into_bytes()),
            (None, None) => None,
        };
        if let Some(pem) = ca_bundle {
            if credential.kubeconfig.is_some() {
                return Err(invalid("ca_data and ca_file only apply to server entries"));
            }
            credential = credential.with_ca_bundle(pem);
        }

        if let Some(name) = self.name {
            credential = credential.with_name(name);
        }
        Ok(credential)
    }
}

fn read(path: &Path) -> Result<String, ControllerError> {
    std::fs::read_to_string(path).map_err(|source| ControllerError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(env(&[("CLUSTERS_FILE", "/etc/fleet/clusters.yaml")])).unwrap();

        assert_eq!(config.clusters_file, PathBuf::from("/etc/fleet/clusters.yaml"));
        assert_eq!(config.report_interval, Duration::from_secs(60));
        assert_eq!(config.sync_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_requires_clusters_file() {
        let err = Config::from_lookup(env(&[])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_rejects_bad_intervals() {
        for bad in ["0", "soon", "-5"] {
            let result = Config::from_lookup(env(&[
                ("CLUSTERS_FILE", "clusters.yaml"),
                ("REPORT_INTERVAL_SECS", bad),
            ]));
            assert!(result.is_err(), "{:?} should be rejected", bad);
        }

        let config = Config::from_lookup(env(&[
            ("CLUSTERS_FILE", "clusters.yaml"),
            ("SYNC_TIMEOUT_SECS", " 3 "),
        ]))
        .unwrap();
        assert_eq!(config.sync_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_parse_token_and_kubeconfig_entries() {
        let yaml = r#"
clusters:
  - id: 1
    name: edge-a
    kubeconfig: "apiVersion: v1\nkind: Config\n"
  - id: 2
    server: https://10.0.0.2:6443
    token_env: EDGE_B_TOKEN
    ca_data: |
      -----BEGIN CERTIFICATE-----
      MIIB
      -----END CERTIFICATE-----
"#;
        let credentials =
            parse_clusters(yaml, Path::new("."), env(&[("EDGE_B_TOKEN", "s3cret")])).unwrap();

        assert_eq!(credentials.len(), 2);
        assert_eq!(credentials[0].id, ClusterId(1));
        assert_eq!(credentials[0].name.as_deref(), Some("edge-a"));
        assert!(credentials[0].kubeconfig.is_some());

        assert_eq!(credentials[1].id, ClusterId(2));
        assert_eq!(credentials[1].server_url.as_deref(), Some("https://10.0.0.2:6443"));
        assert_eq!(credentials[1].bearer_token.as_deref(), Some("s3cret"));
        assert!(credentials[1].ca_bundle.is_some());
    }

    #[test]
    fn test_parse_rejects_duplicate_ids() {
        let yaml = r#"
clusters:
  - id: 7
    server: https://a:6443
    token: t
  - id: 7
    server: https://b:6443
    token: t
"#;
        let err = parse_clusters(yaml, Path::new("."), env(&[])).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_parse_rejects_incomplete_entries() {
        let cases = [
            "clusters:\n  - id: 1\n",
            "clusters:\n  - id: 1\n    server: https://a:6443\n",
            "clusters:\n  - id: 1\n    server: https://a:6443\n    token_env: MISSING\n",
            "clusters:\n  - id: 1\n    kubeconfig: x\n    server: https://a:6443\n    token: t\n",
            "clusters:\n  - id: 1\n    kubeconfig: x\n    ca_data: pem\n",
        ];
        for yaml in cases {
            let result = parse_clusters(yaml, Path::new("."), env(&[]));
            assert!(
                matches!(result, Err(ControllerError::InvalidConfig(_))),
                "expected InvalidConfig for {:?}",
                yaml
            );
        }
    }

    #[test]
    fn test_parse_rejects_unknown_fields() {
        let yaml = "clusters:\n  - id: 1\n    server: https://a:6443\n    token: t\n    insecure: true\n";
        let result = parse_clusters(yaml, Path::new("."), env(&[]));
        assert!(matches!(result, Err(ControllerError::Yaml(_))));
    }

    #[test]
    fn test_missing_kubeconfig_path_is_read_error() {
        let yaml = "clusters:\n  - id: 1\n    kubeconfig_path: does-not-exist.yaml\n";
        let result = parse_clusters(yaml, Path::new("/nonexistent-dir"), env(&[]));
        match result {
            Err(ControllerError::ReadFile { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent-dir/does-not-exist.yaml"));
            }
            other => panic!("expected ReadFile, got {:?}", other.map(|c| c.len())),
        }
    }
}
