//! Cluster identity and credentials
//!
//! A `ClusterCredential` is owned by whatever stores cluster records (a
//! database, a config file). The cache never mutates it; it only reads it
//! once when a cluster is first used.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable key of one managed cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u64);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ClusterId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Connection details for one cluster.
///
/// Either `kubeconfig` (a full client configuration, YAML) or the
/// `server_url` + `bearer_token` pair must be set. When both are present the
/// kubeconfig wins.
#[derive(Clone, Default)]
pub struct ClusterCredential {
    /// Cluster this credential belongs to
    pub id: ClusterId,
    /// Display name, used only in logs
    pub name: Option<String>,
    /// Full kubeconfig document (YAML)
    pub kubeconfig: Option<String>,
    /// API server URL, used with `bearer_token`
    pub server_url: Option<String>,
    /// Bearer token for `server_url`
    pub bearer_token: Option<String>,
    /// PEM encoded CA bundle used to verify the API server
    pub ca_bundle: Option<Vec<u8>>,
}

impl ClusterCredential {
    /// Credential backed by a full kubeconfig document.
    pub fn from_kubeconfig(id: impl Into<ClusterId>, kubeconfig: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kubeconfig: Some(kubeconfig.into()),
            ..Default::default()
        }
    }

    /// Credential backed by an API server URL and a bearer token.
    pub fn from_token(
        id: impl Into<ClusterId>,
        server_url: impl Into<String>,
        bearer_token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            server_url: Some(server_url.into()),
            bearer_token: Some(bearer_token.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_ca_bundle(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_bundle = Some(pem.into());
        self
    }

    /// Name for log lines: the display name if set, otherwise the id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", name, self.id),
            None => self.id.to_string(),
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for ClusterCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCredential")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kubeconfig", &self.kubeconfig.as_ref().map(|_| "<redacted>"))
            .field("server_url", &self.server_url)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("ca_bundle", &self.ca_bundle.as_ref().map(Vec::len))
            .finish()
    }
}
