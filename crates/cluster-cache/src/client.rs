//! Authenticated client factory
//!
//! Turns a stored `ClusterCredential` into a ready `kube::Client`. Building a
//! client never touches the network, so a bad server address only shows up
//! once the watchers start talking to it.

use crate::credential::ClusterCredential;
use crate::error::CacheError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for connecting to a cluster API server
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on any single API request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Names used inside the in-memory kubeconfig built from a token credential
const INLINE_ENTRY: &str = "cluster";

/// A live client plus what is known about the cluster it points at.
#[derive(Clone)]
pub struct ClusterClient {
    /// Client for live API calls
    pub client: Client,
    /// Resolved API server URL
    pub server_url: String,
    /// Namespace from the credential, `default` when unset
    pub default_namespace: String,
}

impl fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClient")
            .field("server_url", &self.server_url)
            .field("default_namespace", &self.default_namespace)
            .finish_non_exhaustive()
    }
}

/// Builds clients for clusters.
///
/// The registry only sees this trait, which lets tests hand it clients
/// wired to an in-process fake API server.
#[async_trait::async_trait]
pub trait ClientFactory: Send + Sync {
    /// Build a client for the credential. Must not perform remote calls.
    async fn build_client(&self, credential: &ClusterCredential) -> Result<ClusterClient, CacheError>;
}

/// Production factory backed by kube's kubeconfig loader.
#[derive(Debug, Clone)]
pub struct KubeClientFactory {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for KubeClientFactory {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: REQUEST_TIMEOUT,
        }
    }
}

impl KubeClientFactory {
    /// Factory with the default connect and request timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the connect and per-request timeouts
    #[must_use]
    pub fn with_timeouts(mut self, connect_timeout: Duration, read_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self
    }

    /// Resolve the credential into a client configuration.
    ///
    /// A full kubeconfig is preferred. Otherwise the server URL, token and
    /// optional CA bundle are assembled into a single-context kubeconfig.
    pub async fn build_config(&self, credential: &ClusterCredential) -> Result<Config, CacheError> {
        let kubeconfig = match non_empty(credential.kubeconfig.as_deref()) {
            Some(blob) => {
                debug!("Using embedded kubeconfig for cluster {}", credential.label());
                Kubeconfig::from_yaml(blob).map_err(|e| {
                    CacheError::AuthConfig(format!("unable to parse kubeconfig: {}", e))
                })?
            }
            None => token_kubeconfig(credential)?,
        };

        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| CacheError::AuthConfig(format!("unable to load kubeconfig: {}", e)))?;

        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);
        Ok(config)
    }
}

#[async_trait::async_trait]
impl ClientFactory for KubeClientFactory {
    async fn build_client(&self, credential: &ClusterCredential) -> Result<ClusterClient, CacheError> {
        let config = self.build_config(credential).await?;
        let server_url = config.cluster_url.to_string();
        let default_namespace = config.default_namespace.clone();
        let client = Client::try_from(config)?;

        Ok(ClusterClient {
            client,
            server_url,
            default_namespace,
        })
    }
}

/// Assemble a minimal kubeconfig from the URL/token/CA fields.
fn token_kubeconfig(credential: &ClusterCredential) -> Result<Kubeconfig, CacheError> {
    let (Some(server), Some(token)) = (
        non_empty(credential.server_url.as_deref()),
        non_empty(credential.bearer_token.as_deref()),
    ) else {
        return Err(CacheError::AuthConfig(format!(
            "cluster {} needs either a kubeconfig or a server URL and bearer token",
            credential.id
        )));
    };

    let mut cluster = serde_json::json!({ "server": server });
    match credential.ca_bundle.as_deref().filter(|pem| !pem.is_empty()) {
        Some(pem) => {
            cluster["certificate-authority-data"] = serde_json::Value::String(STANDARD.encode(pem));
        }
        None => {
            warn!(
                "No CA bundle for cluster {}, TLS verification is disabled",
                credential.label()
            );
            cluster["insecure-skip-tls-verify"] = serde_json::Value::Bool(true);
        }
    }

    let document = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": INLINE_ENTRY, "cluster": cluster }],
        "users": [{ "name": INLINE_ENTRY, "user": { "token": token } }],
        "contexts": [{
            "name": INLINE_ENTRY,
            "context": { "cluster": INLINE_ENTRY, "user": INLINE_ENTRY },
        }],
        "current-context": INLINE_ENTRY,
    });

    serde_json::from_value(document)
        .map_err(|e| CacheError::AuthConfig(format!("unable to assemble kubeconfig: {}", e)))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
