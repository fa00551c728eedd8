//! Credential mapping and host selection.
//!
//! The [`AuthProvider`] turns a `(service, attempt)` pair into a concrete
//! URL by combining the resolved connection string, the current cluster
//! config, and a [`CredentialProvider`].

use crate::config::{ClusterConfig, ClusterConfigManager};
use crate::connstr::ResolvedConnectionString;
use crate::error::{RestError, Result};
use crate::node::Service;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Environment variable carrying `host:port=password` credential mappings
/// for a privileged service user.
pub const CREDENTIAL_MAPPINGS_ENV_VAR: &str = "CBM_SERVICES_KV_HOSTS";

/// Default user agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("couchbase-rest/", env!("CARGO_PKG_VERSION"));

const LOCALHOST_EQUIVALENTS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

/// Supplies the basic-auth pair used for requests to a given host, plus the
/// `User-Agent` the client identifies itself with.
pub trait CredentialProvider: Send + Sync {
    /// Basic-auth `(username, password)` for requests to `host:port`.
    fn credentials(&self, host: &str) -> (String, String);

    /// The `User-Agent` header value.
    fn user_agent(&self) -> &str;
}

/// A static credential pair with an optional per-host password mapping.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    username: String,
    password: String,
    user_agent: String,
    mappings: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        StaticCredentials {
            username: username.into(),
            password: password.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            mappings: HashMap::new(),
        }
    }

    /// Override the user agent, for example `my-tool/1.2.3`.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Install per-host password mappings from a comma-separated
    /// `host:port=password` list. Malformed entries are logged and skipped.
    ///
    /// Localhost spellings (`localhost`, `127.0.0.1`, `[::1]`) are treated
    /// as equivalent: a mapping for one matches all of them.
    pub fn mappings(mut self, raw: &str) -> Self {
        for entry in raw.split(',').filter(|entry| !entry.is_empty()) {
            let Some((host, password)) = entry.split_once('=') else {
                warn!(entry, "skipping malformed credential mapping");
                continue;
            };

            let Some((hostname, port)) = split_host_port(host) else {
                warn!(entry, "skipping credential mapping without a port");
                continue;
            };

            if LOCALHOST_EQUIVALENTS.contains(&hostname) {
                for equivalent in LOCALHOST_EQUIVALENTS {
                    self.mappings
                        .insert(format!("{equivalent}:{port}"), password.to_string());
                }
            } else {
                self.mappings.insert(host.to_string(), password.to_string());
            }
        }

        self
    }

    /// Construct with mappings read from [`CREDENTIAL_MAPPINGS_ENV_VAR`].
    /// The variable is read once, here.
    pub fn from_env(username: impl Into<String>, password: impl Into<String>) -> Self {
        let credentials = StaticCredentials::new(username, password);

        match std::env::var(CREDENTIAL_MAPPINGS_ENV_VAR) {
            Ok(raw) => credentials.mappings(&raw),
            Err(_) => credentials,
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self, host: &str) -> (String, String) {
        let password = self
            .mappings
            .get(host)
            .cloned()
            .unwrap_or_else(|| self.password.clone());

        (self.username.clone(), password)
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

/// Splits `host:port` / `[v6]:port` into hostname and port parts.
fn split_host_port(host: &str) -> Option<(&str, &str)> {
    let (hostname, port) = host.rsplit_once(':')?;
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some((hostname, port))
}

/// Maps each outbound request to a concrete node URL.
///
/// Host selection honours TLS, alternate addresses, and bootstrap-node
/// affinity: the node whose topology answer is in use is always tried
/// first when it runs the target service.
pub struct AuthProvider {
    resolved: ResolvedConnectionString,
    manager: Arc<ClusterConfigManager>,
    credentials: Arc<dyn CredentialProvider>,
    use_alternate: RwLock<bool>,
}

impl std::fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProvider")
            .field("resolved", &self.resolved)
            .field("use_alternate", &self.use_alternate)
            .finish()
    }
}

impl AuthProvider {
    pub fn new(
        resolved: ResolvedConnectionString,
        manager: Arc<ClusterConfigManager>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        AuthProvider {
            resolved,
            manager,
            credentials,
            use_alternate: RwLock::new(false),
        }
    }

    /// Basic-auth pair for the given `host:port`.
    pub fn credentials_for(&self, host: &str) -> (String, String) {
        self.credentials.credentials(host)
    }

    /// The `User-Agent` header value.
    pub fn user_agent(&self) -> String {
        self.credentials.user_agent().to_string()
    }

    /// Whether host selection currently prefers alternate addresses.
    pub fn using_alternate_addresses(&self) -> bool {
        *self.read_use_alternate()
    }

    /// All URLs exposing the given service, bootstrap node first.
    pub fn all_hosts(&self, service: Service) -> Result<Vec<String>> {
        let config = self.manager.get()?;
        let use_tls = self.resolved.use_tls;
        let use_alternate = *self.read_use_alternate();

        let mut hosts = Vec::with_capacity(config.nodes.len());
        let mut bootstrap_host = None;

        for node in &config.nodes {
            let Some(url) = node.url_for(service, use_tls, use_alternate) else {
                continue;
            };

            if node.bootstrap_node && bootstrap_host.is_none() {
                bootstrap_host = Some(url);
            } else {
                hosts.push(url);
            }
        }

        if let Some(url) = bootstrap_host {
            hosts.insert(0, url);
        }

        if hosts.is_empty() {
            return Err(RestError::ServiceNotAvailable(service));
        }

        Ok(hosts)
    }

    /// URL to target for the given zero-indexed attempt. Rotating on the
    /// attempt number lets retries land on a different node when possible.
    pub fn host_for_attempt(&self, service: Service, attempt: u32) -> Result<String> {
        let hosts = self.all_hosts(service)?;
        Ok(hosts[attempt as usize % hosts.len()].clone())
    }

    /// URLs built directly from the resolved connection string, in order.
    /// Used during initial bootstrap and when re-discovering the cluster
    /// after a node is suspected removed.
    pub fn bootstrap_hosts(&self) -> Vec<String> {
        let scheme = if self.resolved.use_tls { "https" } else { "http" };

        self.resolved
            .addresses
            .iter()
            .map(|address| format!("{scheme}://{address}"))
            .collect()
    }

    /// Accept a config fetched from `source_host`, and decide whether the
    /// caller reaches the cluster through its alternate network.
    pub fn set_config(&self, source_host: &str, config: ClusterConfig) -> Result<()> {
        let use_alternate = config.nodes.iter().any(|node| {
            node.alternate_hostname() == Some(source_host) && node.hostname != source_host
        });

        self.manager.update(config)?;

        let mut guard = self
            .use_alternate
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if *guard != use_alternate {
            debug!(use_alternate, "switching address network");
        }

        *guard = use_alternate;

        Ok(())
    }

    fn read_use_alternate(&self) -> std::sync::RwLockReadGuard<'_, bool> {
        self.use_alternate
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
