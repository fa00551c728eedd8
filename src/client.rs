//! Cluster-aware client: bootstrap, dispatch, and background config polling.

use crate::auth::{AuthProvider, CredentialProvider, StaticCredentials};
use crate::cluster::{Bucket, ClusterInfo, ClusterVersion, PoolsDefaultResult, PoolsResult};
use crate::config::{ClusterConfig, ClusterConfigManager, DEFAULT_CONFIG_MAX_AGE};
use crate::connstr::ConnectionString;
use crate::engine::{RequestEngine, decode_json};
use crate::error::{RestError, Result};
use crate::node::Service;
use crate::request::{Request, Response};
use crate::retry::{FixedHostCustomizer, RetryPolicy};
use reqwest::{Certificate, Method};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// HTTP client timeout, accepting a duration or integer seconds.
pub const CLIENT_TIMEOUT_ENV_VAR: &str = "CB_REST_CLIENT_TIMEOUT_SECS";

/// Per-request timeout spanning all retries.
pub const REQUEST_TIMEOUT_ENV_VAR: &str = "CB_REST_CLIENT_REQUEST_TIMEOUT";

/// Maximum retries per request, clamped to at least one.
pub const NUM_RETRIES_ENV_VAR: &str = "CB_REST_CLIENT_NUM_RETRIES";

/// Timeout applied to polling operations.
pub const POLL_TIMEOUT_ENV_VAR: &str = "CB_REST_CLIENT_POLL_TIMEOUT";

/// Cluster-config max age before the background poller refreshes it.
pub const CC_MAX_AGE_ENV_VAR: &str = "CB_REST_CC_MAX_AGE";

/// JSON object of fine-grained transport timeouts.
pub const HTTP_TIMEOUTS_ENV_VAR: &str = "CB_REST_HTTP_TIMEOUTS";

const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub(crate) const POOLS_ENDPOINT: &str = "/pools";
pub(crate) const POOLS_DEFAULT_ENDPOINT: &str = "/pools/default";
pub(crate) const NODE_SERVICES_ENDPOINT: &str = "/pools/default/nodeServices";
const BUCKETS_ENDPOINT: &str = "/pools/default/buckets";

/// Fine-grained transport timeouts, overridable via
/// [`HTTP_TIMEOUTS_ENV_VAR`] as a JSON object of duration strings, for
/// example `{"dialer": "30s", "idleConn": "90s"}`. A zero duration disables
/// the timeout; values the underlying transport does not surface are parsed
/// but have no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub dialer: Duration,
    pub keep_alive: Duration,
    pub idle_conn: Duration,
    pub expect_continue: Duration,
    pub response_header: Duration,
    pub tls_handshake: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        HttpTimeouts {
            dialer: Duration::from_secs(30),
            keep_alive: Duration::from_secs(30),
            idle_conn: Duration::from_secs(90),
            expect_continue: Duration::ZERO,
            response_header: Duration::ZERO,
            tls_handshake: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawHttpTimeouts {
    dialer: Option<String>,
    keep_alive: Option<String>,
    idle_conn: Option<String>,
    #[serde(rename = "continue")]
    expect_continue: Option<String>,
    response_header: Option<String>,
    tls_handshake: Option<String>,
}

impl HttpTimeouts {
    fn from_env() -> Self {
        let mut timeouts = HttpTimeouts::default();

        let Ok(raw) = std::env::var(HTTP_TIMEOUTS_ENV_VAR) else {
            return timeouts;
        };

        let parsed: RawHttpTimeouts = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "ignoring unparseable {HTTP_TIMEOUTS_ENV_VAR}");
                return timeouts;
            }
        };

        let fields = [
            (parsed.dialer, &mut timeouts.dialer),
            (parsed.keep_alive, &mut timeouts.keep_alive),
            (parsed.idle_conn, &mut timeouts.idle_conn),
            (parsed.expect_continue, &mut timeouts.expect_continue),
            (parsed.response_header, &mut timeouts.response_header),
            (parsed.tls_handshake, &mut timeouts.tls_handshake),
        ];

        for (value, slot) in fields {
            let Some(value) = value else { continue };
            match parse_duration_value(&value) {
                Some(duration) => *slot = duration,
                None => warn!(%value, "ignoring unparseable transport timeout"),
            }
        }

        timeouts
    }
}

/// Accepts either integer seconds or a duration string such as `1m30s`.
fn parse_duration_value(raw: &str) -> Option<Duration> {
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    humantime::parse_duration(raw).ok()
}

fn env_duration(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;

    let parsed = parse_duration_value(&raw);
    if parsed.is_none() {
        warn!(name, value = %raw, "ignoring unparseable duration");
    }

    parsed
}

fn env_u32(name: &str) -> Option<u32> {
    let raw = std::env::var(name).ok()?;

    let parsed = raw.parse().ok();
    if parsed.is_none() {
        warn!(name, value = %raw, "ignoring unparseable integer");
    }

    parsed
}

/// Builder for [`ClusterClient`].
///
/// Timeouts, retry counts, and the config max age default from the
/// environment variables documented on the constants in this module, falling
/// back to library defaults.
#[derive(Clone)]
pub struct ClusterClientBuilder {
    connection_string: String,
    username: String,
    password: String,
    user_agent: Option<String>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    insecure: bool,
    ca_cert: Option<Certificate>,
    client_timeout: Duration,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    poll_timeout: Duration,
    config_max_age: Duration,
    disable_ccp: bool,
    this_node_only: bool,
}

impl Default for ClusterClientBuilder {
    fn default() -> Self {
        let mut retry_policy = RetryPolicy::default();
        if let Some(retries) = env_u32(NUM_RETRIES_ENV_VAR) {
            retry_policy.max_retries = retries.max(1);
        }

        ClusterClientBuilder {
            connection_string: "http://localhost:8091".to_string(),
            username: String::new(),
            password: String::new(),
            user_agent: None,
            credentials: None,
            insecure: false,
            ca_cert: None,
            client_timeout: env_duration(CLIENT_TIMEOUT_ENV_VAR).unwrap_or(DEFAULT_CLIENT_TIMEOUT),
            request_timeout: env_duration(REQUEST_TIMEOUT_ENV_VAR)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            retry_policy,
            poll_timeout: env_duration(POLL_TIMEOUT_ENV_VAR).unwrap_or(DEFAULT_POLL_TIMEOUT),
            config_max_age: env_duration(CC_MAX_AGE_ENV_VAR).unwrap_or(DEFAULT_CONFIG_MAX_AGE),
            disable_ccp: false,
            this_node_only: false,
        }
    }
}

impl ClusterClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection string naming one or more cluster nodes, for
    /// example `couchbase://node1,node2` or `https://10.0.0.1:18091`.
    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = connection_string.into();
        self
    }

    /// Set the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the user agent string for HTTP requests.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Supply a custom credential provider instead of the static
    /// username/password pair.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Allow insecure TLS connections (self-signed certificates).
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Trust an additional root certificate, typically the cluster CA.
    pub fn ca_cert(mut self, certificate: Certificate) -> Self {
        self.ca_cert = Some(certificate);
        self
    }

    /// Set the per-operation HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Set the default per-request timeout spanning all retries.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the timeout for polling operations.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set how long a cluster config stays fresh before the background
    /// poller refreshes it.
    pub fn config_max_age(mut self, max_age: Duration) -> Self {
        self.config_max_age = max_age;
        self
    }

    /// Disable the background cluster-config poller.
    pub fn disable_ccp(mut self, disable: bool) -> Self {
        self.disable_ccp = disable;
        self
    }

    /// Pin the client to the single node named by the connection string,
    /// pruning the rest of the cluster from the topology.
    pub fn this_node_only(mut self, this_node_only: bool) -> Self {
        self.this_node_only = this_node_only;
        self
    }

    /// Build the client: resolve the connection string, bootstrap against
    /// the cluster, cache its metadata, and start the background poller.
    pub async fn build(self) -> Result<ClusterClient> {
        let connection_string = ConnectionString::parse(&self.connection_string)?;
        let resolved = connection_string.resolve().await?;

        if self.this_node_only && resolved.addresses.len() != 1 {
            return Err(RestError::InvalidConnectionString(
                "a single address is required when pinning to one node".to_string(),
            ));
        }

        let credentials: Arc<dyn CredentialProvider> = match self.credentials {
            Some(provider) => provider,
            None => {
                let mut credentials = StaticCredentials::from_env(self.username, self.password);
                if let Some(user_agent) = self.user_agent {
                    credentials = credentials.user_agent(user_agent);
                }
                Arc::new(credentials)
            }
        };

        let timeouts = HttpTimeouts::from_env();

        let mut http = reqwest::Client::builder()
            .timeout(self.client_timeout)
            .danger_accept_invalid_certs(self.insecure)
            .pool_idle_timeout((timeouts.idle_conn > Duration::ZERO).then_some(timeouts.idle_conn));

        if timeouts.dialer > Duration::ZERO {
            http = http.connect_timeout(timeouts.dialer);
        }

        if timeouts.keep_alive > Duration::ZERO {
            http = http.tcp_keepalive(timeouts.keep_alive);
        }

        if let Some(certificate) = self.ca_cert {
            http = http.add_root_certificate(certificate);
        }

        let http = http
            .build()
            .map_err(|err| RestError::ConnectionError(err.to_string()))?;

        let manager = Arc::new(ClusterConfigManager::new(self.config_max_age));
        let auth = Arc::new(AuthProvider::new(
            resolved,
            Arc::clone(&manager),
            credentials,
        ));
        let engine = Arc::new(RequestEngine::new(
            http,
            Arc::clone(&auth),
            self.retry_policy,
            self.request_timeout,
        ));

        let (shutdown, _) = watch::channel(false);

        let mut client = ClusterClient {
            engine,
            auth,
            manager,
            info: ClusterInfo::default(),
            poll_timeout: self.poll_timeout,
            shutdown,
            poller: None,
        };

        client.bootstrap().await?;
        client.info = client.fetch_cluster_info().await?;

        if self.this_node_only {
            client.prune_to_bootstrap_node()?;
        }

        if !self.disable_ccp {
            client.spawn_poller();
        }

        Ok(client)
    }
}

/// A cluster-aware REST client.
///
/// The client bootstraps against the nodes named in the connection string,
/// then keeps its view of the topology fresh in the background and
/// dispatches each request to a node running the target service.
#[derive(Debug)]
pub struct ClusterClient {
    engine: Arc<RequestEngine>,
    auth: Arc<AuthProvider>,
    manager: Arc<ClusterConfigManager>,
    info: ClusterInfo,
    poll_timeout: Duration,
    shutdown: watch::Sender<bool>,
    poller: Option<JoinHandle<()>>,
}

impl ClusterClient {
    /// Create a new builder for the client.
    pub fn builder() -> ClusterClientBuilder {
        ClusterClientBuilder::new()
    }

    /// Dispatch a request, drain the body, and classify the status.
    pub async fn execute(&self, request: &Request) -> Result<Response> {
        self.engine.execute(request).await
    }

    /// Dispatch a request and return the raw response with its body unread.
    pub async fn send(&self, request: &Request) -> Result<reqwest::Response> {
        self.engine.send(request).await
    }

    /// Snapshot of the current cluster topology.
    pub fn cluster_config(&self) -> Result<ClusterConfig> {
        self.manager.get()
    }

    /// Cached cluster metadata fetched at construction time.
    pub fn cluster_info(&self) -> &ClusterInfo {
        &self.info
    }

    /// Whether the cluster runs the enterprise edition.
    pub fn is_enterprise(&self) -> bool {
        self.info.enterprise
    }

    /// The cluster UUID.
    pub fn cluster_uuid(&self) -> &str {
        &self.info.uuid
    }

    /// The lowest node version in the cluster, when reported.
    pub fn min_version(&self) -> Option<ClusterVersion> {
        self.info.version
    }

    /// List the cluster's buckets.
    pub async fn buckets(&self) -> Result<Vec<Bucket>> {
        let request = Request::builder()
            .method(Method::GET)
            .endpoint(BUCKETS_ENDPOINT)
            .service(Service::Management)
            .build();

        let response = self.engine.execute(&request).await?;
        decode_json(&response.body)
    }

    /// The collection manifest of a bucket. The schema varies between
    /// server versions, so the body is returned as raw JSON.
    pub async fn bucket_manifest(&self, bucket: &str) -> Result<serde_json::Value> {
        let request = Request::builder()
            .method(Method::GET)
            .endpoint(format!("{BUCKETS_ENDPOINT}/{bucket}/scopes"))
            .service(Service::Management)
            .build();

        let response = self.engine.execute(&request).await?;
        decode_json(&response.body)
    }

    /// Wake the background poller and wait for the next accepted config
    /// update, bounded by the poll timeout.
    pub async fn wait_until_updated(&self) -> Result<()> {
        tokio::time::timeout(self.poll_timeout, self.manager.wait_until_updated())
            .await
            .map_err(|_| RestError::Timeout)
    }

    /// Stop the background poller and wait for it to exit.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);

        if let Some(poller) = self.poller.take() {
            let _ = poller.await;
        }
    }

    /// Try each address in the connection string until one yields a cluster
    /// config. Authentication and authorization failures are remembered but
    /// not fatal per-node; an unknown certificate authority is.
    async fn bootstrap(&self) -> Result<()> {
        let mut auth_failure = None;
        let mut permission_failure = None;

        for host in self.auth.bootstrap_hosts() {
            match fetch_config(&self.engine, &host, true).await {
                Ok(config) => {
                    self.auth.set_config(&url_host(&host), config)?;
                    debug!(%host, "bootstrapped against node");
                    return Ok(());
                }
                Err(err) if err.is_unknown_authority() => {
                    return Err(err.unwrapped().clone());
                }
                Err(err) if err.is_unauthorized() => {
                    debug!(%host, "node rejected the credentials");
                    auth_failure = Some(Box::new(err.unwrapped().clone()));
                }
                Err(err) if err.is_forbidden() => {
                    debug!(%host, "node rejected the user's permissions");
                    permission_failure = Some(Box::new(err.unwrapped().clone()));
                }
                Err(err) => {
                    debug!(%host, error = %err, "failed to bootstrap against node");
                }
            }
        }

        Err(RestError::BootstrapFailure {
            auth: auth_failure,
            permission: permission_failure,
        })
    }

    async fn fetch_cluster_info(&self) -> Result<ClusterInfo> {
        let pools = fetch_pools(&self.engine, None).await?;
        let uuid = pools.uuid()?;

        let request = Request::builder()
            .method(Method::GET)
            .endpoint(POOLS_DEFAULT_ENDPOINT)
            .service(Service::Management)
            .build();

        let response = self.engine.execute(&request).await?;
        let defaults: PoolsDefaultResult = decode_json(&response.body)?;

        Ok(ClusterInfo {
            enterprise: pools.is_enterprise,
            uuid,
            version: crate::cluster::min_version(&defaults.nodes),
        })
    }

    fn prune_to_bootstrap_node(&self) -> Result<()> {
        let mut config = self.manager.get()?;
        config.nodes.retain(|node| node.bootstrap_node);
        self.manager.update(config)
    }

    fn spawn_poller(&mut self) {
        let engine = Arc::clone(&self.engine);
        let auth = Arc::clone(&self.auth);
        let manager = Arc::clone(&self.manager);
        let uuid = self.info.uuid.clone();
        let mut shutdown = self.shutdown.subscribe();

        self.poller = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = manager.wait_until_expired() => {}
                }

                if let Err(err) = update_cc(&engine, &auth, &uuid).await {
                    warn!(error = %err, "failed to refresh cluster config");
                }
            }
        }));
    }
}

impl Drop for ClusterClient {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Refresh the cluster config, trying each node in the current topology in
/// order (bootstrap node first) until one accepts.
async fn update_cc(engine: &RequestEngine, auth: &AuthProvider, uuid: &str) -> Result<()> {
    let hosts = auth.all_hosts(Service::Management)?;

    for host in hosts {
        if !valid_host(engine, &host, uuid).await {
            debug!(%host, "skipping node which does not belong to the cluster");
            continue;
        }

        let config = match fetch_config(engine, &host, false).await {
            Ok(config) => config,
            Err(err) => {
                debug!(%host, error = %err, "failed to fetch cluster config");
                continue;
            }
        };

        match auth.set_config(&url_host(&host), config) {
            Ok(()) => {
                debug!(%host, "refreshed cluster config");
                return Ok(());
            }
            Err(err @ RestError::OldClusterConfig { .. }) => {
                debug!(%host, error = %err, "node served a stale cluster config");
            }
            Err(err) => return Err(err),
        }
    }

    Err(RestError::ExhaustedClusterNodes)
}

/// Confirm the host still belongs to the cluster by comparing its reported
/// UUID with the cached one; guards against DNS churn pointing an address at
/// a stranger cluster.
async fn valid_host(engine: &RequestEngine, host: &str, uuid: &str) -> bool {
    match fetch_pools(engine, Some(host)).await {
        Ok(pools) => pools.uuid().map(|reported| reported == uuid).unwrap_or(false),
        Err(err) => {
            debug!(%host, error = %err, "failed to verify cluster uuid");
            false
        }
    }
}

async fn fetch_config(engine: &RequestEngine, host: &str, bootstrap: bool) -> Result<ClusterConfig> {
    let request = Request::builder()
        .method(Method::GET)
        .endpoint(NODE_SERVICES_ENDPOINT)
        .service(Service::Management)
        .build();

    let customizer = if bootstrap {
        FixedHostCustomizer::for_bootstrap(host)
    } else {
        FixedHostCustomizer::new(host)
    };

    let response = engine.execute_with(&customizer, &request).await?;

    let mut config: ClusterConfig = decode_json(&response.body)?;
    config.normalize(&url_host(host));

    Ok(config)
}

async fn fetch_pools(engine: &RequestEngine, host: Option<&str>) -> Result<PoolsResult> {
    let request = Request::builder()
        .method(Method::GET)
        .endpoint(POOLS_ENDPOINT)
        .service(Service::Management)
        .build();

    let response = match host {
        Some(host) => {
            engine
                .execute_with(&FixedHostCustomizer::new(host), &request)
                .await?
        }
        None => engine.execute(&request).await?,
    };

    decode_json(&response.body)
}

/// Host portion of a URL, brackets retained for IPv6 literals.
fn url_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parses_integer_seconds_and_duration_strings() {
        assert_eq!(parse_duration_value("90"), Some(Duration::from_secs(90)));
        assert_eq!(
            parse_duration_value("1m30s"),
            Some(Duration::from_secs(90))
        );
        assert_eq!(parse_duration_value("soon"), None);
    }

    #[test]
    #[serial]
    fn http_timeouts_from_env_overrides_defaults() {
        // SAFETY: tests mutating the environment are serialized.
        unsafe {
            std::env::set_var(
                HTTP_TIMEOUTS_ENV_VAR,
                r#"{"dialer": "5s", "idleConn": "120s", "tlsHandshake": "0s"}"#,
            );
        }

        let timeouts = HttpTimeouts::from_env();

        unsafe {
            std::env::remove_var(HTTP_TIMEOUTS_ENV_VAR);
        }

        assert_eq!(timeouts.dialer, Duration::from_secs(5));
        assert_eq!(timeouts.idle_conn, Duration::from_secs(120));
        assert_eq!(timeouts.tls_handshake, Duration::ZERO);
        // Untouched fields keep their defaults.
        assert_eq!(timeouts.keep_alive, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn http_timeouts_from_env_ignores_garbage() {
        unsafe {
            std::env::set_var(HTTP_TIMEOUTS_ENV_VAR, "not-json");
        }

        let timeouts = HttpTimeouts::from_env();

        unsafe {
            std::env::remove_var(HTTP_TIMEOUTS_ENV_VAR);
        }

        assert_eq!(timeouts, HttpTimeouts::default());
    }

    #[test]
    #[serial]
    fn retries_env_var_is_clamped_to_at_least_one() {
        unsafe {
            std::env::set_var(NUM_RETRIES_ENV_VAR, "0");
        }

        let builder = ClusterClientBuilder::default();

        unsafe {
            std::env::remove_var(NUM_RETRIES_ENV_VAR);
        }

        assert_eq!(builder.retry_policy.max_retries, 1);
    }

    #[test]
    fn url_host_strips_scheme_and_port() {
        assert_eq!(url_host("http://node1:8091"), "node1");
        assert_eq!(url_host("https://[2001:db8::1]:18091"), "[2001:db8::1]");
    }
}
