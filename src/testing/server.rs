//! Mock cluster for testing client consumers.
//!
//! # Example
//!
//! ```ignore
//! use couchbase_rest::testing::MockClusterServer;
//!
//! #[tokio::test]
//! async fn test_my_app() {
//!     let server = MockClusterServer::start().await;
//!     server.mock_single_node_cluster(1).await;
//!
//!     let client = couchbase_rest::ClusterClient::builder()
//!         .connection_string(server.connection_string())
//!         .username("admin")
//!         .password("password")
//!         .build()
//!         .await
//!         .unwrap();
//! }
//! ```

use super::fixtures::{ClusterConfigFixture, NodeFixture};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A wiremock server pre-configured to answer the cluster bootstrap and
/// topology endpoints.
pub struct MockClusterServer {
    server: MockServer,
}

impl MockClusterServer {
    /// Start a new mock cluster on a random local port.
    pub async fn start() -> Self {
        MockClusterServer {
            server: MockServer::start().await,
        }
    }

    /// Base URI of the mock cluster, e.g. `http://127.0.0.1:53211`.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// The port the mock cluster listens on.
    pub fn port(&self) -> u16 {
        self.server.address().port()
    }

    /// A connection string reaching the mock cluster.
    pub fn connection_string(&self) -> String {
        self.uri()
    }

    /// Get a reference to the underlying wiremock server for custom mocking.
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Mock `/pools` with the given enterprise flag and cluster UUID.
    pub async fn mock_pools(&self, enterprise: bool, uuid: &str) {
        Mock::given(method("GET"))
            .and(path("/pools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isEnterprise": enterprise,
                "uuid": uuid,
            })))
            .mount(&self.server)
            .await;
    }

    /// Mock `/pools` answering as an uninitialized node (`uuid: []`).
    pub async fn mock_pools_uninitialized(&self) {
        Mock::given(method("GET"))
            .and(path("/pools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isEnterprise": false,
                "uuid": [],
            })))
            .mount(&self.server)
            .await;
    }

    /// Mock `/pools/default` reporting nodes with the given versions.
    pub async fn mock_pools_default(&self, versions: &[&str]) {
        let nodes: Vec<Value> = versions
            .iter()
            .map(|version| json!({"version": version, "status": "healthy"}))
            .collect();

        Mock::given(method("GET"))
            .and(path("/pools/default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"nodes": nodes})))
            .mount(&self.server)
            .await;
    }

    /// Mock the node-services endpoint with a topology document, typically
    /// built with [`ClusterConfigFixture`].
    pub async fn mock_node_services(&self, config: Value) {
        Mock::given(method("GET"))
            .and(path("/pools/default/nodeServices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(config))
            .mount(&self.server)
            .await;
    }

    /// Mock the node-services endpoint for a limited number of requests;
    /// later mounts take over afterwards, which makes revision bumps easy to
    /// script.
    pub async fn mock_node_services_up_to(&self, config: Value, times: u64) {
        Mock::given(method("GET"))
            .and(path("/pools/default/nodeServices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(config))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Mock a healthy single-node cluster at the given revision: the
    /// bootstrap and metadata endpoints all answer, and the single node
    /// serves the management service on this server's port.
    pub async fn mock_single_node_cluster(&self, revision: i64) {
        self.mock_pools(true, "mock-cluster-uuid").await;
        self.mock_pools_default(&["7.6.0-1000-enterprise"]).await;
        self.mock_node_services(self.single_node_config(revision))
            .await;
    }

    /// Topology document describing this server as the only node.
    pub fn single_node_config(&self, revision: i64) -> Value {
        ClusterConfigFixture::new(revision)
            .node(
                NodeFixture::new("")
                    .service("mgmt", self.port())
                    .this_node(true)
                    .build(),
            )
            .build()
    }

    /// Mount a custom mock on the server.
    pub async fn mount(&self, mock: Mock) {
        mock.mount(&self.server).await;
    }

    /// Mount a custom response template at a specific path.
    pub async fn mock_path(&self, http_method: &str, path_str: &str, response: ResponseTemplate) {
        Mock::given(method(http_method))
            .and(path(path_str))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClusterClient;

    #[tokio::test]
    async fn mock_cluster_bootstraps_a_client() {
        let server = MockClusterServer::start().await;
        server.mock_single_node_cluster(3).await;

        let client = ClusterClient::builder()
            .connection_string(server.connection_string())
            .username("admin")
            .password("password")
            .disable_ccp(true)
            .build()
            .await
            .unwrap();

        let config = client.cluster_config().unwrap();
        assert_eq!(config.revision, 3);
        assert_eq!(config.nodes.len(), 1);
        assert!(client.is_enterprise());
        assert_eq!(client.cluster_uuid(), "mock-cluster-uuid");

        client.close().await;
    }
}
