//! Common test utilities for the integration suite
#![allow(dead_code)]

use couchbase_rest::ClusterClient;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Wire-shaped topology document.
pub fn node_services(rev: i64, nodes: Vec<Value>) -> Value {
    json!({"rev": rev, "nodesExt": nodes})
}

/// Node entry for the node that served the config, reachable on the given
/// management port.
pub fn this_node(mgmt_port: u16) -> Value {
    json!({"hostname": "", "services": {"mgmt": mgmt_port}, "thisNode": true})
}

/// Node entry with an explicit hostname and service map.
pub fn node(hostname: &str, services: Value) -> Value {
    json!({"hostname": hostname, "services": services})
}

pub async fn mock_pools(server: &MockServer, uuid: &str) {
    Mock::given(method("GET"))
        .and(path("/pools"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isEnterprise": true,
            "uuid": uuid,
        })))
        .mount(server)
        .await;
}

pub async fn mock_pools_default(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/pools/default"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nodes": [{"version": "7.6.0-1000-enterprise", "status": "healthy"}],
        })))
        .mount(server)
        .await;
}

pub async fn mock_node_services(server: &MockServer, config: Value) {
    Mock::given(method("GET"))
        .and(path("/pools/default/nodeServices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(config))
        .mount(server)
        .await;
}

/// Mock a healthy single-node cluster: `/pools`, `/pools/default`, and a
/// topology rooted at this server.
pub async fn mock_single_node(server: &MockServer, rev: i64) {
    mock_pools(server, "test-cluster-uuid").await;
    mock_pools_default(server).await;
    mock_node_services(server, node_services(rev, vec![this_node(server.address().port())]))
        .await;
}

/// Build a client against the mock server with background polling disabled.
pub async fn client_for(server: &MockServer) -> ClusterClient {
    ClusterClient::builder()
        .connection_string(server.uri())
        .username("admin")
        .password("password")
        .disable_ccp(true)
        .build()
        .await
        .expect("client should bootstrap against the mock cluster")
}
