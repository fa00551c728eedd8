//! Builder-pattern fixtures emitting wire-shaped topology JSON.

use serde_json::{Map, Value, json};

/// Builds a single `nodesExt` entry.
///
/// # Example
///
/// ```ignore
/// let node = NodeFixture::new("node1.example.com")
///     .service("mgmt", 8091)
///     .service("kv", 11210)
///     .this_node(true)
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct NodeFixture {
    hostname: String,
    services: Map<String, Value>,
    alternate_hostname: Option<String>,
    alternate_services: Map<String, Value>,
    this_node: bool,
}

impl NodeFixture {
    /// Create a fixture for a node with the given hostname. An empty
    /// hostname mimics the node that served the config.
    pub fn new(hostname: impl Into<String>) -> Self {
        NodeFixture {
            hostname: hostname.into(),
            ..NodeFixture::default()
        }
    }

    /// Advertise a service port, keyed by its wire name (`mgmt`,
    /// `mgmtSSL`, `kv`, `n1ql`, ...).
    pub fn service(mut self, name: &str, port: u16) -> Self {
        self.services.insert(name.to_string(), json!(port));
        self
    }

    /// Mark this entry as the node that served the config.
    pub fn this_node(mut self, this_node: bool) -> Self {
        self.this_node = this_node;
        self
    }

    /// Expose an external alternate hostname.
    pub fn alternate(mut self, hostname: impl Into<String>) -> Self {
        self.alternate_hostname = Some(hostname.into());
        self
    }

    /// Advertise a service port on the external alternate address.
    pub fn alternate_service(mut self, name: &str, port: u16) -> Self {
        self.alternate_services.insert(name.to_string(), json!(port));
        self
    }

    /// Build the wire-shaped JSON entry.
    pub fn build(self) -> Value {
        let mut node = Map::new();
        node.insert("hostname".to_string(), json!(self.hostname));
        node.insert("services".to_string(), Value::Object(self.services));

        if let Some(hostname) = self.alternate_hostname {
            node.insert(
                "alternateAddresses".to_string(),
                json!({
                    "external": {
                        "hostname": hostname,
                        "services": Value::Object(self.alternate_services),
                    }
                }),
            );
        }

        if self.this_node {
            node.insert("thisNode".to_string(), json!(true));
        }

        Value::Object(node)
    }
}

/// Builds a full topology document for the node-services endpoint.
#[derive(Debug, Clone)]
pub struct ClusterConfigFixture {
    revision: i64,
    nodes: Vec<Value>,
}

impl ClusterConfigFixture {
    pub fn new(revision: i64) -> Self {
        ClusterConfigFixture {
            revision,
            nodes: Vec::new(),
        }
    }

    /// Append a node entry, typically built with [`NodeFixture`].
    pub fn node(mut self, node: Value) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn build(self) -> Value {
        json!({
            "rev": self.revision,
            "nodesExt": self.nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;

    #[test]
    fn fixtures_deserialize_into_the_typed_model() {
        let raw = ClusterConfigFixture::new(7)
            .node(
                NodeFixture::new("node1")
                    .service("mgmt", 8091)
                    .service("kv", 11210)
                    .this_node(true)
                    .build(),
            )
            .node(
                NodeFixture::new("node2")
                    .service("mgmt", 8091)
                    .alternate("node2.public.example.com")
                    .alternate_service("mgmt", 9091)
                    .build(),
            )
            .build();

        let config: ClusterConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.revision, 7);
        assert_eq!(config.nodes.len(), 2);
        assert!(config.nodes[0].bootstrap_node);
        assert_eq!(
            config.nodes[1].alternate_hostname(),
            Some("node2.public.example.com")
        );
    }
}
