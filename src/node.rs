//! Typed model of a cluster node, the services it runs, and its alternate
//! addresses.
//!
//! Each node advertises a set of per-service ports, split into plain and TLS
//! variants. Nodes reachable from outside the cluster's private network may
//! additionally expose an external hostname with its own port set.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A functional role a cluster node may run.
///
/// Every service maps to a well-known pair of plain/TLS port fields in
/// [`Services`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// The management/administration service.
    Management,
    /// The key-value data service.
    Data,
    /// The views (map/reduce) service. Shares ports with the data service.
    Views,
    /// The query (N1QL) service.
    Query,
    /// The full-text search service.
    Search,
    /// The analytics service.
    Analytics,
    /// The secondary indexing service.
    Indexing,
    /// The eventing service.
    Eventing,
    /// The backup service.
    Backup,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::Management => "Management",
            Service::Data => "Data",
            Service::Views => "Views",
            Service::Query => "Query",
            Service::Search => "Search",
            Service::Analytics => "Analytics",
            Service::Indexing => "Indexing",
            Service::Eventing => "Eventing",
            Service::Backup => "Backup",
        };
        f.write_str(name)
    }
}

/// Port map advertised by a node, keyed by the service names used on the
/// wire. A zero port means the service is not running on that node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Services {
    pub mgmt: u16,
    #[serde(rename = "mgmtSSL")]
    pub mgmt_ssl: u16,

    pub kv: u16,
    #[serde(rename = "kvSSL")]
    pub kv_ssl: u16,

    pub capi: u16,
    #[serde(rename = "capiSSL")]
    pub capi_ssl: u16,

    pub cbas: u16,
    #[serde(rename = "cbasSSL")]
    pub cbas_ssl: u16,

    #[serde(rename = "eventingAdminPort")]
    pub eventing_admin_port: u16,
    #[serde(rename = "eventingSSL")]
    pub eventing_ssl: u16,

    pub fts: u16,
    #[serde(rename = "ftsSSL")]
    pub fts_ssl: u16,

    #[serde(rename = "indexHttp")]
    pub index_http: u16,
    #[serde(rename = "indexHttps")]
    pub index_https: u16,

    pub n1ql: u16,
    #[serde(rename = "n1qlSSL")]
    pub n1ql_ssl: u16,

    pub backup: u16,
    #[serde(rename = "backupSSL")]
    pub backup_ssl: u16,
}

impl Services {
    /// Port for the given service honouring the TLS flag. Zero means the
    /// service is not running on this node.
    pub fn port(&self, service: Service, use_tls: bool) -> u16 {
        match (service, use_tls) {
            (Service::Management, false) => self.mgmt,
            (Service::Management, true) => self.mgmt_ssl,
            (Service::Data, false) => self.kv,
            (Service::Data, true) => self.kv_ssl,
            // Views piggybacks on the data service ports.
            (Service::Views, false) => self.capi,
            (Service::Views, true) => self.capi_ssl,
            (Service::Query, false) => self.n1ql,
            (Service::Query, true) => self.n1ql_ssl,
            (Service::Search, false) => self.fts,
            (Service::Search, true) => self.fts_ssl,
            (Service::Analytics, false) => self.cbas,
            (Service::Analytics, true) => self.cbas_ssl,
            (Service::Indexing, false) => self.index_http,
            (Service::Indexing, true) => self.index_https,
            (Service::Eventing, false) => self.eventing_admin_port,
            (Service::Eventing, true) => self.eventing_ssl,
            (Service::Backup, false) => self.backup,
            (Service::Backup, true) => self.backup_ssl,
        }
    }
}

/// Externally routable hostname and port set for clients outside the
/// cluster's private network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct External {
    pub hostname: String,
    pub services: Services,
}

/// Alternate address book for a node. Only the `external` network is
/// currently defined by the wire protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateAddresses {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<External>,
}

/// A single cluster node as served by the topology endpoint.
///
/// `hostname` may be empty on the node that answered the topology request; it
/// then means "same host as the request's target" and is filled in when the
/// config is ingested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub hostname: String,
    pub services: Services,
    #[serde(rename = "alternateAddresses", skip_serializing_if = "Option::is_none")]
    pub alternate_addresses: Option<AlternateAddresses>,
    #[serde(rename = "thisNode")]
    pub bootstrap_node: bool,
}

impl Node {
    /// Fully qualified URL for the given service on this node, or `None` if
    /// the node does not expose it.
    ///
    /// When `use_alternate` is set and the node carries an external address,
    /// both the hostname and the port set are taken from it. Views requires
    /// the data service to also be running on the node.
    pub fn url_for(&self, service: Service, use_tls: bool, use_alternate: bool) -> Option<String> {
        let external = self
            .alternate_addresses
            .as_ref()
            .and_then(|alt| alt.external.as_ref())
            .filter(|_| use_alternate);

        let services = external.map_or(&self.services, |ext| &ext.services);

        let host = match external {
            Some(ext) if !ext.hostname.is_empty() => &ext.hostname,
            _ => &self.hostname,
        };

        if host.is_empty() {
            return None;
        }

        if service == Service::Views && services.port(Service::Data, use_tls) == 0 {
            return None;
        }

        let port = services.port(service, use_tls);
        if port == 0 {
            return None;
        }

        let scheme = if use_tls { "https" } else { "http" };

        Some(format!("{scheme}://{host}:{port}"))
    }

    /// Wraps any unbracketed IPv6 hostnames in `[...]` so they can be
    /// embedded in URLs.
    pub(crate) fn normalize_hostnames(&mut self) {
        self.hostname = bracket_ipv6(&self.hostname);

        if let Some(external) = self
            .alternate_addresses
            .as_mut()
            .and_then(|alt| alt.external.as_mut())
        {
            external.hostname = bracket_ipv6(&external.hostname);
        }
    }

    /// Hostname of the external alternate address, if any.
    pub(crate) fn alternate_hostname(&self) -> Option<&str> {
        self.alternate_addresses
            .as_ref()
            .and_then(|alt| alt.external.as_ref())
            .map(|ext| ext.hostname.as_str())
            .filter(|hostname| !hostname.is_empty())
    }
}

/// Wraps an IPv6 literal in brackets unless it already is.
pub(crate) fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(hostname: &str, services: Services) -> Node {
        Node {
            hostname: hostname.to_string(),
            services,
            ..Node::default()
        }
    }

    #[test]
    fn url_for_selects_tls_port_pair() {
        let n = node(
            "node1",
            Services {
                mgmt: 8091,
                mgmt_ssl: 18091,
                ..Services::default()
            },
        );

        assert_eq!(
            n.url_for(Service::Management, false, false).as_deref(),
            Some("http://node1:8091")
        );
        assert_eq!(
            n.url_for(Service::Management, true, false).as_deref(),
            Some("https://node1:18091")
        );
    }

    #[test]
    fn url_for_missing_service_yields_nothing() {
        let n = node(
            "node1",
            Services {
                mgmt: 8091,
                ..Services::default()
            },
        );

        assert_eq!(n.url_for(Service::Query, false, false), None);
    }

    #[test]
    fn url_for_empty_hostname_yields_nothing() {
        let n = node(
            "",
            Services {
                mgmt: 8091,
                ..Services::default()
            },
        );

        assert_eq!(n.url_for(Service::Management, false, false), None);
    }

    #[test]
    fn views_requires_data_service() {
        let without_data = node(
            "node1",
            Services {
                capi: 8092,
                ..Services::default()
            },
        );
        assert_eq!(without_data.url_for(Service::Views, false, false), None);

        let with_data = node(
            "node1",
            Services {
                kv: 11210,
                capi: 8092,
                ..Services::default()
            },
        );
        assert_eq!(
            with_data.url_for(Service::Views, false, false).as_deref(),
            Some("http://node1:8092")
        );
    }

    #[test]
    fn alternate_addresses_take_precedence() {
        let mut n = node(
            "private",
            Services {
                mgmt: 8091,
                ..Services::default()
            },
        );
        n.alternate_addresses = Some(AlternateAddresses {
            external: Some(External {
                hostname: "public.example.com".to_string(),
                services: Services {
                    mgmt: 9091,
                    ..Services::default()
                },
            }),
        });

        assert_eq!(
            n.url_for(Service::Management, false, true).as_deref(),
            Some("http://public.example.com:9091")
        );
        assert_eq!(
            n.url_for(Service::Management, false, false).as_deref(),
            Some("http://private:8091")
        );
    }

    #[test]
    fn ipv6_hostnames_are_bracketed() {
        let mut n = node(
            "2001:db8::1",
            Services {
                mgmt: 8091,
                ..Services::default()
            },
        );
        n.normalize_hostnames();

        assert_eq!(n.hostname, "[2001:db8::1]");
        assert_eq!(
            n.url_for(Service::Management, false, false).as_deref(),
            Some("http://[2001:db8::1]:8091")
        );

        // Already bracketed hostnames are left alone.
        n.normalize_hostnames();
        assert_eq!(n.hostname, "[2001:db8::1]");
    }

    #[test]
    fn deserializes_wire_shape() {
        let raw = serde_json::json!({
            "hostname": "node1.example.com",
            "services": {"mgmt": 8091, "mgmtSSL": 18091, "kv": 11210, "kvSSL": 11207},
            "alternateAddresses": {
                "external": {
                    "hostname": "node1.public.example.com",
                    "services": {"mgmt": 9091}
                }
            },
            "thisNode": true
        });

        let n: Node = serde_json::from_value(raw).unwrap();
        assert_eq!(n.hostname, "node1.example.com");
        assert_eq!(n.services.kv_ssl, 11207);
        assert!(n.bootstrap_node);
        assert_eq!(n.alternate_hostname(), Some("node1.public.example.com"));
    }
}
