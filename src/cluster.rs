//! Cluster metadata: enterprise flag, UUID, node versions, and buckets.

use crate::error::{RestError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Response shape of the `/pools` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PoolsResult {
    #[serde(rename = "isEnterprise", default)]
    pub is_enterprise: bool,
    /// A string on initialized nodes; an empty array otherwise.
    #[serde(default)]
    pub uuid: Value,
}

impl PoolsResult {
    /// The cluster UUID, or [`RestError::NodeUninitialized`] when the node
    /// has not joined a cluster yet.
    pub fn uuid(&self) -> Result<String> {
        match &self.uuid {
            Value::String(uuid) => Ok(uuid.clone()),
            _ => Err(RestError::NodeUninitialized),
        }
    }
}

/// Response shape of the `/pools/default` endpoint; only the fields the
/// client consumes.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PoolsDefaultResult {
    #[serde(default)]
    pub nodes: Vec<NodeSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NodeSummary {
    #[serde(default)]
    pub version: String,
}

/// A `major.minor.patch` cluster version, parsed from the
/// `X.Y.Z[-build-edition]` strings reported by nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClusterVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FromStr for ClusterVersion {
    type Err = RestError;

    fn from_str(raw: &str) -> Result<Self> {
        let numeric = raw.split('-').next().unwrap_or(raw);

        let mut parts = numeric.split('.').map(|part| part.parse::<u32>());
        let (major, minor, patch) = match (parts.next(), parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch))) => (major, minor, patch),
            _ => {
                return Err(RestError::ParseError(format!(
                    "invalid cluster version '{raw}'"
                )));
            }
        };

        Ok(ClusterVersion {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Commonly used cluster metadata cached at construction time.
#[derive(Debug, Clone, Default)]
pub struct ClusterInfo {
    /// Whether the cluster runs the enterprise edition.
    pub enterprise: bool,
    /// The cluster UUID; guards against connecting to a different cluster
    /// after DNS churn.
    pub uuid: String,
    /// The lowest version among the cluster's nodes, when reported.
    pub version: Option<ClusterVersion>,
}

/// Minimum version across the given node version strings. Unparseable
/// versions are skipped.
pub(crate) fn min_version(nodes: &[NodeSummary]) -> Option<ClusterVersion> {
    nodes
        .iter()
        .filter_map(|node| node.version.parse::<ClusterVersion>().ok())
        .min()
}

/// A bucket as listed by `/pools/default/buckets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    /// Additional fields from the response.
    #[serde(flatten)]
    pub extra: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parsing_strips_build_suffix() {
        let version: ClusterVersion = "7.2.4-7070-enterprise".parse().unwrap();
        assert_eq!(
            version,
            ClusterVersion {
                major: 7,
                minor: 2,
                patch: 4
            }
        );
        assert_eq!(version.to_string(), "7.2.4");
    }

    #[test]
    fn version_parsing_rejects_garbage() {
        assert!("not-a-version".parse::<ClusterVersion>().is_err());
        assert!("7.2".parse::<ClusterVersion>().is_err());
    }

    #[test]
    fn versions_order_numerically() {
        let old: ClusterVersion = "6.6.5".parse().unwrap();
        let new: ClusterVersion = "7.10.0".parse().unwrap();
        assert_eq!(old.cmp(&new), Ordering::Less);
    }

    #[test]
    fn min_version_skips_unparseable_nodes() {
        let nodes = vec![
            NodeSummary {
                version: "7.6.0-1000-enterprise".to_string(),
            },
            NodeSummary {
                version: "warmup".to_string(),
            },
            NodeSummary {
                version: "7.2.4-7070-enterprise".to_string(),
            },
        ];

        assert_eq!(min_version(&nodes), Some("7.2.4".parse().unwrap()));
    }

    #[test]
    fn pools_uuid_empty_array_means_uninitialized() {
        let initialized: PoolsResult = serde_json::from_value(serde_json::json!({
            "isEnterprise": true,
            "uuid": "a-cluster-uuid"
        }))
        .unwrap();
        assert_eq!(initialized.uuid().unwrap(), "a-cluster-uuid");

        let uninitialized: PoolsResult = serde_json::from_value(serde_json::json!({
            "isEnterprise": false,
            "uuid": []
        }))
        .unwrap();
        assert!(matches!(
            uninitialized.uuid(),
            Err(RestError::NodeUninitialized)
        ));
    }
}
