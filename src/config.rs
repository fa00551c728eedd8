//! Revision-monotonic cluster topology store.
//!
//! The manager holds the most recently accepted [`ClusterConfig`] and lets
//! the background poller sleep until the config grows stale. Callers that
//! need fresh topology immediately can wake the poller and wait for the next
//! accepted update.

use crate::error::{RestError, Result};
use crate::node::{Node, bracket_ipv6};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::debug;

/// How long a cluster config is considered fresh before the background
/// poller refreshes it.
pub const DEFAULT_CONFIG_MAX_AGE: Duration = Duration::from_secs(15);

/// Topology document served by the cluster's node-services endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(rename = "rev")]
    pub revision: i64,
    #[serde(rename = "nodesExt", default)]
    pub nodes: Vec<Node>,
}

impl ClusterConfig {
    /// The node whose topology answer is in use, if any.
    pub fn bootstrap_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|node| node.bootstrap_node)
    }

    /// Prepare a config received from `source_host` for use: bracket IPv6
    /// hostnames and fill in empty hostnames with the host the config was
    /// fetched from.
    ///
    /// A node whose alternate hostname equals `source_host` is left empty;
    /// the source address already reaches it via the alternate network.
    pub(crate) fn normalize(&mut self, source_host: &str) {
        let source_host = bracket_ipv6(source_host);

        for node in &mut self.nodes {
            node.normalize_hostnames();

            if node.hostname.is_empty() && node.alternate_hostname() != Some(source_host.as_str())
            {
                node.hostname = source_host.clone();
            }
        }
    }
}

#[derive(Debug)]
struct Inner {
    current: Option<ClusterConfig>,
    last_updated: Instant,
}

/// Thread-safe store of the current cluster topology.
///
/// Updates are revision-monotonic: once a reader has observed revision `R`,
/// no subsequent read returns a smaller revision. Accepted updates are
/// broadcast to [`wait_until_updated`](Self::wait_until_updated) waiters.
#[derive(Debug)]
pub struct ClusterConfigManager {
    inner: Mutex<Inner>,
    max_age: Duration,
    updated: watch::Sender<u64>,
    wake: Notify,
}

impl ClusterConfigManager {
    pub fn new(max_age: Duration) -> Self {
        let (updated, _) = watch::channel(0);

        ClusterConfigManager {
            inner: Mutex::new(Inner {
                current: None,
                last_updated: Instant::now(),
            }),
            max_age,
            updated,
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the current config. The returned nodes do not alias the
    /// stored slice, so the snapshot is stable for the caller.
    pub fn get(&self) -> Result<ClusterConfig> {
        self.lock().current.clone().ok_or(RestError::NotBootstrapped)
    }

    /// Revision of the current config, if bootstrapped.
    pub fn revision(&self) -> Option<i64> {
        self.lock().current.as_ref().map(|config| config.revision)
    }

    /// Replace the stored config if `config` is at least as new as the
    /// current one, waking any update waiters.
    pub fn update(&self, config: ClusterConfig) -> Result<()> {
        {
            let mut inner = self.lock();

            if let Some(current) = &inner.current {
                if config.revision < current.revision {
                    return Err(RestError::OldClusterConfig {
                        old: config.revision,
                        curr: current.revision,
                    });
                }
            }

            debug!(revision = config.revision, "accepted cluster config");

            inner.current = Some(config);
            inner.last_updated = Instant::now();
        }

        self.updated.send_modify(|generation| *generation += 1);

        Ok(())
    }

    /// Sleep until the stored config is older than the configured max age,
    /// or until an external wake arrives, whichever comes first.
    pub async fn wait_until_expired(&self) {
        let deadline = self.lock().last_updated + self.max_age;

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = self.wake.notified() => {}
        }
    }

    /// Wake the poller sleeping in [`wait_until_expired`](Self::wait_until_expired)
    /// and block until the next accepted update.
    ///
    /// The wake is one-shot: it is consumed by a single expiry waiter, and a
    /// wake requested before the poller goes back to sleep is not lost.
    pub async fn wait_until_updated(&self) {
        let mut updated = self.updated.subscribe();

        self.wake.notify_one();

        // Cannot fail while the manager is alive; we hold a reference to it.
        let _ = updated.changed().await;
    }
}
