//! Testing utilities for consumers of the cluster client.
//!
//! This module provides an in-memory mock cluster for applications built on
//! top of this crate:
//!
//! - **Mock server**: a pre-configured wiremock server answering the
//!   bootstrap and topology endpoints
//! - **Fixtures**: builder-pattern helpers for wire-shaped topology JSON
//! - **Response helpers**: convenience functions for common HTTP responses
//!
//! # Feature Flag
//!
//! This module is only available when the `test-support` feature is enabled:
//!
//! ```toml
//! [dev-dependencies]
//! couchbase-rest = { version = "0.1", features = ["test-support"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use couchbase_rest::ClusterClient;
//! use couchbase_rest::testing::{ClusterConfigFixture, MockClusterServer, NodeFixture};
//!
//! #[tokio::test]
//! async fn test_my_app() {
//!     let server = MockClusterServer::start().await;
//!     server.mock_single_node_cluster(1).await;
//!
//!     let client = ClusterClient::builder()
//!         .connection_string(server.connection_string())
//!         .username("admin")
//!         .password("password")
//!         .disable_ccp(true)
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(client.cluster_config().unwrap().revision, 1);
//! }
//! ```
//!
//! # Custom Mocking
//!
//! For advanced scenarios, access the underlying wiremock server directly
//! via [`MockClusterServer::inner`] and mount your own [`Mock`]s.

pub mod fixtures;
pub mod responses;
pub mod server;

pub use fixtures::{ClusterConfigFixture, NodeFixture};
pub use server::MockClusterServer;

// Re-export wiremock types that consumers will commonly need
pub use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{basic_auth, body_json, method, path, path_regex},
};
