//! Cluster-aware REST client for Couchbase Server management endpoints
//!
//! A Rust client library for the Couchbase Server REST API that discovers
//! the cluster from a connection string, dispatches authenticated requests
//! to nodes running a particular service, tolerates node failures and
//! reconfigurations, and keeps its view of the topology fresh in the
//! background.
//!
//! # Features
//!
//! - **Connection strings**: `couchbase[s]://`, `http[s]://`, multi-host
//!   lists, bracketed IPv6 literals, and DNS SRV expansion
//! - **Cluster awareness**: a revision-monotonic topology store refreshed by
//!   a background poller, with bootstrap-node affinity and alternate-address
//!   support for clients outside the cluster network
//! - **Retries**: pluggable Fibonacci/exponential/linear backoff, honouring
//!   `Retry-After` hints and per-method idempotency
//! - **Error handling**: structured error kinds with classifier helpers
//! - **Async/await support**: built on Tokio and reqwest
//!
//! # Quick Start
//!
//! Add to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! couchbase-rest = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ```no_run
//! use couchbase_rest::{ClusterClient, Request, Service};
//! use reqwest::Method;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClusterClient::builder()
//!     .connection_string("couchbase://node1.example.com,node2.example.com")
//!     .username("Administrator")
//!     .password("password")
//!     .build()
//!     .await?;
//!
//! let request = Request::builder()
//!     .method(Method::GET)
//!     .endpoint("/pools/default")
//!     .service(Service::Management)
//!     .build();
//!
//! let response = client.execute(&request).await?;
//! println!("{}", String::from_utf8_lossy(&response.body));
//! # Ok(())
//! # }
//! ```
//!
//! # Environment Variables
//!
//! The client supports configuration via environment variables, all
//! optional:
//! - `CB_REST_CLIENT_TIMEOUT_SECS`: per-operation HTTP timeout
//! - `CB_REST_CLIENT_REQUEST_TIMEOUT`: per-request timeout spanning retries
//! - `CB_REST_CLIENT_NUM_RETRIES`: retry budget, clamped to at least one
//! - `CB_REST_CLIENT_POLL_TIMEOUT`: polling operation timeout
//! - `CB_REST_CC_MAX_AGE`: cluster-config max age before a refresh
//! - `CB_REST_HTTP_TIMEOUTS`: JSON object of fine-grained transport timeouts
//! - `CBM_SERVICES_KV_HOSTS`: `host:port=password` credential mappings
//!
//! Durations accept either integer seconds or strings such as `1m30s`.
//!
//! # Module Organization
//!
//! - [`connstr`]: connection string parsing, resolution, and SRV expansion
//! - [`node`]: the node/services model and per-service URL selection
//! - [`config`]: the revision-monotonic cluster-config store
//! - [`auth`]: credential providers and host selection
//! - [`request`], [`retry`], [`engine`]: the request model and retry engine
//! - [`client`]: the cluster client, bootstrap, and background polling
//! - `testing`: an in-memory mock cluster (behind the `test-support`
//!   feature)
//!
//! # Targeting Services
//!
//! Each request names the [`Service`] it is for; the client dispatches it to
//! a node running that service, preferring the node it bootstrapped against
//! and rotating across nodes between retries:
//!
//! ```no_run
//! use couchbase_rest::{ClusterClient, Request, Service};
//! use reqwest::Method;
//!
//! # async fn example(client: ClusterClient) -> Result<(), Box<dyn std::error::Error>> {
//! let request = Request::builder()
//!     .method(Method::POST)
//!     .endpoint("/query/service")
//!     .service(Service::Query)
//!     .content_type("application/json")
//!     .body(br#"{"statement": "SELECT 1"}"#.to_vec())
//!     .build();
//!
//! let response = client.execute(&request).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`RestError`] with enough context to be rendered
//! as a single log line, plus helper methods for the common questions:
//!
//! ```no_run
//! use couchbase_rest::{ClusterClient, RestError};
//!
//! # async fn example(client: ClusterClient) -> Result<(), Box<dyn std::error::Error>> {
//! match client.buckets().await {
//!     Ok(buckets) => println!("{} buckets", buckets.len()),
//!     Err(RestError::Unauthorized) => println!("check the credentials"),
//!     Err(err) if err.is_endpoint_not_found() => println!("endpoint missing"),
//!     Err(err) => println!("unexpected error: {err}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod cluster;
pub mod config;
pub mod connstr;
pub mod engine;
pub mod error;
pub mod node;
pub mod request;
pub mod retry;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Core client and error types
pub use client::{ClusterClient, ClusterClientBuilder, HttpTimeouts};
pub use error::{RestError, Result, TEMPORARY_ERROR_MESSAGES};

// Connection strings
pub use connstr::{Address, ConnectionString, ResolvedConnectionString, Scheme};

// Topology model
pub use cluster::{Bucket, ClusterInfo, ClusterVersion};
pub use config::{ClusterConfig, ClusterConfigManager};
pub use node::{AlternateAddresses, External, Node, Service, Services};

// Credentials and host selection
pub use auth::{AuthProvider, CredentialProvider, StaticCredentials};

// Requests and retries
pub use engine::RequestEngine;
pub use request::{Request, Response};
pub use retry::{BackoffAlgorithm, RetryContext, RetryCustomizer, RetryPolicy};
