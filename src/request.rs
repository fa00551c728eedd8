//! Request and response model.

use crate::node::Service;
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Content type used by the management API unless a request overrides it.
pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A single REST request against a cluster service.
///
/// Build with [`Request::builder`]; only `method`, `endpoint`, and `service`
/// are required:
///
/// ```no_run
/// use couchbase_rest::{Request, Service};
/// use reqwest::Method;
///
/// let request = Request::builder()
///     .method(Method::GET)
///     .endpoint("/pools/default")
///     .service(Service::Management)
///     .build();
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct Request {
    pub method: Method,

    /// Path dispatched against the selected node, e.g. `/pools/default`.
    #[builder(setter(into))]
    pub endpoint: String,

    /// Service whose nodes the request may be dispatched to.
    pub service: Service,

    /// The only status treated as success.
    #[builder(default = StatusCode::OK)]
    pub expected_status: StatusCode,

    #[builder(default)]
    pub headers: HeaderMap,

    /// Overrides [`DEFAULT_CONTENT_TYPE`].
    #[builder(default, setter(strip_option, into))]
    pub content_type: Option<String>,

    #[builder(default, setter(strip_option))]
    pub body: Option<Vec<u8>>,

    /// Query parameters appended to the endpoint.
    #[builder(default)]
    pub query: Vec<(String, String)>,

    /// Additional statuses to retry on, on top of the engine's defaults.
    #[builder(default)]
    pub retry_on_status: Vec<StatusCode>,

    /// Statuses never retried, even when listed in `retry_on_status`.
    #[builder(default)]
    pub no_retry_on_status: Vec<StatusCode>,

    /// Overrides the per-HTTP-method idempotency default.
    #[builder(default, setter(strip_option))]
    pub idempotent: Option<bool>,

    /// Overall deadline spanning all retries; the client default applies
    /// when unset.
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
}

impl Request {
    /// Whether a non-expected status may be retried for this request,
    /// following the HTTP-method defaults unless overridden.
    pub(crate) fn is_idempotent(&self) -> bool {
        self.idempotent.unwrap_or_else(|| {
            matches!(
                self.method.as_str(),
                "GET" | "HEAD" | "OPTIONS" | "TRACE" | "PUT" | "DELETE"
            )
        })
    }
}

/// A fully drained response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_follows_the_method_by_default() {
        let get = Request::builder()
            .method(Method::GET)
            .endpoint("/pools")
            .service(Service::Management)
            .build();
        assert!(get.is_idempotent());

        let post = Request::builder()
            .method(Method::POST)
            .endpoint("/pools")
            .service(Service::Management)
            .build();
        assert!(!post.is_idempotent());
    }

    #[test]
    fn idempotency_override_wins() {
        let post = Request::builder()
            .method(Method::POST)
            .endpoint("/pools")
            .service(Service::Management)
            .idempotent(true)
            .build();
        assert!(post.is_idempotent());

        let get = Request::builder()
            .method(Method::GET)
            .endpoint("/pools")
            .service(Service::Management)
            .idempotent(false)
            .build();
        assert!(!get.is_idempotent());
    }
}
