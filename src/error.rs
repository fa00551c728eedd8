//! Error types for REST API operations

use crate::node::Service;
use thiserror::Error;

/// Substring matches identifying transient transport failures worth
/// retrying. Callers can rely on this exact set when classifying raw error
/// messages themselves.
pub const TEMPORARY_ERROR_MESSAGES: &[&str] = &[
    "bad record MAC",
    "broken pipe",
    "connection refused",
    "connection reset",
    "connection timed out",
    "http: ContentLength=",
    "i/o timeout",
    "net/http: TLS handshake timeout",
    "server closed idle connection",
    "stream error:",
    "transport connection broken",
    "unexpected EOF reading trailer",
    "use of closed network connection",
];

/// Returns whether the given transport error message matches one of the
/// known-transient failures in [`TEMPORARY_ERROR_MESSAGES`].
pub fn is_temporary_error_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TEMPORARY_ERROR_MESSAGES
        .iter()
        .any(|candidate| lowered.contains(&candidate.to_lowercase()))
}

#[derive(Error, Debug, Clone)]
pub enum RestError {
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("unsupported connection string scheme '{0}'")]
    BadScheme(String),

    #[error("invalid port '{0}'")]
    BadPort(String),

    #[error("no addresses parsed from connection string")]
    NoAddressesParsed,

    #[error("no addresses resolved from connection string")]
    NoAddressesResolved,

    #[error("client has not been bootstrapped against a cluster")]
    NotBootstrapped,

    #[error("cluster node has not been initialized")]
    NodeUninitialized,

    #[error(
        "failed to bootstrap against any node in the connection string{}{}",
        .auth.as_ref().map(|e| format!("; last authentication failure: {e}")).unwrap_or_default(),
        .permission.as_ref().map(|e| format!("; last authorization failure: {e}")).unwrap_or_default()
    )]
    BootstrapFailure {
        auth: Option<Box<RestError>>,
        permission: Option<Box<RestError>>,
    },

    #[error("authentication failed, check the credentials")]
    Unauthorized,

    #[error(
        "permission denied{}",
        if .permissions.is_empty() { String::new() } else { format!(", missing permissions: {}", .permissions.join(", ")) }
    )]
    Forbidden { permissions: Vec<String> },

    #[error("internal server error for {method} {endpoint}: {body}")]
    InternalServerError {
        method: String,
        endpoint: String,
        body: String,
    },

    #[error("endpoint {method} {endpoint} not found")]
    EndpointNotFound { method: String, endpoint: String },

    #[error("unexpected status code {status} for {method} {endpoint}: {body}")]
    UnexpectedStatusCode {
        status: u16,
        method: String,
        endpoint: String,
        body: String,
    },

    #[error("service '{0}' is not available on any cluster node")]
    ServiceNotAvailable(Service),

    #[error(
        "certificate signed by unknown authority: {0}; provide the cluster CA certificate, or \
         skip verification if the deployment uses a self-signed certificate"
    )]
    UnknownAuthority(String),

    #[error("certificate rejected: {0}")]
    UnknownX509(String),

    #[error(
        "socket closed in flight for {method} {endpoint}, check server-side connection timeouts"
    )]
    SocketClosedInFlight { method: String, endpoint: String },

    #[error("unexpected end of body reading {method} {endpoint}, check network timeouts")]
    UnexpectedEndOfBody { method: String, endpoint: String },

    #[error("exhausted retry count after {retries} attempts: {source}")]
    RetriesExhausted {
        retries: u32,
        source: Box<RestError>,
    },

    #[error("rejected cluster config with revision {old}, current revision is {curr}")]
    OldClusterConfig { old: i64, curr: i64 },

    #[error("exhausted all known cluster nodes refreshing the cluster config")]
    ExhaustedClusterNodes,

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        RestError::RequestFailed(err.to_string())
    }
}

impl From<serde_json::Error> for RestError {
    fn from(err: serde_json::Error) -> Self {
        RestError::ParseError(err.to_string())
    }
}

impl RestError {
    /// The innermost error once retry wrappers are peeled away.
    pub fn unwrapped(&self) -> &RestError {
        match self {
            RestError::RetriesExhausted { source, .. } => source.unwrapped(),
            other => other,
        }
    }

    /// Check if this is (or wraps) an endpoint-not-found error.
    pub fn is_endpoint_not_found(&self) -> bool {
        matches!(self.unwrapped(), RestError::EndpointNotFound { .. })
    }

    /// Check if this is (or wraps) a service-not-available error.
    pub fn is_service_not_available(&self) -> bool {
        matches!(self.unwrapped(), RestError::ServiceNotAvailable(_))
    }

    /// Check if this is (or wraps) an authentication error.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.unwrapped(), RestError::Unauthorized)
    }

    /// Check if this is (or wraps) an authorization error.
    pub fn is_forbidden(&self) -> bool {
        matches!(self.unwrapped(), RestError::Forbidden { .. })
    }

    /// Check if this is (or wraps) a TLS unknown-authority error.
    pub fn is_unknown_authority(&self) -> bool {
        matches!(self.unwrapped(), RestError::UnknownAuthority(_))
    }

    /// Check if this error is a transient transport failure.
    pub fn is_temporary(&self) -> bool {
        match self {
            RestError::SocketClosedInFlight { .. } => true,
            RestError::ConnectionError(message) | RestError::RequestFailed(message) => {
                is_temporary_error_message(message)
            }
            _ => false,
        }
    }

    /// Whether a failed attempt with this error should be retried.
    ///
    /// Unknown-authority errors are only retryable while bootstrapping;
    /// during normal execution they are surfaced immediately.
    pub fn should_retry(&self, bootstrap: bool) -> bool {
        match self {
            RestError::UnknownAuthority(_) => bootstrap,
            other => other.is_temporary(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RestError>;
