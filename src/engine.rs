//! Request dispatch: the retry loop, backoff, and error classification.

use crate::auth::AuthProvider;
use crate::error::{RestError, Result};
use crate::request::{DEFAULT_CONTENT_TYPE, Request, Response};
use crate::retry::{DefaultRetryCustomizer, RetryContext, RetryCustomizer, RetryPolicy};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Statuses retried by default for idempotent requests.
pub const DEFAULT_TEMPORARY_STATUSES: &[StatusCode] = &[
    StatusCode::REQUEST_TIMEOUT,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Cap applied to server-provided `Retry-After` hints.
const RETRY_AFTER_CAP: Duration = Duration::from_secs(60);

/// Dispatches requests to cluster nodes with retries and backoff.
///
/// Each attempt asks the [`AuthProvider`] for a host (rotating with the
/// attempt number), builds the HTTP request with basic credentials and the
/// configured `User-Agent`, and classifies the outcome into either a
/// response, a retry, or a structured error.
pub struct RequestEngine {
    http: reqwest::Client,
    auth: Arc<AuthProvider>,
    policy: RetryPolicy,
    default_timeout: Duration,
}

impl std::fmt::Debug for RequestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine")
            .field("policy", &self.policy)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl RequestEngine {
    /// Create an engine dispatching through the given transport with the
    /// given retry discipline.
    pub fn new(
        http: reqwest::Client,
        auth: Arc<AuthProvider>,
        policy: RetryPolicy,
        default_timeout: Duration,
    ) -> Self {
        RequestEngine {
            http,
            auth,
            policy,
            default_timeout,
        }
    }

    /// Dispatch the request, drain the body, and classify non-expected
    /// status codes into structured errors.
    pub async fn execute(&self, request: &Request) -> Result<Response> {
        self.execute_with(&DefaultRetryCustomizer, request).await
    }

    pub(crate) async fn execute_with(
        &self,
        customizer: &dyn RetryCustomizer,
        request: &Request,
    ) -> Result<Response> {
        let raw = self.send_with(customizer, request).await?;
        let status = raw.status();

        let body = raw
            .bytes()
            .await
            .map_err(|_| RestError::UnexpectedEndOfBody {
                method: request.method.to_string(),
                endpoint: request.endpoint.clone(),
            })?
            .to_vec();

        if status != request.expected_status {
            return Err(classify_status(request, status, &body));
        }

        Ok(Response { status, body })
    }

    /// Dispatch the request and hand back the raw response with its body
    /// unread. The caller is responsible for draining it.
    pub async fn send(&self, request: &Request) -> Result<reqwest::Response> {
        self.send_with(&DefaultRetryCustomizer, request).await
    }

    pub(crate) async fn send_with(
        &self,
        customizer: &dyn RetryCustomizer,
        request: &Request,
    ) -> Result<reqwest::Response> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        match tokio::time::timeout(timeout, self.attempt_loop(customizer, request)).await {
            Ok(result) => result,
            Err(_) => Err(RestError::Timeout),
        }
    }

    async fn attempt_loop(
        &self,
        customizer: &dyn RetryCustomizer,
        request: &Request,
    ) -> Result<reqwest::Response> {
        let retries = self.policy.max_retries.max(1);
        let mut attempt = 1u32;

        loop {
            let ctx = RetryContext { attempt };

            let host = match customizer.host_for_attempt(&ctx, request.service).await {
                Some(host) => host,
                None => self.auth.host_for_attempt(request.service, attempt - 1)?,
            };

            debug!(
                method = %request.method,
                endpoint = %request.endpoint,
                %host,
                attempt,
                "dispatching request"
            );

            let (err, retry_after) = match self.dispatch(&host, request).await {
                Ok(response) => {
                    let status = response.status();
                    trace!(%status, "received response");

                    if status == request.expected_status {
                        return Ok(response);
                    }

                    let default_decision = request.is_idempotent()
                        && (request.retry_on_status.contains(&status)
                            || DEFAULT_TEMPORARY_STATUSES.contains(&status))
                        && !request.no_retry_on_status.contains(&status);

                    if !customizer
                        .retry_with_response(&ctx, default_decision, status)
                        .await
                    {
                        return Ok(response);
                    }

                    let retry_after = retry_after_hint(status, response.headers());

                    // Reading the body drains the connection for reuse.
                    let body = response
                        .bytes()
                        .await
                        .map(|bytes| bytes.to_vec())
                        .unwrap_or_default();

                    (classify_status(request, status, &body), retry_after)
                }
                Err(err) => {
                    let default_decision = err.should_retry(false);

                    if !customizer
                        .retry_with_error(&ctx, default_decision, &err)
                        .await
                    {
                        return Err(err);
                    }

                    (err, None)
                }
            };

            if attempt >= retries {
                return Err(RestError::RetriesExhausted {
                    retries,
                    source: Box::new(err),
                });
            }

            let delay = retry_after.unwrap_or_else(|| self.policy.delay(attempt));
            trace!(?delay, attempt, error = %err, "retrying after backoff");
            tokio::time::sleep(delay).await;

            attempt += 1;
        }
    }

    async fn dispatch(&self, host: &str, request: &Request) -> Result<reqwest::Response> {
        let mut url = format!("{}{}", host.trim_end_matches('/'), request.endpoint);
        if !request.query.is_empty() {
            let query = serde_urlencoded::to_string(&request.query)
                .map_err(|err| RestError::RequestFailed(err.to_string()))?;
            url.push('?');
            url.push_str(&query);
        }

        let (username, password) = self.auth.credentials_for(&host_port(host));

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .basic_auth(username, Some(password))
            .header(USER_AGENT, self.auth.user_agent())
            .header(
                CONTENT_TYPE,
                request
                    .content_type
                    .as_deref()
                    .unwrap_or(DEFAULT_CONTENT_TYPE),
            )
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        builder
            .send()
            .await
            .map_err(|err| map_transport_error(err, &url, request))
    }
}

/// Deserialize a response body, reporting the offending JSON path on
/// mismatch.
pub(crate) fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let deserializer = &mut serde_json::Deserializer::from_slice(body);
    serde_path_to_error::deserialize(deserializer).map_err(|err| {
        RestError::ParseError(format!(
            "failed to deserialize field '{}': {}",
            err.path(),
            err.inner()
        ))
    })
}

/// `host:port` portion of a URL, used as the credential-mapping key.
fn host_port(host: &str) -> String {
    match url::Url::parse(host) {
        Ok(url) => {
            let hostname = url.host_str().unwrap_or_default().to_string();
            match url.port_or_known_default() {
                Some(port) => format!("{hostname}:{port}"),
                None => hostname,
            }
        }
        Err(_) => host.to_string(),
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    message
}

fn map_transport_error(err: reqwest::Error, url: &str, request: &Request) -> RestError {
    let chain = error_chain(&err);

    if chain.contains("UnknownIssuer") {
        return RestError::UnknownAuthority(chain);
    }

    if chain.contains("invalid peer certificate") {
        return RestError::UnknownX509(chain);
    }

    if chain.contains("IncompleteMessage")
        || chain.contains("connection closed before message completed")
    {
        return RestError::SocketClosedInFlight {
            method: request.method.to_string(),
            endpoint: request.endpoint.clone(),
        };
    }

    if err.is_timeout() {
        return RestError::ConnectionError(format!("request to {url} failed: i/o timeout"));
    }

    if err.is_connect() {
        return RestError::ConnectionError(format!("failed to connect to {url}: {chain}"));
    }

    RestError::RequestFailed(chain)
}

fn classify_status(request: &Request, status: StatusCode, body: &[u8]) -> RestError {
    let method = request.method.to_string();
    let endpoint = request.endpoint.clone();

    match status {
        StatusCode::UNAUTHORIZED => RestError::Unauthorized,
        StatusCode::FORBIDDEN => RestError::Forbidden {
            permissions: parse_permissions(body),
        },
        StatusCode::NOT_FOUND => RestError::EndpointNotFound { method, endpoint },
        StatusCode::INTERNAL_SERVER_ERROR => RestError::InternalServerError {
            method,
            endpoint,
            body: body_head(body),
        },
        _ => RestError::UnexpectedStatusCode {
            status: status.as_u16(),
            method,
            endpoint,
            body: body_head(body),
        },
    }
}

#[derive(Deserialize)]
struct PermissionsBody {
    #[serde(default)]
    permissions: Vec<String>,
}

fn parse_permissions(body: &[u8]) -> Vec<String> {
    serde_json::from_slice::<PermissionsBody>(body)
        .map(|parsed| parsed.permissions)
        .unwrap_or_default()
}

/// Leading slice of the body, enough for a single log line.
fn body_head(body: &[u8]) -> String {
    String::from_utf8_lossy(body).chars().take(256).collect()
}

fn retry_after_hint(status: StatusCode, headers: &HeaderMap) -> Option<Duration> {
    if status != StatusCode::SERVICE_UNAVAILABLE {
        return None;
    }

    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;

    let delay = if let Ok(seconds) = value.parse::<u64>() {
        Duration::from_secs(seconds)
    } else {
        let date = DateTime::parse_from_rfc2822(value).ok()?;
        (date.with_timezone(&Utc) - Utc::now()).to_std().ok()?
    };

    Some(delay.min(RETRY_AFTER_CAP))
}
