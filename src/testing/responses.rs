//! Response helpers for building wiremock responses.

use serde_json::{Value, json};
use wiremock::ResponseTemplate;

/// Create a 200 OK response with JSON body
pub fn success(body: impl Into<Value>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body.into())
}

/// Create a 401 Unauthorized response
pub fn unauthorized() -> ResponseTemplate {
    ResponseTemplate::new(401)
}

/// Create a 403 Forbidden response carrying the missing permissions
pub fn forbidden(permissions: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(403).set_body_json(json!({
        "message": "Forbidden",
        "permissions": permissions,
    }))
}

/// Create a 404 Not Found response
pub fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(404)
}

/// Create a 500 Internal Server Error response
pub fn server_error(message: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(500).set_body_string(message.into())
}

/// Create a 503 Service Unavailable response, optionally with a
/// `Retry-After` hint in seconds
pub fn service_unavailable(retry_after: Option<u64>) -> ResponseTemplate {
    let mut response = ResponseTemplate::new(503);

    if let Some(seconds) = retry_after {
        response = response.insert_header("Retry-After", seconds.to_string());
    }

    response
}
