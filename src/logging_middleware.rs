// src/logging_middleware.rs
//! Middleware for logging request and response bodies in debug mode
//!
//! Credentials and tokens are replaced before anything is logged.

use axum::body::to_bytes;
use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use tracing::{debug, Level};

const REDACTED_FIELDS: [&str; 6] = [
    "password",
    "access_token",
    "refresh_token",
    "id_token",
    "token",
    "code",
];

/// Replaces sensitive values anywhere in a JSON document
pub fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if REDACTED_FIELDS.contains(&key.as_str()) {
                    *field = Value::String("[REDACTED]".to_string());
                } else {
                    redact(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

fn loggable_body(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(mut json) => {
            redact(&mut json);
            Some(serde_json::to_string_pretty(&json).unwrap_or_default())
        }
        // Non-JSON bodies may carry anything; log only their size
        Err(_) => Some(format!("<{} bytes>", bytes.len())),
    }
}

/// Middleware to log request and response bodies in debug mode
pub async fn log_request_response(request: Request, next: Next) -> Result<Response, StatusCode> {
    if !tracing::enabled!(Level::DEBUG) {
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();

    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if let Some(request_body) = loggable_body(&bytes) {
        debug!(
            method = %parts.method,
            uri = %parts.uri.path(),
            request_body = %request_body,
            "📥 Request"
        );
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if let Some(response_body) = loggable_body(&bytes) {
        debug!(
            status = %parts.status,
            response_body = %response_body,
            "📤 Response"
        );
    }

    Ok(Response::from_parts(parts, Body::from(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_nested_secrets() {
        let mut body = json!({
            "email": "a@x.com",
            "password": "abcdef",
            "user": { "id": 1, "name": "Ada" },
            "sessions": [{ "refresh_token": "r1" }, { "access_token": "a1" }],
        });
        redact(&mut body);

        assert_eq!(body["email"], "a@x.com");
        assert_eq!(body["password"], "[REDACTED]");
        assert_eq!(body["user"]["name"], "Ada");
        assert_eq!(body["sessions"][0]["refresh_token"], "[REDACTED]");
        assert_eq!(body["sessions"][1]["access_token"], "[REDACTED]");
    }

    #[test]
    fn test_non_json_body_is_summarised() {
        assert_eq!(loggable_body(b"code=abc&state=xyz").as_deref(), Some("<18 bytes>"));
        assert!(loggable_body(b"").is_none());
    }
}
