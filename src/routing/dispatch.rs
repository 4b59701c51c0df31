use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::{completions, health};
use crate::error::{sse_error_response, BridgeError};
use crate::state::AppState;

#[derive(Debug, PartialEq, Eq)]
enum RouteMatch {
    Health,
    Completions,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path(), base_path.as_ref());

    let response = match route {
        RouteMatch::Health => health::health_handler(State(state)).into_response(),
        RouteMatch::Completions => {
            let limit = state.config.server.max_request_body_bytes;
            let body_bytes = match read_request_body(body, limit).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            completions::handler(State(state), body_bytes).await
        }
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    Ok(response)
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

async fn read_request_body(body: Body, limit: usize) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, limit).await.map_err(|_| {
        let err = BridgeError::BodyTooLarge { limit };
        tracing::warn!(error = %err, "rejected completion request");
        sse_error_response(&err)
    })
}

fn match_route(method: &Method, path: &str, base_path: &str) -> RouteMatch {
    let Some(path) = strip_base_path(path, base_path) else {
        return RouteMatch::NotFound;
    };

    match path {
        "/" => {
            if method == Method::GET {
                RouteMatch::Health
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        "/v1/completions" => {
            if method == Method::POST {
                RouteMatch::Completions
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        _ => RouteMatch::NotFound,
    }
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }

    let remainder = path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        Some("/")
    } else if remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_path() {
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("bridge/"), "/bridge");
        assert_eq!(normalize_base_path(" /bridge// "), "/bridge");
    }

    #[test]
    fn test_match_route_without_base_path() {
        assert_eq!(match_route(&Method::GET, "/", ""), RouteMatch::Health);
        assert_eq!(
            match_route(&Method::POST, "/v1/completions", ""),
            RouteMatch::Completions
        );
        assert_eq!(
            match_route(&Method::GET, "/v1/completions", ""),
            RouteMatch::MethodNotAllowed
        );
        assert_eq!(
            match_route(&Method::POST, "/v1/chat/completions", ""),
            RouteMatch::NotFound
        );
    }

    #[test]
    fn test_match_route_with_base_path() {
        assert_eq!(match_route(&Method::GET, "/bridge", "/bridge"), RouteMatch::Health);
        assert_eq!(
            match_route(&Method::POST, "/bridge/v1/completions", "/bridge"),
            RouteMatch::Completions
        );
        assert_eq!(
            match_route(&Method::POST, "/bridgev1/completions", "/bridge"),
            RouteMatch::NotFound
        );
        assert_eq!(
            match_route(&Method::POST, "/v1/completions", "/bridge"),
            RouteMatch::NotFound
        );
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let response = read_request_body(Body::from(vec![b'x'; 64]), 16)
            .await
            .unwrap_err();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        let body = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            body.as_ref(),
            b"data: {\"error\":\"Request body too large (max 16 bytes)\"}\n\n"
        );
    }

    #[tokio::test]
    async fn test_body_within_limit_is_read() {
        let bytes = read_request_body(Body::from("{}"), 16).await.unwrap();
        assert_eq!(bytes.as_ref(), b"{}");
    }
}
