use axum::body::Body;
use axum::response::Response;

/// Error type shared by the adapter, transport and stream pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Stream decode error: {0}")]
    Decode(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Request body too large (max {limit} bytes)")]
    BodyTooLarge { limit: usize },
}

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

impl BridgeError {
    /// HTTP status used when this error is reported before streaming starts.
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            BridgeError::Upstream { status, .. } => http::StatusCode::from_u16(*status)
                .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR),
            BridgeError::BodyTooLarge { .. } => http::StatusCode::PAYLOAD_TOO_LARGE,
            BridgeError::Config(_)
            | BridgeError::InvalidRequest(_)
            | BridgeError::Transport(_)
            | BridgeError::Decode(_)
            | BridgeError::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to put in front of the client.
    ///
    /// Upstream bodies and internal details stay in the server log.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            BridgeError::Upstream { status, .. } => format!("Upstream API error: {status}"),
            BridgeError::Decode(_) | BridgeError::BodyTooLarge { .. } => self.to_string(),
            BridgeError::Transport(_) => "Upstream connection error".to_string(),
            BridgeError::Config(_) | BridgeError::InvalidRequest(_) | BridgeError::Internal(_) => {
                INTERNAL_ERROR_MESSAGE.to_string()
            }
        }
    }
}

/// Serialize `{"error": message}` as the payload of an SSE error record.
#[must_use]
pub fn error_payload_json(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// Render an error that happened before any upstream byte was read as a single
/// SSE error record with the matching status.
#[must_use]
pub fn sse_error_response(err: &BridgeError) -> Response {
    let mut body = String::with_capacity(32);
    body.push_str("data: ");
    body.push_str(&error_payload_json(&err.client_message()));
    body.push_str("\n\n");

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = err.status_code();
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    response
}

impl axum::response::IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        sse_error_response(&self)
    }
}
