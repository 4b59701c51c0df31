use bytes::Bytes;
use futures_util::Stream;

use crate::error::BridgeError;

use super::{HttpTransport, PreparedUpstream};

const MAX_ERROR_BODY_LEN: usize = 500;

/// An upstream response whose status was 2xx and whose body is still unread.
#[derive(Debug)]
pub struct UpstreamStream {
    pub status: http::StatusCode,
    pub headers: http::HeaderMap,
    response: reqwest::Response,
}

impl UpstreamStream {
    /// Consume the response into its raw network chunks.
    ///
    /// Dropping the returned stream releases the upstream connection.
    pub fn into_byte_stream(self) -> impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static {
        self.response.bytes_stream()
    }
}

/// Opens chat-completion streams against the prepared upstream.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamClient<'a> {
    transport: &'a HttpTransport,
    upstream: &'a PreparedUpstream,
}

impl<'a> UpstreamClient<'a> {
    #[must_use]
    pub fn new(transport: &'a HttpTransport, upstream: &'a PreparedUpstream) -> Self {
        Self {
            transport,
            upstream,
        }
    }

    /// POST the encoded chat request and wait for the response head.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Transport`] when no response arrives.
    /// - [`BridgeError::Upstream`] for any non-2xx status. The upstream body is
    ///   read, sanitized and kept in the error for logging.
    pub async fn open_stream(&self, body: Bytes) -> Result<UpstreamStream, BridgeError> {
        let response = self
            .transport
            .send_stream(self.upstream.chat_url(), self.upstream.static_headers(), body)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.bytes().await.unwrap_or_default();
            return Err(BridgeError::Upstream {
                status: status.as_u16(),
                message: sanitize_upstream_error(&error_body),
            });
        }

        let headers = response.headers().clone();
        Ok(UpstreamStream {
            status,
            headers,
            response,
        })
    }
}

/// Reduce an upstream error body to something safe to log.
///
/// Prefers `error.message` from a JSON body, then falls back to the lossy
/// UTF-8 text. Both are capped at 500 bytes on a character boundary.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = json.get("error").and_then(|error| {
            error
                .get("message")
                .and_then(serde_json::Value::as_str)
                .or_else(|| error.as_str())
        });
        if let Some(message) = message {
            return truncate_message(message);
        }
    }
    truncate_message(&String::from_utf8_lossy(body))
}

fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_ERROR_BODY_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_BODY_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}
