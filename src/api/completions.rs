use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::Response;
use tracing::Instrument;

use crate::api::streaming::{build_translated_stream_response, StreamContext};
use crate::error::{sse_error_response, BridgeError};
use crate::protocol::adapter::{build_chat_request, encode_chat_request, parse_completion_request};
use crate::state::AppState;

/// `POST /v1/completions`: translate a legacy completion request into an
/// upstream chat stream and relay it back as `text_completion` records.
pub async fn handler(State(state): State<Arc<AppState>>, body: bytes::Bytes) -> Response {
    let request_id = state.request_uuid(state.next_request_seq());
    let span = tracing::info_span!("completion", %request_id, model = tracing::field::Empty);

    async move {
        match handler_inner(&state, request_id, body).await {
            Ok(response) => response,
            Err(err) => {
                log_request_error(&err);
                sse_error_response(&err)
            }
        }
    }
    .instrument(span)
    .await
}

async fn handler_inner(
    state: &AppState,
    request_id: uuid::Uuid,
    body: bytes::Bytes,
) -> Result<Response, BridgeError> {
    let started = Instant::now();
    let request = parse_completion_request(&body)?;
    let chat_request = build_chat_request(&request, &state.config);
    let upstream_body = encode_chat_request(&chat_request)?;
    tracing::Span::current().record("model", chat_request.model.as_str());

    tracing::debug!(
        model = %chat_request.model,
        prompt_chars = request.prompt.chars().count(),
        max_tokens = chat_request.max_tokens,
        "forwarding completion request"
    );

    let upstream = state.upstream_client().open_stream(upstream_body).await?;
    tracing::debug!(status = upstream.status.as_u16(), "upstream stream opened");

    let status = upstream.status;
    let headers = upstream.headers.clone();
    Ok(build_translated_stream_response(
        status,
        &headers,
        upstream.into_byte_stream(),
        StreamContext {
            request_id,
            model: chat_request.model,
            started,
        },
    ))
}

fn log_request_error(err: &BridgeError) {
    match err {
        BridgeError::InvalidRequest(message) => {
            tracing::warn!(error = %message, "rejected completion request");
        }
        BridgeError::Upstream { status, message } => {
            tracing::error!(status = *status, upstream_message = %message, "upstream API error");
        }
        _ => tracing::error!(error = %err, "completion request failed"),
    }
}
