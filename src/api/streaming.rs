use std::pin::Pin;
use std::time::Instant;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::BridgeError;
use crate::observability::log_stream_complete;
use crate::stream::{PipelineStatus, TranslationPipeline};

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    // The translated body has a different length and is never re-encoded.
    "content-length",
    "content-encoding",
];

/// Identity of the stream, carried into its log lines.
#[derive(Debug, Clone)]
pub(crate) struct StreamContext {
    pub request_id: uuid::Uuid,
    pub model: String,
    pub started: Instant,
}

/// Owns the upstream byte stream for as long as the client body is alive.
/// Dropping it before completion means the client went away; either way the
/// upstream connection goes with it.
struct UpstreamLease<S> {
    upstream: Option<Pin<Box<S>>>,
    ctx: StreamContext,
    completed: bool,
}

impl<S> UpstreamLease<S> {
    fn new(upstream: S, ctx: StreamContext) -> Self {
        Self {
            upstream: Some(Box::pin(upstream)),
            ctx,
            completed: false,
        }
    }

    fn release(&mut self, pipeline: &TranslationPipeline) {
        self.upstream = None;
        if self.completed {
            return;
        }
        self.completed = true;
        log_stream_complete(
            self.ctx.request_id,
            &self.ctx.model,
            pipeline.state(),
            self.ctx.started.elapsed(),
        );
    }
}

impl<S> Drop for UpstreamLease<S> {
    fn drop(&mut self) {
        if !self.completed {
            tracing::info!(
                request_id = %self.ctx.request_id,
                model = %self.ctx.model,
                elapsed_ms = self.ctx.started.elapsed().as_millis(),
                "client disconnected before stream completion; releasing upstream"
            );
        }
    }
}

struct ResponderState<S> {
    lease: UpstreamLease<S>,
    pipeline: TranslationPipeline,
}

impl<S> ResponderState<S> {
    fn finish(&mut self) {
        self.lease.release(&self.pipeline);
    }

    fn fail(&mut self, err: &BridgeError, out: &mut Vec<u8>) {
        tracing::error!(
            request_id = %self.lease.ctx.request_id,
            error = %err,
            "completion stream aborted"
        );
        self.pipeline.push_error(err, out);
        self.finish();
    }
}

/// Stream the translated upstream body back to the client.
///
/// Each upstream network chunk yields at most one outbound buffer; chunks
/// that complete no visible record yield nothing. The upstream is read only
/// as fast as the client body is polled.
pub(crate) fn build_translated_stream_response<S, E>(
    status: http::StatusCode,
    upstream_headers: &http::HeaderMap,
    byte_stream: S,
    ctx: StreamContext,
) -> Response
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let initial = ResponderState {
        lease: UpstreamLease::new(byte_stream, ctx),
        pipeline: TranslationPipeline::new(),
    };

    let output_stream = futures_util::stream::unfold(initial, |mut state| async move {
        loop {
            let upstream = state.lease.upstream.as_mut()?;
            let mut out = Vec::new();
            match upstream.as_mut().next().await {
                Some(Ok(chunk)) => match state.pipeline.push_chunk(&chunk, &mut out) {
                    Ok(PipelineStatus::Open) => {}
                    Ok(PipelineStatus::Terminated) => state.finish(),
                    Err(err) => state.fail(&err, &mut out),
                },
                Some(Err(err)) => {
                    let err = BridgeError::Transport(err.to_string());
                    state.fail(&err, &mut out);
                }
                None => match state.pipeline.finish(&mut out) {
                    Ok(PipelineStatus::Terminated) => state.finish(),
                    Ok(PipelineStatus::Open) => {
                        tracing::warn!(
                            request_id = %state.lease.ctx.request_id,
                            "upstream closed without a [DONE] record"
                        );
                        state.finish();
                    }
                    Err(err) => state.fail(&err, &mut out),
                },
            }
            if !out.is_empty() {
                return Some((Bytes::from(out), state));
            }
        }
    });

    let body = Body::from_stream(output_stream.map(Ok::<Bytes, std::convert::Infallible>));
    let mut response = Response::new(body);
    *response.status_mut() = status;
    copy_upstream_headers(upstream_headers, response.headers_mut());
    response
}

fn copy_upstream_headers(upstream: &http::HeaderMap, target: &mut http::HeaderMap) {
    for (name, value) in upstream {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        target.append(name.clone(), value.clone());
    }
    target.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    target
        .entry(http::header::CACHE_CONTROL)
        .or_insert_with(|| http::HeaderValue::from_static("no-cache"));
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEL: &str = r#"{"choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}],"id":"x","created":1,"model":"m"}"#;
    const LO: &str = r#"{"choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":"stop"}],"id":"x","created":1,"model":"m"}"#;
    const THINKING: &str = r#"{"choices":[{"index":0,"delta":{"reasoning_content":"hmm"}}],"id":"x","created":1,"model":"m"}"#;

    fn ctx() -> StreamContext {
        StreamContext {
            request_id: uuid::Uuid::nil(),
            model: "m".to_string(),
            started: Instant::now(),
        }
    }

    fn upstream_headers() -> http::HeaderMap {
        let mut headers = http::HeaderMap::new();
        headers.insert("content-type", "text/event-stream; charset=utf-8".parse().unwrap());
        headers.insert("content-length", "999".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("x-request-id", "upstream-123".parse().unwrap());
        headers
    }

    fn respond(chunks: Vec<Result<Bytes, String>>) -> Response {
        build_translated_stream_response(
            http::StatusCode::OK,
            &upstream_headers(),
            futures_util::stream::iter(chunks),
            ctx(),
        )
    }

    async fn collect_frames(response: Response) -> Vec<Bytes> {
        let mut stream = response.into_body().into_data_stream();
        let mut frames = Vec::new();
        while let Some(frame) = stream.next().await {
            frames.push(frame.unwrap());
        }
        frames
    }

    fn concat(frames: &[Bytes]) -> String {
        frames
            .iter()
            .map(|frame| std::str::from_utf8(frame).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_headers_are_echoed_without_hop_by_hop() {
        let response = respond(vec![]);
        assert_eq!(response.status(), http::StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get("content-type").unwrap(), "text/event-stream");
        assert_eq!(headers.get("x-request-id").unwrap(), "upstream-123");
        assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
        assert!(headers.get("content-length").is_none());
        assert!(headers.get("connection").is_none());
    }

    #[tokio::test]
    async fn test_one_frame_per_productive_chunk() {
        let response = respond(vec![
            Ok(Bytes::from(format!("data: {HEL}\n\n"))),
            Ok(Bytes::from(format!("data: {THINKING}\n\n"))),
            Ok(Bytes::from(format!("data: {LO}\n\ndata: [DONE]\n\n"))),
        ]);
        let frames = collect_frames(response).await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with(b"data: {"));
        assert!(frames[1].starts_with(b"\n\ndata: {"));
        assert!(frames[1].ends_with(b"\n\ndata: [DONE]"));
    }

    #[tokio::test]
    async fn test_upstream_read_error_emits_error_record() {
        let response = respond(vec![
            Ok(Bytes::from(format!("data: {HEL}\n\n"))),
            Err("connection reset".to_string()),
            Ok(Bytes::from(format!("data: {LO}\n\n"))),
        ]);
        let body = concat(&collect_frames(response).await);
        let records: Vec<&str> = body.split("\n\n").collect();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1],
            "data: {\"error\":\"Upstream connection error\"}"
        );
    }

    #[tokio::test]
    async fn test_malformed_record_emits_single_error_record() {
        let response = respond(vec![Ok(Bytes::from_static(b"data: {oops\n\n"))]);
        let body = concat(&collect_frames(response).await);
        assert!(body.starts_with("data: {\"error\":"));
        assert!(!body.contains("\n\n"));
    }

    #[tokio::test]
    async fn test_eof_without_done_ends_cleanly() {
        let response = respond(vec![Ok(Bytes::from(format!("data: {HEL}\n\n")))]);
        let body = concat(&collect_frames(response).await);
        assert!(body.contains("\"text\":\"Hel\""));
        assert!(!body.contains("[DONE]"));
    }

    #[tokio::test]
    async fn test_chunks_after_done_are_not_read() {
        let response = respond(vec![
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
            Err("must not be polled".to_string()),
        ]);
        let body = concat(&collect_frames(response).await);
        assert_eq!(body, "data: [DONE]");
    }

    #[tokio::test]
    async fn test_terminal_releases_upstream_before_body_is_dropped() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, String>>(4);
        let upstream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let response = build_translated_stream_response(
            http::StatusCode::OK,
            &http::HeaderMap::new(),
            upstream,
            ctx(),
        );
        let mut body = response.into_body().into_data_stream();
        tx.send(Ok(Bytes::from(format!("data: {HEL}\n\ndata: [DONE]\n\n"))))
            .await
            .unwrap();
        let frame = body.next().await.unwrap().unwrap();
        assert!(frame.ends_with(b"data: [DONE]"));
        assert!(tx.is_closed());
        assert!(body.next().await.is_none());
    }

    #[test]
    fn test_lease_release_drops_upstream() {
        let upstream = futures_util::stream::empty::<Result<Bytes, String>>();
        let mut lease = UpstreamLease::new(upstream, ctx());
        assert!(lease.upstream.is_some());
        lease.release(&TranslationPipeline::new());
        assert!(lease.upstream.is_none());
        assert!(lease.completed);
    }

    #[tokio::test]
    async fn test_dropping_body_mid_stream_releases_upstream() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, String>>(4);
        let upstream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let response = build_translated_stream_response(
            http::StatusCode::OK,
            &http::HeaderMap::new(),
            upstream,
            ctx(),
        );
        let mut body = response.into_body().into_data_stream();
        tx.send(Ok(Bytes::from(format!("data: {HEL}\n\n"))))
            .await
            .unwrap();
        assert!(body.next().await.is_some());

        drop(body);
        assert!(tx.is_closed());
    }
}
