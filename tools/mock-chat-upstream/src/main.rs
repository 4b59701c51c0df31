use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use http::{header, HeaderValue, Method, Request, Response, StatusCode, Version};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_UPSTREAM_PORT: u16 = 19_002;
const DEFAULT_DRIP_BYTES: usize = 7;
const DEFAULT_DRIP_MS: u64 = 20;

type MockBody = UnsyncBoxBody<Bytes, Infallible>;

#[derive(Copy, Clone)]
enum MockScenario {
    Text,
    Code,
    Reasoning,
    Usage,
    Malformed,
    Error,
}

impl MockScenario {
    fn name(self) -> &'static str {
        match self {
            MockScenario::Text => "text",
            MockScenario::Code => "code",
            MockScenario::Reasoning => "reasoning",
            MockScenario::Usage => "usage",
            MockScenario::Malformed => "malformed",
            MockScenario::Error => "error",
        }
    }
}

#[derive(Copy, Clone)]
enum MockChunking {
    Whole,
    Drip { bytes: usize, delay: Duration },
}

struct ProtocolStats {
    requests: AtomicU64,
    h1: AtomicU64,
    h2: AtomicU64,
}

impl ProtocolStats {
    const fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            h1: AtomicU64::new(0),
            h2: AtomicU64::new(0),
        }
    }

    fn record(&self, version: Version) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        match version {
            Version::HTTP_2 => {
                self.h2.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.h1.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.h1.store(0, Ordering::Relaxed);
        self.h2.store(0, Ordering::Relaxed);
    }
}

struct MockState {
    scenario: MockScenario,
    chunking: MockChunking,
    stats: ProtocolStats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_parse("UPSTREAM_PORT", DEFAULT_UPSTREAM_PORT);
    let state = Arc::new(MockState {
        scenario: parse_scenario(),
        chunking: parse_chunking(),
        stats: ProtocolStats::new(),
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock upstream on 127.0.0.1:{port}: {err}"));
    eprintln!(
        "mock chat upstream on 127.0.0.1:{port} (scenario={})",
        state.scenario.name()
    );

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock upstream connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("code") => MockScenario::Code,
        Ok("reasoning") => MockScenario::Reasoning,
        Ok("usage") => MockScenario::Usage,
        Ok("malformed") => MockScenario::Malformed,
        Ok("error") => MockScenario::Error,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

fn parse_chunking() -> MockChunking {
    match env::var("MOCK_CHUNKING").as_deref() {
        Ok("drip") => MockChunking::Drip {
            bytes: env_parse("MOCK_DRIP_BYTES", DEFAULT_DRIP_BYTES).max(1),
            delay: Duration::from_millis(env_parse("MOCK_DRIP_MS", DEFAULT_DRIP_MS)),
        },
        Ok("whole") | Err(_) => MockChunking::Whole,
        Ok(other) => {
            eprintln!("unknown MOCK_CHUNKING '{other}', fallback to whole");
            MockChunking::Whole
        }
    }
}

async fn handle_request(request: Request<Incoming>, state: &MockState) -> Response<MockBody> {
    let (parts, body) = request.into_parts();
    state.stats.record(parts.version);
    let request_body = read_request_body(body).await;

    let method = parts.method;
    let path = parts.uri.path();

    if method == Method::GET && path == "/_mock/stats" {
        return stats_response(state);
    }
    if method == Method::POST && path == "/_mock/reset" {
        state.stats.reset();
        return json_response(StatusCode::OK, Bytes::from_static(br#"{"ok":true}"#));
    }
    if method != Method::POST {
        return json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            Bytes::from_static(br#"{"error":"method_not_allowed"}"#),
        );
    }
    if !is_chat_completions_path(path) {
        return json_response(
            StatusCode::NOT_FOUND,
            Bytes::from_static(br#"{"error":"not_found"}"#),
        );
    }
    if !parts.headers.contains_key(header::AUTHORIZATION) {
        return json_response(
            StatusCode::UNAUTHORIZED,
            Bytes::from_static(br#"{"error":{"message":"missing Authorization header"}}"#),
        );
    }
    if std::str::from_utf8(&request_body).map_or(true, |text| !text.contains("\"stream\":true")) {
        return json_response(
            StatusCode::BAD_REQUEST,
            Bytes::from_static(br#"{"error":{"message":"only stream=true is mocked"}}"#),
        );
    }

    let body = match state.scenario {
        MockScenario::Error => {
            return json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                Bytes::from_static(br#"{"error":{"message":"mock_injected_error"}}"#),
            );
        }
        MockScenario::Text => CHAT_STREAM_TEXT,
        MockScenario::Code => CHAT_STREAM_CODE,
        MockScenario::Reasoning => CHAT_STREAM_REASONING,
        MockScenario::Usage => CHAT_STREAM_USAGE,
        MockScenario::Malformed => CHAT_STREAM_MALFORMED,
    };
    event_stream_response(body, state.chunking)
}

async fn read_request_body(body: Incoming) -> Bytes {
    body.collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .unwrap_or_default()
}

fn is_chat_completions_path(path: &str) -> bool {
    matches!(
        path,
        "/api/v3/chat/completions" | "/v1/chat/completions" | "/chat/completions"
    )
}

fn stats_response(state: &MockState) -> Response<MockBody> {
    let body = format!(
        "{{\"scenario\":\"{}\",\"requests\":{},\"h1\":{},\"h2\":{}}}",
        state.scenario.name(),
        state.stats.requests.load(Ordering::Relaxed),
        state.stats.h1.load(Ordering::Relaxed),
        state.stats.h2.load(Ordering::Relaxed),
    );
    json_response(StatusCode::OK, Bytes::from(body))
}

fn event_stream_response(body: &'static [u8], chunking: MockChunking) -> Response<MockBody> {
    let body = match chunking {
        MockChunking::Whole => Full::new(Bytes::from_static(body)).boxed_unsync(),
        MockChunking::Drip { bytes, delay } => {
            let frames = futures_util::stream::iter(body.chunks(bytes)).then(move |piece| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, Infallible>(Frame::data(Bytes::from_static(piece)))
            });
            StreamBody::new(frames).boxed_unsync()
        }
    };
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn json_response(status: StatusCode, body: Bytes) -> Response<MockBody> {
    let mut response = Response::new(Full::new(body).boxed_unsync());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

const CHAT_STREAM_TEXT: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"doubao-mock\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"doubao-mock\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";
const CHAT_STREAM_CODE: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"doubao-mock\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"fn main() {\\n\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"doubao-mock\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"    println!(\\\"\xe4\xbd\xa0\xe5\xa5\xbd\\\");\\n}\\n\"},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";
const CHAT_STREAM_REASONING: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"doubao-mock\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\",\"reasoning_content\":\"The user wants\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"doubao-mock\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"\",\"reasoning_content\":\" a greeting.\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"doubao-mock\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";
const CHAT_STREAM_USAGE: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"doubao-mock\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"ok\"},\"finish_reason\":\"stop\"}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"doubao-mock\",\"choices\":[],\"usage\":{\"prompt_tokens\":12,\"completion_tokens\":1,\"total_tokens\":13}}\n\ndata: [DONE]\n\n";
const CHAT_STREAM_MALFORMED: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"doubao-mock\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"partial\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"choices\":[{\"index\":0,\n\n";
