use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::stream::StreamState;

/// Initialize the tracing subscriber with the configured level and format.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (TRACE, DEBUG, INFO, WARN, ERROR)
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
/// [`LogFormat::Json`] emits one flattened JSON object per event.
pub fn init_tracing(log_level: &str, log_format: LogFormat) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(tracing_level(&level)).unwrap_or_else(|_| EnvFilter::new("INFO"))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().flatten_event(true).init(),
    }
}

fn tracing_level(level: &str) -> &str {
    match level {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    }
}

/// Log the outcome of one translated stream.
pub fn log_stream_complete(
    request_id: uuid::Uuid,
    model: &str,
    state: &StreamState,
    duration: Duration,
) {
    let usage = state.usage().unwrap_or_default();
    info!(
        request_id = %request_id,
        model = model,
        records = state.emitted_records(),
        text_chars = state.accumulated_text().chars().count(),
        suppressed_reasoning = state.suppressed_reasoning(),
        terminated = state.is_terminated(),
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        duration_seconds = duration.as_secs_f64(),
        "completion stream finished"
    );
}
