//! Chat-delta events → legacy `text_completion` records.

use crate::error::{error_payload_json, BridgeError};
use crate::protocol::chat::{ChatStreamChunk, ChatUsage};
use crate::protocol::completion::TextCompletionChunk;

use super::sse::{SseRecord, DATA_PREFIX, DONE_MARKER, RECORD_SEPARATOR};

/// Per-request translation state. Owned by exactly one response stream.
#[derive(Debug, Default)]
pub struct StreamState {
    first_emitted: bool,
    terminated: bool,
    accumulated_text: String,
    usage: Option<ChatUsage>,
    emitted_records: usize,
    suppressed_reasoning: usize,
}

impl StreamState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any record has been written yet.
    #[must_use]
    pub fn first_emitted(&self) -> bool {
        self.first_emitted
    }

    /// Whether the terminal record (or a final error record) has been written.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Visible text forwarded so far.
    #[must_use]
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    /// Last usage block seen upstream. Captured only; never forwarded.
    #[must_use]
    pub fn usage(&self) -> Option<ChatUsage> {
        self.usage
    }

    #[must_use]
    pub fn emitted_records(&self) -> usize {
        self.emitted_records
    }

    #[must_use]
    pub fn suppressed_reasoning(&self) -> usize {
        self.suppressed_reasoning
    }

    fn begin_record(&mut self, out: &mut Vec<u8>) {
        if self.first_emitted {
            out.extend_from_slice(RECORD_SEPARATOR);
        } else {
            self.first_emitted = true;
        }
        self.emitted_records += 1;
        out.extend_from_slice(DATA_PREFIX.as_bytes());
    }
}

/// What a single upstream record turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Skipped,
    Emitted,
    Terminal,
}

/// Map one upstream event to at most one outbound chunk.
///
/// Usage-only events and pure reasoning deltas produce nothing.
pub fn translate_event(
    chunk: &ChatStreamChunk,
    state: &mut StreamState,
) -> Option<TextCompletionChunk> {
    if let Some(usage) = chunk.usage {
        state.usage = Some(usage);
    }
    let choice = chunk.choices.first()?;

    let text = choice.delta.content.as_deref().unwrap_or_default();
    let reasoning = choice.delta.reasoning_content.as_deref().unwrap_or_default();
    if text.is_empty() && !reasoning.is_empty() {
        state.suppressed_reasoning += 1;
        return None;
    }

    state.accumulated_text.push_str(text);
    TextCompletionChunk::from_upstream(chunk, text.to_owned())
}

/// Translate one decoded record and append its framed bytes to `out`.
///
/// Records arriving after the terminal record are dropped.
///
/// # Errors
///
/// Returns [`BridgeError::Internal`] if the outbound chunk cannot be serialized.
pub fn translate_record_into(
    record: SseRecord,
    state: &mut StreamState,
    out: &mut Vec<u8>,
) -> Result<RecordOutcome, BridgeError> {
    if state.terminated {
        return Ok(RecordOutcome::Skipped);
    }
    match record {
        SseRecord::Terminal => {
            state.begin_record(out);
            out.extend_from_slice(DONE_MARKER.as_bytes());
            state.terminated = true;
            Ok(RecordOutcome::Terminal)
        }
        SseRecord::Event(chunk) => {
            let Some(outbound) = translate_event(&chunk, state) else {
                return Ok(RecordOutcome::Skipped);
            };
            let json = serde_json::to_vec(&outbound).map_err(|e| {
                BridgeError::Internal(format!("Failed to encode completion chunk: {e}"))
            })?;
            state.begin_record(out);
            out.extend_from_slice(&json);
            Ok(RecordOutcome::Emitted)
        }
    }
}

/// Append a final `{"error": ...}` record and close the state to further records.
pub fn push_error_record(message: &str, state: &mut StreamState, out: &mut Vec<u8>) {
    if state.terminated {
        return;
    }
    state.begin_record(out);
    out.extend_from_slice(error_payload_json(message).as_bytes());
    state.terminated = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::sse::parse_record;

    fn event(json: &str) -> SseRecord {
        parse_record(format!("data: {json}").as_bytes())
            .unwrap()
            .unwrap()
    }

    fn translate_all(records: Vec<SseRecord>) -> (String, StreamState) {
        let mut state = StreamState::new();
        let mut out = Vec::new();
        for record in records {
            translate_record_into(record, &mut state, &mut out).unwrap();
        }
        (String::from_utf8(out).unwrap(), state)
    }

    fn split_records(output: &str) -> Vec<&str> {
        output.split("\n\n").collect()
    }

    const HEL: &str = r#"{"choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}],"id":"x","created":1,"model":"m"}"#;
    const LO: &str = r#"{"choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":"stop"}],"id":"x","created":1,"model":"m"}"#;
    const THINKING: &str = r#"{"choices":[{"index":0,"delta":{"reasoning_content":"thinking..."},"finish_reason":null}],"id":"x","created":1,"model":"m"}"#;
    const USAGE: &str = r#"{"choices":[],"id":"x","created":1,"model":"m","usage":{"prompt_tokens":4,"completion_tokens":2,"total_tokens":6}}"#;

    #[test]
    fn test_hello_example_produces_three_records() {
        let (output, state) = translate_all(vec![event(HEL), event(LO), SseRecord::Terminal]);
        let records = split_records(&output);
        assert_eq!(records.len(), 3);

        let first: serde_json::Value =
            serde_json::from_str(records[0].strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(first["object"], "text_completion");
        assert_eq!(first["choices"][0]["text"], "Hel");
        assert!(first["choices"][0]["finish_reason"].is_null());
        assert!(first["choices"][0]["logprobs"].is_null());

        let second: serde_json::Value =
            serde_json::from_str(records[1].strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(second["choices"][0]["text"], "lo");
        assert_eq!(second["choices"][0]["finish_reason"], "stop");
        assert_eq!(second["id"], "x");
        assert_eq!(second["created"], 1);
        assert_eq!(second["model"], "m");

        assert_eq!(records[2], "data: [DONE]");
        assert_eq!(state.accumulated_text(), "Hello");
        assert_eq!(state.emitted_records(), 3);
    }

    #[test]
    fn test_no_leading_or_trailing_separator() {
        let (output, _) = translate_all(vec![event(HEL), SseRecord::Terminal]);
        assert!(output.starts_with("data: {"));
        assert!(output.ends_with("data: [DONE]"));
        assert!(!output.ends_with("\n\n"));
    }

    #[test]
    fn test_reasoning_only_delta_is_suppressed() {
        let (output, state) = translate_all(vec![event(THINKING)]);
        assert!(output.is_empty());
        assert!(!state.first_emitted());
        assert_eq!(state.suppressed_reasoning(), 1);
    }

    #[test]
    fn test_reasoning_with_visible_content_is_emitted() {
        let mixed = r#"{"choices":[{"index":0,"delta":{"content":"a","reasoning_content":"b"}}],"id":"x","created":1,"model":"m"}"#;
        let (output, _) = translate_all(vec![event(mixed)]);
        assert_eq!(split_records(&output).len(), 1);
        assert!(output.contains("\"text\":\"a\""));
        assert!(!output.contains("\"b\""));
    }

    #[test]
    fn test_empty_delta_is_forwarded_with_finish_reason() {
        let closing = r#"{"choices":[{"index":0,"delta":{},"finish_reason":"length"}],"id":"x","created":1,"model":"m"}"#;
        let (output, _) = translate_all(vec![event(closing)]);
        let value: serde_json::Value =
            serde_json::from_str(output.strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(value["choices"][0]["text"], "");
        assert_eq!(value["choices"][0]["finish_reason"], "length");
    }

    #[test]
    fn test_usage_only_event_is_captured_not_emitted() {
        let (output, state) = translate_all(vec![event(HEL), event(USAGE), SseRecord::Terminal]);
        assert_eq!(split_records(&output).len(), 2);
        assert_eq!(state.usage().map(|u| u.total_tokens), Some(6));
        assert!(!output.contains("usage"));
    }

    #[test]
    fn test_terminal_first_has_no_separator() {
        let (output, _) = translate_all(vec![event(THINKING), SseRecord::Terminal]);
        assert_eq!(output, "data: [DONE]");
    }

    #[test]
    fn test_records_after_terminal_are_dropped() {
        let (output, state) = translate_all(vec![
            event(HEL),
            SseRecord::Terminal,
            event(LO),
            SseRecord::Terminal,
        ]);
        assert_eq!(output.matches("[DONE]").count(), 1);
        assert!(output.ends_with("data: [DONE]"));
        assert!(state.is_terminated());
        assert_eq!(state.accumulated_text(), "Hel");
    }

    #[test]
    fn test_choice_index_is_copied() {
        let second_choice = r#"{"choices":[{"index":3,"delta":{"content":"z"}}],"id":"x","created":1,"model":"m"}"#;
        let (output, _) = translate_all(vec![event(second_choice)]);
        let value: serde_json::Value =
            serde_json::from_str(output.strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(value["choices"][0]["index"], 3);
    }

    #[test]
    fn test_error_record_is_framed_and_final() {
        let mut state = StreamState::new();
        let mut out = Vec::new();
        translate_record_into(event(HEL), &mut state, &mut out).unwrap();
        push_error_record("boom", &mut state, &mut out);
        push_error_record("again", &mut state, &mut out);
        let output = String::from_utf8(out).unwrap();
        let records = split_records(&output);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], "data: {\"error\":\"boom\"}");

        let mut out = Vec::new();
        let outcome = translate_record_into(SseRecord::Terminal, &mut state, &mut out).unwrap();
        assert_eq!(outcome, RecordOutcome::Skipped);
        assert!(out.is_empty());
    }
}
