//! Legacy text-completion wire types served to callers.

use serde::{Deserialize, Serialize};

use super::chat::ChatStreamChunk;

/// Inbound `/v1/completions` request body.
///
/// Streaming is implied; a `stream` field in the body is accepted and ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub stream: Option<bool>,
}

/// Object tag carried by every outbound chunk.
pub const TEXT_COMPLETION_OBJECT: &str = "text_completion";

/// Outbound streamed completion chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub choices: Vec<TextCompletionChoice>,
    pub model: String,
}

/// The single choice of an outbound chunk. `logprobs` is always `null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextCompletionChoice {
    pub text: String,
    pub index: u32,
    pub logprobs: Option<serde_json::Value>,
    pub finish_reason: Option<String>,
}

impl TextCompletionChunk {
    /// Build the outbound chunk for `upstream`, carrying `text` for its first
    /// choice. `id`, `created` and `model` are copied verbatim.
    #[must_use]
    pub fn from_upstream(upstream: &ChatStreamChunk, text: String) -> Option<Self> {
        let choice = upstream.choices.first()?;
        Some(Self {
            id: upstream.id.clone(),
            object: TEXT_COMPLETION_OBJECT.to_string(),
            created: upstream.created,
            choices: vec![TextCompletionChoice {
                text,
                index: choice.index,
                logprobs: None,
                finish_reason: choice.finish_reason.clone(),
            }],
            model: upstream.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request_minimal() {
        let req: CompletionRequest = serde_json::from_str(r#"{"prompt":"fix this"}"#).unwrap();
        assert_eq!(req.prompt, "fix this");
        assert!(req.model.is_none());
        assert!(req.max_tokens.is_none());
    }

    #[test]
    fn test_text_completion_chunk_serializes_nulls() {
        let upstream: ChatStreamChunk = serde_json::from_str(
            r#"{"id":"x","created":1,"model":"m","choices":[{"index":2,"delta":{"content":"Hel"},"finish_reason":null}]}"#,
        )
        .unwrap();
        let chunk = TextCompletionChunk::from_upstream(&upstream, "Hel".to_string()).unwrap();
        let json = serde_json::to_string(&chunk).unwrap();
        assert_eq!(
            json,
            r#"{"id":"x","object":"text_completion","created":1,"choices":[{"text":"Hel","index":2,"logprobs":null,"finish_reason":null}],"model":"m"}"#
        );
    }

    #[test]
    fn test_from_upstream_requires_a_choice() {
        let upstream: ChatStreamChunk =
            serde_json::from_str(r#"{"id":"x","created":1,"model":"m","choices":[]}"#).unwrap();
        assert!(TextCompletionChunk::from_upstream(&upstream, String::new()).is_none());
    }
}
