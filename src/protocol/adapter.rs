//! Inbound completion request → upstream chat request.

use crate::config::AppConfig;
use crate::error::BridgeError;

use super::chat::{ChatCompletionRequest, ChatMessage, ThinkingConfig};
use super::completion::CompletionRequest;

/// System instruction sent ahead of every prompt.
pub const SYSTEM_INSTRUCTION: &str = "
You are an AI programming assistant. Your duty is to help users to modify their code.
The edit area (code need your modification) is surrounded by label <|CODE_START|><|CODE_END|>.
The request from user is surrounded by label <|REQ_START|><|REQ_END|>.
The code language is surrounded by label <|LANG_START|><|LANG_END|>.
Context is also provided.
Content before the edit area is surrounded by label <|PREFIX_BEGIN|><|PREFIX_END|>
Content after the edit area is surrounded by label <|SUFFIX_BEGIN|><|SUFFIX_END|>
Please modify the content of edit area and return the modified code directly without any extra label.
";

/// Parse the inbound request body.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidRequest`] when the body is not a valid
/// completion request.
pub fn parse_completion_request(body: &[u8]) -> Result<CompletionRequest, BridgeError> {
    serde_json::from_slice(body)
        .map_err(|e| BridgeError::InvalidRequest(format!("Invalid completion request body: {e}")))
}

/// Map a completion request onto the upstream chat request.
///
/// Streaming is forced on; sampling parameters are forwarded only when the
/// caller supplied them.
#[must_use]
pub fn build_chat_request(request: &CompletionRequest, config: &AppConfig) -> ChatCompletionRequest {
    let model = request
        .model
        .as_deref()
        .filter(|model| !model.is_empty())
        .unwrap_or(config.upstream.default_model.as_str())
        .to_string();

    ChatCompletionRequest {
        model,
        messages: vec![
            ChatMessage::system(SYSTEM_INSTRUCTION),
            ChatMessage::user(request.prompt.as_str()),
        ],
        stream: true,
        max_tokens: request
            .max_tokens
            .unwrap_or(config.features.default_max_tokens),
        thinking: ThinkingConfig::auto(),
        top_p: request.top_p,
        presence_penalty: request.presence_penalty,
        frequency_penalty: request.frequency_penalty,
    }
}

/// Serialize the upstream request body.
///
/// # Errors
///
/// Returns [`BridgeError::Internal`] if serialization fails.
pub fn encode_chat_request(request: &ChatCompletionRequest) -> Result<bytes::Bytes, BridgeError> {
    serde_json::to_vec(request)
        .map(bytes::Bytes::from)
        .map_err(|e| BridgeError::Internal(format!("Failed to encode upstream request: {e}")))
}
