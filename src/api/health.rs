use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary. The API key is never included.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "completion-bridge is running",
        "config": {
            "upstream_chat_url": state.upstream.chat_url().as_str(),
            "default_model": config.upstream.default_model,
            "proxy_enabled": state.upstream.proxy().is_some(),
            "features": {
                "log_level": config.features.log_level,
                "log_format": config.features.log_format,
                "default_max_tokens": config.features.default_max_tokens,
            }
        }
    }))
}
