use crate::config::UpstreamConfig;
use crate::error::BridgeError;

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

/// Upstream endpoint and headers resolved once at startup.
#[derive(Debug, Clone)]
pub struct PreparedUpstream {
    chat_url: url::Url,
    static_headers: http::HeaderMap,
    proxy: Option<String>,
}

impl PreparedUpstream {
    /// Resolve the chat endpoint and build the static request headers.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the base URL does not parse or the
    /// API key is not a valid header value.
    pub fn new(upstream: &UpstreamConfig) -> Result<Self, BridgeError> {
        let base = upstream.base_url.trim_end_matches('/');
        let chat_url = url::Url::parse(&format!("{base}/{CHAT_COMPLETIONS_PATH}"))
            .map_err(|e| BridgeError::Config(format!("Invalid upstream base_url '{base}': {e}")))?;

        Ok(Self {
            chat_url,
            static_headers: build_upstream_headers(&upstream.api_key)?,
            proxy: normalize_proxy(upstream.proxy.as_deref()),
        })
    }

    #[must_use]
    pub fn chat_url(&self) -> &url::Url {
        &self.chat_url
    }

    #[must_use]
    pub fn static_headers(&self) -> &http::HeaderMap {
        &self.static_headers
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }
}

fn build_upstream_headers(api_key: &str) -> Result<http::HeaderMap, BridgeError> {
    let mut headers = http::HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    headers.insert(
        http::header::ACCEPT,
        http::HeaderValue::from_static("text/event-stream"),
    );
    let mut auth = http::HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
        .map_err(|_| BridgeError::Config("upstream.api_key is not a valid header value".into()))?;
    auth.set_sensitive(true);
    headers.insert(http::header::AUTHORIZATION, auth);
    Ok(headers)
}

fn normalize_proxy(proxy: Option<&str>) -> Option<String> {
    proxy.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
