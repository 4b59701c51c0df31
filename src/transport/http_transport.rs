use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::BridgeError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, BridgeError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| BridgeError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| BridgeError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client used for every upstream call.
///
/// Requests are sent once. A failed call surfaces to the caller as-is.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the transport from the server pool settings and an optional
    /// explicit proxy.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] when the proxy URL is invalid or the
    /// client cannot be constructed.
    pub fn new(config: &ServerConfig, proxy_url: Option<&str>) -> Result<Self, BridgeError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let proxy_url = proxy_url.map(str::trim).filter(|proxy| !proxy.is_empty());

        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(config.timeout),
            config.http_use_env_proxy,
            proxy_url,
        )?;
        Ok(Self { client })
    }

    /// POST `body` and hand back the response with its body unread.
    ///
    /// Non-2xx statuses are returned as `Ok`; the caller decides what to do
    /// with them.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] when the request cannot be sent or
    /// no response head arrives.
    pub async fn send_stream(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, BridgeError> {
        let mut request = reqwest::Request::new(http::Method::POST, url.clone());
        *request.headers_mut() = headers.clone();
        *request.body_mut() = Some(reqwest::Body::from(body));

        self.client
            .execute(request)
            .await
            .map_err(|err| BridgeError::Transport(err.to_string()))
    }
}
