mod request_id;

use crate::config::AppConfig;
use crate::error::BridgeError;
use crate::transport::{HttpTransport, PreparedUpstream, UpstreamClient};

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub upstream: PreparedUpstream,
    request_ids: RequestIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: HttpTransport, upstream: PreparedUpstream) -> Self {
        Self {
            config,
            transport,
            upstream,
            request_ids: RequestIdGenerator::new(),
        }
    }

    /// Build the transport and prepared upstream straight from config.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] when the upstream settings cannot be
    /// turned into a client.
    pub fn from_config(config: AppConfig) -> Result<Self, BridgeError> {
        let upstream = PreparedUpstream::new(&config.upstream)?;
        let transport = HttpTransport::new(&config.server, upstream.proxy())?;
        Ok(Self::new(config, transport, upstream))
    }

    #[must_use]
    pub fn upstream_client(&self) -> UpstreamClient<'_> {
        UpstreamClient::new(&self.transport, &self.upstream)
    }

    pub fn next_request_seq(&self) -> u64 {
        self.request_ids.next_seq()
    }

    #[must_use]
    pub fn request_uuid(&self, request_seq: u64) -> uuid::Uuid {
        self.request_ids.request_uuid(request_seq)
    }
}
