mod http_transport;
mod prepared_upstream;
mod upstream;

pub use http_transport::HttpTransport;
pub use prepared_upstream::PreparedUpstream;
pub use upstream::{UpstreamClient, UpstreamStream};
