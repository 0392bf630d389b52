//! Proxy server module.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer lifecycle and accept loop
//! - `forwarding` - Request forwarding to the upstream
//! - `response` - Response header reconciliation, JS decoding, cookie correction
//! - `client` - HTTP client creation and configuration
//! - `tls` - Upstream TLS configuration
//! - `network` - Listener creation
//! - `headers` - Static header values

mod client;
mod forwarding;
mod headers;
mod network;
mod response;
mod server;
mod tls;

pub use forwarding::{error_response, RequestForwarder};
pub use headers::OVERRIDE_MOBILE_DETECT;
pub use response::{ProxyBody, ResponseContext, ResponseProcessor};
pub use server::ProxyServer;
