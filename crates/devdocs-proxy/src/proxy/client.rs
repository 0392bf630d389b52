//! HTTP client creation and configuration.
//!
//! One pooled client is built per `start` and shared by every connection the
//! listener accepts.

use super::tls::insecure_client_config;
use crate::config::{ConnectionPoolConfig, UpstreamTarget};
use crate::error::ProxyError;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::{info, warn};

/// Type alias for the HTTP client used by the proxy.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, BoxBody<Bytes, hyper::Error>>;

/// Create the shared upstream client with connection pooling.
///
/// HTTPS targets are reached without certificate validation.
pub fn create_http_client(
    target: &UpstreamTarget,
    pool: &ConnectionPoolConfig,
) -> Result<HttpClient, ProxyError> {
    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_timeout_secs)));
    http_connector.set_connect_timeout(Some(Duration::from_secs(pool.connect_timeout_secs)));
    http_connector.enforce_http(false); // Allow both HTTP and HTTPS

    if target.is_secure() {
        warn!(
            "TLS certificate verification DISABLED for upstream {} (treated as a trusted mirror)",
            target
        );
    }

    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(insecure_client_config()?)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    let http_client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .build(https_connector);

    info!(
        "Connection pool configured (HTTP/1.1): max_idle={}, idle_timeout={}s, keepalive={}s",
        pool.max_idle_per_host, pool.idle_timeout_secs, pool.keepalive_timeout_secs
    );

    Ok(http_client)
}
