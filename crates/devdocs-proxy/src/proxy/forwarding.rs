//! Request forwarding logic for the proxy server.
//!
//! Inbound requests are relayed to the configured upstream with their method,
//! path, query, headers and streamed body intact. The upstream response is
//! handed to the [`ResponseProcessor`] before it reaches the client.

use super::client::{create_http_client, HttpClient};
use super::response::{ProxyBody, ResponseContext, ResponseProcessor};
use crate::config::{ProxyConfig, UpstreamTarget};
use crate::error::ProxyError;
use crate::metrics;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::{Request, Response, StatusCode, Version};
use std::convert::Infallible;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Helper function to create an error response.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = format!(r#"{{"error": "{message}"}}"#);
    let mut response = Response::new(
        Full::new(Bytes::from(body))
            .map_err(|never: Infallible| match never {})
            .boxed_unsync(),
    );
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Relays requests for one activation of the proxy.
pub struct RequestForwarder {
    client: HttpClient,
    target: UpstreamTarget,
    processor: ResponseProcessor,
    response_timeout: Duration,
}

impl RequestForwarder {
    pub fn new(
        client: HttpClient,
        target: UpstreamTarget,
        processor: ResponseProcessor,
        response_timeout: Duration,
    ) -> Self {
        Self {
            client,
            target,
            processor,
            response_timeout,
        }
    }

    /// Build the upstream client and response processor for `config`.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let target = config.target()?;
        let client = create_http_client(&target, &config.connection_pool)?;
        Ok(Self::new(
            client,
            target,
            ResponseProcessor::new(config.mobile_mode),
            config.connection_pool.response_timeout(),
        ))
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Forward one request and produce the response for the client.
    ///
    /// Never fails: upstream errors become a 502, a response-header timeout
    /// becomes a 504.
    pub async fn forward(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        self.forward_body(req.map(BoxBody::new)).await
    }

    async fn forward_body(&self, req: Request<BoxBody<Bytes, hyper::Error>>) -> Response<ProxyBody> {
        let ctx = ResponseContext::from_request(&req);
        let method = ctx.method.clone();

        let upstream_req = match self.upstream_request(req) {
            Ok(upstream_req) => upstream_req,
            Err(e) => {
                error!("Failed to build upstream request: {}", e);
                metrics::record_upstream_error("request");
                return self.failed(&method, StatusCode::BAD_GATEWAY, "Bad Gateway");
            }
        };

        debug!("Forwarding {} {}", method, upstream_req.uri());
        let start = Instant::now();

        match tokio::time::timeout(self.response_timeout, self.client.request(upstream_req)).await {
            Ok(Ok(upstream_response)) => {
                let status = upstream_response.status();
                metrics::record_upstream_duration(
                    method.as_str(),
                    status.as_u16(),
                    start.elapsed().as_secs_f64() * 1000.0,
                );
                metrics::record_request(method.as_str(), status.as_u16());
                self.processor.process(&ctx, upstream_response)
            }
            Ok(Err(e)) => {
                let kind = if e.is_connect() { "connect" } else { "request" };
                error!("Failed to forward request to {}: {}", self.target, e);
                metrics::record_upstream_error(kind);
                self.failed(&method, StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
            Err(_) => {
                warn!(
                    "Upstream {} did not respond within {:?}",
                    self.target, self.response_timeout
                );
                metrics::record_upstream_error("timeout");
                self.failed(&method, StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout")
            }
        }
    }

    fn failed(&self, method: &hyper::Method, status: StatusCode, message: &str) -> Response<ProxyBody> {
        metrics::record_request(method.as_str(), status.as_u16());
        error_response(status, message)
    }

    /// Rewrite an inbound request into one addressed to the target.
    fn upstream_request<B>(&self, req: Request<B>) -> Result<Request<B>, hyper::http::Error> {
        let (mut parts, body) = req.into_parts();
        parts.uri = self.target.upstream_uri(parts.uri.path_and_query())?;
        parts.version = Version::HTTP_11;

        // TLS upstreams route on Host; plain targets see the client's Host.
        if self.target.is_secure() {
            if let Some(host) = self.target.host_header() {
                parts.headers.insert(HOST, host);
            }
        }

        Ok(Request::from_parts(parts, body))
    }
}
