//! Prometheus metrics for devdocs-proxy.
//!
//! Tracks forwarded traffic, upstream failures, and the response rewrites the
//! proxy performs.
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

lazy_static! {
    /// Total number of requests answered by the proxy
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "devdocs_proxy_requests_total",
        "Total number of requests answered by the proxy",
        &["method", "status"]
    )
    .unwrap();

    /// Upstream failures by kind
    pub static ref UPSTREAM_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "devdocs_proxy_upstream_errors_total",
        "Total number of requests that failed before upstream response headers arrived",
        &["kind"]  // kind: connect|timeout|request
    )
    .unwrap();

    /// Time until upstream response headers
    pub static ref UPSTREAM_REQUEST_DURATION_MS: HistogramVec = register_histogram_vec!(
        "devdocs_proxy_upstream_request_duration_ms",
        "Time from forwarding a request until upstream response headers arrive",
        &["method", "status"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// JavaScript bodies decoded before relay
    pub static ref DECODED_RESPONSES_TOTAL: CounterVec = register_counter_vec!(
        "devdocs_proxy_decoded_responses_total",
        "Total number of responses whose body was decoded before relay",
        &["encoding"]
    )
    .unwrap();

    /// Mobile layout cookie corrections
    pub static ref COOKIE_CORRECTIONS_TOTAL: CounterVec = register_counter_vec!(
        "devdocs_proxy_cookie_corrections_total",
        "Total number of HTML responses that received an override-mobile-detect cookie",
        &["value"]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_request(method: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string()])
        .inc();
}

pub fn record_upstream_error(kind: &str) {
    UPSTREAM_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_upstream_duration(method: &str, status: u16, duration_ms: f64) {
    UPSTREAM_REQUEST_DURATION_MS
        .with_label_values(&[method, &status.to_string()])
        .observe(duration_ms);
}

pub fn record_decoded_response(encoding: &str) {
    DECODED_RESPONSES_TOTAL.with_label_values(&[encoding]).inc();
}

pub fn record_cookie_correction(value: &str) {
    COOKIE_CORRECTIONS_TOTAL.with_label_values(&[value]).inc();
}

/// Serve [`collect_metrics`] on every path of `addr` until the task is dropped.
pub async fn serve_metrics(addr: SocketAddr) -> Result<(), anyhow::Error> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics listening on http://{}", listener.local_addr()?);

    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!("Metrics accept error: {}", e);
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(|_req: Request<Incoming>| async {
                let mut response = Response::new(Full::new(Bytes::from(collect_metrics())));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                Ok::<_, Infallible>(response)
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Metrics connection error: {}", e);
            }
        });
    }
}
