//! End-to-end tests: a real proxy in front of an in-process upstream.

use async_compression::tokio::write::GzipEncoder;
use devdocs_proxy::{ProxyError, ProxyServer};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};

const SCRIPT: &str = "window.app = { docs: ['rust', 'tokio', 'hyper'] };\n";
const PAGE: &str = "<!DOCTYPE html><html><body>DevDocs</body></html>";

type UpstreamBody = UnsyncBoxBody<Bytes, Infallible>;

struct Upstream {
    addr: SocketAddr,
    stream_cancelled: Arc<Notify>,
}

impl Upstream {
    fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

fn full(data: impl Into<Bytes>) -> UpstreamBody {
    Full::new(data.into()).boxed_unsync()
}

async fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(data).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

async fn handle_upstream(
    req: Request<Incoming>,
    stream_cancelled: Arc<Notify>,
) -> Result<Response<UpstreamBody>, Infallible> {
    let path = req.uri().path().to_string();
    let response = match path.as_str() {
        "/page" => Response::builder()
            .header("content-type", "text/html; charset=utf-8")
            .header("set-cookie", "session=abc")
            .body(full(PAGE)),
        "/app.js" => Response::builder()
            .header("content-type", "application/javascript")
            .header("content-encoding", "gzip")
            .body(full(gzip(SCRIPT.repeat(200).as_bytes()).await)),
        "/raw" => Response::builder()
            .header("content-encoding", "gzip")
            .body(full(gzip(b"opaque payload").await)),
        "/chunked" => {
            let chunks = futures::stream::iter(
                ["one ", "two ", "three"].map(|c| Ok::<_, Infallible>(Frame::data(Bytes::from(c)))),
            );
            Response::builder()
                .header("content-type", "text/plain")
                .body(StreamBody::new(chunks).boxed_unsync())
        }
        "/stream" => {
            let (tx, rx) = mpsc::channel::<Bytes>(1);
            tokio::spawn(async move {
                loop {
                    if tx.send(Bytes::from(vec![b'x'; 16 * 1024])).await.is_err() {
                        stream_cancelled.notify_one();
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            });
            let chunks = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv()
                    .await
                    .map(|chunk| (Ok::<_, Infallible>(Frame::data(chunk)), rx))
            });
            Response::builder()
                .header("content-type", "application/octet-stream")
                .body(StreamBody::new(chunks).boxed_unsync())
        }
        _ => {
            let (parts, body) = req.into_parts();
            let body = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
            let header = |name: &str| {
                parts
                    .headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string()
            };
            let echo = format!(
                "{} {}\nhost: {}\ncookie: {}\nx-test: {}\nbody: {}",
                parts.method,
                parts.uri,
                header("host"),
                header("cookie"),
                header("x-test"),
                String::from_utf8_lossy(&body)
            );
            Response::builder()
                .header("content-type", "text/plain")
                .body(full(echo))
        }
    };
    Ok(response.unwrap())
}

async fn spawn_upstream() -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stream_cancelled = Arc::new(Notify::new());
    let notify = Arc::clone(&stream_cancelled);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let notify = Arc::clone(&notify);
            tokio::spawn(async move {
                let service = service_fn(move |req| handle_upstream(req, Arc::clone(&notify)));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    Upstream {
        addr,
        stream_cancelled,
    }
}

async fn start_proxy(upstream: &Upstream, mobile: bool) -> (ProxyServer, SocketAddr) {
    let proxy = ProxyServer::new();
    let addr = proxy.activate(&upstream.url(), 0, mobile).await.unwrap();
    (proxy, addr)
}

fn set_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_forwards_method_path_query_and_body() {
    let upstream = spawn_upstream().await;
    let (proxy, addr) = start_proxy(&upstream, false).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/echo/path?q=tokio&lang=rust"))
        .header("x-test", "forwarded")
        .body("hello upstream")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();

    assert!(body.starts_with("POST /echo/path?q=tokio&lang=rust\n"), "{body}");
    assert!(body.contains(&format!("host: {addr}")), "{body}");
    assert!(body.contains("x-test: forwarded"), "{body}");
    assert!(body.contains("body: hello upstream"), "{body}");

    proxy.deactivate().await;
}

#[tokio::test]
async fn test_html_cookie_injection() {
    let upstream = spawn_upstream().await;
    let (proxy, addr) = start_proxy(&upstream, true).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/page");

    // No cookie yet.
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(
        set_cookies(&response),
        vec!["session=abc", "override-mobile-detect=1"]
    );
    assert_eq!(response.text().await.unwrap(), PAGE);

    // Wrong value.
    let response = client
        .get(&url)
        .header("cookie", "theme=dark; override-mobile-detect=0")
        .send()
        .await
        .unwrap();
    assert_eq!(
        set_cookies(&response),
        vec!["session=abc", "override-mobile-detect=1"]
    );

    // Already correct.
    let response = client
        .get(&url)
        .header("cookie", "override-mobile-detect=1; theme=dark")
        .send()
        .await
        .unwrap();
    assert_eq!(set_cookies(&response), vec!["session=abc"]);

    proxy.deactivate().await;
}

#[tokio::test]
async fn test_mobile_mode_follows_reactivation() {
    let upstream = spawn_upstream().await;
    let (proxy, addr) = start_proxy(&upstream, true).await;

    let addr = proxy
        .activate(&upstream.url(), addr.port(), false)
        .await
        .unwrap();
    let response = reqwest::get(format!("http://{addr}/page")).await.unwrap();
    assert!(set_cookies(&response).contains(&"override-mobile-detect=0".to_string()));

    proxy.deactivate().await;
}

#[tokio::test]
async fn test_request_cookies_reach_upstream() {
    let upstream = spawn_upstream().await;
    let (proxy, addr) = start_proxy(&upstream, false).await;

    let body = reqwest::Client::new()
        .get(format!("http://{addr}/echo"))
        .header("cookie", "a=1; override-mobile-detect=0")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("cookie: a=1; override-mobile-detect=0"), "{body}");

    proxy.deactivate().await;
}

#[tokio::test]
async fn test_javascript_is_decoded() {
    let upstream = spawn_upstream().await;
    let (proxy, addr) = start_proxy(&upstream, false).await;

    let response = reqwest::get(format!("http://{addr}/app.js")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-encoding"], "identity");
    assert_eq!(
        response.headers()["content-type"],
        "application/javascript"
    );
    assert!(response.headers().get("set-cookie").is_none());
    assert_eq!(response.text().await.unwrap(), SCRIPT.repeat(200));

    proxy.deactivate().await;
}

#[tokio::test]
async fn test_missing_content_type_is_byte_identical() {
    let upstream = spawn_upstream().await;
    let (proxy, addr) = start_proxy(&upstream, true).await;

    let response = reqwest::get(format!("http://{addr}/raw")).await.unwrap();
    assert_eq!(response.headers()["content-encoding"], "gzip");
    assert!(response.headers().get("set-cookie").is_none());
    let body = response.bytes().await.unwrap();
    assert_eq!(body.to_vec(), gzip(b"opaque payload").await);

    proxy.deactivate().await;
}

#[tokio::test]
async fn test_http10_client_gets_no_chunked_framing() {
    let upstream = spawn_upstream().await;
    let (proxy, addr) = start_proxy(&upstream, false).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /chunked HTTP/1.0\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let raw = String::from_utf8_lossy(&raw).to_lowercase();

    assert!(raw.starts_with("http/1.0 200") || raw.starts_with("http/1.1 200"), "{raw}");
    assert!(!raw.contains("transfer-encoding"), "{raw}");
    assert!(raw.contains("connection: close"), "{raw}");
    assert!(raw.ends_with("one two three"), "{raw}");

    proxy.deactivate().await;
}

#[tokio::test]
async fn test_http10_keep_alive_with_decoded_body_closes() {
    let upstream = spawn_upstream().await;
    let (proxy, addr) = start_proxy(&upstream, false).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /app.js HTTP/1.0\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .expect("connection left open without a body length")
        .unwrap();
    let raw = String::from_utf8_lossy(&raw);
    let lower = raw.to_lowercase();

    assert!(lower.contains("content-encoding: identity"), "{raw}");
    assert!(!lower.contains("content-length"), "{raw}");
    assert!(!lower.contains("transfer-encoding"), "{raw}");
    assert!(raw.ends_with(&SCRIPT.repeat(200)), "{raw}");

    proxy.deactivate().await;
}

#[tokio::test]
async fn test_http11_response_defaults_to_keep_alive() {
    let upstream = spawn_upstream().await;
    let (proxy, addr) = start_proxy(&upstream, false).await;

    let response = reqwest::get(format!("http://{addr}/echo")).await.unwrap();
    assert_eq!(response.headers()["connection"], "keep-alive");

    proxy.deactivate().await;
}

#[tokio::test]
async fn test_http2_prior_knowledge() {
    let upstream = spawn_upstream().await;
    let (proxy, addr) = start_proxy(&upstream, false).await;

    let client = reqwest::Client::builder()
        .http2_prior_knowledge()
        .build()
        .unwrap();
    let response = client
        .get(format!("http://{addr}/page"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.version(), reqwest::Version::HTTP_2);
    assert!(set_cookies(&response).contains(&"override-mobile-detect=0".to_string()));
    assert_eq!(response.text().await.unwrap(), PAGE);

    proxy.deactivate().await;
}

#[tokio::test]
async fn test_unreachable_upstream_fails_one_request() {
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let proxy = ProxyServer::new();
    let addr = proxy
        .activate(&format!("http://{dead}/"), 0, false)
        .await
        .unwrap();

    for _ in 0..2 {
        let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert_eq!(response.status(), 502);
    }
    assert!(proxy.is_running().await);

    proxy.deactivate().await;
}

#[tokio::test]
async fn test_restart_on_same_port() {
    let upstream = spawn_upstream().await;
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let (proxy, addr) = start_proxy(&upstream, false).await;

    // Second activation on the same port succeeds because the first is torn down.
    let restarted = proxy
        .activate(&format!("http://{dead}/"), addr.port(), false)
        .await
        .unwrap();
    assert_eq!(restarted, addr);
    assert!(TcpListener::bind(addr).await.is_err());

    // Only the new target is served.
    let response = reqwest::get(format!("http://{addr}/echo")).await.unwrap();
    assert_eq!(response.status(), 502);
    assert_eq!(
        proxy.config().await.unwrap().target_url,
        format!("http://{dead}/")
    );

    proxy
        .activate(&upstream.url(), addr.port(), false)
        .await
        .unwrap();
    let response = reqwest::get(format!("http://{addr}/echo")).await.unwrap();
    assert_eq!(response.status(), 200);

    proxy.deactivate().await;
    assert!(!proxy.is_running().await);
    assert!(TcpStream::connect(addr).await.is_err());
    assert!(TcpListener::bind(addr).await.is_ok());

    // Deactivating twice is harmless.
    proxy.deactivate().await;
}

#[tokio::test]
async fn test_occupied_port_is_a_bind_error() {
    let upstream = spawn_upstream().await;
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let proxy = ProxyServer::new();
    let err = proxy.activate(&upstream.url(), port, false).await.unwrap_err();
    assert!(matches!(err, ProxyError::Bind { .. }), "{err}");
    assert!(!proxy.is_running().await);
}

#[tokio::test]
async fn test_client_disconnect_cancels_upstream_body() {
    let upstream = spawn_upstream().await;
    let (proxy, addr) = start_proxy(&upstream, false).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await.unwrap();
    assert!(n > 0);
    drop(stream);

    tokio::time::timeout(Duration::from_secs(10), upstream.stream_cancelled.notified())
        .await
        .expect("upstream body was not cancelled");

    proxy.deactivate().await;
}
