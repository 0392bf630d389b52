//! Local reverse proxy that lets a remote documentation site render inside an
//! embedded web view.
//!
//! The proxy listens on `127.0.0.1`, forwards every request to one upstream
//! target, and rewrites responses on the way back:
//!
//! - JavaScript bodies are decoded so the embedding host can inspect them
//! - HTML responses get an `override-mobile-detect` cookie matching the
//!   requested layout
//! - connection headers are reconciled with the client's HTTP version
//!
//! ```no_run
//! # async fn run() -> Result<(), devdocs_proxy::ProxyError> {
//! let proxy = devdocs_proxy::ProxyServer::new();
//! let addr = proxy.activate("https://devdocs.io/", 12785, false).await?;
//! println!("serving on http://{addr}");
//! proxy.deactivate().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod cookie;
pub mod decompress;
pub mod error;
pub mod metrics;
pub mod proxy;

pub use config::{ProxyConfig, DEFAULT_LISTEN_PORT, DEFAULT_TARGET_URL};
pub use cookie::CookieJar;
pub use error::ProxyError;
pub use proxy::ProxyServer;
