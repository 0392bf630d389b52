use thiserror::Error;

/// Errors surfaced to the host by the proxy lifecycle.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid target URL '{0}'")]
    InvalidTarget(String),
    #[error("Unsupported target scheme '{0}'. Currently supported: http, https")]
    UnsupportedScheme(String),
    #[error("Failed to build upstream TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
}
