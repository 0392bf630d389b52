//! Upstream scheme handling.

use crate::error::ProxyError;

/// Scheme of the upstream target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// HTTP protocol
    Http,
    /// HTTPS protocol (HTTP over TLS)
    Https,
}

impl Protocol {
    /// Get protocol name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    /// Parse protocol from URL scheme
    pub fn from_scheme(scheme: &str) -> Result<Self, ProxyError> {
        match scheme.to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(ProxyError::UnsupportedScheme(scheme.to_string())),
        }
    }

    pub fn is_secure(&self) -> bool {
        *self == Protocol::Https
    }
}
