//! Validated upstream target.

use super::protocol::Protocol;
use crate::error::ProxyError;
use hyper::header::HeaderValue;
use hyper::http::uri::{Authority, PathAndQuery};
use hyper::Uri;

/// The single upstream every request is forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    protocol: Protocol,
    authority: Authority,
    /// Target path without its trailing slash; empty for the site root.
    base_path: String,
}

impl UpstreamTarget {
    /// Parse an absolute `http`/`https` URL.
    pub fn parse(url: &str) -> Result<Self, ProxyError> {
        let uri: Uri = url
            .trim()
            .parse()
            .map_err(|_| ProxyError::InvalidTarget(url.to_string()))?;

        let scheme = uri
            .scheme_str()
            .ok_or_else(|| ProxyError::InvalidTarget(url.to_string()))?;
        let protocol = Protocol::from_scheme(scheme)?;

        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| ProxyError::InvalidTarget(url.to_string()))?;
        if authority.host().is_empty() {
            return Err(ProxyError::InvalidTarget(url.to_string()));
        }

        Ok(Self {
            protocol,
            authority,
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    pub fn is_secure(&self) -> bool {
        self.protocol.is_secure()
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// `Host` header value for the target (`host[:port]`, no userinfo).
    pub fn host_header(&self) -> Option<HeaderValue> {
        let host = match self.authority.port_u16() {
            Some(port) => format!("{}:{}", self.authority.host(), port),
            None => self.authority.host().to_string(),
        };
        HeaderValue::from_str(&host).ok()
    }

    /// Join an inbound request's path and query onto the target.
    pub fn upstream_uri(
        &self,
        path_and_query: Option<&PathAndQuery>,
    ) -> Result<Uri, hyper::http::Error> {
        let request_path = path_and_query.map(|pq| pq.as_str()).unwrap_or("/");
        let joined = format!("{}{}", self.base_path, request_path);

        Uri::builder()
            .scheme(self.protocol.as_str())
            .authority(self.authority.clone())
            .path_and_query(joined)
            .build()
    }
}

impl std::fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}://{}{}/",
            self.protocol.as_str(),
            self.authority,
            self.base_path
        )
    }
}
