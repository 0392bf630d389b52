//! Configuration types for the documentation proxy.
//!
//! The proxy itself only consumes an already-resolved [`ProxyConfig`]. Loading
//! from YAML exists for the standalone binary.

mod protocol;
mod target;
mod upstream;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use protocol::Protocol;
pub use target::UpstreamTarget;
pub use upstream::ConnectionPoolConfig;

/// Port the embedded view connects to unless told otherwise.
pub const DEFAULT_LISTEN_PORT: u16 = 12785;

/// Public documentation site.
pub const DEFAULT_TARGET_URL: &str = "https://devdocs.io/";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Absolute URL of the upstream site (scheme + host + optional path).
    #[serde(default = "default_target_url")]
    pub target_url: String,

    /// Loopback port to accept connections on. `0` picks an ephemeral port.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Ask the upstream for its mobile layout.
    #[serde(default)]
    pub mobile_mode: bool,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
}

impl ProxyConfig {
    pub fn new(target_url: impl Into<String>, listen_port: u16, mobile_mode: bool) -> Self {
        Self {
            target_url: target_url.into(),
            listen_port,
            mobile_mode,
            connection_pool: ConnectionPoolConfig::default(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: ProxyConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.target()?;

        if self.connection_pool.response_timeout_secs == 0 {
            anyhow::bail!("connection_pool.response_timeout_secs must be greater than 0");
        }

        Ok(())
    }

    /// Parsed form of `target_url`.
    pub fn target(&self) -> Result<UpstreamTarget, crate::ProxyError> {
        UpstreamTarget::parse(&self.target_url)
    }

    /// Only the loopback interface is served.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.listen_port))
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_URL, DEFAULT_LISTEN_PORT, false)
    }
}

fn default_target_url() -> String {
    DEFAULT_TARGET_URL.to_string()
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}
