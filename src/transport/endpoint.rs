//! Detection service endpoint resolution.
//!
//! The service listens on `ws(s)://<host>:<port>/ws`. `wss` is chosen when
//! the client is configured for TLS (or the protocol is given explicitly);
//! the status API lives on the same host and port over `http(s)`.

use anyhow::{anyhow, Context, Result};
use std::fmt;

pub const DEFAULT_PATH: &str = "/ws";

/// Where the duplex link connects to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsEndpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub secure: bool,
}

impl WsEndpoint {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>, secure: bool) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        Self {
            host: host.into(),
            port,
            path,
            secure,
        }
    }

    /// Parse `ws://host:port/path`, `wss://[::1]:8000/ws` or bare `host:port`.
    ///
    /// A bare address gets the default `/ws` path and the `secure` flag
    /// passed in; an explicit scheme overrides it.
    pub fn parse(addr: &str, secure: bool) -> Result<Self> {
        let mut secure = secure;
        let mut remainder = addr.trim();

        if let Some((scheme, rest)) = remainder.split_once("://") {
            secure = scheme_is_secure(scheme)?;
            remainder = rest;
        }

        let (authority, path) = match remainder.find('/') {
            Some(idx) => remainder.split_at(idx),
            None => (remainder, DEFAULT_PATH),
        };
        let (host, port) = split_host_port(authority)?;
        if host.is_empty() {
            return Err(anyhow!("missing host in service address {}", addr));
        }
        Ok(Self::new(host, port, path, secure))
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// Full WebSocket URL.
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme(),
            self.url_host(),
            self.port,
            self.path
        )
    }

    /// Base URL of the HTTP API served alongside the socket.
    pub fn api_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.url_host(), self.port)
    }

    fn url_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for WsEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Map a configured protocol name to the TLS flag.
pub fn scheme_is_secure(scheme: &str) -> Result<bool> {
    match scheme.trim().to_lowercase().as_str() {
        "ws" => Ok(false),
        "wss" => Ok(true),
        other => Err(anyhow!(
            "unsupported service protocol '{}': expected 'ws' or 'wss'",
            other
        )),
    }
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    // IPv6 in brackets: [::1]:8000
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid service address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing service port in {}", addr))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid service port in {}", addr))?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing service port in {}", addr))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid service port in {}", addr))?;
    Ok((host.to_string(), port))
}
