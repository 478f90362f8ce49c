//! Runtime configuration for the resolver

use anyhow::Result;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

pub const DNS_PORT: u16 = 53;
pub const DEFAULT_LISTEN: &str = "127.0.0.1:53";
pub const DEFAULT_ROOT: &str = "8.8.8.8:53";
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(1);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2);
pub const RECV_BUFFER: usize = 2048;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Upstream asked for NS records and for every non-address query.
    pub root: SocketAddr,
    /// Port used when querying a discovered name server.
    pub nameserver_port: u16,
    pub upstream_timeout: Duration,
    pub sweep_interval: Duration,
    pub recv_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], DNS_PORT)),
            root: SocketAddr::from(([8, 8, 8, 8], DNS_PORT)),
            nameserver_port: DNS_PORT,
            upstream_timeout: UPSTREAM_TIMEOUT,
            sweep_interval: SWEEP_INTERVAL,
            recv_buffer: RECV_BUFFER,
        }
    }
}

/// Parses `ip:port`, `[v6]:port` or a bare IP (port 53).
pub fn parse_addr(s: &str) -> Result<SocketAddr> {
    let s = s.trim();
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    match s.parse::<IpAddr>() {
        Ok(ip) => Ok(SocketAddr::new(ip, DNS_PORT)),
        Err(_) => anyhow::bail!("invalid address '{}', expected ip or ip:port", s),
    }
}
