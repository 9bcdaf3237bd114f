//! Relay server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default port, matching the usual development setup for signaling clients
pub const DEFAULT_PORT: u16 = 8080;

/// Settings for [`RelayServer`](crate::server::RelayServer)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address to listen on. Port 0 picks an ephemeral port.
    pub bind_addr: SocketAddr,
}

impl RelayConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self { bind_addr }
    }

    /// Build from a host/IP string and a port
    pub fn from_parts(bind: &str, port: u16) -> Result<Self, std::net::AddrParseError> {
        let ip: IpAddr = bind.parse()?;
        Ok(Self::new(SocketAddr::new(ip, port)))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT))
    }
}
