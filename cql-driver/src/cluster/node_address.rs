use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Result;
use crate::resolver::Resolver;

/// Representation of a contact point. Can be a direct socket address or a hostname. In the
/// latter case, the host can be resolved to multiple addresses, which results in multiple
/// hosts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeAddress {
    Direct(SocketAddr),
    Hostname(String),
}

impl NodeAddress {
    /// Resolves to socket addresses, using `port` for hostnames.
    pub async fn resolve(&self, port: u16, timeout: Duration) -> Result<Vec<SocketAddr>> {
        match self {
            NodeAddress::Direct(addr) => Ok(vec![*addr]),
            NodeAddress::Hostname(hostname) => {
                Resolver::new(hostname.as_str(), port)
                    .resolve_async(timeout)
                    .await
            }
        }
    }
}

impl From<SocketAddr> for NodeAddress {
    fn from(addr: SocketAddr) -> Self {
        NodeAddress::Direct(addr)
    }
}

impl From<String> for NodeAddress {
    fn from(value: String) -> Self {
        // "ip:port" is taken as is, anything else is resolved with the configured port
        value
            .parse::<SocketAddr>()
            .map(NodeAddress::Direct)
            .unwrap_or(NodeAddress::Hostname(value))
    }
}

impl From<&str> for NodeAddress {
    fn from(value: &str) -> Self {
        NodeAddress::from(value.to_string())
    }
}
