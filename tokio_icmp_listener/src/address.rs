//! Conversions between socket-level addresses and plain `(ip, port)` pairs.
//!
//! Only IPv4 is handled. Anything else is reported as an error instead of
//! being mapped to a zero address.

use crate::error::AddressError;
use socket2::SockAddr;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, ToSocketAddrs};

/// Sender address as reported by the socket layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketAddress {
    V4(SocketAddrV4),
    /// Any other family, identified by its raw `sa_family` value.
    Other { family: u16 },
}

impl SocketAddress {
    pub fn is_ipv4(&self) -> bool {
        matches!(self, Self::V4(_))
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4(addr) => write!(f, "{}", addr),
            Self::Other { family } => write!(f, "<family {}>", family),
        }
    }
}

impl From<SocketAddrV4> for SocketAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::V4(addr)
    }
}

impl From<&SockAddr> for SocketAddress {
    fn from(addr: &SockAddr) -> Self {
        match addr.as_socket_ipv4() {
            Some(addr) => Self::V4(addr),
            None => Self::Other {
                family: addr.family() as u16,
            },
        }
    }
}

pub fn to_address_and_port(addr: &SocketAddress) -> Result<(Ipv4Addr, u16), AddressError> {
    match addr {
        SocketAddress::V4(addr) => Ok((*addr.ip(), addr.port())),
        SocketAddress::Other { family } => Err(AddressError::UnsupportedFamily(*family)),
    }
}

/// Builds an IPv4 socket address. IPv4-mapped IPv6 addresses are accepted,
/// every other IPv6 address is rejected.
pub fn to_socket_address(ip: IpAddr, port: u16) -> Result<SocketAddress, AddressError> {
    let v4 = match ip {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(v6) => v6.to_ipv4_mapped().ok_or(AddressError::NotIpv4(ip))?,
    };
    Ok(SocketAddress::V4(SocketAddrV4::new(v4, port)))
}

/// Resolves `host` and returns its first IPv4 address.
pub fn lookup_ipv4(host: &str) -> Result<Ipv4Addr, AddressError> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    let addrs = (host, 0)
        .to_socket_addrs()
        .map_err(|e| AddressError::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
    for addr in addrs {
        if let IpAddr::V4(ip) = addr.ip() {
            return Ok(ip);
        }
    }
    Err(AddressError::NoIpv4Address(host.to_string()))
}
