use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

/// Failures of the raw socket lifecycle. All of them are terminal for a listener.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("insufficient privileges to open a raw ICMP socket: {0}")]
    Permission(#[source] io::Error),
    #[error("raw ICMPv4 sockets are not available on this host: {0}")]
    PlatformUnsupported(#[source] io::Error),
    #[error("failed to bind the raw ICMP socket: {0}")]
    Bind(#[source] io::Error),
    #[error("failed to receive from the raw ICMP socket: {0}")]
    Receive(#[source] io::Error),
    #[error("raw ICMP socket is not open")]
    NotOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed packet: {len} bytes, expected at least {min}")]
    Malformed { len: usize, min: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("unsupported address family {0}, only IPv4 is handled")]
    UnsupportedFamily(u16),
    #[error("{0} cannot be represented as an IPv4 address")]
    NotIpv4(IpAddr),
    #[error("no IPv4 address found for {0}")]
    NoIpv4Address(String),
    #[error("failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Cause attached to an [`IcmpEvent`](crate::IcmpEvent).
#[derive(Debug, Clone, Error)]
pub enum EventError {
    #[error(transparent)]
    Socket(Arc<SocketError>),
    #[error(transparent)]
    Address(AddressError),
}

impl From<SocketError> for EventError {
    fn from(e: SocketError) -> Self {
        Self::Socket(Arc::new(e))
    }
}

impl From<AddressError> for EventError {
    fn from(e: AddressError) -> Self {
        Self::Address(e)
    }
}
