use crate::error::EventError;
use crate::packet::IcmpHeader;
use pnet::packet::icmp::{destination_unreachable, time_exceeded, IcmpCode, IcmpType, IcmpTypes};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcmpEventKind {
    /// Decoded, but not a hop notification.
    None,
    TtlExpired,
    NoRoute,
    /// Terminal: nothing follows it from the same listener.
    Error,
}

impl fmt::Display for IcmpEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::TtlExpired => "ttlExpired",
            Self::NoRoute => "noRoute",
            Self::Error => "error",
        })
    }
}

/// Maps an ICMP header to the event it represents for path discovery.
///
/// Only "TTL exceeded in transit" counts as an expired hop. Fragment
/// reassembly timeouts share the type but say nothing about the path.
pub fn classify(icmp: &IcmpHeader) -> IcmpEventKind {
    let code = icmp.icmp_code();
    match icmp.icmp_type() {
        IcmpTypes::TimeExceeded if code == time_exceeded::IcmpCodes::TimeToLiveExceededInTransit => {
            IcmpEventKind::TtlExpired
        }
        IcmpTypes::DestinationUnreachable
            if code == destination_unreachable::IcmpCodes::DestinationNetworkUnreachable
                || code == destination_unreachable::IcmpCodes::DestinationHostUnreachable
                || code == destination_unreachable::IcmpCodes::DestinationPortUnreachable =>
        {
            IcmpEventKind::NoRoute
        }
        _ => IcmpEventKind::None,
    }
}

#[derive(Debug, Clone)]
pub struct IcmpEvent {
    pub kind: IcmpEventKind,
    pub timestamp: SystemTime,
    /// Destination of the ICMP datagram, i.e. this host.
    pub local_addr: Option<Ipv4Addr>,
    pub local_port: u16,
    /// Router or host that emitted the ICMP datagram. `None` when the socket
    /// reported a sender that is not IPv4 (see `error`).
    pub remote_addr: Option<Ipv4Addr>,
    pub remote_port: u16,
    pub icmp_type: Option<IcmpType>,
    pub icmp_code: Option<IcmpCode>,
    pub error: Option<EventError>,
}

impl IcmpEvent {
    pub(crate) fn terminal(error: EventError) -> Self {
        Self {
            kind: IcmpEventKind::Error,
            timestamp: SystemTime::now(),
            local_addr: None,
            local_port: 0,
            remote_addr: None,
            remote_port: 0,
            icmp_type: None,
            icmp_code: None,
            error: Some(error),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == IcmpEventKind::Error
    }
}

fn fmt_endpoint(f: &mut fmt::Formatter<'_>, addr: Option<Ipv4Addr>, port: u16) -> fmt::Result {
    match addr {
        Some(addr) => write!(f, "{}:{}", addr, port),
        None => write!(f, "?:{}", port),
    }
}

impl fmt::Display for IcmpEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        write!(
            f,
            "icmpEvent:{{type: {}, time: {}.{:06}, local: ",
            self.kind,
            time.as_secs(),
            time.subsec_micros()
        )?;
        fmt_endpoint(f, self.local_addr, self.local_port)?;
        write!(f, ", remote: ")?;
        fmt_endpoint(f, self.remote_addr, self.remote_port)?;
        match &self.error {
            Some(e) => write!(f, ", err: {}}}", e),
            None => write!(f, ", err: <nil>}}"),
        }
    }
}
