//! Raw-socket ICMPv4 monitoring for TCP path discovery.
//!
//! An [`IcmpListener`] owns a privileged raw socket on a dedicated thread,
//! decodes every inbound IPv4/ICMP datagram and pushes the resulting
//! [`IcmpEvent`]s, in receive order, on a tokio channel consumed by whatever
//! correlates them with outstanding probes.

pub mod address;
pub mod config;
pub mod error;
pub mod event;
pub mod fdset;
pub mod hexdump;
pub mod listener;
pub mod packet;
pub mod socket;

pub use address::SocketAddress;
pub use config::ListenerConfig;
pub use error::{AddressError, ConfigError, DecodeError, EventError, SocketError};
pub use event::{IcmpEvent, IcmpEventKind};
pub use listener::{
    event_channel, EventReceiver, EventSender, IcmpListener, ListenerHandle, ListenerState,
    ListenerStats,
};
pub use socket::{IcmpSocket, RawSocketHandle};
pub use tokio_util::sync::CancellationToken;
