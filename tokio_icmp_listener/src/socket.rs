use crate::address::SocketAddress;
use crate::error::SocketError;
use crate::fdset::{self, DescriptorSet};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

/// Source of raw ICMP datagrams driven by the listener thread.
///
/// Implementations are owned by exactly one listener and only ever touched
/// from its thread.
pub trait IcmpSocket: Send {
    fn open(&mut self) -> Result<(), SocketError>;
    fn bind(&mut self) -> Result<(), SocketError>;
    /// Waits at most `timeout` for a datagram. `Ok(false)` means the wait
    /// elapsed with nothing to read.
    fn wait_readable(&mut self, timeout: Duration) -> Result<bool, SocketError>;
    fn receive(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddress), SocketError>;
    /// Releases the socket. Calling it again is a no-op.
    fn close(&mut self);
}

fn classify_open_error(e: io::Error) -> SocketError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        return SocketError::Permission(e);
    }
    match e.raw_os_error() {
        Some(libc::EPERM) | Some(libc::EACCES) => SocketError::Permission(e),
        _ => SocketError::PlatformUnsupported(e),
    }
}

/// Raw ICMPv4 receive socket bound to the wildcard address.
#[derive(Debug, Default)]
pub struct RawSocketHandle {
    socket: Option<Socket>,
}

impl RawSocketHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn socket(&self) -> Result<&Socket, SocketError> {
        self.socket.as_ref().ok_or(SocketError::NotOpen)
    }
}

impl IcmpSocket for RawSocketHandle {
    fn open(&mut self) -> Result<(), SocketError> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(classify_open_error)?;
        self.socket = Some(socket);
        Ok(())
    }

    fn bind(&mut self) -> Result<(), SocketError> {
        let addr = SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        self.socket()?.bind(&addr).map_err(SocketError::Bind)
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool, SocketError> {
        let fd = self.socket()?.as_raw_fd() as usize;
        let mut set = DescriptorSet::new(fd + 1);
        set.set(fd);
        let ready = fdset::wait_readable(&set, timeout).map_err(SocketError::Receive)?;
        Ok(ready.is_set(fd))
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddress), SocketError> {
        let socket = self.socket()?;
        // SAFETY: `[u8]` and `[MaybeUninit<u8>]` share their layout, and
        // recv_from only writes initialized bytes, so `buf` stays initialized.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        let (len, from) = socket.recv_from(uninit).map_err(SocketError::Receive)?;
        Ok((len, SocketAddress::from(&from)))
    }

    fn close(&mut self) {
        // Dropping the socket closes the descriptor.
        self.socket.take();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn open_error_classification() {
        let e = classify_open_error(io::Error::from_raw_os_error(libc::EPERM));
        assert!(matches!(e, SocketError::Permission(_)));
        let e = classify_open_error(io::Error::from_raw_os_error(libc::EACCES));
        assert!(matches!(e, SocketError::Permission(_)));
        let e = classify_open_error(io::Error::from_raw_os_error(libc::EAFNOSUPPORT));
        assert!(matches!(e, SocketError::PlatformUnsupported(_)));
    }

    #[test]
    fn unopened_handle() {
        let mut handle = RawSocketHandle::new();
        let mut buf = [0u8; 64];
        assert!(matches!(handle.bind(), Err(SocketError::NotOpen)));
        assert!(matches!(
            handle.receive(&mut buf),
            Err(SocketError::NotOpen)
        ));
        handle.close();
        handle.close();
        assert!(!handle.is_open());
    }
}
