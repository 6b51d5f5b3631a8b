//! Fixed-width IPv4 + ICMP header decoding.
//!
//! The IP header is assumed to occupy exactly the first 20 bytes, whatever its
//! IHL field says, and the ICMP header the 8 bytes after it. Options are not
//! skipped and checksums are not verified.

use crate::error::DecodeError;
use pnet::packet::icmp::{IcmpCode, IcmpType};
use pnet::packet::ip::IpNextHeaderProtocol;
use std::net::Ipv4Addr;

pub const IP_HEADER_LEN: usize = 20;
pub const ICMP_HEADER_LEN: usize = 8;
pub const MIN_PACKET_LEN: usize = IP_HEADER_LEN + ICMP_HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpHeader {
    pub version_header_len: u8,
    pub type_of_service: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags_fragment_offset: u16,
    pub time_to_live: u8,
    pub protocol: u8,
    pub header_checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl IpHeader {
    pub fn version(&self) -> u8 {
        self.version_header_len >> 4
    }

    /// Declared header length in bytes. Informational only.
    pub fn header_len(&self) -> usize {
        (self.version_header_len & 0x0F) as usize * 4
    }

    pub fn next_level_protocol(&self) -> IpNextHeaderProtocol {
        IpNextHeaderProtocol::new(self.protocol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub ty: u8,
    pub code: u8,
    pub checksum: u16,
    pub unused: u32,
}

impl IcmpHeader {
    pub fn icmp_type(&self) -> IcmpType {
        IcmpType::new(self.ty)
    }

    pub fn icmp_code(&self) -> IcmpCode {
        IcmpCode::new(self.code)
    }
}

fn u16_at(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn ipv4_at(buf: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    )
}

pub fn decode(buf: &[u8]) -> Result<(IpHeader, IcmpHeader), DecodeError> {
    if buf.len() < MIN_PACKET_LEN {
        return Err(DecodeError::Malformed {
            len: buf.len(),
            min: MIN_PACKET_LEN,
        });
    }

    let ip = IpHeader {
        version_header_len: buf[0],
        type_of_service: buf[1],
        total_length: u16_at(buf, 2),
        identification: u16_at(buf, 4),
        flags_fragment_offset: u16_at(buf, 6),
        time_to_live: buf[8],
        protocol: buf[9],
        header_checksum: u16_at(buf, 10),
        source: ipv4_at(buf, 12),
        destination: ipv4_at(buf, 16),
    };

    let icmp = &buf[IP_HEADER_LEN..];
    let icmp = IcmpHeader {
        ty: icmp[0],
        code: icmp[1],
        checksum: u16_at(icmp, 2),
        unused: u32_at(icmp, 4),
    };

    Ok((ip, icmp))
}

#[cfg(test)]
mod test {
    use super::*;
    use pnet::packet::icmp::{IcmpTypes, MutableIcmpPacket};
    use pnet::packet::ip::IpNextHeaderProtocols;
    use pnet::packet::ipv4::MutableIpv4Packet;

    fn time_exceeded_from(source: Ipv4Addr, destination: Ipv4Addr) -> Vec<u8> {
        let mut buf = vec![0u8; MIN_PACKET_LEN];
        {
            let mut ip = MutableIpv4Packet::new(&mut buf[..IP_HEADER_LEN]).unwrap();
            ip.set_version(4);
            ip.set_header_length(5);
            ip.set_dscp(0x2e);
            ip.set_total_length(56);
            ip.set_identification(0xbeef);
            ip.set_flags(2);
            ip.set_fragment_offset(0);
            ip.set_ttl(251);
            ip.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
            ip.set_checksum(0x1234);
            ip.set_source(source);
            ip.set_destination(destination);
        }
        {
            let mut icmp = MutableIcmpPacket::new(&mut buf[IP_HEADER_LEN..]).unwrap();
            icmp.set_icmp_type(IcmpTypes::TimeExceeded);
            icmp.set_icmp_code(IcmpCode::new(0));
            icmp.set_checksum(0xf4ff);
        }
        buf
    }

    #[test]
    fn decode_time_exceeded() {
        let buf = time_exceeded_from(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(192, 168, 0, 2));
        let (ip, icmp) = decode(&buf).unwrap();

        assert_eq!(ip.version(), 4);
        assert_eq!(ip.header_len(), 20);
        assert_eq!(ip.type_of_service, 0x2e << 2);
        assert_eq!(ip.total_length, 56);
        assert_eq!(ip.identification, 0xbeef);
        assert_eq!(ip.flags_fragment_offset, 0x4000);
        assert_eq!(ip.time_to_live, 251);
        assert_eq!(ip.next_level_protocol(), IpNextHeaderProtocols::Icmp);
        assert_eq!(ip.header_checksum, 0x1234);
        assert_eq!(ip.source, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ip.destination, Ipv4Addr::new(192, 168, 0, 2));

        assert_eq!(icmp.icmp_type(), IcmpTypes::TimeExceeded);
        assert_eq!(icmp.code, 0);
        assert_eq!(icmp.checksum, 0xf4ff);
        assert_eq!(icmp.unused, 0);
    }

    #[test]
    fn decode_is_pure() {
        let buf = time_exceeded_from(Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(5, 6, 7, 8));
        let first = decode(&buf).unwrap();
        for _ in 0..16 {
            assert_eq!(decode(&buf).unwrap(), first);
        }
    }

    #[test]
    fn short_buffers_are_malformed() {
        let buf = [0xffu8; MIN_PACKET_LEN];
        for len in 0..MIN_PACKET_LEN {
            assert_eq!(
                decode(&buf[..len]),
                Err(DecodeError::Malformed {
                    len,
                    min: MIN_PACKET_LEN
                })
            );
        }
        assert!(decode(&buf).is_ok());
    }

    #[test]
    fn ip_options_are_not_skipped() {
        // IHL of 6 declares a 24 byte header, the ICMP fields are still read at 20.
        let mut buf = time_exceeded_from(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        buf[0] = 0x46;
        buf.extend_from_slice(&[3, 3, 0, 0]);
        let (ip, icmp) = decode(&buf).unwrap();
        assert_eq!(ip.header_len(), 24);
        assert_eq!(icmp.ty, 11);
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut buf = time_exceeded_from(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        let (_, expected) = decode(&buf).unwrap();
        buf.extend_from_slice(&[0xaa; 64]);
        let (_, icmp) = decode(&buf).unwrap();
        assert_eq!(icmp, expected);
    }
}
