use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use std::net::{IpAddr, Ipv6Addr};

use crate::icmp::{InboundReply, ReplyKind};
use crate::transport::AddressFamily;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_DEST_UNREACH: u8 = 3;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_TIME_EXCEEDED: u8 = 11;

pub const ICMPV6_DEST_UNREACH: u8 = 1;
pub const ICMPV6_TIME_EXCEEDED: u8 = 3;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

pub const ICMP_HEADER_LEN: usize = 8;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_NEXT_HEADER_ICMPV6: u8 = 58;
const ROUTING_TYPE_0: u8 = 0;

#[derive(Debug, Clone)]
pub struct IcmpPacket {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl IcmpPacket {
    /// ICMPv6 checksums cover a pseudo-header the kernel fills in, so only
    /// IPv4 requests carry a computed checksum.
    pub fn new_echo_request(
        identifier: u16,
        sequence: u16,
        payload: Vec<u8>,
        family: AddressFamily,
    ) -> Self {
        let icmp_type = match family {
            AddressFamily::V4 => ICMP_ECHO_REQUEST,
            AddressFamily::V6 => ICMPV6_ECHO_REQUEST,
        };

        let mut packet = Self {
            icmp_type,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
            payload,
        };

        if family == AddressFamily::V4 {
            packet.calculate_checksum();
        }
        packet
    }

    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        if data.len() < ICMP_HEADER_LEN {
            return Err(anyhow::anyhow!("ICMP packet too short: {} bytes", data.len()));
        }

        let mut cursor = Cursor::new(data);
        let icmp_type = cursor.read_u8()?;
        let code = cursor.read_u8()?;
        let checksum = cursor.read_u16::<BigEndian>()?;
        let identifier = cursor.read_u16::<BigEndian>()?;
        let sequence = cursor.read_u16::<BigEndian>()?;

        let mut payload = Vec::with_capacity(data.len() - ICMP_HEADER_LEN);
        cursor.read_to_end(&mut payload)?;

        Ok(Self {
            icmp_type,
            code,
            checksum,
            identifier,
            sequence,
            payload,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ICMP_HEADER_LEN + self.payload.len());
        bytes.push(self.icmp_type);
        bytes.push(self.code);
        bytes.extend_from_slice(&self.checksum.to_be_bytes());
        bytes.extend_from_slice(&self.identifier.to_be_bytes());
        bytes.extend_from_slice(&self.sequence.to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn calculate_checksum(&mut self) {
        self.checksum = 0;
        self.checksum = internet_checksum(&self.to_bytes());
    }

    pub fn verify_checksum(&self) -> bool {
        internet_checksum(&self.to_bytes()) == 0
    }
}

/// RFC 1071 one's-complement checksum.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut chunks = data.chunks_exact(2);
    let mut sum: u32 = chunks
        .by_ref()
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]) as u32)
        .sum();

    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Type-0 routing header asking every waypoint, in order, to forward the
/// packet before it reaches its destination.
pub fn routing_header(waypoints: &[Ipv6Addr]) -> anyhow::Result<Vec<u8>> {
    let segments = u8::try_from(waypoints.len())
        .ok()
        .filter(|n| *n <= 127)
        .ok_or_else(|| anyhow::anyhow!("too many waypoints: {}", waypoints.len()))?;

    let mut header = Vec::with_capacity(8 + 16 * waypoints.len());
    header.write_u8(IPV6_NEXT_HEADER_ICMPV6)?;
    // Length in 8-octet units, not counting the first eight bytes.
    header.write_u8(segments * 2)?;
    header.write_u8(ROUTING_TYPE_0)?;
    header.write_u8(segments)?;
    header.write_u32::<BigEndian>(0)?;
    for waypoint in waypoints {
        header.extend_from_slice(&waypoint.octets());
    }
    Ok(header)
}

/// Decode a datagram read from a raw ICMP channel.
///
/// IPv4 raw sockets hand over the IP header as well; it is stripped here and
/// its TTL kept. IPv6 raw sockets deliver the bare ICMPv6 message.
pub fn decode_reply(data: &[u8], source: IpAddr) -> anyhow::Result<InboundReply> {
    match source {
        IpAddr::V4(_) => decode_v4(data, source),
        IpAddr::V6(_) => decode_v6(data, source),
    }
}

fn decode_v4(data: &[u8], source: IpAddr) -> anyhow::Result<InboundReply> {
    let (icmp_data, hop_limit) = if data.first().is_some_and(|b| b >> 4 == 4) {
        let header_len = ((data[0] & 0x0f) as usize) * 4;
        if header_len < IPV4_MIN_HEADER_LEN || data.len() < header_len + ICMP_HEADER_LEN {
            return Err(anyhow::anyhow!("truncated IPv4 datagram: {} bytes", data.len()));
        }
        (&data[header_len..], Some(data[8]))
    } else {
        (data, None)
    };

    let packet = IcmpPacket::from_bytes(icmp_data)?;
    if !packet.verify_checksum() {
        return Err(anyhow::anyhow!("bad ICMP checksum from {}", source));
    }

    let kind = match packet.icmp_type {
        ICMP_ECHO_REPLY => ReplyKind::EchoReply {
            identifier: packet.identifier,
            sequence: packet.sequence,
            payload: packet.payload,
        },
        ICMP_DEST_UNREACH => ReplyKind::DestinationUnreachable { code: packet.code },
        ICMP_TIME_EXCEEDED => ReplyKind::TimeExceeded { code: packet.code },
        other => ReplyKind::Unrecognized { icmp_type: other },
    };

    Ok(InboundReply {
        source,
        hop_limit,
        bytes: icmp_data.len(),
        kind,
    })
}

fn decode_v6(data: &[u8], source: IpAddr) -> anyhow::Result<InboundReply> {
    let packet = IcmpPacket::from_bytes(data)?;

    let kind = match packet.icmp_type {
        ICMPV6_ECHO_REPLY => ReplyKind::EchoReply {
            identifier: packet.identifier,
            sequence: packet.sequence,
            payload: packet.payload,
        },
        ICMPV6_DEST_UNREACH => ReplyKind::DestinationUnreachable { code: packet.code },
        ICMPV6_TIME_EXCEEDED => ReplyKind::TimeExceeded { code: packet.code },
        other => ReplyKind::Unrecognized { icmp_type: other },
    };

    Ok(InboundReply {
        source,
        hop_limit: None,
        bytes: data.len(),
        kind,
    })
}
