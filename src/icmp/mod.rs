pub mod packet;
pub mod socket;

pub use packet::*;
pub use socket::*;

use std::net::IpAddr;

/// Identifier carried by every echo request this engine emits. Replies with
/// any other identifier belong to unrelated traffic on the same raw channel.
pub const PROBE_TAG: u16 = 0xbeef;

/// A decoded inbound ICMP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReply {
    pub source: IpAddr,
    /// `None` when the channel does not expose the IP header.
    pub hop_limit: Option<u8>,
    /// ICMP message size, header included.
    pub bytes: usize,
    pub kind: ReplyKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyKind {
    EchoReply {
        identifier: u16,
        sequence: u16,
        payload: Vec<u8>,
    },
    DestinationUnreachable {
        code: u8,
    },
    TimeExceeded {
        code: u8,
    },
    Unrecognized {
        icmp_type: u8,
    },
}

/// Why a probe will not be answered, as reported by an intermediate node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    DestinationUnreachable { code: u8 },
    TimeExceeded { code: u8 },
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::DestinationUnreachable { code } => {
                write!(f, "Destination unreachable (code {})", code)
            }
            DropReason::TimeExceeded { code } => write!(f, "Time exceeded (code {})", code),
        }
    }
}
