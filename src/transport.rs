use std::fmt;
use std::io;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Protocol the receive path listens on for this family.
    pub fn echo_protocol(self) -> Protocol {
        match self {
            AddressFamily::V4 => Protocol::Icmpv4,
            AddressFamily::V6 => Protocol::Icmpv6,
        }
    }

    /// IP plus ICMP header bytes added on top of the probe payload.
    pub fn header_overhead(self) -> usize {
        match self {
            AddressFamily::V4 => 28,
            AddressFamily::V6 => 48,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// Next-header selector of a raw channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Icmpv4,
    Icmpv6,
    /// IPv6 routing extension header; only used for a single waypoint send.
    Ipv6Routing,
}

impl Protocol {
    pub fn number(self) -> u8 {
        match self {
            Protocol::Icmpv4 => 1,
            Protocol::Icmpv6 => 58,
            Protocol::Ipv6Routing => 43,
        }
    }
}

/// True when more than one host may answer a probe sent to `addr`.
pub fn is_multi_destination(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_multicast() || v4.is_broadcast(),
        IpAddr::V6(v6) => v6.is_multicast(),
    }
}

/// Raw echo channel the engine sends probes through.
///
/// The engine holds a transport from `open` until `close`. Inbound traffic
/// is not pulled through this trait: whoever drives the engine reads the
/// channel and hands decoded replies to [`crate::ProbeEngine::on_reply`].
pub trait Transport {
    /// Acquire the underlying channel for `family`.
    fn open(&mut self, family: AddressFamily) -> io::Result<()>;

    fn bind(&mut self, source: IpAddr) -> io::Result<()>;

    fn set_protocol(&mut self, protocol: Protocol) -> io::Result<()>;

    /// Type-of-service byte for outgoing IPv4 probes.
    fn set_traffic_class(&mut self, traffic_class: u8) -> io::Result<()>;

    /// Returns the number of bytes the channel accepted.
    fn send_to(&mut self, packet: &[u8], destination: IpAddr) -> io::Result<usize>;

    /// Release the channel. Calling it on a closed transport is a no-op.
    fn close(&mut self);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_destination_detection() {
        assert!(is_multi_destination(&"224.0.0.1".parse().unwrap()));
        assert!(is_multi_destination(&"255.255.255.255".parse().unwrap()));
        assert!(is_multi_destination(&"ff02::1".parse().unwrap()));
        assert!(!is_multi_destination(&"10.0.0.1".parse().unwrap()));
        assert!(!is_multi_destination(&"2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_family_overhead() {
        assert_eq!(AddressFamily::V4.header_overhead(), 28);
        assert_eq!(AddressFamily::V6.header_overhead(), 48);
        assert_eq!(AddressFamily::of(&"::1".parse().unwrap()), AddressFamily::V6);
    }
}
