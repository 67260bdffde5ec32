use socket2::{Domain, Protocol as SockProtocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::transport::{AddressFamily, Protocol, Transport};

const RECV_BUFFER_LEN: usize = 65536;

/// Raw ICMP socket implementing [`Transport`].
///
/// Creating the socket needs CAP_NET_RAW (or administrator rights); failing
/// that is reported from [`Transport::open`].
#[derive(Debug, Default)]
pub struct IcmpSocket {
    socket: Option<Socket>,
    family: Option<AddressFamily>,
}

impl IcmpSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocking reader sharing the open socket.
    pub fn receiver(&self, poll_timeout: Duration) -> io::Result<IcmpReceiver> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "ICMP socket is not open"))?;
        let socket = socket.try_clone()?;
        socket.set_read_timeout(Some(poll_timeout))?;
        Ok(IcmpReceiver { socket })
    }

    fn open_socket(&self) -> io::Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "ICMP socket is not open"))
    }
}

impl Transport for IcmpSocket {
    fn open(&mut self, family: AddressFamily) -> io::Result<()> {
        let (domain, protocol) = match family {
            AddressFamily::V4 => (Domain::IPV4, SockProtocol::ICMPV4),
            AddressFamily::V6 => (Domain::IPV6, SockProtocol::ICMPV6),
        };

        let socket = Socket::new(domain, Type::RAW, Some(protocol)).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to create raw socket: {}. Elevated privileges may be required.", e),
            )
        })?;
        socket.set_nonblocking(false)?;

        log::debug!("opened raw {} ICMP socket", family);
        self.socket = Some(socket);
        self.family = Some(family);
        Ok(())
    }

    fn bind(&mut self, source: IpAddr) -> io::Result<()> {
        let addr = SockAddr::from(SocketAddr::new(source, 0));
        self.open_socket()?.bind(&addr)?;
        log::debug!("bound ICMP socket to {}", source);
        Ok(())
    }

    /// The socket's protocol is fixed at creation; asking for anything else
    /// (such as an IPv6 routing header) is unsupported.
    fn set_protocol(&mut self, protocol: Protocol) -> io::Result<()> {
        match self.family {
            Some(family) if family.echo_protocol() == protocol => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("raw ICMP socket cannot switch to protocol {}", protocol.number()),
            )),
        }
    }

    fn set_traffic_class(&mut self, traffic_class: u8) -> io::Result<()> {
        match self.family {
            Some(AddressFamily::V4) => self.open_socket()?.set_tos(traffic_class as u32),
            _ => {
                log::warn!("traffic class is only applied to IPv4 probes");
                Ok(())
            }
        }
    }

    fn send_to(&mut self, packet: &[u8], destination: IpAddr) -> io::Result<usize> {
        let addr = SockAddr::from(SocketAddr::new(destination, 0));
        log::debug!("sending ICMP packet to {}: {} bytes", destination, packet.len());
        self.open_socket()?.send_to(packet, &addr)
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            log::debug!("closed ICMP socket");
        }
    }
}

/// Receive half of an [`IcmpSocket`], meant for a blocking reader thread.
pub struct IcmpReceiver {
    socket: Socket,
}

impl IcmpReceiver {
    /// Returns `Ok(None)` when the poll timeout passes without a datagram.
    pub fn recv(&self) -> io::Result<Option<(Vec<u8>, IpAddr)>> {
        let mut buffer = vec![MaybeUninit::<u8>::uninit(); RECV_BUFFER_LEN];
        let (len, from) = match self.socket.recv_from(&mut buffer) {
            Ok(result) => result,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(source) = from.as_socket().map(|addr| addr.ip()) else {
            log::debug!("dropping datagram from non-IP address");
            return Ok(None);
        };

        // SAFETY: recv_from initialised the first `len` bytes.
        let data = buffer[..len]
            .iter()
            .map(|byte| unsafe { byte.assume_init() })
            .collect();
        log::debug!("received {} bytes from {}", len, source);
        Ok(Some((data, source)))
    }
}
