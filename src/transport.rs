//! UDP broadcast transport
//! One socket per test run, shared by the request sender and the reply counter

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tracing::debug;

use crate::protocol::ProtocolConfig;

/// How a run's socket is bound and where requests are aimed.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Local port to bind. The protocol port by default, so broadcast replies
    /// land on the same socket. Tests bind port 0 and aim at loopback.
    pub bind_port: u16,
    /// Destination for request datagrams.
    pub target: SocketAddr,
    /// Upper bound for one blocking receive. The reply counter polls its stop
    /// flag at this granularity.
    pub recv_timeout: Duration,
}

impl TransportConfig {
    /// Broadcast setup for a real device: bind the protocol port, aim at
    /// 255.255.255.255 on that same port.
    pub fn broadcast(protocol: &ProtocolConfig) -> Self {
        Self {
            bind_port: protocol.port,
            target: SocketAddrV4::new(Ipv4Addr::BROADCAST, protocol.port).into(),
            recv_timeout: Duration::from_millis(100),
        }
    }
}

/// Bidirectional datagram channel for one test run.
///
/// `recv` must fail with `WouldBlock` or `TimedOut` when nothing arrives
/// within the configured window; the reply counter relies on that to notice
/// its stop flag without any extra wakeup mechanism.
pub trait Transport: Send + Sync {
    fn send_request(&self, payload: &[u8]) -> io::Result<()>;
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Broadcast-enabled UDP socket implementing [`Transport`].
///
/// Created and dropped by the test runner only. The sender and the counter
/// each hold a shared reference for the duration of one run; neither closes
/// the socket.
pub struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTransport {
    /// Open and configure the run socket.
    pub fn open(config: &TransportConfig) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.set_read_timeout(Some(config.recv_timeout))?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.bind_port).into())?;

        let socket: UdpSocket = socket.into();
        debug!(local = ?socket.local_addr().ok(), target = %config.target, "run socket open");

        Ok(Self {
            socket,
            target: config.target,
        })
    }

    /// The locally bound address. Useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send_request(&self, payload: &[u8]) -> io::Result<()> {
        self.socket.send_to(payload, self.target).map(|_| ())
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv_from(buf).map(|(len, _)| len)
    }
}
