//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

// UDP transport adapter, grounded in `holo_bfd::network` and
// `holo_utils::socket`. `bfdd-core` owns packet decode/validate/auth
// end to end behind the `PacketSender` port and `Manager::deliver`/
// `deliver_echo`; this crate's only job is moving already-encoded bytes
// over real sockets and handing received bytes back with whatever
// metadata (peer address, inbound interface) the core needs to
// demultiplex them, which is why the receive loops here never construct
// a `bfdd_core::packet::Packet` themselves.

mod socket;

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bfdd_core::{Error, IoError, Manager, PacketSender, SessionKey, SessionType};
use nix::cmsg_space;
use nix::sys::socket::{ControlMessageOwned, MsgFlags, SockaddrStorage};
use tokio::io::Interest;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::trace;

pub use socket::{PORT_DST_ECHO, PORT_DST_MULTIHOP, PORT_DST_SINGLE_HOP, PORT_SRC_RANGE};

// RFC 5880 Control packets top out at 24 (mandatory) + 28 (Keyed SHA1 auth)
// bytes; this leaves comfortable headroom without inviting unbounded reads.
const RECV_BUF_LEN: usize = 256;

// ===== impl UdpPacketSender =====

// Implements `bfdd_core::PacketSender` over real sockets. One transmit
// socket is opened per session key the first time it's used and kept
// around, since sessions can be bound to distinct local addresses or
// interfaces (RFC 5881 Section 4) and `bind`/`bind_device` can't be
// redone per datagram without the cost of a fresh socket each time.
pub struct UdpPacketSender {
    sockets: Mutex<HashMap<SessionKey, Arc<UdpSocket>>>,
}

impl Default for UdpPacketSender {
    fn default() -> UdpPacketSender {
        UdpPacketSender::new()
    }
}

impl UdpPacketSender {
    pub fn new() -> UdpPacketSender {
        UdpPacketSender {
            sockets: Mutex::new(HashMap::new()),
        }
    }

    fn socket_for(&self, key: &SessionKey) -> std::io::Result<Arc<UdpSocket>> {
        let mut sockets = self.sockets.lock().unwrap();
        if let Some(socket) = sockets.get(key) {
            return Ok(socket.clone());
        }

        let (ifname, local_addr) = match key {
            SessionKey::SingleHop { ifname, peer_addr } => {
                (Some(ifname.as_str()), unspecified_for(*peer_addr))
            }
            SessionKey::Multihop { local_addr, .. } => (None, *local_addr),
        };
        let socket = Arc::new(socket::bind_tx(ifname, local_addr)?);
        sockets.insert(key.clone(), socket.clone());
        Ok(socket)
    }

    async fn send(&self, key: &SessionKey, datagram: &[u8], port: u16) -> std::io::Result<()> {
        let socket = self.socket_for(key)?;
        let dst = SocketAddr::from((key.peer_addr(), port));
        socket.send_to(datagram, dst).await?;
        Ok(())
    }
}

impl PacketSender for UdpPacketSender {
    fn send_control(
        &self,
        key: &SessionKey,
        datagram: &[u8],
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>> {
        let port = match key {
            SessionKey::SingleHop { .. } => PORT_DST_SINGLE_HOP,
            SessionKey::Multihop { .. } => PORT_DST_MULTIHOP,
        };
        let key = key.clone();
        let datagram = datagram.to_vec();
        Box::pin(async move { self.send(&key, &datagram, port).await })
    }

    fn send_echo(
        &self,
        key: &SessionKey,
        datagram: &[u8],
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>> {
        let key = key.clone();
        let datagram = datagram.to_vec();
        Box::pin(async move { self.send(&key, &datagram, PORT_DST_ECHO).await })
    }
}

fn unspecified_for(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

// ===== receive loops =====

// Owns the receive side: one task per (path type, address family) for
// Control traffic plus one per address family for the Echo loopback
// socket, all feeding the same `Manager`.
pub struct UdpTransport {
    manager: Arc<Manager>,
}

impl UdpTransport {
    pub fn new(manager: Arc<Manager>) -> UdpTransport {
        UdpTransport { manager }
    }

    // Binds every receive socket this process needs and spawns a task per
    // socket. A bind failure for one family (e.g. no IPv6 configured) is
    // logged and skipped rather than aborting the others.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        let families = [
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        ];
        let mut handles = Vec::new();

        for addr in families {
            for session_type in [SessionType::SingleHop, SessionType::Multihop] {
                match socket::bind_rx(session_type, addr) {
                    Ok(socket) => {
                        let manager = self.manager.clone();
                        handles.push(tokio::spawn(read_control_loop(
                            Arc::new(socket),
                            session_type,
                            manager,
                        )));
                    }
                    Err(error) => {
                        Error::from(IoError::UdpSocketError(error)).log();
                    }
                }
            }

            match socket::bind_rx_echo(addr) {
                Ok(socket) => {
                    let manager = self.manager.clone();
                    handles.push(tokio::spawn(read_echo_loop(Arc::new(socket), manager)));
                }
                Err(error) => {
                    Error::from(IoError::UdpSocketError(error)).log();
                }
            }
        }

        handles
    }
}

// Mirrors `holo_bfd::network::read_loop`'s shape (recvmsg in a spawned task,
// one iteration per datagram) but stops short of decoding a `Packet` itself:
// it extracts only what `Manager::deliver` needs to demultiplex and hands
// the raw bytes over, leaving wire parsing and GTSM enforcement-by-ancillary
// behind the core's single entry point.
async fn read_control_loop(socket: Arc<UdpSocket>, session_type: SessionType, manager: Arc<Manager>) {
    let mut buf = [0u8; RECV_BUF_LEN];
    loop {
        let result = socket
            .async_io(Interest::READABLE, || recv_control(&socket, &mut buf))
            .await;

        let (n, peer_addr, ifname) = match result {
            Ok(received) => received,
            Err(error) => {
                Error::from(IoError::UdpRecvError(error)).log();
                continue;
            }
        };

        // Single-hop sessions are demultiplexed by interface; the kernel has
        // already enforced GTSM for us via IP(V6)_MIN{TTL,HOPCOUNT} at bind
        // time, so there's no TTL to re-check here.
        let ttl = match session_type {
            SessionType::SingleHop => Some(socket::GTSM_TTL),
            SessionType::Multihop => None,
        };
        let ifname = match session_type {
            SessionType::SingleHop => ifname.as_deref(),
            // A single multihop socket serves every multihop peer; sessions
            // are demultiplexed by Your Discriminator instead of interface.
            SessionType::Multihop => None,
        };

        if let Err(error) = manager.deliver(&buf[..n], peer_addr, ifname, ttl).await {
            trace!(%peer_addr, ?error, "dropped inbound BFD control packet");
        }
    }
}

async fn read_echo_loop(socket: Arc<UdpSocket>, manager: Arc<Manager>) {
    let mut buf = [0u8; RECV_BUF_LEN];
    loop {
        let n = match socket.async_io(Interest::READABLE, || {
            recv_plain(&socket, &mut buf)
        }).await {
            Ok(n) => n,
            Err(error) => {
                Error::from(IoError::UdpRecvError(error)).log();
                continue;
            }
        };

        if let Err(error) = manager.deliver_echo(&buf[..n]).await {
            trace!(?error, "dropped inbound BFD echo packet");
        }
    }
}

fn recv_plain(socket: &UdpSocket, buf: &mut [u8]) -> std::io::Result<usize> {
    socket.try_recv(buf)
}

// Reads one Control datagram off `socket`, recovering the source address
// and, via IP(V6)_PKTINFO ancillary data, the interface it arrived on.
fn recv_control(
    socket: &UdpSocket,
    buf: &mut [u8],
) -> std::io::Result<(usize, IpAddr, Option<String>)> {
    use std::io::IoSliceMut;
    use std::os::fd::AsRawFd;

    let mut iov = [IoSliceMut::new(buf)];
    let mut cmsg_buf = cmsg_space!(libc::in_pktinfo, libc::in6_pktinfo);

    let msg = nix::sys::socket::recvmsg::<SockaddrStorage>(
        socket.as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_buf),
        MsgFlags::empty(),
    )
    .map_err(std::io::Error::from)?;

    let peer_addr = msg
        .address
        .and_then(sockaddr_to_ip)
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::InvalidData))?;

    let ifname = msg
        .cmsgs()
        .ok()
        .into_iter()
        .flatten()
        .find_map(|cmsg| match cmsg {
            ControlMessageOwned::Ipv4PacketInfo(pktinfo) => {
                socket::ifindex_to_name(pktinfo.ipi_ifindex as u32)
            }
            ControlMessageOwned::Ipv6PacketInfo(pktinfo) => {
                socket::ifindex_to_name(pktinfo.ipi6_ifindex)
            }
            _ => None,
        });

    Ok((msg.bytes, peer_addr, ifname))
}

fn sockaddr_to_ip(addr: SockaddrStorage) -> Option<IpAddr> {
    if let Some(v4) = addr.as_sockaddr_in() {
        return Some(IpAddr::V4(std::net::Ipv4Addr::from(v4.ip())));
    }
    if let Some(v6) = addr.as_sockaddr_in6() {
        return Some(IpAddr::V6(v6.ip()));
    }
    None
}
