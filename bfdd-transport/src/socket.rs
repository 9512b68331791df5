//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

// Socket plumbing grounded in `holo_utils::socket` and `holo_bfd::network`:
// IP_PKTINFO/IPV6_RECVPKTINFO so the receive side can recover the inbound
// interface, and IP_MINTTL/IPV6_MINHOPCOUNT so GTSM (RFC 5881 Section 5) is
// enforced by the kernel instead of by parsing ancillary TTL data in
// userspace. None of these options have a safe wrapper in `nix`, which is
// why this crate allows `unsafe_code` while the rest of the workspace
// forbids it.

use std::net::{IpAddr, SocketAddr};
use std::os::fd::AsRawFd;

use bfdd_core::SessionType;
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;

pub const PORT_DST_SINGLE_HOP: u16 = 3784;
pub const PORT_DST_ECHO: u16 = 3785;
pub const PORT_DST_MULTIHOP: u16 = 4784;
pub const PORT_SRC_RANGE: std::ops::RangeInclusive<u16> = 49152..=65535;

// The single-hop receive socket enforces it at bind time; a multihop socket
// serves peers with differing TTL expectations and can't.
pub const GTSM_TTL: u8 = 255;

fn domain_of(addr: IpAddr) -> Domain {
    match addr {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    }
}

fn setsockopt_int(
    sock: &impl AsRawFd,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> std::io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            sock.as_raw_fd(),
            level,
            name,
            std::ptr::addr_of!(value).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn bind_reuseaddr(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(domain_of(addr.ip()), Type::DGRAM, None)?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

// Binds the shared receive socket for a given path type and address family.
// Single-hop sockets get GTSM enforcement baked in via IP(V6)_MIN{TTL,HOPCOUNT};
// multihop sockets only get PKTINFO, since a single multihop socket serves
// peers that may legitimately use different TTLs (RFC 5883 Section 6).
pub fn bind_rx(session_type: SessionType, family_addr: IpAddr) -> std::io::Result<UdpSocket> {
    let port = match session_type {
        SessionType::SingleHop => PORT_DST_SINGLE_HOP,
        SessionType::Multihop => PORT_DST_MULTIHOP,
    };
    let socket = bind_reuseaddr(SocketAddr::from((family_addr, port)))?;

    match (session_type, family_addr) {
        (SessionType::SingleHop, IpAddr::V4(_)) => {
            setsockopt_int(&socket, libc::IPPROTO_IP, libc::IP_PKTINFO, 1)?;
            setsockopt_int(
                &socket,
                libc::IPPROTO_IP,
                libc::IP_MINTTL,
                GTSM_TTL as libc::c_int,
            )?;
        }
        (SessionType::SingleHop, IpAddr::V6(_)) => {
            setsockopt_int(&socket, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO, 1)?;
            setsockopt_int(
                &socket,
                libc::IPPROTO_IPV6,
                libc::IPV6_MINHOPCOUNT,
                GTSM_TTL as libc::c_int,
            )?;
        }
        (SessionType::Multihop, IpAddr::V4(_)) => {
            setsockopt_int(&socket, libc::IPPROTO_IP, libc::IP_PKTINFO, 1)?;
        }
        (SessionType::Multihop, IpAddr::V6(_)) => {
            setsockopt_int(&socket, libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO, 1)?;
        }
    }

    Ok(socket)
}

// The echo socket loops packets back to ourselves; no pktinfo or TTL
// enforcement is needed since RFC 9747 echo validation is discriminator-based.
pub fn bind_rx_echo(family_addr: IpAddr) -> std::io::Result<UdpSocket> {
    bind_reuseaddr(SocketAddr::from((family_addr, PORT_DST_ECHO)))
}

// A transmit socket is needed per session rather than shared, since sessions
// can be bound to different local addresses or interfaces (RFC 5881 Section 4).
pub fn bind_tx(ifname: Option<&str>, local_addr: IpAddr) -> std::io::Result<UdpSocket> {
    let socket = bind_reuseaddr(SocketAddr::from((local_addr, *PORT_SRC_RANGE.start())))?;

    if let Some(ifname) = ifname {
        socket.bind_device(Some(ifname.as_bytes()))?;
    }

    match local_addr {
        IpAddr::V4(_) => {
            setsockopt_int(&socket, libc::IPPROTO_IP, libc::IP_TTL, GTSM_TTL as libc::c_int)?;
        }
        IpAddr::V6(_) => {
            setsockopt_int(
                &socket,
                libc::IPPROTO_IPV6,
                libc::IPV6_UNICAST_HOPS,
                GTSM_TTL as libc::c_int,
            )?;
        }
    }

    Ok(socket)
}

// Recovers the inbound interface name from IP(V6)_PKTINFO ancillary data.
// `if_indextoname` has no safe wrapper exposed by `nix` for this use.
pub fn ifindex_to_name(ifindex: u32) -> Option<String> {
    let mut buf = [0u8; libc::IF_NAMESIZE];
    let ptr = unsafe { libc::if_indextoname(ifindex, buf.as_mut_ptr().cast()) };
    if ptr.is_null() {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..len]).ok().map(String::from)
}
