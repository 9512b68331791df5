//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::packet::AuthenticationType;

// Identifies a session regardless of path type, grounded in the teacher's
// `holo_utils::bfd::SessionKey` (peer address plus, for single-hop sessions
// bound to an interface, the interface name).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum SessionKey {
    SingleHop { ifname: String, peer_addr: IpAddr },
    Multihop { local_addr: IpAddr, peer_addr: IpAddr },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SessionType {
    SingleHop,
    Multihop,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Role {
    // Actively sends Control packets as soon as the session is created.
    Active,
    // Waits for the remote system before sending its own Control packets
    // (RFC 5880 Section 6.1), and is the only role unsolicited sessions
    // (RFC 9468) may be created in.
    Passive,
}

// CRUD input accepted by `Manager::create_session`/`reconcile`, grounded in
// `holo_bfd::northbound::configuration::SessionCfg`, generalized away from a
// YANG callback target into a plain, directly constructible struct.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct SessionConfig {
    pub peer_addr: IpAddr,
    pub local_addr: Option<IpAddr>,
    pub interface: Option<String>,
    pub session_type: SessionType,
    pub role: Role,
    pub desired_min_tx_us: u32,
    pub required_min_rx_us: u32,
    pub required_min_echo_rx_us: u32,
    pub detect_mult: u8,
    // Whether negotiated intervals are snapped to the RFC 7419 common set.
    pub align_intervals: bool,
    pub auth: Option<AuthConfig>,
    pub echo: Option<EchoConfig>,
}

impl SessionConfig {
    pub fn key(&self) -> Result<SessionKey, crate::error::Error> {
        match self.session_type {
            SessionType::SingleHop => {
                let ifname = self.interface.clone().ok_or_else(|| {
                    crate::error::Error::InvalidArgument(
                        "single-hop session requires an interface".into(),
                    )
                })?;
                Ok(SessionKey::SingleHop {
                    ifname,
                    peer_addr: self.peer_addr,
                })
            }
            SessionType::Multihop => {
                let local_addr = self.local_addr.ok_or_else(|| {
                    crate::error::Error::InvalidArgument(
                        "multihop session requires a non-unspecified local_addr".into(),
                    )
                })?;
                if local_addr.is_unspecified() {
                    return Err(crate::error::Error::InvalidArgument(
                        "multihop session requires a non-unspecified local_addr".into(),
                    ));
                }
                Ok(SessionKey::Multihop {
                    local_addr,
                    peer_addr: self.peer_addr,
                })
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AuthType {
    SimplePassword,
    KeyedMd5,
    MeticulousKeyedMd5,
    KeyedSha1,
    MeticulousKeyedSha1,
}

impl AuthType {
    pub fn is_meticulous(&self) -> bool {
        matches!(
            self,
            AuthType::MeticulousKeyedMd5 | AuthType::MeticulousKeyedSha1
        )
    }

    pub fn wire_type(&self) -> AuthenticationType {
        match self {
            AuthType::SimplePassword => AuthenticationType::SimplePassword,
            AuthType::KeyedMd5 => AuthenticationType::KeyedMd5,
            AuthType::MeticulousKeyedMd5 => AuthenticationType::MeticulousKeyedMd5,
            AuthType::KeyedSha1 => AuthenticationType::KeyedSha1,
            AuthType::MeticulousKeyedSha1 => AuthenticationType::MeticulousKeyedSha1,
        }
    }
}

// Grounded in `holo_utils::keychain`'s key-table shape, simplified down to
// the bare id-to-secret mapping BFD needs (no key lifetimes: key rollover is
// explicitly out of scope per spec's Non-goals).
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct AuthConfig {
    pub auth_type: AuthType,
    pub keys: BTreeMap<u8, Vec<u8>>,
    pub active_key_id: u8,
    // Acceptance window for non-meticulous sequence numbers. Defaults to
    // `3 * detect_mult` per spec's sliding-window rule if left at 0.
    pub seq_window: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct EchoConfig {
    pub enabled: bool,
    pub required_min_echo_rx_us: u32,
}

// ===== impl SessionKey =====

impl SessionKey {
    pub fn peer_addr(&self) -> IpAddr {
        match self {
            SessionKey::SingleHop { peer_addr, .. } => *peer_addr,
            SessionKey::Multihop { peer_addr, .. } => *peer_addr,
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKey::SingleHop { ifname, peer_addr } => {
                write!(f, "{ifname}-{peer_addr}")
            }
            SessionKey::Multihop {
                local_addr,
                peer_addr,
            } => {
                write!(f, "{local_addr}-{peer_addr}")
            }
        }
    }
}
