//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use derive_new::new;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

//
// Generic BFD Control Packet Format (RFC 5880 Section 4.1).
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |Vers |  Diag   |Sta|P|F|C|A|D|M|  Detect Mult  |    Length     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       My Discriminator                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      Your Discriminator                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                    Desired Min TX Interval                    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                   Required Min RX Interval                    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                 Required Min Echo RX Interval                 |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                    Auth Section (optional)                    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Packet {
    #[new(value = "1")]
    pub version: u8,
    pub diag: u8,
    pub state: State,
    pub flags: PacketFlags,
    pub detect_mult: u8,
    pub my_discr: u32,
    pub your_discr: u32,
    pub desired_min_tx: u32,
    pub req_min_rx: u32,
    pub req_min_echo_rx: u32,
    #[new(default)]
    pub auth: Option<AuthSection>,
}

// BFD session state, as carried on the wire (RFC 5880 Section 4.1).
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum State {
    AdminDown = 0,
    Down = 1,
    Init = 2,
    Up = 3,
}

// BFD Diagnostic Codes.
//
// IANA registry:
// https://www.iana.org/assignments/bfd-parameters/bfd-parameters.xhtml#bfd-parameters-1
#[derive(Clone, Copy, Debug, Default, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DiagnosticCode {
    #[default]
    Nothing = 0,
    ControlDetectionTimeExpired = 1,
    EchoFunctionFailed = 2,
    NeighborSignaledDown = 3,
    ForwardingPlaneReset = 4,
    PathDown = 5,
    ConcatenatedPathDown = 6,
    AdministrativelyDown = 7,
    ReverseConcatenatedPathDown = 8,
    MisConnectivityDefect = 9,
}

// BFD Authentication Types.
//
// IANA registry:
// https://www.iana.org/assignments/bfd-parameters/bfd-parameters.xhtml#bfd-parameters-2
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AuthenticationType {
    SimplePassword = 1,
    KeyedMd5 = 2,
    MeticulousKeyedMd5 = 3,
    KeyedSha1 = 4,
    MeticulousKeyedSha1 = 5,
}

// Decoded authentication section. The digest/hash fields carry whatever bytes
// were received on the wire; the auth engine (see `crate::auth`) is
// responsible for verifying them against the configured secret.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AuthSection {
    SimplePassword {
        key_id: u8,
        password: Vec<u8>,
    },
    Keyed {
        auth_type: AuthenticationType,
        key_id: u8,
        seq: u32,
        digest: Vec<u8>,
    },
}

// BFD packet flags.
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct PacketFlags: u8 {
        const P = 1 << 5;
        const F = 1 << 4;
        const C = 1 << 3;
        const A = 1 << 2;
        const D = 1 << 1;
        const M = 1 << 0;
    }
}

// BFD decode errors.
#[derive(Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    IncompletePacket,
    InvalidVersion(u8),
    InvalidPacketLength(u8),
    InvalidAuthenticationLength(u8),
    InvalidDetectMult(u8),
    InvalidMyDiscriminator,
    InvalidYourDiscriminator,
    InvalidFlags(PacketFlags),
    InvalidAuthenticationType(u8),
    LengthExceedsDatagram(u8, usize),
    ReadOutOfBounds,
}

// ===== impl Packet =====

impl Packet {
    pub const VERSION: u8 = 1;
    pub const MANDATORY_SECTION_LEN: u8 = 24;
    pub const SIMPLE_PASSWORD_MIN_LEN: u8 = 4;
    pub const SIMPLE_PASSWORD_MAX_LEN: u8 = 19;
    pub const KEYED_MD5_AUTH_LEN: u8 = 24;
    pub const KEYED_SHA1_AUTH_LEN: u8 = 28;

    // Encodes the BFD packet into a freshly allocated buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::MANDATORY_SECTION_LEN as usize + 28);

        let mut flags = self.flags;
        flags.set(PacketFlags::A, self.auth.is_some());

        buf.put_u8((self.version << 5) | self.diag);
        buf.put_u8(((self.state as u8) << 6) | flags.bits());
        buf.put_u8(self.detect_mult);
        // The length is patched in once the full packet is known.
        buf.put_u8(0);
        buf.put_u32(self.my_discr);
        buf.put_u32(self.your_discr);
        buf.put_u32(self.desired_min_tx);
        buf.put_u32(self.req_min_rx);
        buf.put_u32(self.req_min_echo_rx);

        if let Some(auth) = &self.auth {
            auth.encode(&mut buf);
        }

        let len = buf.len() as u8;
        buf[3] = len;
        buf
    }

    // Decodes a BFD packet from a received datagram.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = Bytes::copy_from_slice(data);

        if data.len() < Self::MANDATORY_SECTION_LEN as usize {
            return Err(DecodeError::IncompletePacket);
        }

        let first_byte = buf.try_get_u8()?;
        let sec_byte = buf.try_get_u8()?;
        let version = first_byte >> 5;
        if version != Self::VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }
        let diag = first_byte & 0x1F;
        let state = State::from_u8(sec_byte >> 6).unwrap();
        let flags = PacketFlags::from_bits_truncate(sec_byte & 0x3F);
        if flags.contains(PacketFlags::M) {
            return Err(DecodeError::InvalidFlags(flags));
        }

        let detect_mult = buf.try_get_u8()?;
        if detect_mult == 0 {
            return Err(DecodeError::InvalidDetectMult(detect_mult));
        }

        let length = buf.try_get_u8()?;
        if flags.contains(PacketFlags::A) {
            if length < Self::MANDATORY_SECTION_LEN + 3 {
                return Err(DecodeError::InvalidPacketLength(length));
            }
        } else if length != Self::MANDATORY_SECTION_LEN {
            return Err(DecodeError::InvalidPacketLength(length));
        }
        if length as usize > data.len() {
            return Err(DecodeError::LengthExceedsDatagram(length, data.len()));
        }

        let my_discr = buf.try_get_u32()?;
        if my_discr == 0 {
            return Err(DecodeError::InvalidMyDiscriminator);
        }
        let your_discr = buf.try_get_u32()?;
        if your_discr == 0 && matches!(state, State::Init | State::Up) {
            return Err(DecodeError::InvalidYourDiscriminator);
        }
        let desired_min_tx = buf.try_get_u32()?;
        let req_min_rx = buf.try_get_u32()?;
        let req_min_echo_rx = buf.try_get_u32()?;

        let auth = if flags.contains(PacketFlags::A) {
            let remaining = &data[Self::MANDATORY_SECTION_LEN as usize..length as usize];
            Some(AuthSection::decode(remaining)?)
        } else {
            None
        };

        Ok(Packet {
            version,
            diag,
            state,
            flags,
            detect_mult,
            my_discr,
            your_discr,
            desired_min_tx,
            req_min_rx,
            req_min_echo_rx,
            auth,
        })
    }
}

// ===== impl AuthSection =====

impl AuthSection {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            AuthSection::SimplePassword { key_id, password } => {
                buf.put_u8(AuthenticationType::SimplePassword as u8);
                buf.put_u8(3 + password.len() as u8);
                buf.put_u8(*key_id);
                buf.put_slice(password);
            }
            AuthSection::Keyed {
                auth_type,
                key_id,
                seq,
                digest,
            } => {
                buf.put_u8(*auth_type as u8);
                buf.put_u8(3 + 1 + 4 + digest.len() as u8);
                buf.put_u8(*key_id);
                buf.put_u8(0); // Reserved.
                buf.put_u32(*seq);
                buf.put_slice(digest);
            }
        }
    }

    fn decode(data: &[u8]) -> Result<AuthSection, DecodeError> {
        let mut buf = Bytes::copy_from_slice(data);
        let auth_type_raw = buf.try_get_u8()?;
        let auth_len = buf.try_get_u8()?;
        if auth_len as usize != data.len() {
            return Err(DecodeError::InvalidAuthenticationLength(auth_len));
        }
        let Some(auth_type) = AuthenticationType::from_u8(auth_type_raw) else {
            return Err(DecodeError::InvalidAuthenticationType(auth_type_raw));
        };

        match auth_type {
            AuthenticationType::SimplePassword => {
                if !(Packet::SIMPLE_PASSWORD_MIN_LEN..=Packet::SIMPLE_PASSWORD_MAX_LEN)
                    .contains(&auth_len)
                {
                    return Err(DecodeError::InvalidAuthenticationLength(auth_len));
                }
                let key_id = buf.try_get_u8()?;
                let password = buf[..].to_vec();
                Ok(AuthSection::SimplePassword { key_id, password })
            }
            AuthenticationType::KeyedMd5 | AuthenticationType::MeticulousKeyedMd5 => {
                if auth_len != Packet::KEYED_MD5_AUTH_LEN {
                    return Err(DecodeError::InvalidAuthenticationLength(auth_len));
                }
                let key_id = buf.try_get_u8()?;
                let _reserved = buf.try_get_u8()?;
                let seq = buf.try_get_u32()?;
                let digest = buf[..].to_vec();
                Ok(AuthSection::Keyed {
                    auth_type,
                    key_id,
                    seq,
                    digest,
                })
            }
            AuthenticationType::KeyedSha1 | AuthenticationType::MeticulousKeyedSha1 => {
                if auth_len != Packet::KEYED_SHA1_AUTH_LEN {
                    return Err(DecodeError::InvalidAuthenticationLength(auth_len));
                }
                let key_id = buf.try_get_u8()?;
                let _reserved = buf.try_get_u8()?;
                let seq = buf.try_get_u32()?;
                let digest = buf[..].to_vec();
                Ok(AuthSection::Keyed {
                    auth_type,
                    key_id,
                    seq,
                    digest,
                })
            }
        }
    }

    pub fn key_id(&self) -> u8 {
        match self {
            AuthSection::SimplePassword { key_id, .. } => *key_id,
            AuthSection::Keyed { key_id, .. } => *key_id,
        }
    }
}

// ===== impl DiagnosticCode =====

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiagnosticCode::Nothing => "no diagnostic",
            DiagnosticCode::ControlDetectionTimeExpired => "control detection time expired",
            DiagnosticCode::EchoFunctionFailed => "echo function failed",
            DiagnosticCode::NeighborSignaledDown => "neighbor signaled down",
            DiagnosticCode::ForwardingPlaneReset => "forwarding plane reset",
            DiagnosticCode::PathDown => "path down",
            DiagnosticCode::ConcatenatedPathDown => "concatenated path down",
            DiagnosticCode::AdministrativelyDown => "administratively down",
            DiagnosticCode::ReverseConcatenatedPathDown => "reverse concatenated path down",
            DiagnosticCode::MisConnectivityDefect => "misconnectivity defect",
        };
        write!(f, "{s}")
    }
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IncompletePacket => write!(f, "incomplete packet"),
            DecodeError::InvalidVersion(version) => write!(f, "invalid BFD version: {version}"),
            DecodeError::InvalidPacketLength(len) => write!(f, "invalid packet length: {len}"),
            DecodeError::InvalidAuthenticationLength(len) => {
                write!(f, "invalid authentication length: {len}")
            }
            DecodeError::InvalidDetectMult(mult) => write!(f, "invalid detect mult: {mult}"),
            DecodeError::InvalidMyDiscriminator => write!(f, "invalid My Discriminator"),
            DecodeError::InvalidYourDiscriminator => write!(f, "invalid Your Discriminator"),
            DecodeError::InvalidFlags(flags) => write!(f, "invalid flags: {flags:?}"),
            DecodeError::InvalidAuthenticationType(t) => {
                write!(f, "invalid authentication type: {t}")
            }
            DecodeError::LengthExceedsDatagram(len, datagram) => {
                write!(f, "declared length {len} exceeds datagram size {datagram}")
            }
            DecodeError::ReadOutOfBounds => write!(f, "attempt to read out of bounds"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::ReadOutOfBounds
    }
}
