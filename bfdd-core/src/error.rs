//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use tracing::warn;

use crate::echo::EchoDecodeError;
use crate::packet::{DecodeError, PacketFlags};
use crate::session::SessionId;

// bfdd errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors.
    IoError(IoError),
    // Inter-task communication.
    SessionIdNotFound(SessionId),
    SessionKeyNotFound,
    // Packet input.
    UdpInvalidSourceAddr(IpAddr),
    UdpPacketDecodeError(DecodeError),
    SessionNoMatch(u32),
    EchoPacketDecodeError(EchoDecodeError),
    EchoNoMatch,
    VersionMismatch(u8),
    InvalidDetectMult(u8),
    InvalidFlags(PacketFlags),
    InvalidMyDiscriminator(u32),
    InvalidYourDiscriminator(u32),
    AuthFailed,
    AuthRequiredMissing,
    AuthUnexpected,
    GtsmViolation(u8),
    // Session manager / configuration.
    InvalidArgument(String),
    SessionAlreadyExists,
    DiscriminatorPoolExhausted,
    UnsolicitedCreationDenied(IpAddr),
    UnsolicitedCreationLimitReached,
}

// bfdd I/O errors.
#[derive(Debug)]
pub enum IoError {
    UdpSocketError(std::io::Error),
    UdpRecvError(std::io::Error),
    UdpSendError(std::io::Error),
    UdpRecvMissingSourceAddr,
    UdpRecvMissingAncillaryData,
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::SessionIdNotFound(sess_id) => {
                warn!(?sess_id, "{}", self);
            }
            Error::SessionKeyNotFound => {
                warn!("{}", self);
            }
            Error::UdpInvalidSourceAddr(addr) => {
                warn!(address = %addr, "{}", self);
            }
            Error::UdpPacketDecodeError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            Error::SessionNoMatch(your_discr) => {
                warn!(%your_discr, "{}", self);
            }
            Error::EchoPacketDecodeError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            Error::EchoNoMatch => {
                warn!("{}", self);
            }
            Error::VersionMismatch(version) => {
                warn!(%version, "{}", self);
            }
            Error::InvalidDetectMult(detect_mult) => {
                warn!(%detect_mult, "{}", self);
            }
            Error::InvalidFlags(flags) => {
                warn!(?flags, "{}", self);
            }
            Error::InvalidMyDiscriminator(discr) => {
                warn!(%discr, "{}", self);
            }
            Error::InvalidYourDiscriminator(discr) => {
                warn!(%discr, "{}", self);
            }
            Error::AuthFailed | Error::AuthRequiredMissing | Error::AuthUnexpected => {
                warn!("{}", self);
            }
            Error::GtsmViolation(ttl) => {
                warn!(%ttl, "{}", self);
            }
            Error::InvalidArgument(msg) => {
                warn!(%msg, "{}", self);
            }
            Error::SessionAlreadyExists | Error::DiscriminatorPoolExhausted => {
                warn!("{}", self);
            }
            Error::UnsolicitedCreationDenied(addr) => {
                warn!(address = %addr, "{}", self);
            }
            Error::UnsolicitedCreationLimitReached => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::SessionIdNotFound(..) => write!(f, "session ID not found"),
            Error::SessionKeyNotFound => write!(f, "session key not found"),
            Error::UdpInvalidSourceAddr(..) => write!(f, "invalid source address"),
            Error::UdpPacketDecodeError(..) => write!(f, "failed to decode packet"),
            Error::SessionNoMatch(..) => write!(f, "failed to find session"),
            Error::EchoPacketDecodeError(..) => write!(f, "failed to decode echo packet"),
            Error::EchoNoMatch => write!(f, "received echo packet matches no session"),
            Error::VersionMismatch(..) => write!(f, "packet version mismatch"),
            Error::InvalidDetectMult(..) => write!(f, "received invalid detection multiplier"),
            Error::InvalidFlags(..) => write!(f, "received invalid flags"),
            Error::InvalidMyDiscriminator(..) => write!(f, "received invalid My Discriminator"),
            Error::InvalidYourDiscriminator(..) => write!(f, "received invalid Your Discriminator"),
            Error::AuthFailed => write!(f, "failed to authenticate packet"),
            Error::AuthRequiredMissing => {
                write!(f, "authentication required but packet carries none")
            }
            Error::AuthUnexpected => write!(f, "received unexpected authentication section"),
            Error::GtsmViolation(..) => write!(f, "GTSM check failed: TTL not 255"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::SessionAlreadyExists => write!(f, "session already exists"),
            Error::DiscriminatorPoolExhausted => write!(f, "discriminator pool exhausted"),
            Error::UnsolicitedCreationDenied(..) => {
                write!(f, "unsolicited session creation denied by policy")
            }
            Error::UnsolicitedCreationLimitReached => {
                write!(f, "unsolicited session creation limit reached")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::UdpPacketDecodeError(error) => Some(error),
            Error::EchoPacketDecodeError(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub fn log(&self) {
        match self {
            IoError::UdpSocketError(error)
            | IoError::UdpRecvError(error)
            | IoError::UdpSendError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::UdpRecvMissingSourceAddr | IoError::UdpRecvMissingAncillaryData => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::UdpSocketError(..) => write!(f, "failed to create UDP socket"),
            IoError::UdpRecvError(..) => write!(f, "failed to receive UDP packet"),
            IoError::UdpSendError(..) => write!(f, "failed to send UDP packet"),
            IoError::UdpRecvMissingSourceAddr => {
                write!(f, "failed to retrieve source address from received packet")
            }
            IoError::UdpRecvMissingAncillaryData => write!(
                f,
                "failed to retrieve ancillary data from received packet"
            ),
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::UdpSocketError(error)
            | IoError::UdpRecvError(error)
            | IoError::UdpSendError(error) => Some(error),
            _ => None,
        }
    }
}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
