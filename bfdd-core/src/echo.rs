//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};

use crate::session::SessionId;

// New module: the teacher has no echo support. Grounded in
// `holo_bfd::network`'s packet-info/demux style (match on a field pulled out
// of the datagram to find the owning session) and `holo_bfd::packet`'s
// encode/decode shape, applied to a locally defined Echo payload — RFC 5880
// deliberately leaves the Echo packet format unspecified beyond "whatever
// the local system can demultiplex on receipt", since it never leaves the
// local<->peer<->local loop.
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Magic ("BFDE")                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |    Version    |                   Reserved                   |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       My Discriminator                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

const MAGIC: u32 = 0x42_46_44_45; // "BFDE"
const VERSION: u8 = 1;
pub const ECHO_PACKET_LEN: usize = 12;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EchoPacket {
    pub my_discr: u32,
}

#[derive(Debug, Eq, PartialEq)]
pub enum EchoDecodeError {
    IncompletePacket,
    BadMagic(u32),
    UnsupportedVersion(u8),
    ReadOutOfBounds,
}

impl EchoPacket {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(ECHO_PACKET_LEN);
        buf.put_u32(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(0);
        buf.put_u16(0);
        buf.put_u32(self.my_discr);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<EchoPacket, EchoDecodeError> {
        if data.len() < ECHO_PACKET_LEN {
            return Err(EchoDecodeError::IncompletePacket);
        }
        let mut buf = Bytes::copy_from_slice(data);
        let magic = buf.try_get_u32()?;
        if magic != MAGIC {
            return Err(EchoDecodeError::BadMagic(magic));
        }
        let version = buf.try_get_u8()?;
        if version != VERSION {
            return Err(EchoDecodeError::UnsupportedVersion(version));
        }
        let _reserved_u8 = buf.try_get_u8()?;
        let _reserved_u16 = buf.try_get_u16()?;
        let my_discr = buf.try_get_u32()?;
        Ok(EchoPacket { my_discr })
    }
}

impl From<TryGetError> for EchoDecodeError {
    fn from(_: TryGetError) -> EchoDecodeError {
        EchoDecodeError::ReadOutOfBounds
    }
}

impl std::fmt::Display for EchoDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EchoDecodeError::IncompletePacket => write!(f, "incomplete echo packet"),
            EchoDecodeError::BadMagic(magic) => write!(f, "bad echo magic: {magic:#x}"),
            EchoDecodeError::UnsupportedVersion(version) => {
                write!(f, "unsupported echo version: {version}")
            }
            EchoDecodeError::ReadOutOfBounds => write!(f, "echo packet read out of bounds"),
        }
    }
}

impl std::error::Error for EchoDecodeError {}

// Per-session Echo function state. Independent of the control FSM: an Echo
// detection timeout only flips `EchoState::up` and is reported through
// `SessionEvent::EchoStateChanged`, it never transitions the control
// session's state directly (RFC 9747).
#[derive(Debug)]
pub struct EchoState {
    pub active: bool,
    // Required Min Echo Rx Interval most recently advertised by the peer in
    // a Control packet; echo transmission must respect it.
    pub remote_req_min_echo_rx: u32,
    // Whether the Echo function itself currently considers the loopback path
    // healthy. Tracked independently of the control session's FSM state: an
    // Echo detection timeout never touches `Session::fsm` directly, it only
    // flips this flag and is reported through a dedicated event.
    pub up: bool,
}

impl Default for EchoState {
    fn default() -> EchoState {
        EchoState {
            active: false,
            remote_req_min_echo_rx: 0,
            up: true,
        }
    }
}

impl EchoState {
    // Tx interval to use for outgoing Echo packets: the larger of the local
    // configured rate and whatever minimum the peer most recently demanded.
    pub fn tx_interval(&self, local_min_echo_tx: u32) -> Option<u32> {
        if !self.active || self.remote_req_min_echo_rx == 0 {
            return None;
        }
        Some(std::cmp::max(local_min_echo_tx, self.remote_req_min_echo_rx))
    }

    // Detection window for the Echo function: `detect_mult` times the
    // negotiated echo Tx interval, mirroring the control plane's detection
    // time formula (RFC 5880 Section 6.8.9).
    pub fn detection_time(&self, local_min_echo_tx: u32, detect_mult: u8) -> Option<u32> {
        self.tx_interval(local_min_echo_tx)
            .map(|interval| detect_mult as u32 * interval)
    }
}

// Verifies a received Echo packet actually belongs to `expected_discr`
// (the discriminator this system stamped on the Echo packet it sent out),
// guarding against stray or replayed loopback traffic.
pub fn validate(packet: &EchoPacket, expected_discr: u32) -> bool {
    packet.my_discr == expected_discr
}

// Identifies which session an inbound Echo datagram belongs to, given the
// discriminator it was stamped with on the way out.
pub fn demux(my_discr: u32, lookup: impl Fn(u32) -> Option<SessionId>) -> Option<SessionId> {
    lookup(my_discr)
}
