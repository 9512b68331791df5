//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::BytesMut;
use md5::{Digest, Md5};
use sha1::Sha1;

use crate::config::{AuthConfig, AuthType};
use crate::error::Error;
use crate::packet::{AuthSection, AuthenticationType, Packet};

// Offset of the Auth Key/Digest field within an encoded Control packet that
// carries a Keyed MD5/SHA1 (or meticulous variant) authentication section:
// 24-byte mandatory section + 1 (Auth Type) + 1 (Auth Len) + 1 (Auth Key ID)
// + 1 (Reserved) + 4 (Auth Sequence Number).
const DIGEST_OFFSET: usize = 32;
const MD5_DIGEST_LEN: usize = 16;
const SHA1_DIGEST_LEN: usize = 20;

// Per-session, per-direction authentication state that must survive across
// packets: the last transmitted sequence number, and the receive-side
// bookkeeping used to enforce RFC 5880 Section 6.7.3's sequence number
// rules. Kept outside of `AuthConfig` (which is static configuration) the
// same way the teacher keeps `Session`'s live counters separate from
// `SessionCfg`.
#[derive(Clone, Debug, Default)]
pub struct AuthState {
    pub tx_seq: u32,
    rx_seq: Option<u32>,
}

impl AuthState {
    pub fn next_tx_seq(&mut self) -> u32 {
        let seq = self.tx_seq;
        self.tx_seq = self.tx_seq.wrapping_add(1);
        seq
    }
}

// Attaches an authentication section with a zero-filled digest/password to
// `packet`, ready for `sign` to compute the digest over the fully encoded
// bytes.
pub fn prepare(packet: &mut Packet, cfg: &AuthConfig, tx_seq: u32) {
    packet.auth = Some(match cfg.auth_type {
        AuthType::SimplePassword => {
            let password = cfg
                .keys
                .get(&cfg.active_key_id)
                .cloned()
                .unwrap_or_default();
            AuthSection::SimplePassword {
                key_id: cfg.active_key_id,
                password,
            }
        }
        AuthType::KeyedMd5 | AuthType::MeticulousKeyedMd5 => AuthSection::Keyed {
            auth_type: cfg.auth_type.wire_type(),
            key_id: cfg.active_key_id,
            seq: tx_seq,
            digest: vec![0; MD5_DIGEST_LEN],
        },
        AuthType::KeyedSha1 | AuthType::MeticulousKeyedSha1 => AuthSection::Keyed {
            auth_type: cfg.auth_type.wire_type(),
            key_id: cfg.active_key_id,
            seq: tx_seq,
            digest: vec![0; SHA1_DIGEST_LEN],
        },
    });
}

// Computes and patches the digest into an already-encoded packet buffer
// produced from a packet previously prepared with `prepare`. Simple
// Password sections need no post-processing since the password itself is
// the authentication data.
pub fn sign(buf: &mut BytesMut, cfg: &AuthConfig) {
    let key = match cfg.keys.get(&cfg.active_key_id) {
        Some(key) => key,
        None => return,
    };
    match cfg.auth_type {
        AuthType::SimplePassword => {}
        AuthType::KeyedMd5 | AuthType::MeticulousKeyedMd5 => {
            let digest = keyed_md5_digest(buf, key);
            buf[DIGEST_OFFSET..DIGEST_OFFSET + MD5_DIGEST_LEN].copy_from_slice(&digest);
        }
        AuthType::KeyedSha1 | AuthType::MeticulousKeyedSha1 => {
            let digest = keyed_sha1_digest(buf, key);
            buf[DIGEST_OFFSET..DIGEST_OFFSET + SHA1_DIGEST_LEN].copy_from_slice(&digest);
        }
    }
}

// Verifies the authentication section of a received packet against `cfg`,
// updating `rx_state`'s sequence number bookkeeping on success. Never
// mutates session FSM state directly; callers are expected to drop the
// packet entirely on `Err` without otherwise acting on its contents.
pub fn verify(
    raw: &[u8],
    packet: &Packet,
    cfg: &AuthConfig,
    detect_mult: u8,
    rx_state: &mut AuthState,
) -> Result<(), Error> {
    let Some(auth) = &packet.auth else {
        return Err(Error::AuthRequiredMissing);
    };

    match auth {
        AuthSection::SimplePassword { key_id, password } => {
            if cfg.auth_type != AuthType::SimplePassword {
                return Err(Error::AuthFailed);
            }
            let expected = cfg.keys.get(key_id).ok_or(Error::AuthFailed)?;
            if !constant_time_eq(password, expected) {
                return Err(Error::AuthFailed);
            }
            Ok(())
        }
        AuthSection::Keyed {
            auth_type,
            key_id,
            seq,
            digest,
        } => {
            if *auth_type != cfg.auth_type.wire_type() {
                return Err(Error::AuthFailed);
            }
            let expected_key = cfg.keys.get(key_id).ok_or(Error::AuthFailed)?;
            let computed = match auth_type {
                AuthenticationType::KeyedMd5 | AuthenticationType::MeticulousKeyedMd5 => {
                    keyed_md5_digest(raw, expected_key).to_vec()
                }
                AuthenticationType::KeyedSha1 | AuthenticationType::MeticulousKeyedSha1 => {
                    keyed_sha1_digest(raw, expected_key).to_vec()
                }
                AuthenticationType::SimplePassword => unreachable!(),
            };
            if !constant_time_eq(&computed, digest) {
                return Err(Error::AuthFailed);
            }

            let window = if cfg.seq_window == 0 {
                3 * detect_mult as u32
            } else {
                cfg.seq_window
            };
            check_sequence(rx_state, *seq, cfg.auth_type.is_meticulous(), window)
        }
    }
}

fn check_sequence(
    state: &mut AuthState,
    seq: u32,
    meticulous: bool,
    window: u32,
) -> Result<(), Error> {
    match state.rx_seq {
        None => {
            state.rx_seq = Some(seq);
            Ok(())
        }
        Some(last) => {
            if meticulous {
                // RFC 5880 Section 6.7.3: meticulous variants require the
                // sequence number to increase by exactly one on every packet.
                if seq != last.wrapping_add(1) {
                    return Err(Error::AuthFailed);
                }
            } else if !within_window(last, seq, window) {
                // Non-meticulous variants accept any sequence number within
                // a sliding window around the last one received: the sender
                // need not increment on every packet, so a repeat or a
                // smaller value within the window is not a replay, only one
                // that falls more than `window` behind `last` is.
                return Err(Error::AuthFailed);
            }
            state.rx_seq = Some(seq);
            Ok(())
        }
    }
}

// True if `seq` falls within `window` of `last` in either direction,
// wrapping-aware. A repeated or slightly smaller sequence number passes
// since a non-meticulous sender need not increment on every packet.
fn within_window(last: u32, seq: u32, window: u32) -> bool {
    let diff = (seq as i64) - (last as i64);
    let diff = if diff > i64::from(u32::MAX) / 2 {
        diff - (1i64 << 32)
    } else if diff < -(i64::from(u32::MAX) / 2) {
        diff + (1i64 << 32)
    } else {
        diff
    };
    diff.abs() <= window as i64
}

// RFC 5880 Section 6.7.3: the digest is computed over the entire packet
// with the Auth Key/Digest field initially filled with the secret key,
// zero-padded to the digest's natural length.
fn keyed_md5_digest(packet: &[u8], key: &[u8]) -> [u8; MD5_DIGEST_LEN] {
    let mut buf = packet.to_vec();
    let mut padded_key = key.to_vec();
    padded_key.resize(MD5_DIGEST_LEN, 0);
    buf[DIGEST_OFFSET..DIGEST_OFFSET + MD5_DIGEST_LEN].copy_from_slice(&padded_key);

    let mut hasher = Md5::new();
    hasher.update(&buf);
    hasher.finalize().into()
}

fn keyed_sha1_digest(packet: &[u8], key: &[u8]) -> [u8; SHA1_DIGEST_LEN] {
    use sha1::Digest as _;

    let mut buf = packet.to_vec();
    let mut padded_key = key.to_vec();
    padded_key.resize(SHA1_DIGEST_LEN, 0);
    buf[DIGEST_OFFSET..DIGEST_OFFSET + SHA1_DIGEST_LEN].copy_from_slice(&padded_key);

    let mut hasher = Sha1::new();
    hasher.update(&buf);
    hasher.finalize().into()
}

// Constant-time comparison so a mismatched digest never leaks timing
// information about how many leading bytes matched.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
