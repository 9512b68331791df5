//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use bfdd_core::auth::{self, AuthState};
use bfdd_core::packet::Packet;
use bfdd_core::{AuthConfig, AuthType, State};

fn base_packet() -> Packet {
    Packet {
        version: 1,
        diag: 0,
        state: State::Up,
        flags: bfdd_core::packet::PacketFlags::empty(),
        detect_mult: 3,
        my_discr: 0x1111,
        your_discr: 0x2222,
        desired_min_tx: 1_000_000,
        req_min_rx: 1_000_000,
        req_min_echo_rx: 0,
        auth: None,
    }
}

fn cfg(auth_type: AuthType, key: &[u8]) -> AuthConfig {
    let mut keys = BTreeMap::new();
    keys.insert(1u8, key.to_vec());
    AuthConfig {
        auth_type,
        keys,
        active_key_id: 1,
        seq_window: 0,
    }
}

// Runs `prepare`/`sign` to produce a signed, on-the-wire datagram for `seq`.
fn sign_packet(cfg: &AuthConfig, seq: u32) -> Vec<u8> {
    let mut packet = base_packet();
    auth::prepare(&mut packet, cfg, seq);
    let mut buf = packet.encode();
    auth::sign(&mut buf, cfg);
    buf.to_vec()
}

#[test]
fn simple_password_round_trip_verifies() {
    let cfg = cfg(AuthType::SimplePassword, b"hunter2");
    let raw = sign_packet(&cfg, 0);
    let decoded = Packet::decode(&raw).unwrap();
    let mut rx = AuthState::default();
    assert!(auth::verify(&raw, &decoded, &cfg, 3, &mut rx).is_ok());
}

#[test]
fn simple_password_wrong_secret_fails() {
    let signing_cfg = cfg(AuthType::SimplePassword, b"hunter2");
    let verifying_cfg = cfg(AuthType::SimplePassword, b"wrongpw");
    let raw = sign_packet(&signing_cfg, 0);
    let decoded = Packet::decode(&raw).unwrap();
    let mut rx = AuthState::default();
    assert!(auth::verify(&raw, &decoded, &verifying_cfg, 3, &mut rx).is_err());
}

#[test]
fn keyed_md5_round_trip_verifies() {
    let cfg = cfg(AuthType::KeyedMd5, b"secret-key");
    let raw = sign_packet(&cfg, 5);
    let decoded = Packet::decode(&raw).unwrap();
    let mut rx = AuthState::default();
    assert!(auth::verify(&raw, &decoded, &cfg, 3, &mut rx).is_ok());
}

#[test]
fn keyed_sha1_round_trip_verifies() {
    let cfg = cfg(AuthType::KeyedSha1, b"secret-key");
    let raw = sign_packet(&cfg, 5);
    let decoded = Packet::decode(&raw).unwrap();
    let mut rx = AuthState::default();
    assert!(auth::verify(&raw, &decoded, &cfg, 3, &mut rx).is_ok());
}

#[test]
fn keyed_md5_tampered_digest_fails() {
    let cfg = cfg(AuthType::KeyedMd5, b"secret-key");
    let mut raw = sign_packet(&cfg, 5);
    let last = raw.len() - 1;
    raw[last] ^= 0xff;
    let decoded = Packet::decode(&raw).unwrap();
    let mut rx = AuthState::default();
    assert!(auth::verify(&raw, &decoded, &cfg, 3, &mut rx).is_err());
}

#[test]
fn missing_auth_section_is_rejected_when_required() {
    let cfg = cfg(AuthType::KeyedMd5, b"secret-key");
    let packet = base_packet();
    let raw = packet.encode().to_vec();
    let mut rx = AuthState::default();
    assert!(auth::verify(&raw, &packet, &cfg, 3, &mut rx).is_err());
}

#[test]
fn auth_type_mismatch_is_rejected() {
    let signing_cfg = cfg(AuthType::KeyedMd5, b"secret-key");
    let verifying_cfg = cfg(AuthType::KeyedSha1, b"secret-key");
    let raw = sign_packet(&signing_cfg, 0);
    let decoded = Packet::decode(&raw).unwrap();
    let mut rx = AuthState::default();
    assert!(auth::verify(&raw, &decoded, &verifying_cfg, 3, &mut rx).is_err());
}

#[test]
fn meticulous_sequence_must_increase_by_exactly_one() {
    let cfg = cfg(AuthType::MeticulousKeyedMd5, b"secret-key");
    let mut rx = AuthState::default();

    for seq in 0..3u32 {
        let raw = sign_packet(&cfg, seq);
        let decoded = Packet::decode(&raw).unwrap();
        assert!(auth::verify(&raw, &decoded, &cfg, 3, &mut rx).is_ok());
    }

    // Skipping ahead violates the meticulous +1 rule.
    let raw = sign_packet(&cfg, 10);
    let decoded = Packet::decode(&raw).unwrap();
    assert!(auth::verify(&raw, &decoded, &cfg, 3, &mut rx).is_err());
}

#[test]
fn meticulous_sequence_rejects_replay() {
    let cfg = cfg(AuthType::MeticulousKeyedMd5, b"secret-key");
    let mut rx = AuthState::default();

    let raw = sign_packet(&cfg, 0);
    let decoded = Packet::decode(&raw).unwrap();
    assert!(auth::verify(&raw, &decoded, &cfg, 3, &mut rx).is_ok());

    // Replaying the same sequence number again must fail even though it
    // doesn't decrease.
    assert!(auth::verify(&raw, &decoded, &cfg, 3, &mut rx).is_err());
}

#[test]
fn non_meticulous_sequence_accepts_within_window() {
    let mut cfg = cfg(AuthType::KeyedMd5, b"secret-key");
    cfg.seq_window = 3;
    let mut rx = AuthState::default();

    let raw0 = sign_packet(&cfg, 100);
    let decoded0 = Packet::decode(&raw0).unwrap();
    assert!(auth::verify(&raw0, &decoded0, &cfg, 3, &mut rx).is_ok());

    // A jump of 3 is within the configured window.
    let raw1 = sign_packet(&cfg, 103);
    let decoded1 = Packet::decode(&raw1).unwrap();
    assert!(auth::verify(&raw1, &decoded1, &cfg, 3, &mut rx).is_ok());
}

#[test]
fn non_meticulous_sequence_rejects_jump_beyond_window() {
    let mut cfg = cfg(AuthType::KeyedMd5, b"secret-key");
    cfg.seq_window = 3;
    let mut rx = AuthState::default();

    let raw0 = sign_packet(&cfg, 100);
    let decoded0 = Packet::decode(&raw0).unwrap();
    assert!(auth::verify(&raw0, &decoded0, &cfg, 3, &mut rx).is_ok());

    // A jump of 4 exceeds the window of 3.
    let raw1 = sign_packet(&cfg, 104);
    let decoded1 = Packet::decode(&raw1).unwrap();
    assert!(auth::verify(&raw1, &decoded1, &cfg, 3, &mut rx).is_err());
}

#[test]
fn non_meticulous_sequence_accepts_repeat_and_backward_within_window() {
    let mut cfg = cfg(AuthType::KeyedMd5, b"secret-key");
    cfg.seq_window = 3;
    let mut rx = AuthState::default();

    let raw = sign_packet(&cfg, 50);
    let decoded = Packet::decode(&raw).unwrap();
    assert!(auth::verify(&raw, &decoded, &cfg, 3, &mut rx).is_ok());

    // A repeated sequence number (diff == 0) is not a replay for the
    // non-meticulous sliding window: the sender need not increment on
    // every packet.
    assert!(auth::verify(&raw, &decoded, &cfg, 3, &mut rx).is_ok());

    // A smaller sequence number within the window is likewise accepted.
    let raw_back = sign_packet(&cfg, 49);
    let decoded_back = Packet::decode(&raw_back).unwrap();
    assert!(auth::verify(&raw_back, &decoded_back, &cfg, 3, &mut rx).is_ok());

    // Falling further behind than the window is a replay.
    let raw_far_back = sign_packet(&cfg, 46);
    let decoded_far_back = Packet::decode(&raw_far_back).unwrap();
    assert!(auth::verify(&raw_far_back, &decoded_far_back, &cfg, 3, &mut rx).is_err());
}

#[test]
fn first_received_sequence_number_is_always_accepted() {
    let cfg = cfg(AuthType::MeticulousKeyedSha1, b"secret-key");
    let mut rx = AuthState::default();
    // An arbitrary starting sequence number is fine; there's nothing to
    // compare it against yet.
    let raw = sign_packet(&cfg, 0xdead_beef);
    let decoded = Packet::decode(&raw).unwrap();
    assert!(auth::verify(&raw, &decoded, &cfg, 3, &mut rx).is_ok());
}
