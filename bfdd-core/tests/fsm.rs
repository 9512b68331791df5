//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use bfdd_core::packet::DiagnosticCode;
use bfdd_core::session::fsm_transition;
use bfdd_core::State;

// RFC 5880 Section 6.8.6: AdminDown is sticky. Receiving any remote state
// while locally AdminDown never moves the local state.
#[test]
fn admin_down_is_sticky() {
    for remote in [State::AdminDown, State::Down, State::Init, State::Up] {
        assert_eq!(fsm_transition(State::AdminDown, remote), None);
    }
}

#[test]
fn down_plus_admin_down_signals_neighbor_down() {
    assert_eq!(
        fsm_transition(State::Down, State::AdminDown),
        Some((State::Down, DiagnosticCode::NeighborSignaledDown))
    );
}

#[test]
fn down_plus_down_moves_to_init() {
    assert_eq!(
        fsm_transition(State::Down, State::Down),
        Some((State::Init, DiagnosticCode::Nothing))
    );
}

#[test]
fn down_plus_init_moves_to_up() {
    assert_eq!(
        fsm_transition(State::Down, State::Init),
        Some((State::Up, DiagnosticCode::Nothing))
    );
}

#[test]
fn down_plus_up_is_ignored() {
    // A peer can't be Up while this side hasn't even seen a Down/Init from
    // it yet; no three-way handshake has happened.
    assert_eq!(fsm_transition(State::Down, State::Up), None);
}

#[test]
fn init_plus_admin_down_signals_neighbor_down() {
    assert_eq!(
        fsm_transition(State::Init, State::AdminDown),
        Some((State::Down, DiagnosticCode::NeighborSignaledDown))
    );
}

#[test]
fn init_plus_init_or_up_completes_the_handshake() {
    assert_eq!(
        fsm_transition(State::Init, State::Init),
        Some((State::Up, DiagnosticCode::Nothing))
    );
    assert_eq!(
        fsm_transition(State::Init, State::Up),
        Some((State::Up, DiagnosticCode::Nothing))
    );
}

#[test]
fn init_plus_down_is_ignored() {
    assert_eq!(fsm_transition(State::Init, State::Down), None);
}

#[test]
fn up_plus_admin_down_or_down_signals_neighbor_down() {
    assert_eq!(
        fsm_transition(State::Up, State::AdminDown),
        Some((State::Down, DiagnosticCode::NeighborSignaledDown))
    );
    assert_eq!(
        fsm_transition(State::Up, State::Down),
        Some((State::Down, DiagnosticCode::NeighborSignaledDown))
    );
}

#[test]
fn up_plus_init_or_up_stays_up() {
    assert_eq!(fsm_transition(State::Up, State::Init), None);
    assert_eq!(fsm_transition(State::Up, State::Up), None);
}

// Every (local, remote) pair is covered explicitly by the match above; this
// just confirms the function never panics across the full input space.
#[test]
fn every_state_pair_is_handled() {
    let states = [State::AdminDown, State::Down, State::Init, State::Up];
    for &local in &states {
        for &remote in &states {
            let _ = fsm_transition(local, remote);
        }
    }
}
