//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use chrono::{DateTime, Utc};
use derive_new::new;

use crate::align;
use crate::auth::AuthState;
use crate::config::{SessionConfig, SessionKey};
use crate::debug::Debug;
use crate::packet::{DiagnosticCode, Packet, PacketFlags, State};

// The slow Tx interval is used to conserve bandwidth while the session is
// not Up (RFC 5880 Section 6.8.3).
pub const SLOW_TX_INTERVAL: u32 = 1_000_000;

pub type SessionId = u64;

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub key: SessionKey,
    pub config: SessionConfig,
    pub fsm: FsmState,
    pub stats: SessionStatistics,
    pub auth_tx: AuthState,
    pub auth_rx: AuthState,
    // Set for sessions created by `Manager::create_session`/`reconcile`.
    // Sessions created implicitly by an unsolicited peer (RFC 9468) start
    // out with this cleared and are torn down once the peer goes away.
    pub configured: bool,
}

#[derive(Debug)]
pub struct FsmState {
    pub local_state: State,
    pub local_discr: u32,
    pub local_diag: DiagnosticCode,
    pub curr_min_tx: u32,
    pub curr_min_rx: u32,
    pub demand_mode: bool,
    pub remote: Option<RemoteInfo>,
    pub poll_active: bool,
}

#[derive(Clone, Debug, new)]
pub struct RemoteInfo {
    pub state: State,
    pub discr: u32,
    pub diag: u8,
    pub multiplier: u8,
    pub min_tx: u32,
    pub min_rx: u32,
    pub demand_mode: bool,
}

#[derive(Debug)]
pub struct SessionStatistics {
    pub create_time: DateTime<Utc>,
    pub last_state_change_time: Option<DateTime<Utc>>,
    pub last_down_time: Option<DateTime<Utc>>,
    pub last_up_time: Option<DateTime<Utc>>,
    pub down_count: u32,
    pub admin_down_count: u32,
    pub rx_packet_count: u64,
    pub tx_packet_count: u64,
    pub rx_error_count: u64,
    pub tx_error_count: u64,
}

impl Default for SessionStatistics {
    fn default() -> SessionStatistics {
        SessionStatistics {
            create_time: Utc::now(),
            last_state_change_time: None,
            last_down_time: None,
            last_up_time: None,
            down_count: 0,
            admin_down_count: 0,
            rx_packet_count: 0,
            tx_packet_count: 0,
            rx_error_count: 0,
            tx_error_count: 0,
        }
    }
}

// ===== impl Session =====

impl Session {
    pub(crate) fn new(
        id: SessionId,
        key: SessionKey,
        config: SessionConfig,
        local_discr: u32,
    ) -> Session {
        Debug::SessionCreate(&key).log();

        let curr_min_tx = config.desired_min_tx_us;
        let curr_min_rx = config.required_min_rx_us;

        Session {
            id,
            key,
            config,
            fsm: FsmState {
                local_state: State::Down,
                local_discr,
                local_diag: DiagnosticCode::Nothing,
                curr_min_tx,
                curr_min_rx,
                demand_mode: false,
                remote: None,
                poll_active: false,
            },
            stats: SessionStatistics::default(),
            auth_tx: AuthState::default(),
            auth_rx: AuthState::default(),
            configured: true,
        }
    }

    // Returns the locally configured Desired Min Tx Interval, forced to the
    // slow rate while the session isn't Up (RFC 5880 Section 6.8.3), and
    // snapped to the RFC 7419 common interval set when requested.
    pub fn desired_tx_interval(&self) -> u32 {
        if self.fsm.local_state != State::Up {
            return SLOW_TX_INTERVAL;
        }
        self.maybe_align(self.config.desired_min_tx_us)
    }

    // Returns the locally configured Required Min Rx Interval.
    pub fn required_min_rx(&self) -> u32 {
        self.maybe_align(self.config.required_min_rx_us)
    }

    fn maybe_align(&self, interval_us: u32) -> u32 {
        if self.config.align_intervals {
            align::align_up(interval_us)
        } else {
            interval_us
        }
    }

    // Returns the last Required Min Rx Interval received from the peer, or
    // the RFC 5880-mandated initial value of one microsecond.
    pub fn remote_min_rx_interval(&self) -> u32 {
        self.fsm.remote.as_ref().map(|r| r.min_rx).unwrap_or(1)
    }

    // The negotiated Tx interval, or `None` if the session must not transmit
    // periodic Control packets (RFC 5880 Section 6.8.7).
    pub fn negotiated_tx_interval(&self) -> Option<u32> {
        let remote_min_rx = self.remote_min_rx_interval();
        if remote_min_rx == 0 {
            return None;
        }
        Some(std::cmp::max(self.fsm.curr_min_tx, remote_min_rx))
    }

    // The negotiated Rx interval, used to compute the Detection Time.
    pub fn negotiated_rx_interval(&self) -> Option<u32> {
        self.fsm
            .remote
            .as_ref()
            .map(|remote| std::cmp::max(self.fsm.curr_min_rx, remote.min_tx))
    }

    // The Detection Time, per RFC 5880 Section 6.8.4: the peer's Detect Mult
    // multiplied by the agreed transmit interval.
    pub fn detection_time(&self) -> Option<u32> {
        self.fsm.remote.as_ref().and_then(|remote| {
            self.negotiated_rx_interval()
                .map(|rx| remote.multiplier as u32 * rx)
        })
    }

    // Applies RFC 5880 Section 6.8.7 jitter to a Tx interval: transmission
    // happens in the range [0.75, 0.90) of the nominal interval, or
    // [0.75, 1.00) when Detect Mult is 1 (to avoid systemic correlation
    // between the two ends of a session sending at the boundary).
    pub fn jitter_tx_interval(&self, interval_us: u32, rand_fraction: f64) -> u32 {
        let upper = if self.config.detect_mult == 1 { 1.00 } else { 0.90 };
        let span = upper - 0.75;
        let factor = 0.75 + rand_fraction * span;
        ((interval_us as f64) * factor) as u32
    }

    // Generates a Control packet reflecting the session's current state.
    pub fn generate_packet(&self) -> Packet {
        let mut flags = PacketFlags::empty();
        if self.fsm.poll_active {
            flags.insert(PacketFlags::P);
        }
        if self.fsm.demand_mode {
            flags.insert(PacketFlags::D);
        }

        let echo_rx = self
            .config
            .echo
            .as_ref()
            .filter(|echo| echo.enabled)
            .map(|echo| echo.required_min_echo_rx_us)
            .unwrap_or(0);

        Packet {
            version: Packet::VERSION,
            diag: self.fsm.local_diag as u8,
            state: self.fsm.local_state,
            flags,
            detect_mult: self.config.detect_mult,
            my_discr: self.fsm.local_discr,
            your_discr: self
                .fsm
                .remote
                .as_ref()
                .map(|remote| remote.discr)
                .unwrap_or(0),
            desired_min_tx: self.desired_tx_interval(),
            req_min_rx: self.required_min_rx(),
            req_min_echo_rx: echo_rx,
            auth: None,
        }
    }

    // Generates the Final reply sent in response to a received Poll.
    pub fn generate_final_packet(&self) -> Packet {
        let mut packet = self.generate_packet();
        packet.flags.remove(PacketFlags::P);
        packet.flags.insert(PacketFlags::F);
        packet
    }

    // Applies a new FSM state, updating diagnostics and bookkeeping the way
    // `holo_bfd::session::Session::state_update` does.
    pub fn state_update(&mut self, state: State, diag: DiagnosticCode) {
        let old_state = self.fsm.local_state;
        self.fsm.local_state = state;
        self.fsm.local_diag = diag;

        Debug::FsmTransition(&self.key, old_state, state).log();

        self.stats.last_state_change_time = Some(Utc::now());
        match state {
            State::AdminDown => self.stats.admin_down_count += 1,
            State::Down => {
                self.stats.last_down_time = Some(Utc::now());
                self.stats.down_count += 1;
            }
            State::Up => self.stats.last_up_time = Some(Utc::now()),
            State::Init => {}
        }

        if old_state == State::Up && state != State::Up {
            // Re-activate the slow Tx interval.
            self.fsm.curr_min_tx = SLOW_TX_INTERVAL;
        } else if state == State::Up && old_state != State::Up {
            // A Poll Sequence deactivates the slow Tx interval once the peer
            // has acknowledged the real one.
            self.poll_sequence_start();
        }
    }

    // Whether the transition from `old_state` to the session's current state
    // should be surfaced to event bus subscribers (RFC 5882 Section 4.2):
    // Up<->AdminDown transitions where the peer itself reported AdminDown
    // are suppressed, since they reflect routine maintenance rather than a
    // path failure.
    pub fn should_notify(&self, old_state: State) -> bool {
        let new_state = self.fsm.local_state;
        if new_state == State::Up {
            return true;
        }
        if old_state == State::Up {
            if new_state == State::AdminDown {
                return false;
            }
            if new_state == State::Down
                && self
                    .fsm
                    .remote
                    .as_ref()
                    .is_some_and(|r| r.state == State::AdminDown)
            {
                return false;
            }
            return true;
        }
        false
    }

    pub fn poll_sequence_start(&mut self) {
        Debug::PollSequenceStart(&self.key).log();
        self.fsm.poll_active = true;
    }

    pub fn poll_sequence_terminate(&mut self) {
        Debug::PollSequenceEnd(&self.key).log();
        self.fsm.poll_active = false;
        self.fsm.curr_min_tx = self.config.desired_min_tx_us;
        self.fsm.curr_min_rx = self.config.required_min_rx_us;
    }

    pub fn poll_sequence_is_active(&self) -> bool {
        self.fsm.poll_active
    }
}

// RFC 5880 Section 6.8.6's Control packet reception FSM transition table,
// as a pure function so it can be exhaustively unit-tested in isolation.
// The table is complete: every (local, remote) pair not listed here leaves
// the local state unchanged.
pub fn fsm_transition(local: State, remote: State) -> Option<(State, DiagnosticCode)> {
    use DiagnosticCode::NeighborSignaledDown;
    use State::*;

    match (local, remote) {
        (AdminDown, _) => None,
        (Down, AdminDown) => Some((Down, NeighborSignaledDown)),
        (Down, Down) => Some((Init, DiagnosticCode::Nothing)),
        (Down, Init) => Some((Up, DiagnosticCode::Nothing)),
        (Down, Up) => None,
        (Init, AdminDown) => Some((Down, NeighborSignaledDown)),
        (Init, Init) | (Init, Up) => Some((Up, DiagnosticCode::Nothing)),
        (Init, Down) => None,
        (Up, AdminDown) => Some((Down, NeighborSignaledDown)),
        (Up, Down) => Some((Down, NeighborSignaledDown)),
        (Up, Init) | (Up, Up) => None,
    }
}
