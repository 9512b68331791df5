//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::RngCore;

use crate::auth;
use crate::config::{Role, SessionConfig, SessionKey, SessionType};
use crate::debug::Debug as BfdDebug;
use crate::echo::{self, EchoPacket, EchoState};
use crate::error::Error;
use crate::events::{EventBus, SessionEvent, Subscription};
use crate::packet::{DiagnosticCode, Packet, PacketFlags, State};
use crate::ports::{Clock, MetricsObserver, PacketSender};
use crate::session::{self, RemoteInfo, Session, SessionId};
use crate::timing::{IntervalTask, TimeoutTask};

// Generalizes `holo_bfd::session::Sessions`'s arena + multi-index design to
// the two-index demux scheme the engine needs (by `SessionKey`, the way an
// unsolicited or zero-discriminator packet is matched, and by local
// discriminator, the way every other packet is matched), and additionally
// owns the discriminator pool, the per-session timer tasks, and
// reconciliation against a declarative `SessionConfig` set — none of which
// the teacher's single-protocol-instance model needs, since `holo-bfd` never
// allocates a discriminator pool-style: it trusts `rand::rng().next_u32()`
// outright, with no collision check against `discr_tree`.

const MAX_DISCRIMINATOR_ATTEMPTS: u32 = 64;

// Policy governing RFC 9468 unsolicited ("passive-created") session
// creation: a peer may only cause a session to spring into existence if it
// is on the allow-list and the global cap has not been reached.
pub struct UnsolicitedPolicy {
    pub allowed_peers: Vec<IpAddr>,
    pub max_sessions: usize,
    pub desired_min_tx_us: u32,
    pub required_min_rx_us: u32,
    pub detect_mult: u8,
    // How long a dynamic session is left around after reaching Down before
    // it is deleted. Zero (the default) deletes it as soon as the runtime
    // schedules the cleanup task.
    pub cleanup_delay_ms: u64,
}

struct SessionEntry {
    session: Session,
    echo: EchoState,
    tx_timer: Option<IntervalTask>,
    detection_timer: Option<TimeoutTask>,
    echo_tx_timer: Option<IntervalTask>,
    echo_detection_timer: Option<TimeoutTask>,
    // RFC 9468 Section 5: armed whenever an unconfigured (dynamically
    // created) session is sitting in Down, cancelled on drop if the session
    // leaves Down or gets deleted some other way first.
    cleanup_timer: Option<TimeoutTask>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionEntry>,
    key_index: HashMap<SessionKey, SessionId>,
    discr_index: HashMap<u32, SessionId>,
    next_id: SessionId,
    unsolicited_count: usize,
}

pub struct Manager {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
    sender: Arc<dyn PacketSender>,
    observer: Arc<dyn MetricsObserver>,
    bus: Arc<EventBus>,
    unsolicited_policy: Option<UnsolicitedPolicy>,
}

// ===== impl Manager =====

impl Manager {
    pub fn new(
        clock: Arc<dyn Clock>,
        sender: Arc<dyn PacketSender>,
        observer: Arc<dyn MetricsObserver>,
        event_bus_capacity: usize,
        unsolicited_policy: Option<UnsolicitedPolicy>,
    ) -> Manager {
        Manager {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
            sender,
            observer,
            bus: Arc::new(EventBus::new(event_bus_capacity)),
            unsolicited_policy,
        }
    }

    // Subscribes to the session event stream. When `include_current` is
    // set, the subscription first replays a synthetic `Created` event for
    // every session that already existed at subscribe time, so a new
    // subscriber doesn't have to separately call `list_sessions` to learn
    // about sessions created before it connected.
    pub fn subscribe(&self, include_current: bool) -> Subscription {
        let mut subscription = self.bus.subscribe();
        if include_current {
            let inner = self.inner.lock().unwrap();
            let replay = inner
                .sessions
                .iter()
                .map(|(id, entry)| SessionEvent::Created {
                    session_id: *id,
                    key: entry.session.key.clone(),
                })
                .collect();
            drop(inner);
            subscription.set_replay(replay);
        }
        subscription
    }

    // ----- CRUD -----

    pub fn create_session(&self, config: SessionConfig) -> Result<SessionId, Error> {
        let key = config.key()?;
        if config.session_type == SessionType::Multihop && config.local_addr.is_none() {
            return Err(Error::InvalidArgument(
                "multihop session requires local_addr".into(),
            ));
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.key_index.contains_key(&key) {
            return Err(Error::SessionAlreadyExists);
        }

        let discr = Self::alloc_discriminator(&mut inner)?;
        let id = inner.next_id;
        inner.next_id += 1;

        let echo = EchoState {
            active: config.echo.as_ref().is_some_and(|e| e.enabled),
            ..EchoState::default()
        };
        let session = Session::new(id, key.clone(), config, discr);
        inner.sessions.insert(
            id,
            SessionEntry {
                session,
                echo,
                tx_timer: None,
                detection_timer: None,
                echo_tx_timer: None,
                echo_detection_timer: None,
                cleanup_timer: None,
            },
        );
        inner.key_index.insert(key.clone(), id);
        inner.discr_index.insert(discr, id);
        drop(inner);

        self.start_tx_timer(id);
        self.start_echo_timer(id);
        self.bus
            .publish(SessionEvent::Created { session_id: id, key });
        Ok(id)
    }

    pub fn delete_session(&self, id: SessionId) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .sessions
            .remove(&id)
            .ok_or(Error::SessionIdNotFound(id))?;
        inner.key_index.remove(&entry.session.key);
        inner.discr_index.remove(&entry.session.fsm.local_discr);
        if !entry.session.configured {
            inner.unsolicited_count = inner.unsolicited_count.saturating_sub(1);
        }
        let key = entry.session.key.clone();
        drop(inner);

        self.bus
            .publish(SessionEvent::Deleted { session_id: id, key });
        Ok(())
    }

    // Deleting is idempotent from the caller's point of view: deleting a
    // session that no longer exists is a no-op, not an error.
    pub fn delete_session_if_exists(&self, id: SessionId) {
        let _ = self.delete_session(id);
    }

    pub fn get_session_key(&self, id: SessionId) -> Result<SessionKey, Error> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(&id)
            .map(|e| e.session.key.clone())
            .ok_or(Error::SessionIdNotFound(id))
    }

    pub fn list_sessions(&self) -> Vec<SessionId> {
        let inner = self.inner.lock().unwrap();
        inner.sessions.keys().copied().collect()
    }

    pub fn session_state(&self, id: SessionId) -> Result<State, Error> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(&id)
            .map(|e| e.session.fsm.local_state)
            .ok_or(Error::SessionIdNotFound(id))
    }

    // Whether the Echo function currently considers its loopback path
    // healthy, independent of `session_state`'s control-plane FSM state.
    pub fn echo_up(&self, id: SessionId) -> Result<bool, Error> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(&id)
            .map(|e| e.echo.up)
            .ok_or(Error::SessionIdNotFound(id))
    }

    // The locally allocated discriminator, surfaced for northbound "show bfd
    // sessions"-style output and exercised directly by tests that simulate a
    // remote peer.
    pub fn local_discriminator(&self, id: SessionId) -> Result<u32, Error> {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(&id)
            .map(|e| e.session.fsm.local_discr)
            .ok_or(Error::SessionIdNotFound(id))
    }

    // Declaratively reconciles the manager's live sessions against
    // `desired`: sessions missing from the live set are created, sessions no
    // longer present in `desired` (and not created by an unsolicited peer)
    // are deleted, and sessions whose configuration changed have a new Poll
    // Sequence started so the peer learns the new parameters. Calling
    // `reconcile` twice with the same input is a no-op the second time.
    pub fn reconcile(&self, desired: Vec<SessionConfig>) -> Result<(), Error> {
        let mut desired_by_key = HashMap::new();
        for config in desired {
            let key = config.key()?;
            desired_by_key.insert(key, config);
        }

        let configured_ids: Vec<(SessionId, SessionKey)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .sessions
                .iter()
                .filter(|(_, e)| e.session.configured)
                .map(|(id, e)| (*id, e.session.key.clone()))
                .collect()
        };

        // Delete sessions no longer desired.
        for (id, key) in &configured_ids {
            if !desired_by_key.contains_key(key) {
                self.delete_session(*id)?;
            }
        }

        // Create or update the rest.
        for (key, config) in desired_by_key {
            let existing = {
                let inner = self.inner.lock().unwrap();
                inner.key_index.get(&key).copied()
            };
            match existing {
                None => {
                    self.create_session(config)?;
                }
                Some(id) => {
                    self.update_session_config(id, config)?;
                }
            }
        }

        Ok(())
    }

    fn update_session_config(&self, id: SessionId, config: SessionConfig) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .sessions
            .get_mut(&id)
            .ok_or(Error::SessionIdNotFound(id))?;
        let changed = entry.session.config.desired_min_tx_us != config.desired_min_tx_us
            || entry.session.config.required_min_rx_us != config.required_min_rx_us
            || entry.session.config.detect_mult != config.detect_mult;
        let echo_changed = entry.session.config.echo != config.echo;
        entry.echo.active = config.echo.as_ref().is_some_and(|e| e.enabled);
        entry.session.config = config;
        if changed {
            entry.session.poll_sequence_start();
            BfdDebug::SessionReconcile(&entry.session.key).log();
        }
        drop(inner);
        if changed {
            self.start_tx_timer(id);
        }
        if echo_changed {
            self.start_echo_timer(id);
        }
        Ok(())
    }

    // Tears every session down for a graceful shutdown: each session is
    // moved to AdminDown, a final Control packet announcing that is sent
    // best-effort, and all sessions are then removed. Draining an empty
    // manager is a no-op.
    pub async fn drain_all(&self) {
        let ids: Vec<SessionId> = self.list_sessions();
        for id in ids {
            let (packet, key) = {
                let mut inner = self.inner.lock().unwrap();
                let Some(entry) = inner.sessions.get_mut(&id) else {
                    continue;
                };
                entry
                    .session
                    .state_update(State::AdminDown, DiagnosticCode::Nothing);
                (entry.session.generate_packet(), entry.session.key.clone())
            };
            let datagram = packet.encode();
            let _ = self.sender.send_control(&key, &datagram).await;
            self.delete_session_if_exists(id);
        }
    }

    // ----- RFC 9468 unsolicited creation -----

    fn admit_unsolicited(&self, peer_addr: IpAddr, ifname: &str) -> Result<SessionId, Error> {
        let policy = self
            .unsolicited_policy
            .as_ref()
            .ok_or(Error::UnsolicitedCreationDenied(peer_addr))?;
        if !policy.allowed_peers.contains(&peer_addr) {
            return Err(Error::UnsolicitedCreationDenied(peer_addr));
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.unsolicited_count >= policy.max_sessions {
            return Err(Error::UnsolicitedCreationLimitReached);
        }
        inner.unsolicited_count += 1;
        drop(inner);

        let config = SessionConfig {
            peer_addr,
            local_addr: None,
            interface: Some(ifname.to_string()),
            session_type: SessionType::SingleHop,
            role: Role::Passive,
            desired_min_tx_us: policy.desired_min_tx_us,
            required_min_rx_us: policy.required_min_rx_us,
            required_min_echo_rx_us: 0,
            detect_mult: policy.detect_mult,
            align_intervals: false,
            auth: None,
            echo: None,
        };
        let key = config.key()?;

        let id = match self.create_session(config) {
            Ok(id) => id,
            Err(error) => {
                let mut inner = self.inner.lock().unwrap();
                inner.unsolicited_count = inner.unsolicited_count.saturating_sub(1);
                return Err(error);
            }
        };

        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(entry) = inner.sessions.get_mut(&id) {
                entry.session.configured = false;
            }
        }
        BfdDebug::UnsolicitedSessionCreated(&key).log();
        Ok(id)
    }

    // ----- packet delivery -----

    // Single entry point used by `bfdd-transport`'s receive loops. `ttl` is
    // `Some` for datagrams the transport already extracted a TTL from
    // (single-hop sessions are subject to GTSM, RFC 5881 Section 5).
    pub async fn deliver(
        &self,
        raw: &[u8],
        peer_addr: IpAddr,
        ifname: Option<&str>,
        ttl: Option<u8>,
    ) -> Result<(), Error> {
        let packet = Packet::decode(raw).map_err(Error::UdpPacketDecodeError)?;
        validate_packet(&packet)?;

        if let Some(ttl) = ttl
            && ifname.is_some()
            && ttl != 255
        {
            return Err(Error::GtsmViolation(ttl));
        }

        let id = match self.resolve_session(&packet, peer_addr, ifname) {
            Some(id) => id,
            None => {
                if packet.your_discr == 0
                    && let Some(ifname) = ifname
                    && let Ok(id) = self.admit_unsolicited(peer_addr, ifname)
                {
                    id
                } else {
                    return Err(Error::SessionNoMatch(packet.your_discr));
                }
            }
        };

        self.process_packet(id, raw, packet).await
    }

    fn resolve_session(
        &self,
        packet: &Packet,
        peer_addr: IpAddr,
        ifname: Option<&str>,
    ) -> Option<SessionId> {
        let inner = self.inner.lock().unwrap();
        if packet.your_discr != 0 {
            return inner.discr_index.get(&packet.your_discr).copied();
        }
        if let Some(ifname) = ifname {
            let key = SessionKey::SingleHop {
                ifname: ifname.to_string(),
                peer_addr,
            };
            return inner.key_index.get(&key).copied();
        }
        // Multihop sessions always carry a nonzero Your Discriminator once
        // established; a zero value with no interface context cannot be
        // demultiplexed.
        None
    }

    async fn process_packet(
        &self,
        id: SessionId,
        raw: &[u8],
        packet: Packet,
    ) -> Result<(), Error> {
        let observer = self.observer.clone();
        observer.control_packet_received(id);

        let (auth_result, old_state) = {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner
                .sessions
                .get_mut(&id)
                .ok_or(Error::SessionIdNotFound(id))?;
            entry.session.stats.rx_packet_count += 1;

            let auth_result = match &entry.session.config.auth {
                Some(auth_cfg) => auth::verify(
                    raw,
                    &packet,
                    auth_cfg,
                    entry.session.config.detect_mult,
                    &mut entry.session.auth_rx,
                ),
                None if packet.auth.is_some() => Err(Error::AuthUnexpected),
                None => Ok(()),
            };
            if auth_result.is_err() {
                entry.session.stats.rx_error_count += 1;
                observer.auth_failure(id);
            }
            (auth_result, entry.session.fsm.local_state)
        };
        auth_result?;

        if old_state == State::AdminDown {
            // RFC 5880 Section 6.8.6: silently discard.
            return Ok(());
        }

        let (next, key, poll_reply, notify) = {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner
                .sessions
                .get_mut(&id)
                .ok_or(Error::SessionIdNotFound(id))?;

            let old_remote_min_rx = entry.session.remote_min_rx_interval();
            entry.session.fsm.remote = Some(RemoteInfo::new(
                packet.state,
                packet.my_discr,
                packet.diag,
                packet.detect_mult,
                packet.desired_min_tx,
                packet.req_min_rx,
                packet.flags.contains(PacketFlags::D),
            ));
            entry.echo.remote_req_min_echo_rx = packet.req_min_echo_rx;

            if entry.session.poll_sequence_is_active() && packet.flags.contains(PacketFlags::F) {
                entry.session.poll_sequence_terminate();
            }

            let interval_changed = entry.session.remote_min_rx_interval() != old_remote_min_rx;

            let transition = session::fsm_transition(old_state, packet.state);
            let mut notify = false;
            if let Some((new_state, diag)) = transition {
                let should_notify = entry.session.should_notify(old_state);
                entry.session.state_update(new_state, diag);
                notify = should_notify;
            }

            if interval_changed || transition.is_some() {
                drop(inner);
                self.start_tx_timer(id);
                self.start_echo_timer(id);
                inner = self.inner.lock().unwrap();
            }
            let entry = inner.sessions.get_mut(&id).unwrap();
            self.rearm_detection_timer_locked(entry, id);
            if entry.echo.active {
                self.rearm_echo_detection_timer_locked(entry, id);
            }
            self.rearm_cleanup_timer_locked(entry, id);

            let poll_reply = packet.flags.contains(PacketFlags::P);
            let key = entry.session.key.clone();
            (transition, key, poll_reply, notify)
        };

        if let Some((new_state, _)) = next {
            observer.session_state_changed(id, &key, old_state, new_state);
            if notify {
                self.bus.publish(SessionEvent::StateChanged {
                    session_id: id,
                    key: key.clone(),
                    old_state,
                    new_state,
                });
            }
        }

        if poll_reply {
            let datagram = {
                let inner = self.inner.lock().unwrap();
                inner
                    .sessions
                    .get(&id)
                    .map(|e| e.session.generate_final_packet().encode())
            };
            if let Some(datagram) = datagram {
                let _ = self.sender.send_control(&key, &datagram).await;
            }
        }

        Ok(())
    }

    fn rearm_detection_timer_locked(&self, entry: &mut SessionEntry, id: SessionId) {
        let Some(detection_us) = entry.session.detection_time() else {
            entry.detection_timer = None;
            return;
        };
        let clock = self.clock.clone();
        let cb_clock = self.clock.clone();
        let inner = self.inner.clone();
        let observer = self.observer.clone();
        let bus = self.bus.clone();
        let cleanup_delay_ms = self
            .unsolicited_policy
            .as_ref()
            .map(|p| p.cleanup_delay_ms)
            .unwrap_or(0);
        let timeout = Duration::from_micros(detection_us as u64);
        let cb = move || {
            let inner = inner.clone();
            let observer = observer.clone();
            let bus = bus.clone();
            let cb_clock = cb_clock.clone();
            async move {
                let (key, old_state, transition) = {
                    let mut guard = inner.lock().unwrap();
                    let Some(entry) = guard.sessions.get_mut(&id) else {
                        return;
                    };
                    observer.detection_time_expired(id);
                    BfdDebug::DetectionTimeExpiry(&entry.session.key).log();
                    let old_state = entry.session.fsm.local_state;
                    entry
                        .session
                        .state_update(State::Down, DiagnosticCode::ControlDetectionTimeExpired);
                    entry.session.fsm.remote = None;
                    if !entry.session.configured {
                        entry.cleanup_timer = Some(Manager::spawn_cleanup_timer(
                            cb_clock,
                            inner.clone(),
                            bus.clone(),
                            id,
                            cleanup_delay_ms,
                        ));
                    }
                    (
                        entry.session.key.clone(),
                        old_state,
                        Some((State::Down, DiagnosticCode::ControlDetectionTimeExpired)),
                    )
                };
                if let Some((new_state, _)) = transition {
                    observer.session_state_changed(id, &key, old_state, new_state);
                    bus.publish(SessionEvent::StateChanged {
                        session_id: id,
                        key,
                        old_state,
                        new_state,
                    });
                }
            }
        };
        entry.detection_timer = Some(TimeoutTask::new(clock, timeout, cb));
    }

    fn start_tx_timer(&self, id: SessionId) {
        let inner_arc = self.inner.clone();
        let clock = self.clock.clone();
        let sender = self.sender.clone();
        let observer = self.observer.clone();

        let initial = {
            let inner = inner_arc.lock().unwrap();
            let Some(entry) = inner.sessions.get(&id) else {
                return;
            };
            entry
                .session
                .negotiated_tx_interval()
                .unwrap_or(session::SLOW_TX_INTERVAL)
        };

        let delay_inner = inner_arc.clone();
        let next_delay = move || {
            let inner = delay_inner.lock().unwrap();
            match inner.sessions.get(&id) {
                Some(entry) => {
                    let interval = entry
                        .session
                        .negotiated_tx_interval()
                        .unwrap_or(session::SLOW_TX_INTERVAL);
                    let jittered =
                        entry.session.jitter_tx_interval(interval, fraction_sample());
                    Duration::from_micros(jittered as u64)
                }
                None => Duration::from_micros(session::SLOW_TX_INTERVAL as u64),
            }
        };

        let cb_inner = inner_arc.clone();
        let cb_sender = sender.clone();
        let cb_observer = observer.clone();
        let cb = move || {
            let cb_inner = cb_inner.clone();
            let cb_sender = cb_sender.clone();
            let cb_observer = cb_observer.clone();
            async move {
                let datagram = {
                    let mut inner = cb_inner.lock().unwrap();
                    let Some(entry) = inner.sessions.get_mut(&id) else {
                        return;
                    };
                    let mut packet = entry.session.generate_packet();
                    let mut buf = match &entry.session.config.auth {
                        Some(auth_cfg) => {
                            let seq = entry.session.auth_tx.next_tx_seq();
                            auth::prepare(&mut packet, auth_cfg, seq);
                            let mut buf = packet.encode();
                            auth::sign(&mut buf, auth_cfg);
                            buf
                        }
                        None => packet.encode(),
                    };
                    let _ = &mut buf;
                    buf
                };
                let key = {
                    let inner = cb_inner.lock().unwrap();
                    inner.sessions.get(&id).map(|e| e.session.key.clone())
                };
                let Some(key) = key else { return };
                match cb_sender.send_control(&key, &datagram).await {
                    Ok(()) => {
                        cb_observer.control_packet_sent(id);
                        let mut inner = cb_inner.lock().unwrap();
                        if let Some(entry) = inner.sessions.get_mut(&id) {
                            entry.session.stats.tx_packet_count += 1;
                        }
                    }
                    Err(_) => {
                        let mut inner = cb_inner.lock().unwrap();
                        if let Some(entry) = inner.sessions.get_mut(&id) {
                            entry.session.stats.tx_error_count += 1;
                        }
                    }
                }
            }
        };

        let task = IntervalTask::new(clock, Duration::from_micros(initial as u64), next_delay, cb);
        let mut inner = inner_arc.lock().unwrap();
        if let Some(entry) = inner.sessions.get_mut(&id) {
            entry.tx_timer = Some(task);
        }
    }

    // ----- Echo function (RFC 5880 Section 6.4 / RFC 9747) -----

    fn start_echo_timer(&self, id: SessionId) {
        let inner_arc = self.inner.clone();
        let clock = self.clock.clone();
        let sender = self.sender.clone();
        let observer = self.observer.clone();

        let initial = {
            let inner = inner_arc.lock().unwrap();
            let Some(entry) = inner.sessions.get(&id) else {
                return;
            };
            let local_min_echo_tx = entry
                .session
                .config
                .echo
                .as_ref()
                .map(|e| e.required_min_echo_rx_us)
                .unwrap_or(0);
            match entry.echo.tx_interval(local_min_echo_tx) {
                Some(interval) => interval,
                None => {
                    return;
                }
            }
        };

        let delay_inner = inner_arc.clone();
        let next_delay = move || {
            let inner = delay_inner.lock().unwrap();
            match inner.sessions.get(&id) {
                Some(entry) => {
                    let local_min_echo_tx = entry
                        .session
                        .config
                        .echo
                        .as_ref()
                        .map(|e| e.required_min_echo_rx_us)
                        .unwrap_or(0);
                    let interval = entry
                        .echo
                        .tx_interval(local_min_echo_tx)
                        .unwrap_or(session::SLOW_TX_INTERVAL);
                    Duration::from_micros(interval as u64)
                }
                None => Duration::from_micros(session::SLOW_TX_INTERVAL as u64),
            }
        };

        let cb_inner = inner_arc.clone();
        let cb_sender = sender.clone();
        let cb_observer = observer.clone();
        let cb = move || {
            let cb_inner = cb_inner.clone();
            let cb_sender = cb_sender.clone();
            let cb_observer = cb_observer.clone();
            async move {
                let (key, datagram) = {
                    let inner = cb_inner.lock().unwrap();
                    let Some(entry) = inner.sessions.get(&id) else {
                        return;
                    };
                    if !entry.echo.active {
                        return;
                    }
                    let packet = EchoPacket {
                        my_discr: entry.session.fsm.local_discr,
                    };
                    (entry.session.key.clone(), packet.encode())
                };
                if cb_sender.send_echo(&key, &datagram).await.is_ok() {
                    cb_observer.echo_packet_sent(id);
                }
            }
        };

        let task = IntervalTask::new(clock, Duration::from_micros(initial as u64), next_delay, cb);
        let mut inner = inner_arc.lock().unwrap();
        if let Some(entry) = inner.sessions.get_mut(&id) {
            entry.echo_tx_timer = Some(task);
        }
    }

    fn rearm_echo_detection_timer_locked(&self, entry: &mut SessionEntry, id: SessionId) {
        let local_min_echo_tx = entry
            .session
            .config
            .echo
            .as_ref()
            .map(|e| e.required_min_echo_rx_us)
            .unwrap_or(0);
        let Some(detection_us) = entry
            .echo
            .detection_time(local_min_echo_tx, entry.session.config.detect_mult)
        else {
            entry.echo_detection_timer = None;
            return;
        };

        let clock = self.clock.clone();
        let inner = self.inner.clone();
        let observer = self.observer.clone();
        let bus = self.bus.clone();
        let timeout = Duration::from_micros(detection_us as u64);
        let cb = move || {
            let inner = inner.clone();
            let observer = observer.clone();
            let bus = bus.clone();
            async move {
                let key = {
                    let mut guard = inner.lock().unwrap();
                    let Some(entry) = guard.sessions.get_mut(&id) else {
                        return;
                    };
                    if !entry.echo.active || entry.session.fsm.local_state != State::Up {
                        return;
                    }
                    if !entry.echo.up {
                        return;
                    }
                    observer.detection_time_expired(id);
                    BfdDebug::DetectionTimeExpiry(&entry.session.key).log();
                    // RFC 9747: the Echo function's own detection timeout
                    // never touches the control session's FSM. The local
                    // system may keep the control session Up while
                    // declaring the Echo function Down.
                    entry.echo.up = false;
                    entry.session.key.clone()
                };
                bus.publish(SessionEvent::EchoStateChanged {
                    session_id: id,
                    key,
                    up: false,
                });
            }
        };
        entry.echo_detection_timer = Some(TimeoutTask::new(clock, timeout, cb));
    }

    // ----- RFC 9468 Section 5: dynamic session cleanup -----

    // Arms (or, if the session left Down or is a statically configured one,
    // disarms) the cleanup timer that deletes an unconfigured session some
    // time after it reaches Down. Called after every state transition so a
    // session that flaps back to Init/Up before the timer fires keeps living.
    fn rearm_cleanup_timer_locked(&self, entry: &mut SessionEntry, id: SessionId) {
        if entry.session.configured || entry.session.fsm.local_state != State::Down {
            entry.cleanup_timer = None;
            return;
        }
        let delay_ms = self
            .unsolicited_policy
            .as_ref()
            .map(|p| p.cleanup_delay_ms)
            .unwrap_or(0);
        entry.cleanup_timer = Some(Manager::spawn_cleanup_timer(
            self.clock.clone(),
            self.inner.clone(),
            self.bus.clone(),
            id,
            delay_ms,
        ));
    }

    fn spawn_cleanup_timer(
        clock: Arc<dyn Clock>,
        inner: Arc<Mutex<Inner>>,
        bus: Arc<EventBus>,
        id: SessionId,
        delay_ms: u64,
    ) -> TimeoutTask {
        let cb = move || {
            let inner = inner.clone();
            let bus = bus.clone();
            async move {
                let mut guard = inner.lock().unwrap();
                if let Some(removed_entry) = guard.sessions.remove(&id) {
                    guard.key_index.remove(&removed_entry.session.key);
                    guard.discr_index.remove(&removed_entry.session.fsm.local_discr);
                    guard.unsolicited_count = guard.unsolicited_count.saturating_sub(1);
                    let key = removed_entry.session.key.clone();
                    drop(guard);
                    bus.publish(SessionEvent::Deleted { session_id: id, key });
                }
            }
        };
        TimeoutTask::new(clock, Duration::from_millis(delay_ms), cb)
    }

    // Processes an inbound Echo datagram that looped back through the peer.
    // The datagram carries this system's own local discriminator, stamped on
    // the way out, which is how it is matched back to its owning session
    // rather than via `SessionKey` or Your Discriminator.
    pub async fn deliver_echo(&self, raw: &[u8]) -> Result<(), Error> {
        let packet = EchoPacket::decode(raw).map_err(Error::EchoPacketDecodeError)?;

        let mut inner = self.inner.lock().unwrap();
        let id = echo::demux(packet.my_discr, |discr| inner.discr_index.get(&discr).copied())
            .ok_or(Error::EchoNoMatch)?;
        let entry = inner
            .sessions
            .get_mut(&id)
            .ok_or(Error::EchoNoMatch)?;

        if !echo::validate(&packet, entry.session.fsm.local_discr) {
            return Err(Error::EchoNoMatch);
        }

        self.observer.echo_packet_received(id);
        let recovered = !entry.echo.up;
        if recovered {
            entry.echo.up = true;
        }
        let key = entry.session.key.clone();
        self.rearm_echo_detection_timer_locked(entry, id);
        drop(inner);

        if recovered {
            self.bus.publish(SessionEvent::EchoStateChanged {
                session_id: id,
                key,
                up: true,
            });
        }
        Ok(())
    }

    fn alloc_discriminator(inner: &mut Inner) -> Result<u32, Error> {
        for _ in 0..MAX_DISCRIMINATOR_ATTEMPTS {
            let candidate = rand::rng().next_u32();
            if candidate != 0 && !inner.discr_index.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(Error::DiscriminatorPoolExhausted)
    }
}

// Validates a received Control packet per RFC 5880 Section 6.8.6, before it
// is matched to a session.
fn validate_packet(packet: &Packet) -> Result<(), Error> {
    if packet.version != Packet::VERSION {
        return Err(Error::VersionMismatch(packet.version));
    }
    if packet.detect_mult == 0 {
        return Err(Error::InvalidDetectMult(packet.detect_mult));
    }
    if packet.flags.contains(PacketFlags::M)
        || (packet.flags.contains(PacketFlags::P) && packet.flags.contains(PacketFlags::F))
    {
        return Err(Error::InvalidFlags(packet.flags));
    }
    if packet.my_discr == 0 {
        return Err(Error::InvalidMyDiscriminator(packet.my_discr));
    }
    if packet.your_discr == 0 && !matches!(packet.state, State::Down | State::AdminDown) {
        return Err(Error::InvalidYourDiscriminator(packet.your_discr));
    }
    Ok(())
}

fn fraction_sample() -> f64 {
    (rand::rng().next_u32() as f64) / (u32::MAX as f64)
}
