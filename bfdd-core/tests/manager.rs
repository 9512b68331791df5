//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bfdd_core::packet::{Packet, PacketFlags};
use bfdd_core::{
    Manager, NullMetricsObserver, PacketSender, Role, SessionConfig, SessionKey, SessionType,
    State, TokioClock, UnsolicitedPolicy,
};

// Records every datagram handed to the transport layer instead of actually
// sending it anywhere, so a test can inspect what the engine would have put
// on the wire.
#[derive(Default)]
struct RecordingSender {
    control: Mutex<Vec<(SessionKey, Vec<u8>)>>,
    echo: Mutex<Vec<(SessionKey, Vec<u8>)>>,
}

impl PacketSender for RecordingSender {
    fn send_control(
        &self,
        key: &SessionKey,
        datagram: &[u8],
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>> {
        self.control
            .lock()
            .unwrap()
            .push((key.clone(), datagram.to_vec()));
        Box::pin(async { Ok(()) })
    }

    fn send_echo(
        &self,
        key: &SessionKey,
        datagram: &[u8],
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>> {
        self.echo
            .lock()
            .unwrap()
            .push((key.clone(), datagram.to_vec()));
        Box::pin(async { Ok(()) })
    }
}

fn single_hop_config(peer_addr: IpAddr, interval_us: u32) -> SessionConfig {
    SessionConfig {
        peer_addr,
        local_addr: None,
        interface: Some("eth0".to_string()),
        session_type: SessionType::SingleHop,
        role: Role::Active,
        desired_min_tx_us: interval_us,
        required_min_rx_us: interval_us,
        required_min_echo_rx_us: 0,
        detect_mult: 3,
        align_intervals: false,
        auth: None,
        echo: None,
    }
}

// Builds the raw bytes a simulated remote peer would send, carrying the
// local session's discriminator back as Your Discriminator once it is
// known.
fn remote_packet(state: State, remote_discr: u32, your_discr: u32, interval_us: u32) -> Vec<u8> {
    remote_packet_with_flags(
        state,
        remote_discr,
        your_discr,
        interval_us,
        PacketFlags::empty(),
    )
}

fn remote_packet_with_flags(
    state: State,
    remote_discr: u32,
    your_discr: u32,
    interval_us: u32,
    flags: PacketFlags,
) -> Vec<u8> {
    remote_packet_full(state, remote_discr, your_discr, interval_us, flags, 0)
}

fn remote_packet_full(
    state: State,
    remote_discr: u32,
    your_discr: u32,
    interval_us: u32,
    flags: PacketFlags,
    req_min_echo_rx: u32,
) -> Vec<u8> {
    let packet = Packet {
        version: 1,
        diag: 0,
        state,
        flags,
        detect_mult: 3,
        my_discr: remote_discr,
        your_discr,
        desired_min_tx: interval_us,
        req_min_rx: interval_us,
        req_min_echo_rx,
        auth: None,
    };
    packet.encode().to_vec()
}

fn new_manager(sender: Arc<RecordingSender>) -> Manager {
    Manager::new(
        Arc::new(TokioClock),
        sender,
        Arc::new(NullMetricsObserver),
        16,
        None,
    )
}

#[tokio::test]
async fn create_session_starts_down() {
    let sender = Arc::new(RecordingSender::default());
    let manager = new_manager(sender);
    let id = manager
        .create_session(single_hop_config("10.0.0.2".parse().unwrap(), 100_000))
        .unwrap();
    assert_eq!(manager.session_state(id).unwrap(), State::Down);
}

#[tokio::test]
async fn duplicate_session_key_is_rejected() {
    let sender = Arc::new(RecordingSender::default());
    let manager = new_manager(sender);
    let peer: IpAddr = "10.0.0.2".parse().unwrap();
    manager.create_session(single_hop_config(peer, 100_000)).unwrap();
    assert!(manager
        .create_session(single_hop_config(peer, 100_000))
        .is_err());
}

#[tokio::test]
async fn three_way_handshake_brings_the_session_up() {
    let sender = Arc::new(RecordingSender::default());
    let manager = new_manager(sender);
    let peer: IpAddr = "10.0.0.2".parse().unwrap();
    let id = manager
        .create_session(single_hop_config(peer, 100_000))
        .unwrap();
    let local_discr = manager.local_discriminator(id).unwrap();

    // Remote starts in Down, not yet knowing the local discriminator.
    let raw = remote_packet(State::Down, 0xaaaa, 0, 100_000);
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();
    assert_eq!(manager.session_state(id).unwrap(), State::Init);

    // Remote moves to Init, now addressing the local discriminator.
    let raw = remote_packet(State::Init, 0xaaaa, local_discr, 100_000);
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();
    assert_eq!(manager.session_state(id).unwrap(), State::Up);
}

#[tokio::test(start_paused = true)]
async fn detection_timeout_brings_the_session_down() {
    let sender = Arc::new(RecordingSender::default());
    let manager = new_manager(sender);
    let peer: IpAddr = "10.0.0.2".parse().unwrap();
    let id = manager
        .create_session(single_hop_config(peer, 10_000))
        .unwrap();
    let local_discr = manager.local_discriminator(id).unwrap();

    let raw = remote_packet(State::Down, 0xbbbb, 0, 10_000);
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();
    let raw = remote_packet(State::Init, 0xbbbb, local_discr, 10_000);
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();
    assert_eq!(manager.session_state(id).unwrap(), State::Up);

    // Detect Mult (3) * negotiated Rx interval (10ms) = 30ms with no further
    // traffic from the remote should expire the detection timer.
    tokio::time::advance(Duration::from_millis(40)).await;
    tokio::task::yield_now().await;
    assert_eq!(manager.session_state(id).unwrap(), State::Down);
}

#[tokio::test]
async fn gtsm_violation_is_rejected_for_single_hop() {
    let sender = Arc::new(RecordingSender::default());
    let manager = new_manager(sender);
    let peer: IpAddr = "10.0.0.2".parse().unwrap();
    manager
        .create_session(single_hop_config(peer, 100_000))
        .unwrap();

    let raw = remote_packet(State::Down, 0xcccc, 0, 100_000);
    let result = manager.deliver(&raw, peer, Some("eth0"), Some(64)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn unsolicited_session_requires_policy_allow_list() {
    let sender = Arc::new(RecordingSender::default());
    let peer: IpAddr = "10.0.0.9".parse().unwrap();
    let manager = Manager::new(
        Arc::new(TokioClock),
        sender,
        Arc::new(NullMetricsObserver),
        16,
        Some(UnsolicitedPolicy {
            allowed_peers: vec![peer],
            max_sessions: 4,
            desired_min_tx_us: 200_000,
            required_min_rx_us: 200_000,
            detect_mult: 3,
            cleanup_delay_ms: 0,
        }),
    );

    let raw = remote_packet(State::Down, 0xdddd, 0, 200_000);
    manager
        .deliver(&raw, peer, Some("eth1"), Some(255))
        .await
        .unwrap();
    assert_eq!(manager.list_sessions().len(), 1);
}

#[tokio::test]
async fn unsolicited_session_denied_for_unknown_peer() {
    let sender = Arc::new(RecordingSender::default());
    let allowed: IpAddr = "10.0.0.9".parse().unwrap();
    let stranger: IpAddr = "10.0.0.10".parse().unwrap();
    let manager = Manager::new(
        Arc::new(TokioClock),
        sender,
        Arc::new(NullMetricsObserver),
        16,
        Some(UnsolicitedPolicy {
            allowed_peers: vec![allowed],
            max_sessions: 4,
            desired_min_tx_us: 200_000,
            required_min_rx_us: 200_000,
            detect_mult: 3,
            cleanup_delay_ms: 0,
        }),
    );

    let raw = remote_packet(State::Down, 0xeeee, 0, 200_000);
    let result = manager.deliver(&raw, stranger, Some("eth1"), Some(255)).await;
    assert!(result.is_err());
    assert_eq!(manager.list_sessions().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn unsolicited_session_is_deleted_after_reaching_down() {
    let sender = Arc::new(RecordingSender::default());
    let peer: IpAddr = "10.0.0.9".parse().unwrap();
    let manager = Manager::new(
        Arc::new(TokioClock),
        sender,
        Arc::new(NullMetricsObserver),
        16,
        Some(UnsolicitedPolicy {
            allowed_peers: vec![peer],
            max_sessions: 4,
            desired_min_tx_us: 10_000,
            required_min_rx_us: 10_000,
            detect_mult: 3,
            cleanup_delay_ms: 0,
        }),
    );

    let raw = remote_packet(State::Down, 0xdddd, 0, 10_000);
    manager
        .deliver(&raw, peer, Some("eth1"), Some(255))
        .await
        .unwrap();
    assert_eq!(manager.list_sessions().len(), 1);
    let id = manager.list_sessions()[0];
    let local_discr = manager.local_discriminator(id).unwrap();

    let raw = remote_packet(State::Init, 0xdddd, local_discr, 10_000);
    manager
        .deliver(&raw, peer, Some("eth1"), Some(255))
        .await
        .unwrap();
    assert_eq!(manager.session_state(id).unwrap(), State::Up);

    // Detect Mult (3) * negotiated Rx interval (10ms) = 30ms with no further
    // traffic brings the dynamically created session Down, which with a
    // zero cleanup delay deletes it almost immediately afterward.
    tokio::time::advance(Duration::from_millis(40)).await;
    tokio::task::yield_now().await;
    assert_eq!(manager.list_sessions().len(), 0);
}

#[tokio::test]
async fn reconcile_deletes_sessions_no_longer_desired() {
    let sender = Arc::new(RecordingSender::default());
    let manager = new_manager(sender);
    let peer: IpAddr = "10.0.0.2".parse().unwrap();
    manager
        .reconcile(vec![single_hop_config(peer, 100_000)])
        .unwrap();
    assert_eq!(manager.list_sessions().len(), 1);

    manager.reconcile(vec![]).unwrap();
    assert_eq!(manager.list_sessions().len(), 0);
}

#[tokio::test]
async fn admin_down_state_update_marks_diagnostic() {
    let sender = Arc::new(RecordingSender::default());
    let manager = new_manager(sender);
    let peer: IpAddr = "10.0.0.2".parse().unwrap();
    let id = manager
        .create_session(single_hop_config(peer, 100_000))
        .unwrap();
    assert_eq!(manager.session_state(id).unwrap(), State::Down);

    // AdminDown received from a peer while still locally Down yields a
    // NeighborSignaledDown diagnostic and stays Down, per RFC 5880 Section
    // 6.8.6 (exercised indirectly through process_packet).
    let raw = remote_packet(State::AdminDown, 0xffff, 0, 100_000);
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();
    assert_eq!(manager.session_state(id).unwrap(), State::Down);
}

#[tokio::test(start_paused = true)]
async fn parameter_change_under_up_starts_poll_sequence_and_completes_on_final() {
    let sender = Arc::new(RecordingSender::default());
    let manager = new_manager(sender.clone());
    let peer: IpAddr = "10.0.0.2".parse().unwrap();
    let id = manager
        .create_session(single_hop_config(peer, 10_000))
        .unwrap();
    let local_discr = manager.local_discriminator(id).unwrap();

    let raw = remote_packet(State::Down, 0x1234, 0, 10_000);
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();
    let raw = remote_packet(State::Init, 0x1234, local_discr, 10_000);
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();
    assert_eq!(manager.session_state(id).unwrap(), State::Up);

    // Acknowledge the Poll Sequence that `state_update` started automatically
    // on reaching Up, so the session settles onto its fast Tx interval
    // before the parameter change under test begins.
    let raw = remote_packet_with_flags(State::Up, 0x1234, local_discr, 10_000, PacketFlags::F);
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();

    // Changing the negotiated interval while Up must start a new Poll
    // Sequence (RFC 5880 Section 6.8.3) rather than adopt it unilaterally.
    let mut new_config = single_hop_config(peer, 20_000);
    new_config.desired_min_tx_us = 20_000;
    new_config.required_min_rx_us = 20_000;
    manager.reconcile(vec![new_config]).unwrap();

    tokio::time::advance(Duration::from_millis(15)).await;
    tokio::task::yield_now().await;
    let last_tx = sender.control.lock().unwrap().last().unwrap().1.clone();
    let sent = Packet::decode(&last_tx).unwrap();
    assert!(sent.flags.contains(PacketFlags::P));

    // The peer acknowledges the new parameters with the Final bit set; the
    // Poll Sequence should terminate and stop being reflected on the wire.
    let raw = remote_packet_with_flags(State::Up, 0x1234, local_discr, 20_000, PacketFlags::F);
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_millis(25)).await;
    tokio::task::yield_now().await;
    let last_tx = sender.control.lock().unwrap().last().unwrap().1.clone();
    let sent = Packet::decode(&last_tx).unwrap();
    assert!(!sent.flags.contains(PacketFlags::P));
}

#[tokio::test(start_paused = true)]
async fn interval_alignment_snaps_to_the_common_set() {
    let sender = Arc::new(RecordingSender::default());
    let manager = new_manager(sender.clone());
    let peer: IpAddr = "10.0.0.2".parse().unwrap();
    let mut config = single_hop_config(peer, 15_000);
    config.align_intervals = true;
    manager.create_session(config).unwrap();

    // Required Min Rx is aligned unconditionally, independent of session
    // state; RFC 7419's common set never sees a raw, unrounded 15,000us.
    tokio::time::advance(Duration::from_millis(20)).await;
    tokio::task::yield_now().await;
    let (_, datagram) = sender.control.lock().unwrap().last().unwrap().clone();
    let sent = Packet::decode(&datagram).unwrap();
    assert_eq!(sent.req_min_rx, 20_000);
}

#[tokio::test(start_paused = true)]
async fn interval_alignment_applies_to_desired_tx_once_up() {
    let sender = Arc::new(RecordingSender::default());
    let manager = new_manager(sender.clone());
    let peer: IpAddr = "10.0.0.2".parse().unwrap();
    let mut config = single_hop_config(peer, 15_000);
    config.align_intervals = true;
    let id = manager.create_session(config).unwrap();
    let local_discr = manager.local_discriminator(id).unwrap();

    let raw = remote_packet(State::Down, 0x9abc, 0, 15_000);
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();
    let raw = remote_packet(State::Init, 0x9abc, local_discr, 15_000);
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();
    assert_eq!(manager.session_state(id).unwrap(), State::Up);

    let raw = remote_packet_with_flags(State::Up, 0x9abc, local_discr, 15_000, PacketFlags::F);
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_millis(25)).await;
    tokio::task::yield_now().await;
    let (_, datagram) = sender.control.lock().unwrap().last().unwrap().clone();
    let sent = Packet::decode(&datagram).unwrap();
    assert_eq!(sent.desired_min_tx, 20_000);
}

#[tokio::test(start_paused = true)]
async fn echo_loss_is_reported_without_affecting_control_detection() {
    let sender = Arc::new(RecordingSender::default());
    let manager = new_manager(sender.clone());
    let peer: IpAddr = "10.0.0.2".parse().unwrap();
    let mut config = single_hop_config(peer, 50_000);
    config.echo = Some(bfdd_core::EchoConfig {
        enabled: true,
        required_min_echo_rx_us: 10_000,
    });
    let id = manager.create_session(config).unwrap();
    let local_discr = manager.local_discriminator(id).unwrap();

    let raw = remote_packet_full(
        State::Down,
        0x5678,
        0,
        50_000,
        PacketFlags::empty(),
        10_000,
    );
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();
    let raw = remote_packet_full(
        State::Init,
        0x5678,
        local_discr,
        50_000,
        PacketFlags::empty(),
        10_000,
    );
    manager
        .deliver(&raw, peer, Some("eth0"), Some(255))
        .await
        .unwrap();
    assert_eq!(manager.session_state(id).unwrap(), State::Up);
    assert!(manager.echo_up(id).unwrap());

    // Detect Mult (3) * echo Tx interval (10ms) = 30ms with no looped-back
    // echo packets should bring the Echo function itself down on its own,
    // independent of the (much slower) control-plane detection timer.
    tokio::time::advance(Duration::from_millis(40)).await;
    tokio::task::yield_now().await;
    assert!(!manager.echo_up(id).unwrap());
    assert_eq!(manager.session_state(id).unwrap(), State::Up);
    assert!(!sender.echo.lock().unwrap().is_empty());
}

#[tokio::test]
async fn drain_all_removes_every_session() {
    let sender = Arc::new(RecordingSender::default());
    let manager = new_manager(sender);
    manager
        .create_session(single_hop_config("10.0.0.2".parse().unwrap(), 100_000))
        .unwrap();
    manager
        .create_session(single_hop_config("10.0.0.3".parse().unwrap(), 100_000))
        .unwrap();
    assert_eq!(manager.list_sessions().len(), 2);

    manager.drain_all().await;
    assert_eq!(manager.list_sessions().len(), 0);
}
