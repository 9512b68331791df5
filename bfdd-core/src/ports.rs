//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use crate::config::SessionKey;
use crate::session::SessionId;

// The three ports spec.md requires so the engine stays transport- and
// clock-agnostic. Grounded in the teacher's separation between `holo-bfd`
// (protocol logic) and `holo-bfd::network` (the concrete UDP transport): here
// that seam is made an explicit trait object instead of an implicit module
// boundary, so `bfdd-core` has no socket dependency of its own.

// Sends an already-encoded Control or Echo datagram toward a session's peer.
// The core owns the wire codec and authentication signing end to end (RFC
// 5880/5881/5883 framing plus any RFC 5880 Section 6.7 auth section); the
// transport adapter's only job is moving the resulting bytes over a raw
// socket, with whatever ancillary data (GTSM TTL, pktinfo) the session's
// path type requires, which is why this port takes bytes rather than a
// `Packet`.
pub trait PacketSender: Send + Sync + 'static {
    fn send_control(
        &self,
        key: &SessionKey,
        datagram: &[u8],
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>>;

    fn send_echo(
        &self,
        key: &SessionKey,
        datagram: &[u8],
    ) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>>;
}

// Observes session lifecycle and packet events for external telemetry
// (Prometheus export and the like live entirely outside the core).
pub trait MetricsObserver: Send + Sync + 'static {
    fn session_state_changed(
        &self,
        _session_id: SessionId,
        _key: &SessionKey,
        _old: crate::packet::State,
        _new: crate::packet::State,
    ) {
    }

    fn control_packet_sent(&self, _session_id: SessionId) {}
    fn control_packet_received(&self, _session_id: SessionId) {}
    fn echo_packet_sent(&self, _session_id: SessionId) {}
    fn echo_packet_received(&self, _session_id: SessionId) {}
    fn detection_time_expired(&self, _session_id: SessionId) {}
    fn auth_failure(&self, _session_id: SessionId) {}
    fn event_dropped(&self, _subscriber: &str) {}
}

// A no-op observer, useful as a default and in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullMetricsObserver;

impl MetricsObserver for NullMetricsObserver {}

// Injectable clock, grounded in `holo_utils::task::{Task, TimeoutTask,
// IntervalTask}`'s cancel-on-drop timer primitives, generalized from
// `tokio::time` calls hard-wired into that module into a trait the timing
// loop (`crate::timing`) drives, so tests can control time deterministically
// instead of relying on the teacher's `#[cfg(feature = "testing")]` stub that
// merely replaces a timer with `std::future::pending()`.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Future<Output = ()> + Send>>;

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.sleep_until(self.now() + duration)
    }
}

// Real-time clock backed by `tokio::time`, used outside of tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        })
    }
}
