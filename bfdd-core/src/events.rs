//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;

use tokio::sync::broadcast;

use crate::config::SessionKey;
use crate::packet::State;
use crate::session::SessionId;

// New module: the teacher pushes `IbusMsg` point-to-point to registered
// clients over unbounded channels (`holo_bfd::session::SessionClient::tx`),
// which can't implement the bounded, drop-oldest-on-full semantics this
// module needs. `tokio::sync::broadcast` already implements exactly that
// contract — a lagging receiver gets `RecvError::Lagged(n)` instead of
// blocking the publisher or growing without bound — so rather than
// hand-rolling a ring buffer the way `holo_utils::task` hand-rolls its timer
// primitives over `mpsc`, this builds directly on the stdlib-adjacent
// primitive that already does the job.

#[derive(Clone, Debug)]
pub enum SessionEvent {
    Created {
        session_id: SessionId,
        key: SessionKey,
    },
    Deleted {
        session_id: SessionId,
        key: SessionKey,
    },
    StateChanged {
        session_id: SessionId,
        key: SessionKey,
        old_state: State,
        new_state: State,
    },
    PollSequenceCompleted {
        session_id: SessionId,
        key: SessionKey,
    },
    // The Echo function's own up/down state changed, independent of the
    // control session's FSM state (RFC 9747): the control session may stay
    // Up while its Echo function is Down.
    EchoStateChanged {
        session_id: SessionId,
        key: SessionKey,
        up: bool,
    },
}

// An event bus item as observed by a subscriber: either a real session
// event, or a marker indicating that one or more events were dropped before
// this subscriber could consume them.
#[derive(Clone, Debug)]
pub enum BusEvent {
    Session(SessionEvent),
    LossMarker { dropped: u64 },
}

#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> EventBus {
        let (tx, _rx) = broadcast::channel(capacity);
        EventBus { tx }
    }

    // Publishes an event to all current subscribers. A publish with no
    // subscribers is a silent no-op, matching the teacher's `let _ =
    // client.tx.send(msg)` fire-and-forget style.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            replay: VecDeque::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// A single subscriber's view of the event bus.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<SessionEvent>,
    // Synthetic events delivered before any live event, used by
    // `Manager::subscribe`'s `include_current` replay of the session set
    // that already existed at subscribe time.
    replay: VecDeque<SessionEvent>,
}

impl Subscription {
    pub(crate) fn set_replay(&mut self, events: Vec<SessionEvent>) {
        self.replay = events.into();
    }

    // Awaits the next event, or `None` once the bus itself has been
    // dropped. A lagging subscriber observes a `LossMarker` in place of
    // whatever events it missed rather than panicking or being silently
    // resynchronized. Any pending replay events are drained first.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        if let Some(event) = self.replay.pop_front() {
            return Some(BusEvent::Session(event));
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(BusEvent::Session(event)),
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    return Some(BusEvent::LossMarker { dropped });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
