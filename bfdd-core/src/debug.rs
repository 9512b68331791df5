//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, debug_span};

use crate::config::SessionKey;
use crate::packet::State;

// bfdd debug messages, split from `Error` the same way the teacher separates
// "expected protocol event" from "something went wrong" (`crate::error`).
#[derive(Debug)]
pub enum Debug<'a> {
    SessionCreate(&'a SessionKey),
    SessionDelete(&'a SessionKey),
    SessionReconcile(&'a SessionKey),
    FsmTransition(&'a SessionKey, State, State),
    DetectionTimeExpiry(&'a SessionKey),
    PollSequenceStart(&'a SessionKey),
    PollSequenceEnd(&'a SessionKey),
    EchoStarted(&'a SessionKey),
    EchoStopped(&'a SessionKey),
    UnsolicitedSessionCreated(&'a SessionKey),
    EventDropped(&'a str),
}

// ===== impl Debug =====

impl Debug<'_> {
    pub fn log(&self) {
        match self {
            Debug::SessionCreate(key)
            | Debug::SessionDelete(key)
            | Debug::SessionReconcile(key)
            | Debug::DetectionTimeExpiry(key)
            | Debug::PollSequenceStart(key)
            | Debug::PollSequenceEnd(key)
            | Debug::EchoStarted(key)
            | Debug::EchoStopped(key)
            | Debug::UnsolicitedSessionCreated(key) => {
                debug_span!("session", %key).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::FsmTransition(key, old_state, new_state) => {
                debug_span!("session", %key).in_scope(|| {
                    debug!(?old_state, ?new_state, "{}", self);
                });
            }
            Debug::EventDropped(subscriber) => {
                debug_span!("events", %subscriber).in_scope(|| {
                    debug!("{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::SessionCreate(..) => write!(f, "session created"),
            Debug::SessionDelete(..) => write!(f, "session deleted"),
            Debug::SessionReconcile(..) => write!(f, "session reconciled"),
            Debug::FsmTransition(..) => write!(f, "state transition"),
            Debug::DetectionTimeExpiry(..) => write!(f, "detection timer expired"),
            Debug::PollSequenceStart(..) => write!(f, "poll sequence started"),
            Debug::PollSequenceEnd(..) => write!(f, "poll sequence ended"),
            Debug::EchoStarted(..) => write!(f, "echo function started"),
            Debug::EchoStopped(..) => write!(f, "echo function stopped"),
            Debug::UnsolicitedSessionCreated(..) => {
                write!(f, "unsolicited session created")
            }
            Debug::EventDropped(..) => write!(f, "event dropped from subscriber queue"),
        }
    }
}
