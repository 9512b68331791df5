//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task;
use tracing::{Instrument, error};

use crate::ports::Clock;

// Generalizes `holo_utils::task::{Task, TimeoutTask, IntervalTask}` to run
// over an injected `Clock` rather than `tokio::time` directly, so the
// per-session timing loop (desired Tx interval, detection timeout, echo
// timers — spec's timing loop component) can be driven deterministically in
// tests instead of relying on the teacher's `#[cfg(feature = "testing")]`
// branch that merely replaces a timer with a future that never resolves.

#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

impl<T> Task<T> {
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

#[derive(Debug)]
enum Message {
    Reset(Option<Duration>),
}

// A cancel-on-drop one-shot timeout, analogous to `holo_utils::task::TimeoutTask`.
#[derive(Debug)]
pub struct TimeoutTask {
    _task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

impl TimeoutTask {
    pub fn new<F, Fut>(clock: Arc<dyn Clock>, timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Arc::new(Mutex::new(clock.now() + timeout));
        let next_child = next.clone();
        let clock_child = clock.clone();

        let task = Task::spawn(
            async move {
                let mut cb = Some(cb);
                let mut deadline = *next_child.lock().unwrap();
                loop {
                    tokio::select! {
                        _ = clock_child.sleep_until(deadline) => {
                            if let Some(cb) = cb.take() {
                                (cb)().await;
                            }
                            break;
                        }
                        message = control_rx.recv() => {
                            match message {
                                Some(Message::Reset(dur)) => {
                                    let dur = dur.unwrap_or(timeout);
                                    deadline = clock_child.now() + dur;
                                    *next_child.lock().unwrap() = deadline;
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            _task: task,
            control: control_tx,
            next,
        }
    }

    // Resets the timeout. If no new duration is given, the original one is
    // reused, restarting the count from now.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        if self.control.send(Message::Reset(timeout)).is_err() {
            error!("failed to reset timeout");
        }
    }

    pub fn remaining(&self, clock: &dyn Clock) -> Duration {
        let next = self.next.lock().unwrap();
        next.saturating_duration_since(clock.now())
    }
}

// A cancel-on-drop recurring interval, analogous to
// `holo_utils::task::IntervalTask`. Unlike `tokio::time::interval`, each
// firing's delay is computed by `next_delay`, allowing RFC 5880 Section
// 6.8.7 jitter to be re-rolled on every tick.
#[derive(Debug)]
pub struct IntervalTask {
    _task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

impl IntervalTask {
    pub fn new<F, Fut, N>(
        clock: Arc<dyn Clock>,
        initial_interval: Duration,
        mut next_delay: N,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
        N: FnMut() -> Duration + Send + 'static,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Arc::new(Mutex::new(clock.now() + initial_interval));
        let next_child = next.clone();
        let clock_child = clock.clone();

        let task = Task::spawn(
            async move {
                let mut deadline = *next_child.lock().unwrap();
                loop {
                    tokio::select! {
                        _ = clock_child.sleep_until(deadline) => {
                            (cb)().await;
                            deadline = clock_child.now() + next_delay();
                            *next_child.lock().unwrap() = deadline;
                        }
                        message = control_rx.recv() => {
                            match message {
                                Some(Message::Reset(dur)) => {
                                    let dur = dur.unwrap_or_else(&mut next_delay);
                                    deadline = clock_child.now() + dur;
                                    *next_child.lock().unwrap() = deadline;
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        IntervalTask {
            _task: task,
            control: control_tx,
            next,
        }
    }

    pub fn reset(&mut self, interval: Option<Duration>) {
        if self.control.send(Message::Reset(interval)).is_err() {
            error!("failed to reset interval");
        }
    }

    pub fn remaining(&self, clock: &dyn Clock) -> Duration {
        let next = self.next.lock().unwrap();
        next.saturating_duration_since(clock.now())
    }
}
