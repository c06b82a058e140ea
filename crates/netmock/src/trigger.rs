//! Completion handles for manually-triggered mocks.
//!
//! Every request held by a manual mock gets its own single-slot channel; a
//! trigger is delivered to exactly one held request and carries a second
//! single-slot channel back so `trigger()` resolves only once that request
//! has actually been fulfilled.
//!
//! A trigger issued while nothing is held is queued and consumed by the next
//! request that arrives; it never fulfills anything by itself. A queued
//! trigger whose caller stopped waiting is dropped instead of consumed.

use crate::error::{NetmockError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// One trigger signal, delivered to one held request.
#[derive(Debug)]
pub(crate) struct Trigger {
    done: oneshot::Sender<Result<()>>,
}

impl Trigger {
    /// Returns true if the `trigger()` caller is no longer waiting.
    fn is_abandoned(&self) -> bool {
        self.done.is_closed()
    }

    /// Reports the fulfillment outcome back to the `trigger()` caller.
    pub(crate) fn complete(self, outcome: Result<()>) {
        // The caller may have stopped waiting; nothing to report to then.
        let _ = self.done.send(outcome);
    }
}

/// How a newly held request obtains its trigger.
#[derive(Debug)]
pub(crate) enum Hold {
    /// A trigger was already queued.
    Ready(Trigger),
    /// Wait for a trigger; resolves to an error if the gate closes first.
    Waiting(oneshot::Receiver<Trigger>),
}

impl Hold {
    /// Waits for this request's trigger. `None` means the gate was closed.
    pub(crate) async fn released(self) -> Option<Trigger> {
        match self {
            Self::Ready(trigger) => Some(trigger),
            Self::Waiting(receiver) => receiver.await.ok(),
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    held: VecDeque<oneshot::Sender<Trigger>>,
    queued: VecDeque<Trigger>,
    closed: bool,
}

/// Per-rule rendezvous between held requests and trigger calls.
#[derive(Debug, Default)]
pub(crate) struct ManualGate {
    state: Mutex<GateState>,
}

impl ManualGate {
    /// Registers a newly pending request.
    pub(crate) fn hold(&self) -> Result<Hold> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(NetmockError::SessionClosed);
        }
        while let Some(trigger) = state.queued.pop_front() {
            if !trigger.is_abandoned() {
                return Ok(Hold::Ready(trigger));
            }
        }
        let (tx, rx) = oneshot::channel();
        state.held.push_back(tx);
        Ok(Hold::Waiting(rx))
    }

    /// Releases one held request (or queues for the next one) and waits until
    /// it has been fulfilled.
    pub(crate) async fn trigger(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(NetmockError::SessionClosed);
            }
            let mut trigger = Trigger { done: done_tx };
            loop {
                let Some(held) = state.held.pop_front() else {
                    state.queued.push_back(trigger);
                    break;
                };
                // A held request whose task is gone returns the trigger; try the next one.
                match held.send(trigger) {
                    Ok(()) => break,
                    Err(returned) => trigger = returned,
                }
            }
        }

        done_rx.await.unwrap_or(Err(NetmockError::SessionClosed))
    }

    /// Number of requests currently held.
    pub(crate) fn held(&self) -> usize {
        self.state.lock().held.iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Discards all held requests and queued triggers; later calls fail fast.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.held.clear();
        state.queued.clear();
    }
}
