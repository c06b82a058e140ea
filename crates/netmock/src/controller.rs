//! Routing of driver events through the mock registry.
//!
//! One event-loop task consumes the driver's events in order, so the table of
//! forwarded requests is owned by that task and needs no lock. Mocked requests
//! are served from their own tasks: a delay or a manual hold never blocks the
//! loop or any other request.
//!
//! Every request follows one path through [`RequestState`]:
//!
//! ```text
//! Dispatched -> MatchedAuto   -> Fulfilling -> Recorded
//! Dispatched -> MatchedManual -> Pending -> Triggered -> Fulfilling -> Recorded
//! Dispatched -> Unmatched     -> Forwarded -> Recorded
//! ```
//!
//! Teardown moves waiting mocked requests to `Discarded` and aborts them.

use crate::driver::{DriverEvent, DriverEvents, RequestDriver};
use crate::error::{NetmockError, Result};
use crate::log::RequestLog;
use crate::mock::MockRule;
use crate::record::{RequestDescriptor, RequestId, RequestRecord};
use crate::registry::MockRegistry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

/// Lifecycle state of one intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Reported by the driver, not yet routed.
    Dispatched,
    /// Matched an auto-responding rule.
    MatchedAuto,
    /// Matched a manual rule.
    MatchedManual,
    /// Held until a trigger arrives.
    Pending,
    /// Released by a trigger.
    Triggered,
    /// Being answered with a mock response.
    Fulfilling,
    /// No rule matched.
    Unmatched,
    /// Sent to the network.
    Forwarded,
    /// A record was appended to the log.
    Recorded,
    /// Dropped at teardown; nothing recorded.
    Discarded,
}

impl RequestState {
    /// Returns true if `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use RequestState::{
            Discarded, Dispatched, Forwarded, Fulfilling, MatchedAuto, MatchedManual, Pending,
            Recorded, Triggered, Unmatched,
        };
        matches!(
            (self, next),
            (Dispatched, MatchedAuto | MatchedManual | Unmatched)
                | (MatchedAuto, Fulfilling | Discarded)
                | (MatchedManual, Pending)
                | (Pending, Triggered | Discarded)
                | (Triggered, Fulfilling | Discarded)
                | (Fulfilling | Forwarded, Recorded)
                | (Unmatched, Forwarded)
        )
    }

    /// Returns true for `Recorded` and `Discarded`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Recorded | Self::Discarded)
    }
}

/// A request moving through the state machine.
#[derive(Debug)]
struct Transit {
    id: RequestId,
    state: RequestState,
}

impl Transit {
    fn new(id: RequestId) -> Self {
        Self {
            id,
            state: RequestState::Dispatched,
        }
    }

    fn advance(&mut self, next: RequestState) {
        if self.state.can_transition_to(next) {
            debug!(id = %self.id, from = ?self.state, to = ?next, "request transition");
            self.state = next;
        } else {
            warn!(id = %self.id, from = ?self.state, to = ?next, "illegal request transition ignored");
        }
    }
}

/// State shared by the event loop and per-request tasks.
#[derive(Clone)]
struct Shared {
    driver: Arc<dyn RequestDriver>,
    registry: Arc<MockRegistry>,
    log: RequestLog,
    shutdown: watch::Receiver<bool>,
}

impl Shared {
    async fn serve_auto(self, rule: Arc<MockRule>, request: RequestDescriptor, mut transit: Transit) {
        if !self.pause(rule.delay()).await {
            self.discard(&mut transit).await;
            return;
        }
        // Failures are already recorded and logged by `fulfill`.
        let _ = self.fulfill(&rule, &request, &mut transit).await;
    }

    async fn serve_manual(self, rule: Arc<MockRule>, request: RequestDescriptor, mut transit: Transit) {
        transit.advance(RequestState::Pending);

        let released = match rule.gate().hold() {
            Ok(hold) => hold.released().await,
            Err(_) => None,
        };
        let Some(trigger) = released else {
            self.discard(&mut transit).await;
            return;
        };
        transit.advance(RequestState::Triggered);

        if !self.pause(rule.delay()).await {
            self.discard(&mut transit).await;
            trigger.complete(Err(NetmockError::SessionClosed));
            return;
        }
        let outcome = self.fulfill(&rule, &request, &mut transit).await;
        trigger.complete(outcome);
    }

    /// Sleeps for `delay`. Returns false if the session shut down first.
    async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !*self.shutdown.borrow();
        }
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = closed(&mut shutdown) => false,
        }
    }

    async fn fulfill(&self, rule: &MockRule, request: &RequestDescriptor, transit: &mut Transit) -> Result<()> {
        transit.advance(RequestState::Fulfilling);
        let response = rule.respond_to(request);

        let outcome = self.driver.fulfill_request(&transit.id, &response).await;
        match &outcome {
            Ok(()) => {
                rule.record_call();
                self.log.append(RequestRecord::from_mock(request, &response));
            }
            Err(e) => {
                warn!(id = %transit.id, url = %request.url, "failed to fulfill mocked request: {}", e);
                self.log.append(RequestRecord::from_failure(request, e.to_string(), true));
            }
        }
        transit.advance(RequestState::Recorded);
        outcome
    }

    async fn discard(&self, transit: &mut Transit) {
        transit.advance(RequestState::Discarded);
        if let Err(e) = self.driver.abort_request(&transit.id).await {
            debug!(id = %transit.id, "abort after teardown failed: {}", e);
        }
    }
}

/// Resolves once shutdown is signalled or the controller is gone.
///
/// The borrow returned by `wait_for` is released before this returns.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

struct EventLoop {
    shared: Shared,
    forwarded: HashMap<RequestId, (RequestDescriptor, Transit)>,
    serving: JoinSet<()>,
}

impl EventLoop {
    async fn run(mut self, mut events: DriverEvents) {
        loop {
            let mut shutdown = self.shared.shutdown.clone();
            tokio::select! {
                biased;
                () = closed(&mut shutdown) => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
            while self.serving.try_join_next().is_some() {}
        }

        // Mocked requests settle on shutdown; wait for their aborts to land
        // before the driver is detached.
        while self.serving.join_next().await.is_some() {}
        if let Err(e) = self.shared.driver.detach().await {
            warn!("failed to detach request driver: {}", e);
        }
        debug!(
            in_flight = self.forwarded.len(),
            "interception event loop stopped"
        );
    }

    async fn handle(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Dispatched { id, request } => self.dispatch(id, request).await,
            DriverEvent::Responded { id, response } => {
                self.complete(&id, |request| RequestRecord::from_response(request, response));
            }
            DriverEvent::Failed { id, reason } => {
                self.complete(&id, |request| RequestRecord::from_failure(request, reason, false));
            }
        }
    }

    async fn dispatch(&mut self, id: RequestId, request: RequestDescriptor) {
        let mut transit = Transit::new(id);

        let Some(rule) = self.shared.registry.find_match(&request) else {
            transit.advance(RequestState::Unmatched);
            self.forward(transit, request).await;
            return;
        };

        debug!(
            id = %transit.id,
            url = %request.url,
            pattern = %rule.pattern(),
            auto = rule.is_auto(),
            "request matched mock"
        );
        let shared = self.shared.clone();
        if rule.is_auto() {
            transit.advance(RequestState::MatchedAuto);
            self.serving.spawn(shared.serve_auto(rule, request, transit));
        } else {
            transit.advance(RequestState::MatchedManual);
            self.serving.spawn(shared.serve_manual(rule, request, transit));
        }
    }

    async fn forward(&mut self, mut transit: Transit, request: RequestDescriptor) {
        transit.advance(RequestState::Forwarded);
        let id = transit.id.clone();

        if let Err(e) = self.shared.driver.continue_request(&id).await {
            warn!(id = %id, url = %request.url, "failed to forward request: {}", e);
            self.shared
                .log
                .append(RequestRecord::from_failure(&request, e.to_string(), false));
            transit.advance(RequestState::Recorded);
            return;
        }
        self.forwarded.insert(id, (request, transit));
    }

    fn complete(&mut self, id: &RequestId, finalize: impl FnOnce(&RequestDescriptor) -> RequestRecord) {
        let Some((request, mut transit)) = self.forwarded.remove(id) else {
            debug!(id = %id, "ignoring completion for unknown or already recorded request");
            return;
        };
        self.shared.log.append(finalize(&request));
        transit.advance(RequestState::Recorded);
    }
}

/// Consumes driver events for one session and serves or forwards requests.
pub struct InterceptionController {
    registry: Arc<MockRegistry>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InterceptionController {
    /// Spawns the event loop. Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        driver: Arc<dyn RequestDriver>,
        registry: Arc<MockRegistry>,
        log: RequestLog,
        events: DriverEvents,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let event_loop = EventLoop {
            shared: Shared {
                driver,
                registry: registry.clone(),
                log,
                shutdown: shutdown_rx,
            },
            forwarded: HashMap::new(),
            serving: JoinSet::new(),
        };
        let task = tokio::spawn(event_loop.run(events));

        Self {
            registry,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Returns true until shutdown has been signalled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Signals teardown without waiting: stops the loop, discards held and
    /// delayed mocked requests, and fails waiting triggers.
    pub fn signal_shutdown(&self) {
        self.shutdown.send_replace(true);
        self.registry.close();
    }

    /// Signals teardown and waits for the event loop to stop.
    ///
    /// The loop settles every mocked request it spawned, then detaches the
    /// driver so nothing stays paused in the browser.
    pub async fn shutdown(&self) {
        self.signal_shutdown();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("interception event loop ended abnormally: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for InterceptionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptionController")
            .field("running", &self.is_running())
            .field("mocks", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestState::*;

    #[test]
    fn legal_paths_reach_a_terminal_state() {
        let paths: [&[RequestState]; 4] = [
            &[Dispatched, MatchedAuto, Fulfilling, Recorded],
            &[Dispatched, MatchedManual, Pending, Triggered, Fulfilling, Recorded],
            &[Dispatched, Unmatched, Forwarded, Recorded],
            &[Dispatched, MatchedManual, Pending, Discarded],
        ];
        for path in paths {
            for pair in path.windows(2) {
                assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
            }
            assert!(path[path.len() - 1].is_terminal());
        }
    }

    #[test]
    fn terminal_and_shortcut_transitions_are_rejected() {
        assert!(!Recorded.can_transition_to(Fulfilling));
        assert!(!Discarded.can_transition_to(Recorded));
        assert!(!Dispatched.can_transition_to(Fulfilling));
        assert!(!MatchedManual.can_transition_to(Fulfilling));
        assert!(!Unmatched.can_transition_to(Recorded));
    }

    #[test]
    fn transit_ignores_illegal_transitions() {
        let mut transit = Transit::new(RequestId::from("r1"));
        transit.advance(Recorded);
        assert_eq!(transit.state, Dispatched);
        transit.advance(Unmatched);
        assert_eq!(transit.state, Unmatched);
    }
}
