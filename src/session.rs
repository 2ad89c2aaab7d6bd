//! Session controller: transitions, completion pump and poll gating.
//!
//! [`Session`] owns the [`SessionState`] and is driven from a single logical thread
//! (a UI loop, a console loop, a test). User actions spawn one tokio task per RPC; each
//! task sends its outcome back over a channel, and the owner applies outcomes one at a
//! time via [`Session::poll`] or [`Session::next_event`]. State is never touched from
//! the spawned tasks, so it needs no locking.
//!
//! # Transitions
//!
//! ```text
//! open_driver                  ok → driver Running         err → driver NotRunning
//! close_driver                 ok → Running, disconnected  err → driver NotRunning
//! connect_device(true)         ok → connected, Available   err → classifier
//! connect_device(false)        ok → disconnected, cell off err → classifier
//! set_cell_status(on)          ok → cell = on              err → classifier
//! ```
//!
//! After every applied outcome (and every dispatch, since in-flight counts gate polling)
//! the poller is reconciled against the current precondition.

use std::fmt;
use std::sync::Arc;

use ivium_client::{FailureTag, Gateway, Operation, RpcFailure};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::classifier::{self, Recovery};
use crate::config::PollerConfig;
use crate::poller::{MeasurementPoller, PollOutcome, PollResult, PotentialReading};
use crate::state::{DeviceStatus, DriverStatus, SessionState};
use crate::teardown::TeardownHook;
use crate::view::Controls;

/// Capacity of the completion channel.
const COMPLETION_CAPACITY: usize = 32;

/// A mutating call the session can have in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mutation {
    /// Attach to the vendor driver.
    OpenDriver,
    /// Release the vendor driver.
    CloseDriver,
    /// Link the instrument.
    ConnectDevice,
    /// Unlink the instrument.
    DisconnectDevice,
    /// Energize the cell.
    CellOn,
    /// De-energize the cell.
    CellOff,
}

impl Mutation {
    /// All mutations, in slot order.
    pub const ALL: [Mutation; 6] = [
        Self::OpenDriver,
        Self::CloseDriver,
        Self::ConnectDevice,
        Self::DisconnectDevice,
        Self::CellOn,
        Self::CellOff,
    ];

    /// Gateway operation performing this mutation.
    #[must_use]
    pub fn operation(self) -> Operation {
        match self {
            Self::OpenDriver => Operation::OpenDriver,
            Self::CloseDriver => Operation::CloseDriver,
            Self::ConnectDevice => Operation::ConnectDevice,
            Self::DisconnectDevice => Operation::DisconnectDevice,
            Self::CellOn => Operation::SetCellOn,
            Self::CellOff => Operation::SetCellOff,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.operation(), f)
    }
}

/// Per-mutation in-flight counters. The session-wide flag is their union.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InFlight {
    counts: [u32; 6],
}

impl InFlight {
    fn begin(&mut self, mutation: Mutation) {
        self.counts[mutation.slot()] += 1;
    }

    fn finish(&mut self, mutation: Mutation) {
        let count = &mut self.counts[mutation.slot()];
        *count = count.saturating_sub(1);
    }

    /// Whether `mutation` is awaiting its outcome.
    #[must_use]
    pub fn is_pending(&self, mutation: Mutation) -> bool {
        self.counts[mutation.slot()] > 0
    }

    /// Whether any mutation is awaiting its outcome.
    #[must_use]
    pub fn any(&self) -> bool {
        self.counts.iter().any(|&count| count > 0)
    }

    /// Mutations currently awaiting their outcome.
    pub fn pending(&self) -> impl Iterator<Item = Mutation> + '_ {
        Mutation::ALL
            .into_iter()
            .filter(move |mutation| self.is_pending(*mutation))
    }
}

/// Outcome of an RPC on its way back to the session owner.
#[derive(Debug)]
pub(crate) enum Completion {
    Mutation {
        mutation: Mutation,
        outcome: Result<(), RpcFailure>,
    },
    Poll(PollResult),
    TeardownStarted,
    Teardown {
        outcome: Result<(), RpcFailure>,
    },
}

/// What applying one completion did to the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    /// A mutation was acknowledged.
    MutationSucceeded {
        /// Which mutation.
        mutation: Mutation,
    },
    /// A mutation failed. `recovery` is `None` for driver open/close, which map
    /// failures directly instead of classifying them.
    MutationFailed {
        /// Which mutation.
        mutation: Mutation,
        /// Failure tag reported by the gateway.
        tag: String,
        /// Classifier outcome, if classified.
        recovery: Option<Recovery>,
    },
    /// A new potential value was published.
    PotentialUpdated {
        /// Volts.
        volts: f64,
    },
    /// A potential read failed and was classified.
    PollFailed {
        /// Failure tag reported by the gateway.
        tag: String,
        /// Classifier outcome.
        recovery: Recovery,
    },
    /// A mutation was acknowledged after a failure had already taken down the layer it
    /// depends on; the acknowledgement was not applied.
    AcknowledgementDropped {
        /// Which mutation.
        mutation: Mutation,
    },
    /// A potential result arrived after its precondition lapsed and was dropped.
    StaleResultDiscarded,
    /// The teardown hook started closing the driver.
    TeardownStarted,
    /// The teardown hook closed (or tried to close) the driver.
    TeardownCompleted {
        /// Whether the close call succeeded.
        ok: bool,
    },
}

/// Read-only view of the session for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Driver status.
    pub driver_status: DriverStatus,
    /// Device status.
    pub device_status: DeviceStatus,
    /// Device link.
    pub device_connected: bool,
    /// Cell relay.
    pub cell_on: bool,
    /// Union of all in-flight mutations.
    pub mutation_in_flight: bool,
    /// Whether the poller is active.
    pub polling: bool,
    /// Latest potential, if one was ever fetched.
    pub potential: Option<PotentialReading>,
    /// Most recent classifier outcome, cleared by the next successful mutation.
    pub last_recovery: Option<Recovery>,
    /// Whether the teardown hook has fired.
    pub ended: bool,
}

/// One operator's control session with a driver host.
pub struct Session {
    state: SessionState,
    in_flight: InFlight,
    gateway: Arc<dyn Gateway>,
    runtime: Handle,
    tx: mpsc::Sender<Completion>,
    rx: mpsc::Receiver<Completion>,
    poller: MeasurementPoller,
    teardown: TeardownHook,
    last_recovery: Option<Recovery>,
    teardown_in_flight: bool,
    ended: bool,
}

impl Session {
    /// Start a session against `gateway`. Tasks are spawned on `runtime`.
    ///
    /// The teardown hook is created here, once; see [`Session::teardown_hook`].
    pub fn new(gateway: Arc<dyn Gateway>, poller: &PollerConfig, runtime: Handle) -> Self {
        let (tx, rx) = mpsc::channel(COMPLETION_CAPACITY);
        let teardown = TeardownHook::new(Arc::clone(&gateway), tx.clone());
        let poller =
            MeasurementPoller::new(Arc::clone(&gateway), tx.clone(), runtime.clone(), poller);
        Self {
            state: SessionState::new(),
            in_flight: InFlight::default(),
            gateway,
            runtime,
            tx,
            rx,
            poller,
            teardown,
            last_recovery: None,
            teardown_in_flight: false,
            ended: false,
        }
    }

    /// Attach to the vendor driver.
    pub fn open_driver(&mut self) {
        self.dispatch(Mutation::OpenDriver);
    }

    /// Release the vendor driver.
    pub fn close_driver(&mut self) {
        self.dispatch(Mutation::CloseDriver);
    }

    /// Connect (`true`) or disconnect (`false`) the instrument.
    pub fn connect_device(&mut self, checked: bool) {
        self.dispatch(if checked {
            Mutation::ConnectDevice
        } else {
            Mutation::DisconnectDevice
        });
    }

    /// Switch the cell on (`true`) or off (`false`).
    pub fn set_cell_status(&mut self, checked: bool) {
        self.dispatch(if checked {
            Mutation::CellOn
        } else {
            Mutation::CellOff
        });
    }

    fn dispatch(&mut self, mutation: Mutation) {
        self.in_flight.begin(mutation);
        tracing::info!(%mutation, "dispatching");

        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            let outcome = gateway.invoke(mutation.operation()).await;
            let _ = tx.send(Completion::Mutation { mutation, outcome }).await;
        });

        self.reconcile_poller();
    }

    /// Apply every completion that has already arrived. Non-blocking; call it from the
    /// host's update loop.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            events.push(self.apply(completion));
        }
        events
    }

    /// Wait for the next completion and apply it.
    ///
    /// The session keeps its own sender, so this waits indefinitely when nothing is in
    /// flight and polling is off; check [`Session::has_pending_work`] first if that matters.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let completion = self.rx.recv().await?;
        Some(self.apply(completion))
    }

    /// Apply completions until no mutation is in flight.
    pub async fn settle(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while self.in_flight.any() {
            match self.next_event().await {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    /// Whether a mutation or a poll request is outstanding.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        self.in_flight.any() || self.poller.has_pending_request()
    }

    fn apply(&mut self, completion: Completion) -> SessionEvent {
        // The teardown hook may have fired from another task since the last reconcile.
        self.reconcile_poller();

        let event = match completion {
            Completion::Mutation { mutation, outcome } => {
                self.in_flight.finish(mutation);
                self.apply_mutation(mutation, outcome)
            }
            Completion::Poll(result) => match self.poller.accept(result) {
                PollOutcome::Value(volts) => {
                    tracing::trace!(volts, "potential updated");
                    SessionEvent::PotentialUpdated { volts }
                }
                PollOutcome::Failed(failure) => {
                    let recovery = self.recover(&failure);
                    SessionEvent::PollFailed {
                        tag: failure.tag.to_string(),
                        recovery,
                    }
                }
                PollOutcome::Stale => SessionEvent::StaleResultDiscarded,
            },
            Completion::TeardownStarted => {
                if !self.teardown_in_flight {
                    self.teardown_in_flight = true;
                    self.in_flight.begin(Mutation::CloseDriver);
                }
                SessionEvent::TeardownStarted
            }
            Completion::Teardown { outcome } => {
                if self.teardown_in_flight {
                    self.teardown_in_flight = false;
                    self.in_flight.finish(Mutation::CloseDriver);
                }
                self.ended = true;
                let ok = outcome.is_ok();
                self.apply_driver_outcome(Mutation::CloseDriver, outcome);
                SessionEvent::TeardownCompleted { ok }
            }
        };

        debug_assert!(self.state.is_consistent(), "broken chain: {}", self.state);
        self.reconcile_poller();
        event
    }

    fn apply_mutation(
        &mut self,
        mutation: Mutation,
        outcome: Result<(), RpcFailure>,
    ) -> SessionEvent {
        if matches!(mutation, Mutation::OpenDriver | Mutation::CloseDriver) {
            return self.apply_driver_outcome(mutation, outcome);
        }

        match outcome {
            Ok(()) => {
                let applied = match mutation {
                    Mutation::ConnectDevice => {
                        let applied = self.state.set_device_connected(true);
                        if applied {
                            self.state.set_device_status(DeviceStatus::Available);
                        }
                        applied
                    }
                    Mutation::DisconnectDevice => {
                        // The host drops the cell relay with the link; mirror it here.
                        self.state.set_device_connected(false);
                        self.state.set_device_status(DeviceStatus::Available);
                        true
                    }
                    Mutation::CellOn => self.state.set_cell_on(true),
                    Mutation::CellOff => self.state.set_cell_on(false),
                    Mutation::OpenDriver | Mutation::CloseDriver => true,
                };
                if !applied {
                    // An outer layer went down while this call was in flight.
                    tracing::warn!(%mutation, state = %self.state, "dropping late acknowledgement");
                    return SessionEvent::AcknowledgementDropped { mutation };
                }
                self.last_recovery = None;
                tracing::debug!(%mutation, state = %self.state, "mutation succeeded");
                SessionEvent::MutationSucceeded { mutation }
            }
            Err(failure) => {
                let recovery = self.recover(&failure);
                SessionEvent::MutationFailed {
                    mutation,
                    tag: failure.tag.to_string(),
                    recovery: Some(recovery),
                }
            }
        }
    }

    /// Open and close share one mapping: acknowledged means the driver is reachable.
    /// A released handle no longer holds the instrument link.
    fn apply_driver_outcome(
        &mut self,
        mutation: Mutation,
        outcome: Result<(), RpcFailure>,
    ) -> SessionEvent {
        match outcome {
            Ok(()) => {
                self.state.set_driver_status(DriverStatus::Running);
                if mutation == Mutation::CloseDriver {
                    self.state.set_device_connected(false);
                }
                self.last_recovery = None;
                tracing::debug!(%mutation, state = %self.state, "driver acknowledged");
                SessionEvent::MutationSucceeded { mutation }
            }
            Err(failure) => {
                self.state.set_driver_status(DriverStatus::NotRunning);
                tracing::warn!(%mutation, tag = %failure.tag, "driver unreachable: {}", failure.message);
                SessionEvent::MutationFailed {
                    mutation,
                    tag: failure.tag.to_string(),
                    recovery: None,
                }
            }
        }
    }

    fn recover(&mut self, failure: &RpcFailure) -> Recovery {
        let recovery = classifier::recover(failure, &mut self.state);
        self.last_recovery = Some(recovery);
        recovery
    }

    fn reconcile_poller(&mut self) {
        let precondition = self.poll_precondition();
        self.poller.reconcile(precondition);
    }

    /// Driver running, device connected, nothing in flight, teardown not started.
    #[must_use]
    pub fn poll_precondition(&self) -> bool {
        !self.ended
            && !self.teardown.has_fired()
            && self.state.driver_running()
            && self.state.device_connected()
            && !self.in_flight.any()
    }

    /// Current readiness state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Per-mutation in-flight counters.
    #[must_use]
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Union of all in-flight mutations.
    #[must_use]
    pub fn mutation_in_flight(&self) -> bool {
        self.in_flight.any()
    }

    /// Whether the poller is active.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller.is_active()
    }

    /// The measurement poller.
    #[must_use]
    pub fn poller(&self) -> &MeasurementPoller {
        &self.poller
    }

    /// Latest potential reading.
    #[must_use]
    pub fn latest_potential(&self) -> Option<PotentialReading> {
        self.poller.latest()
    }

    /// Most recent classifier outcome, if the last failure has not been superseded.
    #[must_use]
    pub fn last_recovery(&self) -> Option<Recovery> {
        self.last_recovery
    }

    /// Which actions the presentation layer may offer right now.
    #[must_use]
    pub fn controls(&self) -> Controls {
        Controls::from_snapshot(&self.snapshot())
    }

    /// Everything the presentation layer needs, by value.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            driver_status: self.state.driver_status(),
            device_status: self.state.device_status(),
            device_connected: self.state.device_connected(),
            cell_on: self.state.cell_on(),
            mutation_in_flight: self.in_flight.any(),
            polling: self.poller.is_active(),
            potential: self.poller.latest(),
            last_recovery: self.last_recovery,
            ended: self.ended || self.teardown.has_fired(),
        }
    }

    /// The session's teardown hook. Every call returns a handle to the same one-shot hook.
    #[must_use]
    pub fn teardown_hook(&self) -> TeardownHook {
        self.teardown.clone()
    }

    /// End the session: stop polling and fire the teardown hook.
    ///
    /// Returns `None` if the hook had already fired.
    pub async fn end(&mut self) -> Option<Result<(), RpcFailure>> {
        self.ended = true;
        self.poller.stop();
        let outcome = self.teardown.fire().await;
        self.poll();
        outcome
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("in_flight", &self.in_flight)
            .field("polling", &self.poller.is_active())
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

/// Whether `tag` would be reported to the operator as a missing device.
#[must_use]
pub fn is_device_absence(tag: &FailureTag) -> bool {
    classifier::classify_tag(tag) == Recovery::DeviceAbsent
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use ivium_client::SimulatedGateway;

    fn session(sim: &SimulatedGateway) -> Session {
        Session::new(
            Arc::new(sim.clone()),
            &PollerConfig::default(),
            Handle::current(),
        )
    }

    #[test]
    fn test_in_flight_union() {
        let mut in_flight = InFlight::default();
        assert!(!in_flight.any());

        in_flight.begin(Mutation::ConnectDevice);
        in_flight.begin(Mutation::CellOn);
        in_flight.begin(Mutation::CellOn);
        assert!(in_flight.any());
        assert_eq!(
            in_flight.pending().collect::<Vec<_>>(),
            vec![Mutation::ConnectDevice, Mutation::CellOn]
        );

        in_flight.finish(Mutation::CellOn);
        assert!(in_flight.is_pending(Mutation::CellOn));
        in_flight.finish(Mutation::CellOn);
        in_flight.finish(Mutation::ConnectDevice);
        assert!(!in_flight.any());

        // Unbalanced finish never underflows.
        in_flight.finish(Mutation::OpenDriver);
        assert!(!in_flight.any());
    }

    #[test]
    fn test_mutation_slots_match_order() {
        for (index, mutation) in Mutation::ALL.into_iter().enumerate() {
            assert_eq!(mutation.slot(), index);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_marks_in_flight_until_applied() {
        let sim = SimulatedGateway::new();
        let mut session = session(&sim);

        session.open_driver();
        assert!(session.mutation_in_flight());
        assert!(session.in_flight().is_pending(Mutation::OpenDriver));

        let events = session.settle().await;
        assert_eq!(
            events,
            vec![SessionEvent::MutationSucceeded {
                mutation: Mutation::OpenDriver
            }]
        );
        assert!(!session.mutation_in_flight());
        assert_eq!(session.state().driver_status(), DriverStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_driver_failure_is_not_classified() {
        let sim = SimulatedGateway::new();
        sim.kill_driver();
        let mut session = session(&sim);

        session.close_driver();
        let events = session.settle().await;
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::MutationFailed {
                mutation: Mutation::CloseDriver,
                recovery: None,
                ..
            }]
        ));
        assert_eq!(session.state().driver_status(), DriverStatus::NotRunning);
        assert_eq!(session.last_recovery(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_drains_without_blocking() {
        let sim = SimulatedGateway::new();
        let mut session = session(&sim);
        assert!(session.poll().is_empty());

        session.open_driver();
        // Let the spawned call run.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        let events = session.poll();
        assert_eq!(events.len(), 1);
        assert!(session.state().driver_running());
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_recovery_is_logged() {
        let sim = SimulatedGateway::new();
        let mut session = session(&sim);
        session.open_driver();
        session.settle().await;

        session.connect_device(true);
        sim.unplug_device();
        session.settle().await;

        assert!(logs_contain("dispatching"));
        assert!(logs_contain("device-absent"));
        assert_eq!(session.last_recovery(), Some(Recovery::DeviceAbsent));
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_cell_ack_after_device_loss_is_dropped() {
        let sim = SimulatedGateway::new()
            .with_operation_latency(Operation::SetCellOn, Duration::from_millis(300));
        let mut session = session(&sim);
        session.open_driver();
        session.settle().await;
        session.connect_device(true);
        session.settle().await;

        sim.fail_next(Operation::ConnectDevice, FailureTag::NoDeviceDetected);
        session.set_cell_status(true);
        session.connect_device(true);
        let events = session.settle().await;

        assert!(events.contains(&SessionEvent::AcknowledgementDropped {
            mutation: Mutation::CellOn
        }));
        assert!(logs_contain("dropping late acknowledgement"));
        assert!(session.state().driver_running());
        assert!(!session.state().device_connected());
        assert!(!session.state().cell_on());
        assert_eq!(session.last_recovery(), Some(Recovery::DeviceAbsent));
    }

    #[test]
    fn test_device_absence_helper() {
        assert!(is_device_absence(&FailureTag::NoDeviceDetected));
        assert!(!is_device_absence(&FailureTag::NoDriverRunning));
    }
}
