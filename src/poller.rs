//! Level-triggered potential poller.
//!
//! The session calls [`MeasurementPoller::reconcile`] after every state change with the
//! current value of the poll precondition (driver running, device connected, no mutation
//! in flight). The poller starts, continues or stops accordingly:
//!
//! ```text
//!            precondition ↑                    result applied, still ↑
//! Idle ─────────────────────────► Active ──────────────────────────────┐
//!   ▲                               │  ▲                               │
//!   │        precondition ↓         │  └──── schedule next (period) ◄──┘
//!   └───────────────────────────────┘
//!     abort request, bump generation, mark reading not fresh
//! ```
//!
//! Requests are strictly sequential: at most one is outstanding, and the next is only
//! scheduled once the previous result has been applied. Each request carries the
//! generation it was issued under; results from an older generation are discarded.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ivium_client::{Gateway, RpcFailure};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::PollerConfig;
use crate::session::Completion;

/// Format a potential for display: fixed 8 decimal places.
#[must_use]
pub fn format_potential(volts: f64) -> String {
    format!("{volts:.8}")
}

/// Most recent successfully fetched potential.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PotentialReading {
    /// Measured potential in volts.
    pub volts: f64,
    /// When the value was applied.
    pub fetched_at: DateTime<Utc>,
    /// `false` once polling stopped after this value was fetched.
    pub fresh: bool,
}

impl PotentialReading {
    /// Display label, e.g. `Potential: 0.00042315`.
    #[must_use]
    pub fn label(&self) -> String {
        if self.fresh {
            format!("Potential: {}", format_potential(self.volts))
        } else {
            format!("Potential: {} (stale)", format_potential(self.volts))
        }
    }
}

/// A poll result on its way back to the session.
#[derive(Debug)]
pub(crate) struct PollResult {
    pub(crate) generation: u64,
    pub(crate) outcome: Result<f64, RpcFailure>,
}

/// What the session should do with an arrived poll result.
#[derive(Debug, PartialEq)]
pub(crate) enum PollOutcome {
    /// Value published as the latest reading.
    Value(f64),
    /// Read failed; run it through the classifier.
    Failed(RpcFailure),
    /// Issued under a precondition that no longer holds; dropped.
    Stale,
}

/// Periodic potential reader gated by the session precondition.
pub struct MeasurementPoller {
    gateway: Arc<dyn Gateway>,
    tx: mpsc::Sender<Completion>,
    runtime: Handle,
    period: Duration,
    immediate_on_enable: bool,
    active: bool,
    generation: u64,
    task: Option<JoinHandle<()>>,
    latest: Option<PotentialReading>,
    requests_issued: u64,
}

impl MeasurementPoller {
    pub(crate) fn new(
        gateway: Arc<dyn Gateway>,
        tx: mpsc::Sender<Completion>,
        runtime: Handle,
        config: &PollerConfig,
    ) -> Self {
        Self {
            gateway,
            tx,
            runtime,
            period: config.period,
            immediate_on_enable: config.immediate_on_enable,
            active: false,
            generation: 0,
            task: None,
            latest: None,
            requests_issued: 0,
        }
    }

    /// Whether polling is currently enabled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a request is scheduled or awaiting its result.
    #[must_use]
    pub fn has_pending_request(&self) -> bool {
        self.task.is_some()
    }

    /// Latest reading, if any value was ever fetched.
    #[must_use]
    pub fn latest(&self) -> Option<PotentialReading> {
        self.latest
    }

    /// Total requests scheduled since the session started.
    #[must_use]
    pub fn requests_issued(&self) -> u64 {
        self.requests_issued
    }

    /// Poll period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Bring the poller in line with the current precondition.
    pub(crate) fn reconcile(&mut self, precondition: bool) {
        match (precondition, self.active) {
            (true, false) => {
                self.active = true;
                self.generation += 1;
                let delay = if self.immediate_on_enable {
                    Duration::ZERO
                } else {
                    self.period
                };
                tracing::info!(generation = self.generation, "potential polling started");
                self.schedule(delay);
            }
            (false, true) => self.stop(),
            (true, true) if self.task.is_none() => self.schedule(self.period),
            _ => {}
        }
    }

    /// Stop polling: cancel the outstanding request and mark the reading stale.
    pub(crate) fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.generation += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(reading) = self.latest.as_mut() {
            reading.fresh = false;
        }
        tracing::info!(generation = self.generation, "potential polling stopped");
    }

    /// Judge an arrived result.
    pub(crate) fn accept(&mut self, result: PollResult) -> PollOutcome {
        if !self.active || result.generation != self.generation {
            tracing::debug!(
                issued = result.generation,
                current = self.generation,
                active = self.active,
                "discarding stale potential result"
            );
            return PollOutcome::Stale;
        }

        self.task = None;
        match result.outcome {
            Ok(volts) => {
                self.latest = Some(PotentialReading {
                    volts,
                    fetched_at: Utc::now(),
                    fresh: true,
                });
                PollOutcome::Value(volts)
            }
            Err(failure) => PollOutcome::Failed(failure),
        }
    }

    fn schedule(&mut self, delay: Duration) {
        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        let generation = self.generation;
        self.requests_issued += 1;

        self.task = Some(self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = gateway.get_potential().await;
            let _ = tx
                .send(Completion::Poll(PollResult {
                    generation,
                    outcome,
                }))
                .await;
        }));
    }
}

impl Drop for MeasurementPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
