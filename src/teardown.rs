//! One-shot end-of-session hook.
//!
//! The hook is created together with the session and handed to the hosting shell
//! (signal handler, window-close callback, ...). Clones share a single fired flag, so
//! however many places register it and however often they call it, the driver is
//! closed at most once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ivium_client::{Gateway, RpcFailure};
use tokio::sync::mpsc;

use crate::session::Completion;

/// Releases the driver handle when the session's host goes away.
#[derive(Clone)]
pub struct TeardownHook {
    fired: Arc<AtomicBool>,
    gateway: Arc<dyn Gateway>,
    tx: mpsc::Sender<Completion>,
}

impl TeardownHook {
    pub(crate) fn new(gateway: Arc<dyn Gateway>, tx: mpsc::Sender<Completion>) -> Self {
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            gateway,
            tx,
        }
    }

    /// Whether the hook already ran.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Close the driver, unless this hook (or a clone) already did.
    ///
    /// Returns `None` when the hook had already fired, otherwise the close outcome. The
    /// start of the close and its outcome are both posted to the session, if it is still
    /// listening.
    pub async fn fire(&self) -> Option<Result<(), RpcFailure>> {
        if self.fired.swap(true, Ordering::SeqCst) {
            tracing::debug!("teardown hook already fired");
            return None;
        }

        tracing::info!("session teardown: closing driver");
        // Marks the close as in flight on the session side until the outcome lands.
        let _ = self.tx.try_send(Completion::TeardownStarted);
        let outcome = self.gateway.close_driver().await;
        if let Err(failure) = &outcome {
            tracing::warn!("driver close on teardown failed: {}", failure);
        }
        let _ = self.tx.try_send(Completion::Teardown {
            outcome: outcome.clone(),
        });
        Some(outcome)
    }
}

impl fmt::Debug for TeardownHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownHook")
            .field("fired", &self.has_fired())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivium_client::{Operation, SimulatedGateway};

    #[tokio::test]
    async fn test_fires_once_across_clones() {
        let sim = SimulatedGateway::new();
        sim.open_driver().await.unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let hook = TeardownHook::new(Arc::new(sim.clone()), tx);
        let registered_twice = hook.clone();

        assert!(!hook.has_fired());
        assert_eq!(hook.fire().await, Some(Ok(())));
        assert_eq!(registered_twice.fire().await, None);
        assert_eq!(hook.fire().await, None);
        assert!(registered_twice.has_fired());
        assert_eq!(sim.calls(Operation::CloseDriver), 1);
    }

    #[tokio::test]
    async fn test_fires_regardless_of_driver_state() {
        let sim = SimulatedGateway::new();
        sim.kill_driver();
        let (tx, mut rx) = mpsc::channel(4);
        let hook = TeardownHook::new(Arc::new(sim.clone()), tx);

        let outcome = hook.fire().await;
        assert!(matches!(outcome, Some(Err(_))));
        assert_eq!(sim.calls(Operation::CloseDriver), 1);
        assert!(matches!(rx.try_recv(), Ok(Completion::TeardownStarted)));
        assert!(matches!(rx.try_recv(), Ok(Completion::Teardown { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_fires_close_once() {
        let sim = SimulatedGateway::new();
        let (tx, _rx) = mpsc::channel(16);
        let hook = TeardownHook::new(Arc::new(sim.clone()), tx);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hook = hook.clone();
                tokio::spawn(async move { hook.fire().await.is_some() })
            })
            .collect();
        let mut fired = 0;
        for handle in handles {
            if handle.await.unwrap() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(sim.calls(Operation::CloseDriver), 1);
    }
}
