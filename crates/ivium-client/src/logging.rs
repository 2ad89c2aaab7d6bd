//! Call logging decorator.
//!
//! Wraps any [`Gateway`] and emits one tracing event per call with the operation name,
//! elapsed time and outcome. Failures are logged at `warn` with their tag; successes at
//! `debug` (potential reads at `trace`, they arrive every poll period).

use std::time::Instant;

use async_trait::async_trait;

use crate::error::RpcFailure;
use crate::gateway::{Gateway, Operation};

/// [`Gateway`] decorator that logs every call.
#[derive(Debug, Clone)]
pub struct LoggingGateway<G> {
    inner: G,
}

impl<G: Gateway> LoggingGateway<G> {
    /// Wrap `inner`.
    pub fn new(inner: G) -> Self {
        Self { inner }
    }

    /// Access the wrapped gateway.
    pub fn inner(&self) -> &G {
        &self.inner
    }

    async fn logged(&self, operation: Operation) -> Result<(), RpcFailure> {
        let started = Instant::now();
        let outcome = self.inner.invoke(operation).await;
        log_outcome(operation, started, outcome.as_ref().map(|_| None));
        outcome
    }
}

fn log_outcome(operation: Operation, started: Instant, outcome: Result<Option<f64>, &RpcFailure>) {
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    match outcome {
        Ok(Some(volts)) => {
            tracing::trace!(%operation, elapsed_ms, volts, "rpc ok");
        }
        Ok(None) => {
            tracing::debug!(%operation, elapsed_ms, "rpc ok");
        }
        Err(failure) => {
            tracing::warn!(
                %operation,
                elapsed_ms,
                tag = %failure.tag,
                "rpc failed: {}",
                failure.message
            );
        }
    }
}

#[async_trait]
impl<G: Gateway> Gateway for LoggingGateway<G> {
    async fn open_driver(&self) -> Result<(), RpcFailure> {
        self.logged(Operation::OpenDriver).await
    }

    async fn close_driver(&self) -> Result<(), RpcFailure> {
        self.logged(Operation::CloseDriver).await
    }

    async fn connect_device(&self) -> Result<(), RpcFailure> {
        self.logged(Operation::ConnectDevice).await
    }

    async fn disconnect_device(&self) -> Result<(), RpcFailure> {
        self.logged(Operation::DisconnectDevice).await
    }

    async fn set_cell_on(&self) -> Result<(), RpcFailure> {
        self.logged(Operation::SetCellOn).await
    }

    async fn set_cell_off(&self) -> Result<(), RpcFailure> {
        self.logged(Operation::SetCellOff).await
    }

    async fn get_potential(&self) -> Result<f64, RpcFailure> {
        let started = Instant::now();
        let outcome = self.inner.get_potential().await;
        log_outcome(
            Operation::GetPotential,
            started,
            outcome.as_ref().map(|v| Some(*v)),
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureTag;
    use crate::simulated::SimulatedGateway;

    #[tokio::test]
    async fn test_outcomes_pass_through_unchanged() {
        let sim = SimulatedGateway::new();
        let gateway = LoggingGateway::new(sim.clone());

        assert!(gateway.open_driver().await.is_ok());
        assert!(gateway.inner().host().driver_open);

        let failure = gateway.set_cell_on().await.unwrap_err();
        assert_eq!(failure.tag, FailureTag::DeviceNotConnectedToDriver);
    }
}
