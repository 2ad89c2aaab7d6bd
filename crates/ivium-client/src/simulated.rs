//! In-process simulation of an IviumSoft driver host.
//!
//! Models the three layers the real host exposes (vendor driver process, USB link to the
//! instrument, cell relay) and answers with the same failure tags a real host would.
//! Operates in one of two modes:
//!
//! - **Instant**: zero delays, deterministic, for unit tests
//! - **Realistic**: every call sleeps for a configurable latency first
//!
//! Scripted one-shot failures can be queued per operation, and the host can be changed
//! underneath a running session (`kill_driver`, `unplug_device`) to exercise recovery.
//!
//! # Example
//!
//! ```
//! use ivium_client::{Gateway, SimulatedGateway};
//!
//! # tokio_test_block_on(async {
//! let sim = SimulatedGateway::new().with_potential(0.25);
//! sim.open_driver().await.unwrap();
//! sim.connect_device().await.unwrap();
//! assert_eq!(sim.get_potential().await.unwrap(), 0.25);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::{FailureTag, RpcFailure};
use crate::gateway::{Gateway, Operation};

/// Operational modes for the simulated host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockMode {
    /// Zero delays, deterministic
    #[default]
    Instant,
    /// Every call waits for its configured latency
    Realistic,
}

/// Observable state of the simulated host.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedHost {
    /// Vendor driver process is running.
    pub driver_running: bool,
    /// Instrument is plugged into the host.
    pub device_plugged: bool,
    /// A client has opened the driver.
    pub driver_open: bool,
    /// The driver holds a link to the instrument.
    pub device_connected: bool,
    /// Cell relay is energized.
    pub cell_on: bool,
    /// Potential reported by `get_potential`, before noise.
    pub potential: f64,
    /// Peak amplitude of uniform noise added to each reading.
    pub noise: f64,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self {
            driver_running: true,
            device_plugged: true,
            driver_open: false,
            device_connected: false,
            cell_on: false,
            potential: 0.0,
            noise: 0.0,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    host: SimulatedHost,
    mode: MockMode,
    latency: Duration,
    operation_latency: HashMap<Operation, Duration>,
    scripted: VecDeque<(Operation, FailureTag)>,
    calls: HashMap<Operation, u32>,
}

/// Simulated driver host implementing [`Gateway`].
///
/// Cloning is cheap; clones share the same host.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedGateway {
    /// Host with the driver running and the instrument plugged in, nothing opened yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host in a specific initial state.
    pub fn with_host(host: SimulatedHost) -> Self {
        let sim = Self::default();
        sim.lock().host = host;
        sim
    }

    /// Set the potential returned by reads.
    #[must_use]
    pub fn with_potential(self, volts: f64) -> Self {
        self.lock().host.potential = volts;
        self
    }

    /// Add uniform noise of the given amplitude to reads.
    #[must_use]
    pub fn with_noise(self, amplitude: f64) -> Self {
        self.lock().host.noise = amplitude.abs();
        self
    }

    /// Switch to [`MockMode::Realistic`] with a uniform call latency.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        {
            let mut inner = self.lock();
            inner.mode = MockMode::Realistic;
            inner.latency = latency;
        }
        self
    }

    /// Switch to [`MockMode::Realistic`] with a latency for one operation only.
    #[must_use]
    pub fn with_operation_latency(self, operation: Operation, latency: Duration) -> Self {
        {
            let mut inner = self.lock();
            inner.mode = MockMode::Realistic;
            inner.operation_latency.insert(operation, latency);
        }
        self
    }

    /// Current operating mode.
    pub fn mode(&self) -> MockMode {
        self.lock().mode
    }

    /// Snapshot of the host state.
    pub fn host(&self) -> SimulatedHost {
        self.lock().host.clone()
    }

    /// Fail the next call of `operation` with `tag`, regardless of host state.
    pub fn fail_next(&self, operation: Operation, tag: FailureTag) {
        self.lock().scripted.push_back((operation, tag));
    }

    /// Number of calls received for `operation`.
    pub fn calls(&self, operation: Operation) -> u32 {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Stop the vendor driver process. Everything it held is lost.
    pub fn kill_driver(&self) {
        let mut inner = self.lock();
        inner.host.driver_running = false;
        inner.host.driver_open = false;
        inner.host.device_connected = false;
        inner.host.cell_on = false;
        tracing::debug!("simulated driver killed");
    }

    /// Start the vendor driver process.
    pub fn start_driver(&self) {
        self.lock().host.driver_running = true;
    }

    /// Pull the USB cable. The cell relay drops with it.
    pub fn unplug_device(&self) {
        let mut inner = self.lock();
        inner.host.device_plugged = false;
        inner.host.device_connected = false;
        inner.host.cell_on = false;
        tracing::debug!("simulated device unplugged");
    }

    /// Plug the instrument back in.
    pub fn plug_device(&self) {
        self.lock().host.device_plugged = true;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn call<T>(
        &self,
        operation: Operation,
        apply: impl FnOnce(&mut SimulatedHost) -> Result<T, RpcFailure>,
    ) -> Result<T, RpcFailure> {
        let delay = {
            let mut inner = self.lock();
            *inner.calls.entry(operation).or_insert(0) += 1;
            match inner.mode {
                MockMode::Instant => None,
                MockMode::Realistic => Some(
                    inner
                        .operation_latency
                        .get(&operation)
                        .copied()
                        .unwrap_or(inner.latency),
                ),
            }
        };
        if let Some(delay) = delay.filter(|d| !d.is_zero()) {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if let Some(index) = inner.scripted.iter().position(|(op, _)| *op == operation) {
            if let Some((_, tag)) = inner.scripted.remove(index) {
                return Err(RpcFailure::new(tag, format!("scripted {operation} failure")));
            }
        }
        apply(&mut inner.host)
    }
}

fn require_driver(host: &SimulatedHost) -> Result<(), RpcFailure> {
    if !host.driver_running {
        return Err(RpcFailure::new(
            FailureTag::NoDriverRunning,
            "IviumSoft is not running",
        ));
    }
    if !host.driver_open {
        return Err(RpcFailure::new(FailureTag::Server, "driver handle is not open"));
    }
    Ok(())
}

fn require_device(host: &mut SimulatedHost) -> Result<(), RpcFailure> {
    require_driver(host)?;
    if !host.device_plugged {
        host.device_connected = false;
        host.cell_on = false;
        return Err(RpcFailure::new(
            FailureTag::NoDeviceDetected,
            "no instrument on the bus",
        ));
    }
    if !host.device_connected {
        return Err(RpcFailure::new(
            FailureTag::DeviceNotConnectedToDriver,
            "instrument is not connected to IviumSoft",
        ));
    }
    Ok(())
}

#[async_trait]
impl Gateway for SimulatedGateway {
    async fn open_driver(&self) -> Result<(), RpcFailure> {
        self.call(Operation::OpenDriver, |host| {
            if !host.driver_running {
                return Err(RpcFailure::new(
                    FailureTag::NoDriverRunning,
                    "IviumSoft is not running",
                ));
            }
            host.driver_open = true;
            Ok(())
        })
        .await
    }

    async fn close_driver(&self) -> Result<(), RpcFailure> {
        self.call(Operation::CloseDriver, |host| {
            if !host.driver_running {
                return Err(RpcFailure::new(
                    FailureTag::NoDriverRunning,
                    "IviumSoft is not running",
                ));
            }
            host.driver_open = false;
            host.device_connected = false;
            host.cell_on = false;
            Ok(())
        })
        .await
    }

    async fn connect_device(&self) -> Result<(), RpcFailure> {
        self.call(Operation::ConnectDevice, |host| {
            require_driver(host)?;
            if !host.device_plugged {
                return Err(RpcFailure::new(
                    FailureTag::NoDeviceDetected,
                    "no instrument on the bus",
                ));
            }
            host.device_connected = true;
            Ok(())
        })
        .await
    }

    async fn disconnect_device(&self) -> Result<(), RpcFailure> {
        self.call(Operation::DisconnectDevice, |host| {
            require_driver(host)?;
            host.device_connected = false;
            host.cell_on = false;
            Ok(())
        })
        .await
    }

    async fn set_cell_on(&self) -> Result<(), RpcFailure> {
        self.call(Operation::SetCellOn, |host| {
            require_device(host)?;
            host.cell_on = true;
            Ok(())
        })
        .await
    }

    async fn set_cell_off(&self) -> Result<(), RpcFailure> {
        self.call(Operation::SetCellOff, |host| {
            require_device(host)?;
            host.cell_on = false;
            Ok(())
        })
        .await
    }

    async fn get_potential(&self) -> Result<f64, RpcFailure> {
        self.call(Operation::GetPotential, |host| {
            require_device(host)?;
            let noise = if host.noise > 0.0 {
                rand::thread_rng().gen_range(-host.noise..=host.noise)
            } else {
                0.0
            };
            Ok(host.potential + noise)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_happy_path_walks_all_layers() {
        let sim = SimulatedGateway::new().with_potential(-0.125);
        sim.open_driver().await.unwrap();
        sim.connect_device().await.unwrap();
        sim.set_cell_on().await.unwrap();

        let host = sim.host();
        assert!(host.driver_open && host.device_connected && host.cell_on);
        assert_eq!(sim.get_potential().await.unwrap(), -0.125);
        assert_eq!(sim.mode(), MockMode::Instant);
    }

    #[tokio::test]
    async fn test_driver_absent_tag() {
        let sim = SimulatedGateway::new();
        sim.kill_driver();
        let failure = sim.open_driver().await.unwrap_err();
        assert_eq!(failure.tag, FailureTag::NoDriverRunning);
    }

    #[tokio::test]
    async fn test_device_absent_tags() {
        let sim = SimulatedGateway::new();
        sim.open_driver().await.unwrap();

        let failure = sim.set_cell_on().await.unwrap_err();
        assert_eq!(failure.tag, FailureTag::DeviceNotConnectedToDriver);

        sim.connect_device().await.unwrap();
        sim.unplug_device();
        let failure = sim.get_potential().await.unwrap_err();
        assert_eq!(failure.tag, FailureTag::NoDeviceDetected);

        let failure = sim.connect_device().await.unwrap_err();
        assert_eq!(failure.tag, FailureTag::NoDeviceDetected);
    }

    #[tokio::test]
    async fn test_disconnect_drops_cell() {
        let sim = SimulatedGateway::new();
        sim.open_driver().await.unwrap();
        sim.connect_device().await.unwrap();
        sim.set_cell_on().await.unwrap();
        sim.disconnect_device().await.unwrap();
        assert!(!sim.host().cell_on);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_one_shot() {
        let sim = SimulatedGateway::new();
        sim.fail_next(Operation::OpenDriver, FailureTag::Timeout);

        assert_eq!(
            sim.open_driver().await.unwrap_err().tag,
            FailureTag::Timeout
        );
        assert!(sim.open_driver().await.is_ok());
        assert_eq!(sim.calls(Operation::OpenDriver), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_realistic_latency() {
        let sim = SimulatedGateway::new().with_latency(Duration::from_millis(300));
        assert_eq!(sim.mode(), MockMode::Realistic);

        let started = tokio::time::Instant::now();
        sim.open_driver().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_noise_stays_within_amplitude() {
        let sim = SimulatedGateway::new().with_potential(1.0).with_noise(0.01);
        sim.open_driver().await.unwrap();
        sim.connect_device().await.unwrap();
        for _ in 0..20 {
            let v = sim.get_potential().await.unwrap();
            assert!((0.99..=1.01).contains(&v), "reading {v} out of range");
        }
    }
}
