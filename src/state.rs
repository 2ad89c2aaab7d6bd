//! Three-layer readiness model for one instrument session.
//!
//! The layers nest: the cell can only be on while the device is connected, and the
//! device can only be connected while the driver is running. The setters on
//! [`SessionState`] keep that chain intact by construction, so no sequence of calls
//! can produce a state where an inner layer claims more than its outer layer allows.
//!
//! ```text
//! driver_status = Running  ◄── device_connected ◄── cell_on
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Last known state of the vendor driver process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverStatus {
    /// Driver confirmed reachable.
    Running,
    /// Driver confirmed absent.
    NotRunning,
    /// Not yet known, or lost track after an unexpected failure.
    #[default]
    Unknown,
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::NotRunning => "not-running",
            Self::Unknown => "unknown",
        })
    }
}

/// Last known reachability of the physical instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceStatus {
    /// The driver has reached the instrument.
    Available,
    /// The driver reported the instrument missing.
    NotAvailable,
    /// Not yet known.
    #[default]
    Unknown,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Available => "available",
            Self::NotAvailable => "not-available",
            Self::Unknown => "unknown",
        })
    }
}

/// Session readiness record.
///
/// Fields are private; every write goes through a setter that repairs the layers
/// below (or above) it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionState {
    driver_status: DriverStatus,
    device_status: DeviceStatus,
    device_connected: bool,
    cell_on: bool,
}

impl SessionState {
    /// Fresh state: everything unknown or off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver status.
    #[must_use]
    pub fn driver_status(&self) -> DriverStatus {
        self.driver_status
    }

    /// Device status.
    #[must_use]
    pub fn device_status(&self) -> DeviceStatus {
        self.device_status
    }

    /// Whether the device is connected.
    #[must_use]
    pub fn device_connected(&self) -> bool {
        self.device_connected
    }

    /// Whether the cell is energized.
    #[must_use]
    pub fn cell_on(&self) -> bool {
        self.cell_on
    }

    /// Shorthand for `driver_status() == Running`.
    #[must_use]
    pub fn driver_running(&self) -> bool {
        self.driver_status == DriverStatus::Running
    }

    /// Set the driver status. Anything other than `Running` drops the device link and cell.
    pub fn set_driver_status(&mut self, status: DriverStatus) {
        self.driver_status = status;
        if status != DriverStatus::Running {
            self.device_connected = false;
            self.cell_on = false;
        }
    }

    /// Set the diagnostic device status. Does not touch the gating flags.
    pub fn set_device_status(&mut self, status: DeviceStatus) {
        self.device_status = status;
    }

    /// Set the device link. Disconnecting drops the cell.
    ///
    /// Connecting is refused while the driver is not `Running`: the chain is only ever
    /// repaired by clearing inner layers, never by raising outer ones. Returns whether
    /// the write was applied.
    pub fn set_device_connected(&mut self, connected: bool) -> bool {
        if connected && !self.driver_running() {
            return false;
        }
        if !connected {
            self.cell_on = false;
        }
        self.device_connected = connected;
        true
    }

    /// Set the cell relay. Switching on is refused while the device is disconnected.
    /// Returns whether the write was applied.
    pub fn set_cell_on(&mut self, on: bool) -> bool {
        if on && !self.device_connected {
            return false;
        }
        self.cell_on = on;
        true
    }

    /// `cell_on ⇒ device_connected ⇒ driver running`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        (!self.cell_on || self.device_connected) && (!self.device_connected || self.driver_running())
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "driver={} device={} connected={} cell={}",
            self.driver_status,
            self.device_status,
            self.device_connected,
            if self.cell_on { "on" } else { "off" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_with_cell() -> SessionState {
        let mut state = SessionState::new();
        state.set_driver_status(DriverStatus::Running);
        state.set_device_connected(true);
        state.set_cell_on(true);
        state
    }

    #[test]
    fn test_defaults() {
        let state = SessionState::new();
        assert_eq!(state.driver_status(), DriverStatus::Unknown);
        assert_eq!(state.device_status(), DeviceStatus::Unknown);
        assert!(!state.device_connected());
        assert!(!state.cell_on());
        assert!(state.is_consistent());
    }

    #[test]
    fn test_driver_downgrade_clears_inner_layers() {
        for status in [DriverStatus::NotRunning, DriverStatus::Unknown] {
            let mut state = running_with_cell();
            state.set_driver_status(status);
            assert!(!state.device_connected());
            assert!(!state.cell_on());
            assert!(state.is_consistent());
        }
    }

    #[test]
    fn test_disconnect_clears_cell() {
        let mut state = running_with_cell();
        state.set_device_connected(false);
        assert!(!state.cell_on());
        assert!(state.driver_running());
    }

    #[test]
    fn test_connect_refused_without_driver() {
        for status in [DriverStatus::NotRunning, DriverStatus::Unknown] {
            let mut state = SessionState::new();
            state.set_driver_status(status);
            assert!(!state.set_device_connected(true));
            assert!(!state.device_connected());
            assert_eq!(state.driver_status(), status);
        }
    }

    #[test]
    fn test_cell_on_refused_without_device() {
        let mut state = SessionState::new();
        state.set_driver_status(DriverStatus::Running);
        assert!(!state.set_cell_on(true));
        assert!(!state.cell_on());
        assert!(!state.device_connected());

        assert!(state.set_device_connected(true));
        assert!(state.set_cell_on(true));
        assert!(state.cell_on());
    }

    #[test]
    fn test_setters_never_raise_outer_layers() {
        let mut state = SessionState::new();
        state.set_driver_status(DriverStatus::NotRunning);
        state.set_device_connected(true);
        state.set_cell_on(true);
        assert_eq!(state, {
            let mut expected = SessionState::new();
            expected.set_driver_status(DriverStatus::NotRunning);
            expected
        });
    }

    #[test]
    fn test_device_status_is_diagnostic_only() {
        let mut state = running_with_cell();
        state.set_device_status(DeviceStatus::NotAvailable);
        assert!(state.device_connected());
        assert!(state.cell_on());
    }

    #[test]
    fn test_every_setter_sequence_stays_consistent() {
        // Exhaustive over short sequences of the four setters.
        #[derive(Clone, Copy)]
        enum Step {
            Driver(DriverStatus),
            Device(DeviceStatus),
            Connected(bool),
            Cell(bool),
        }
        let steps = [
            Step::Driver(DriverStatus::Running),
            Step::Driver(DriverStatus::NotRunning),
            Step::Driver(DriverStatus::Unknown),
            Step::Device(DeviceStatus::Available),
            Step::Device(DeviceStatus::NotAvailable),
            Step::Connected(true),
            Step::Connected(false),
            Step::Cell(true),
            Step::Cell(false),
        ];
        for a in steps {
            for b in steps {
                for c in steps {
                    let mut state = SessionState::new();
                    for step in [a, b, c] {
                        match step {
                            Step::Driver(s) => state.set_driver_status(s),
                            Step::Device(s) => state.set_device_status(s),
                            Step::Connected(v) => {
                                state.set_device_connected(v);
                            }
                            Step::Cell(v) => {
                                state.set_cell_on(v);
                            }
                        }
                        assert!(state.is_consistent(), "inconsistent: {state}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_serialized_status_names() {
        assert_eq!(
            serde_json::to_string(&DriverStatus::NotRunning).unwrap(),
            "\"not-running\""
        );
        assert_eq!(DeviceStatus::NotAvailable.to_string(), "not-available");
    }
}
