//! RPC failure classification.
//!
//! Every failed call, whether a user mutation or a background potential read, is
//! reduced to one of three [`Recovery`] actions by [`classify`] and then applied to the
//! session state. Classification looks only at the structured [`FailureTag`]; the
//! diagnostic message is never inspected.

use ivium_client::{FailureTag, RpcFailure};
use serde::Serialize;
use std::fmt;

use crate::state::{DeviceStatus, DriverStatus, SessionState};

/// Recovery action for a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recovery {
    /// The instrument is unreachable or not linked to the driver. Driver stays as is.
    DeviceAbsent,
    /// The driver process is not running.
    DriverAbsent,
    /// Anything else: transport errors, timeouts, unexpected host errors.
    Unclassified,
}

impl Recovery {
    /// Apply this recovery to `state`.
    ///
    /// All three branches drop the device link and the cell.
    pub fn apply(self, state: &mut SessionState) {
        match self {
            Self::DeviceAbsent => {
                state.set_device_status(DeviceStatus::NotAvailable);
                state.set_device_connected(false);
            }
            Self::DriverAbsent => {
                state.set_device_status(DeviceStatus::Unknown);
                state.set_driver_status(DriverStatus::NotRunning);
            }
            Self::Unclassified => {
                state.set_device_status(DeviceStatus::Unknown);
                state.set_driver_status(DriverStatus::Unknown);
            }
        }
        state.set_device_connected(false);
        debug_assert!(!state.cell_on());
    }

    /// Operator-facing hint for this recovery.
    #[must_use]
    pub fn hint(self) -> &'static str {
        match self {
            Self::DeviceAbsent => {
                "Device not found. Please, check your device is connected via usb and try again."
            }
            Self::DriverAbsent => {
                "Iviumsoft is not running. Please launch the software and try connecting again."
            }
            Self::Unclassified => "Lost contact with the driver host. Please reconnect.",
        }
    }
}

impl fmt::Display for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DeviceAbsent => "device-absent",
            Self::DriverAbsent => "driver-absent",
            Self::Unclassified => "unclassified",
        })
    }
}

/// Map a failure tag to its recovery. Pure and total.
#[must_use]
pub fn classify_tag(tag: &FailureTag) -> Recovery {
    match tag {
        FailureTag::NoDeviceDetected | FailureTag::DeviceNotConnectedToDriver => {
            Recovery::DeviceAbsent
        }
        FailureTag::NoDriverRunning => Recovery::DriverAbsent,
        FailureTag::Transport
        | FailureTag::Timeout
        | FailureTag::Server
        | FailureTag::Other(_) => Recovery::Unclassified,
    }
}

/// Classify a failed call.
#[must_use]
pub fn classify(failure: &RpcFailure) -> Recovery {
    classify_tag(&failure.tag)
}

/// Classify `failure`, apply the recovery to `state` and return it.
pub fn recover(failure: &RpcFailure, state: &mut SessionState) -> Recovery {
    let recovery = classify(failure);
    recovery.apply(state);
    tracing::warn!(
        tag = %failure.tag,
        %recovery,
        "{} -> {}",
        failure.message,
        state
    );
    recovery
}
