//! The gateway contract consumed by the session core.

use async_trait::async_trait;
use std::fmt;

use crate::error::RpcFailure;

/// Remote operations offered by a driver host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Attach to the running vendor driver.
    OpenDriver,
    /// Release the driver handle.
    CloseDriver,
    /// Link the driver to the instrument.
    ConnectDevice,
    /// Drop the driver's link to the instrument.
    DisconnectDevice,
    /// Energize the cell.
    SetCellOn,
    /// De-energize the cell.
    SetCellOff,
    /// Read the present potential (volts).
    GetPotential,
}

impl Operation {
    /// gRPC method name on `ivium.v1.IviumService`.
    #[must_use]
    pub fn method(self) -> &'static str {
        match self {
            Self::OpenDriver => "OpenDriver",
            Self::CloseDriver => "CloseDriver",
            Self::ConnectDevice => "ConnectDevice",
            Self::DisconnectDevice => "DisconnectDevice",
            Self::SetCellOn => "SetCellOn",
            Self::SetCellOff => "SetCellOff",
            Self::GetPotential => "GetPotential",
        }
    }

    /// Whether the operation changes driver, device or cell state.
    #[must_use]
    pub fn is_mutation(self) -> bool {
        !matches!(self, Self::GetPotential)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::OpenDriver => "open_driver",
            Self::CloseDriver => "close_driver",
            Self::ConnectDevice => "connect_device",
            Self::DisconnectDevice => "disconnect_device",
            Self::SetCellOn => "set_cell_on",
            Self::SetCellOff => "set_cell_off",
            Self::GetPotential => "get_potential",
        };
        f.write_str(label)
    }
}

/// Transport used to invoke driver host operations.
///
/// Every call resolves to either a typed success value or an [`RpcFailure`]. Implementations
/// may batch, retry or log internally as long as each call keeps its own outcome.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Attach to the vendor driver.
    async fn open_driver(&self) -> Result<(), RpcFailure>;

    /// Release the vendor driver.
    async fn close_driver(&self) -> Result<(), RpcFailure>;

    /// Connect the instrument.
    async fn connect_device(&self) -> Result<(), RpcFailure>;

    /// Disconnect the instrument.
    async fn disconnect_device(&self) -> Result<(), RpcFailure>;

    /// Switch the cell on.
    async fn set_cell_on(&self) -> Result<(), RpcFailure>;

    /// Switch the cell off.
    async fn set_cell_off(&self) -> Result<(), RpcFailure>;

    /// Read the measured potential in volts.
    async fn get_potential(&self) -> Result<f64, RpcFailure>;

    /// Dispatch one of the acknowledgement-only operations by name.
    ///
    /// `GetPotential` is routed through [`Gateway::get_potential`] and its value discarded.
    async fn invoke(&self, operation: Operation) -> Result<(), RpcFailure> {
        match operation {
            Operation::OpenDriver => self.open_driver().await,
            Operation::CloseDriver => self.close_driver().await,
            Operation::ConnectDevice => self.connect_device().await,
            Operation::DisconnectDevice => self.disconnect_device().await,
            Operation::SetCellOn => self.set_cell_on().await,
            Operation::SetCellOff => self.set_cell_off().await,
            Operation::GetPotential => self.get_potential().await.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_potential_is_read_only() {
        assert!(Operation::OpenDriver.is_mutation());
        assert!(Operation::SetCellOff.is_mutation());
        assert!(!Operation::GetPotential.is_mutation());
    }

    #[test]
    fn test_method_names() {
        assert_eq!(Operation::DisconnectDevice.method(), "DisconnectDevice");
        assert_eq!(Operation::GetPotential.to_string(), "get_potential");
    }
}
