//! RPC gateway to an IviumSoft driver host.
//!
//! This crate is the transport side of the Ivium session controller. It defines the
//! [`Gateway`] contract the session core calls through, plus three implementations:
//!
//! - [`GrpcGateway`]: talks to a remote driver host over gRPC
//! - [`LoggingGateway`]: wraps any gateway and logs every call
//! - [`SimulatedGateway`]: in-process model of the driver, USB link and cell
//!
//! It is UI-agnostic; the session state machine lives in the `ivium_session` crate.

pub mod connection;
pub mod error;
pub mod gateway;
pub mod grpc;
pub mod logging;
pub mod proto;
pub mod simulated;

pub use connection::{
    normalize_url, resolve_address, AddressError, AddressSource, HostAddress, DEFAULT_GRPC_PORT,
    DEFAULT_HOST_URL, HOST_URL_ENV,
};
pub use error::{ClientError, FailureTag, Result, RpcFailure};
pub use gateway::{Gateway, Operation};
pub use grpc::{ChannelConfig, GrpcGateway, ERROR_TAG_METADATA_KEY};
pub use logging::LoggingGateway;
pub use simulated::{MockMode, SimulatedGateway, SimulatedHost};
