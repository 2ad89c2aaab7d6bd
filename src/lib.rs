//! # Ivium Session
//!
//! Session controller for an electrochemistry potentiostat driven through IviumSoft on a
//! remote driver host. The operator opens the driver, connects the instrument, switches
//! the cell, and watches the measured potential; this crate keeps the local picture of
//! that chain honest while calls fail, race and arrive late.
//!
//! ## Crate Structure
//!
//! - **`state`**: `SessionState`, the driver/device/cell readiness record whose setters
//!   keep `cell_on ⇒ device_connected ⇒ driver running` intact.
//! - **`session`**: the `Session` controller. Dispatches transitions as tokio tasks,
//!   applies their completions, tracks in-flight mutations and gates polling.
//! - **`classifier`**: maps a failed call's tag to one of three recovery actions.
//! - **`poller`**: the periodic potential reader, with generation-based stale discard.
//! - **`teardown`**: one-shot hook that closes the driver when the host goes away.
//! - **`view`**: presentation model (connect prompt, toggles, potential label).
//! - **`config`**: figment-backed `SessionConfig` (`config/ivium.toml` + `IVIUM_` env).
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: `SessionError` for setup failures.
//!
//! The transport lives in the `ivium-client` crate, re-exported here as
//! [`ivium_client`].
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use ivium_session::{config::PollerConfig, Session};
//! use ivium_client::SimulatedGateway;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut session = Session::new(
//!     Arc::new(SimulatedGateway::new()),
//!     &PollerConfig::default(),
//!     tokio::runtime::Handle::current(),
//! );
//! session.open_driver();
//! session.settle().await;
//! session.connect_device(true);
//! session.settle().await;
//! assert!(session.poll_precondition());
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod logging;
pub mod poller;
pub mod session;
pub mod state;
pub mod teardown;
pub mod view;

pub use ivium_client;

pub use classifier::{classify, classify_tag, Recovery};
pub use config::{PollerConfig, SessionConfig};
pub use error::{Result, SessionError};
pub use poller::{format_potential, MeasurementPoller, PotentialReading};
pub use session::{InFlight, Mutation, Session, SessionEvent, SessionSnapshot};
pub use state::{DeviceStatus, DriverStatus, SessionState};
pub use teardown::TeardownHook;
pub use view::{Controls, SessionView, Toggle};
