//! Error type for session setup.
//!
//! Per-call failures are not errors in this sense: they arrive as
//! [`ivium_client::RpcFailure`] values and are classified into state changes. `SessionError`
//! covers everything that stops a session from starting:
//!
//! - **`Config`**: figment could not load or deserialize the configuration.
//! - **`Configuration`**: the configuration parsed but holds an invalid value.
//! - **`Client`**: the gateway could not be built (bad address, transport setup).
//! - **`Io`**: console or file I/O.
//! - **`Logging`**: the tracing subscriber could not be installed.

use ivium_client::ClientError;
use thiserror::Error;

/// Convenience alias for results using [`SessionError`].
pub type Result<T> = std::result::Result<T, SessionError>;

/// Session setup error.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Gateway construction failed.
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tracing could not be initialized.
    #[error("Logging error: {0}")]
    Logging(String),
}

impl From<figment::Error> for SessionError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}
