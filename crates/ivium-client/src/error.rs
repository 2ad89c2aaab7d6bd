//! Client error types.
//!
//! Two kinds of error live here. [`ClientError`] covers setting up a gateway (bad
//! address, channel construction). [`RpcFailure`] is the payload of a single failed
//! remote call; its [`FailureTag`] is the only part the session core matches on.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::connection::AddressError;

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while building a gateway.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Driver host address failed validation.
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// gRPC transport error (bad endpoint URI, TLS error, etc.).
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Machine-matchable identity of an RPC failure.
///
/// The wire form (see [`FailureTag::as_str`]) is what a driver host puts in the
/// `x-ivium-error-tag` response metadata. Unknown names parse to [`FailureTag::Other`],
/// so parsing never fails.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailureTag {
    /// The driver sees no instrument on its bus.
    NoDeviceDetected,
    /// An instrument exists but the driver holds no link to it.
    DeviceNotConnectedToDriver,
    /// The vendor driver process is not running on the host.
    NoDriverRunning,
    /// The request never reached the host or the connection dropped.
    Transport,
    /// The request exceeded its deadline.
    Timeout,
    /// The host failed without naming a known cause.
    Server,
    /// Any other tag reported by the host, kept verbatim.
    Other(String),
}

impl FailureTag {
    /// Stable wire name of this tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::NoDeviceDetected => "no-device-detected",
            Self::DeviceNotConnectedToDriver => "device-not-connected",
            Self::NoDriverRunning => "no-driver-running",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Server => "server",
            Self::Other(name) => name,
        }
    }

    /// Parse a wire name. Total: unrecognized names become [`FailureTag::Other`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "no-device-detected" => Self::NoDeviceDetected,
            "device-not-connected" => Self::DeviceNotConnectedToDriver,
            "no-driver-running" => Self::NoDriverRunning,
            "transport" => Self::Transport,
            "timeout" => Self::Timeout,
            "server" => Self::Server,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FailureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureTag {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// A failed remote call: identifying tag plus advisory diagnostic text.
///
/// The message is for logs and humans only. Control flow must go through `tag`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{tag} failure: {message}")]
pub struct RpcFailure {
    /// Identifying tag.
    pub tag: FailureTag,
    /// Free-form diagnostic text.
    pub message: String,
}

impl RpcFailure {
    /// Create a failure from a tag and a diagnostic message.
    pub fn new(tag: FailureTag, message: impl Into<String>) -> Self {
        Self {
            tag,
            message: message.into(),
        }
    }
}
