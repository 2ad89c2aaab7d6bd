//! Driver host address configuration and URL normalization.
//!
//! - [`HostAddress`]: validated host URL with source tracking
//! - [`AddressSource`]: where the address configuration came from
//! - [`AddressError`]: user-friendly validation errors
//!
//! # Address Resolution Precedence
//!
//! Addresses are resolved in this order (highest priority first):
//! 1. Command line (`--endpoint`)
//! 2. `IVIUM_HOST_URL` environment variable
//! 3. Configuration file (`gateway.endpoint`)
//! 4. Default: `http://127.0.0.1:50051`
//!
//! # Example
//!
//! ```
//! use ivium_client::connection::{HostAddress, AddressSource};
//!
//! let addr = HostAddress::parse("10.0.0.7:50051", AddressSource::CommandLine)?;
//! assert_eq!(addr.as_str(), "http://10.0.0.7:50051/");
//! # Ok::<(), ivium_client::connection::AddressError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Default gRPC port of the driver host.
pub const DEFAULT_GRPC_PORT: u16 = 50051;

/// Default driver host address when nothing else is configured.
pub const DEFAULT_HOST_URL: &str = "http://127.0.0.1:50051";

/// Environment variable consulted during address resolution.
pub const HOST_URL_ENV: &str = "IVIUM_HOST_URL";

/// Source of the driver host address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressSource {
    /// Hardcoded default
    Default,
    /// `gateway.endpoint` in the configuration file
    ConfigFile,
    /// `IVIUM_HOST_URL` environment variable
    Environment,
    /// `--endpoint` on the command line
    CommandLine,
}

impl AddressSource {
    /// Returns the priority for address resolution (higher = preferred).
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::ConfigFile => 1,
            Self::Environment => 2,
            Self::CommandLine => 3,
        }
    }

    /// Short label for status lines.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::ConfigFile => "config",
            Self::Environment => "env",
            Self::CommandLine => "cli",
        }
    }
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::ConfigFile => write!(f, "Configuration file"),
            Self::Environment => write!(f, "Environment ({HOST_URL_ENV})"),
            Self::CommandLine => write!(f, "Command line"),
        }
    }
}

/// Validated driver host address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAddress {
    /// The normalized URL (always has scheme and port)
    url: String,
    source: AddressSource,
    /// Original input string, for diagnostics
    original: String,
}

impl HostAddress {
    /// Parse and normalize a host URL.
    pub fn parse(input: &str, source: AddressSource) -> Result<Self, AddressError> {
        let normalized = normalize_url(input)?;
        Ok(Self {
            url: normalized.to_string(),
            source,
            original: input.to_string(),
        })
    }

    /// The built-in default address.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            url: format!("{DEFAULT_HOST_URL}/"),
            source: AddressSource::Default,
            original: DEFAULT_HOST_URL.to_string(),
        }
    }

    /// Returns the normalized URL string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Returns where this address came from.
    #[must_use]
    pub fn source(&self) -> AddressSource {
        self.source
    }

    /// Returns the original input string before normalization.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Returns `true` if this address uses TLS (https scheme).
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.url.starts_with("https://")
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.source.label())
    }
}

impl Default for HostAddress {
    fn default() -> Self {
        Self::fallback()
    }
}

/// URL validation error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Input was empty or whitespace-only
    #[error("Address cannot be empty")]
    EmptyInput,
    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// No host was found in the URL
    #[error("URL must include a host")]
    MissingHost,
    /// Port could not be set
    #[error("Invalid port: {0}")]
    InvalidPort(String),
    /// Only http/https are accepted
    #[error("Unsupported scheme '{0}' (use http or https)")]
    UnsupportedScheme(String),
}

/// Normalize a driver host URL.
///
/// Adds `http://` when the scheme is missing and port 50051 when the port is missing.
///
/// ```
/// use ivium_client::connection::normalize_url;
///
/// let url = normalize_url("lab-pc.local")?;
/// assert_eq!(url.as_str(), "http://lab-pc.local:50051/");
/// # Ok::<(), ivium_client::connection::AddressError>(())
/// ```
pub fn normalize_url(input: &str) -> Result<Url, AddressError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AddressError::EmptyInput);
    }

    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("http://{input}")
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| AddressError::InvalidUrl(e.to_string()))?;

    let scheme = url.scheme().to_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(AddressError::UnsupportedScheme(scheme));
    }

    if url.host().is_none() {
        return Err(AddressError::MissingHost);
    }

    if url.port().is_none() {
        url.set_port(Some(DEFAULT_GRPC_PORT))
            .map_err(|()| AddressError::InvalidPort("cannot set port on this URL".to_string()))?;
    }

    Ok(url)
}

/// Resolve the driver host address from its possible sources.
///
/// Invalid candidates are skipped with a warning; the result never fails and falls
/// back to [`DEFAULT_HOST_URL`].
pub fn resolve_address(cli: Option<&str>, config_file: Option<&str>) -> HostAddress {
    let env = std::env::var(HOST_URL_ENV).ok();
    let candidates = [
        (cli, AddressSource::CommandLine),
        (env.as_deref(), AddressSource::Environment),
        (config_file, AddressSource::ConfigFile),
    ];

    for (input, source) in candidates {
        let Some(input) = input.filter(|s| !s.trim().is_empty()) else {
            continue;
        };
        match HostAddress::parse(input, source) {
            Ok(addr) => return addr,
            Err(e) => tracing::warn!("Ignoring {} address '{}': {}", source.label(), input, e),
        }
    }

    HostAddress::fallback()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_normalize_bare_host_port() {
        let url = normalize_url("127.0.0.1:50051").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:50051/");
    }

    #[test]
    fn test_normalize_adds_default_port() {
        let url = normalize_url("http://localhost").unwrap();
        assert_eq!(url.as_str(), "http://localhost:50051/");

        let url = normalize_url("https://ivium.lab").unwrap();
        assert_eq!(url.as_str(), "https://ivium.lab:50051/");
    }

    #[test]
    fn test_normalize_ipv6() {
        let url = normalize_url("[::1]:8080").unwrap();
        assert_eq!(url.as_str(), "http://[::1]:8080/");
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        assert_eq!(normalize_url("   ").unwrap_err(), AddressError::EmptyInput);
        assert!(matches!(
            normalize_url("ftp://example.com").unwrap_err(),
            AddressError::UnsupportedScheme(_)
        ));
    }

    #[test]
    fn test_fallback_matches_default_url() {
        let parsed = HostAddress::parse(DEFAULT_HOST_URL, AddressSource::Default).unwrap();
        assert_eq!(parsed, HostAddress::fallback());
        assert!(!parsed.is_tls());
    }

    #[test]
    fn test_source_priority_order() {
        assert!(AddressSource::CommandLine.priority() > AddressSource::Environment.priority());
        assert!(AddressSource::Environment.priority() > AddressSource::ConfigFile.priority());
        assert!(AddressSource::ConfigFile.priority() > AddressSource::Default.priority());
    }

    #[test]
    #[serial]
    fn test_resolve_defaults_when_nothing_set() {
        std::env::remove_var(HOST_URL_ENV);
        let addr = resolve_address(None, None);
        assert_eq!(addr.source(), AddressSource::Default);
        assert_eq!(addr.as_str(), "http://127.0.0.1:50051/");
    }

    #[test]
    #[serial]
    fn test_resolve_env_beats_config_file() {
        std::env::set_var(HOST_URL_ENV, "http://env-host:9000");
        let addr = resolve_address(None, Some("config-host:7000"));
        assert_eq!(addr.as_str(), "http://env-host:9000/");
        assert_eq!(addr.source(), AddressSource::Environment);
        std::env::remove_var(HOST_URL_ENV);
    }

    #[test]
    #[serial]
    fn test_resolve_cli_beats_env() {
        std::env::set_var(HOST_URL_ENV, "http://env-host:9000");
        let addr = resolve_address(Some("cli-host:1234"), None);
        assert_eq!(addr.as_str(), "http://cli-host:1234/");
        assert_eq!(addr.source(), AddressSource::CommandLine);
        std::env::remove_var(HOST_URL_ENV);
    }

    #[test]
    #[serial]
    fn test_resolve_skips_invalid_candidates() {
        std::env::remove_var(HOST_URL_ENV);
        let addr = resolve_address(Some("ftp://nope"), Some("config-host"));
        assert_eq!(addr.source(), AddressSource::ConfigFile);
        assert_eq!(addr.as_str(), "http://config-host:50051/");
    }
}
