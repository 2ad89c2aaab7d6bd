//! Session configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/ivium.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `IVIUM_`, nested keys separated by `__`
//!
//! Every field has a default, so an empty or missing file yields a working
//! configuration.
//!
//! # Example
//! ```no_run
//! use ivium_session::config::SessionConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // IVIUM_POLLER__PERIOD=500ms overrides [poller] period
//! let config = SessionConfig::load()?;
//! config.validate()?;
//! println!("polling every {:?}", config.poller.period);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use ivium_client::{ChannelConfig, SimulatedGateway, SimulatedHost};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/ivium.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "IVIUM_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Driver host connection
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Potential polling
    #[serde(default)]
    pub poller: PollerConfig,
    /// Simulated host used by `simulate`
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Driver host connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host URL; falls back to `IVIUM_HOST_URL`, then the built-in default
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Connection establishment timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Per-call deadline
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Log every gateway call with its duration
    #[serde(default = "default_true")]
    pub log_calls: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            log_calls: true,
        }
    }
}

/// Potential poller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Time between the previous result and the next request
    #[serde(default = "default_poll_period", with = "humantime_serde")]
    pub period: Duration,
    /// Issue the first request as soon as polling becomes enabled, including every
    /// re-entry after a pause. An immediate read on re-entry is intended: the operator
    /// sees the potential right after connecting. With `false` each (re-)entry waits one
    /// full `period` before the first request.
    #[serde(default = "default_true")]
    pub immediate_on_enable: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            period: default_poll_period(),
            immediate_on_enable: true,
        }
    }
}

/// Simulated driver host settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Latency added to every call (zero for instant replies)
    #[serde(default = "default_sim_latency", with = "humantime_serde")]
    pub latency: Duration,
    /// Reported potential in volts
    #[serde(default = "default_sim_potential")]
    pub potential: f64,
    /// Peak noise amplitude in volts
    #[serde(default)]
    pub noise: f64,
    /// Whether the simulated driver starts running
    #[serde(default = "default_true")]
    pub driver_running: bool,
    /// Whether the simulated instrument starts plugged in
    #[serde(default = "default_true")]
    pub device_plugged: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency: default_sim_latency(),
            potential: default_sim_potential(),
            noise: 0.0,
            driver_running: true,
            device_plugged: true,
        }
    }
}

impl SimulationConfig {
    /// Build a simulated gateway from these settings.
    #[must_use]
    pub fn gateway(&self) -> SimulatedGateway {
        let host = SimulatedHost {
            driver_running: self.driver_running,
            device_plugged: self.device_plugged,
            potential: self.potential,
            noise: self.noise,
            ..SimulatedHost::default()
        };
        let gateway = SimulatedGateway::with_host(host);
        if self.latency.is_zero() {
            gateway
        } else {
            gateway.with_latency(self.latency)
        }
    }
}

// Default value functions
fn default_name() -> String {
    "Ivium Session".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_period() -> Duration {
    Duration::from_millis(2000)
}

fn default_sim_latency() -> Duration {
    Duration::from_millis(150)
}

fn default_sim_potential() -> f64 {
    0.000_423_15
}

fn default_true() -> bool {
    true
}

impl SessionConfig {
    /// Load configuration from `config/ivium.toml` and environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path, then apply `IVIUM_` overrides.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::figment(path.as_ref())
            .extract()
            .map_err(SessionError::from)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SessionError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(SessionError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.poller.period.is_zero() {
            return Err(SessionError::Configuration(
                "poller.period must be greater than zero".into(),
            ));
        }

        if self.gateway.connect_timeout.is_zero() || self.gateway.request_timeout.is_zero() {
            return Err(SessionError::Configuration(
                "gateway timeouts must be greater than zero".into(),
            ));
        }

        if !self.simulation.potential.is_finite() || !self.simulation.noise.is_finite() {
            return Err(SessionError::Configuration(
                "simulation potential and noise must be finite".into(),
            ));
        }

        Ok(())
    }

    /// Channel settings for the gRPC gateway.
    #[must_use]
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            connect_timeout: self.gateway.connect_timeout,
            request_timeout: self.gateway.request_timeout,
            ..ChannelConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.poller.period, Duration::from_secs(2));
        assert!(config.poller.immediate_on_enable);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let file = write_config(
            r#"
            [application]
            log_level = "debug"

            [gateway]
            endpoint = "driver-host:50051"
            request_timeout = "3s"

            [poller]
            period = "500ms"
            immediate_on_enable = false

            [simulation]
            latency = "0s"
            device_plugged = false
            "#,
        );

        let config = SessionConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.name, "Ivium Session");
        assert_eq!(config.gateway.endpoint.as_deref(), Some("driver-host:50051"));
        assert_eq!(config.gateway.request_timeout, Duration::from_secs(3));
        assert_eq!(config.poller.period, Duration::from_millis(500));
        assert!(!config.poller.immediate_on_enable);
        assert!(config.simulation.latency.is_zero());
        assert!(!config.simulation.device_plugged);

        let channel = config.channel_config();
        assert_eq!(channel.request_timeout, Duration::from_secs(3));
        assert_eq!(channel.keepalive_interval, ChannelConfig::default().keepalive_interval);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config("[poller]\nperiod = \"500ms\"\n");
        std::env::set_var("IVIUM_POLLER__PERIOD", "750ms");
        std::env::set_var("IVIUM_APPLICATION__LOG_LEVEL", "warn");
        let result = SessionConfig::load_from(file.path());
        std::env::remove_var("IVIUM_POLLER__PERIOD");
        std::env::remove_var("IVIUM_APPLICATION__LOG_LEVEL");

        let config = result.unwrap();
        assert_eq!(config.poller.period, Duration::from_millis(750));
        assert_eq!(config.application.log_level, "warn");
    }

    #[test]
    #[serial]
    fn test_malformed_duration_is_config_error() {
        let file = write_config("[poller]\nperiod = \"soon\"\n");
        let err = SessionConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = SessionConfig::default();
        config.application.log_level = "invalid".to_string();
        assert!(matches!(
            config.validate(),
            Err(SessionError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_poll_period_rejected() {
        let mut config = SessionConfig::default();
        config.poller.period = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poller.period"));
    }

    #[test]
    fn test_simulation_gateway_follows_settings() {
        let config = SimulationConfig {
            latency: Duration::ZERO,
            potential: 0.25,
            noise: 0.0,
            driver_running: false,
            device_plugged: true,
        };
        let gateway = config.gateway();
        assert_eq!(gateway.mode(), ivium_client::MockMode::Instant);
        let host = gateway.host();
        assert!(!host.driver_running);
        assert_eq!(host.potential, 0.25);
    }
}
