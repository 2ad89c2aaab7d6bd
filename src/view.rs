//! Presentation model derived from a [`SessionSnapshot`].
//!
//! Nothing here talks to the gateway. A shell (console, GUI) renders a [`SessionView`]
//! and consults [`Controls`] before forwarding an operator action to the session.

use std::fmt;

use serde::Serialize;

use crate::classifier::Recovery;
use crate::session::SessionSnapshot;
use crate::state::{DeviceStatus, DriverStatus};

/// Label of the button that opens the driver.
pub const CONNECT_PROMPT: &str = "Connect App to IviumSoft";

/// Shown under the prompt once the driver was reported absent.
pub const DRIVER_NOT_RUNNING_NOTICE: &str =
    "Iviumsoft is not running. Please launch the software and try connecting again.";

/// Which operator actions are available right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Controls {
    /// The connect prompt is showing.
    pub open_driver: bool,
    /// The driver can be released.
    pub close_driver: bool,
    /// The device toggle accepts input.
    pub device_toggle: bool,
    /// The cell toggle accepts input.
    pub cell_toggle: bool,
}

impl Controls {
    /// Derive availability from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        let running = snapshot.driver_status == DriverStatus::Running && !snapshot.ended;
        let idle = !snapshot.mutation_in_flight;
        Self {
            open_driver: !running && !snapshot.ended,
            close_driver: running,
            device_toggle: running && idle,
            cell_toggle: running && snapshot.device_connected && idle,
        }
    }
}

/// A labelled on/off switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toggle {
    /// Switch label.
    pub label: &'static str,
    /// Current position.
    pub checked: bool,
    /// Whether the operator may flip it.
    pub enabled: bool,
    /// Error shown under the switch, if any.
    pub error_text: Option<&'static str>,
}

/// What the operator sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "screen", rename_all = "kebab-case")]
pub enum SessionView {
    /// Driver not confirmed: only the connect prompt.
    Prompt {
        /// Button label.
        prompt: &'static str,
        /// Set when the driver was reported not running.
        notice: Option<&'static str>,
    },
    /// Driver running: instrument controls.
    Controls {
        /// Device connection switch.
        device: Toggle,
        /// Cell status switch.
        cell: Toggle,
        /// A mutation is awaiting its outcome.
        busy: bool,
        /// Potential label, once a value was fetched.
        potential: Option<String>,
        /// Hint for the last unclassified failure.
        hint: Option<&'static str>,
    },
}

impl SessionView {
    /// Build the view for `snapshot`.
    #[must_use]
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        if snapshot.driver_status != DriverStatus::Running {
            return Self::Prompt {
                prompt: CONNECT_PROMPT,
                notice: (snapshot.driver_status == DriverStatus::NotRunning)
                    .then_some(DRIVER_NOT_RUNNING_NOTICE),
            };
        }

        let controls = Controls::from_snapshot(snapshot);
        Self::Controls {
            device: Toggle {
                label: "Device Connection",
                checked: snapshot.device_connected,
                enabled: controls.device_toggle,
                error_text: (snapshot.device_status == DeviceStatus::NotAvailable)
                    .then(|| Recovery::DeviceAbsent.hint()),
            },
            cell: Toggle {
                label: "Cell Status",
                checked: snapshot.cell_on,
                enabled: controls.cell_toggle,
                error_text: None,
            },
            busy: snapshot.mutation_in_flight,
            potential: snapshot.potential.map(|reading| reading.label()),
            hint: snapshot
                .last_recovery
                .filter(|recovery| *recovery == Recovery::Unclassified)
                .map(Recovery::hint),
        }
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}{}",
            if self.checked { "x" } else { " " },
            self.label,
            if self.enabled { "" } else { " (disabled)" }
        )?;
        if let Some(error) = self.error_text {
            write!(f, "\n    ! {error}")?;
        }
        Ok(())
    }
}

impl fmt::Display for SessionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prompt { prompt, notice } => {
                write!(f, "> {prompt}  (type `open`)")?;
                if let Some(notice) = notice {
                    write!(f, "\n  {notice}")?;
                }
                Ok(())
            }
            Self::Controls {
                device,
                cell,
                busy,
                potential,
                hint,
            } => {
                writeln!(f, "  {device}")?;
                write!(f, "  {cell}")?;
                if *busy {
                    write!(f, "\n  ...")?;
                }
                if let Some(potential) = potential {
                    write!(f, "\n  {potential}")?;
                }
                if let Some(hint) = hint {
                    write!(f, "\n  {hint}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::PotentialReading;
    use chrono::Utc;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            driver_status: DriverStatus::Running,
            device_status: DeviceStatus::Available,
            device_connected: true,
            cell_on: false,
            mutation_in_flight: false,
            polling: true,
            potential: None,
            last_recovery: None,
            ended: false,
        }
    }

    #[test]
    fn test_prompt_until_driver_running() {
        let mut snap = snapshot();
        snap.driver_status = DriverStatus::Unknown;
        snap.device_connected = false;
        assert_eq!(
            SessionView::from_snapshot(&snap),
            SessionView::Prompt {
                prompt: CONNECT_PROMPT,
                notice: None
            }
        );

        snap.driver_status = DriverStatus::NotRunning;
        assert_eq!(
            SessionView::from_snapshot(&snap),
            SessionView::Prompt {
                prompt: CONNECT_PROMPT,
                notice: Some(DRIVER_NOT_RUNNING_NOTICE)
            }
        );
        assert!(Controls::from_snapshot(&snap).open_driver);
    }

    #[test]
    fn test_toggles_disabled_while_in_flight() {
        let mut snap = snapshot();
        snap.mutation_in_flight = true;
        let controls = Controls::from_snapshot(&snap);
        assert!(!controls.device_toggle);
        assert!(!controls.cell_toggle);
        assert!(controls.close_driver);

        match SessionView::from_snapshot(&snap) {
            SessionView::Controls { busy, device, .. } => {
                assert!(busy);
                assert!(!device.enabled);
            }
            other => panic!("expected controls, got {other:?}"),
        }
    }

    #[test]
    fn test_cell_toggle_requires_device() {
        let mut snap = snapshot();
        assert!(Controls::from_snapshot(&snap).cell_toggle);
        snap.device_connected = false;
        let controls = Controls::from_snapshot(&snap);
        assert!(controls.device_toggle);
        assert!(!controls.cell_toggle);
    }

    #[test]
    fn test_device_error_text() {
        let mut snap = snapshot();
        snap.device_connected = false;
        snap.device_status = DeviceStatus::NotAvailable;
        match SessionView::from_snapshot(&snap) {
            SessionView::Controls { device, .. } => {
                assert_eq!(device.error_text, Some(Recovery::DeviceAbsent.hint()));
                assert!(device.to_string().contains("Device not found"));
            }
            other => panic!("expected controls, got {other:?}"),
        }
    }

    #[test]
    fn test_potential_label() {
        let mut snap = snapshot();
        snap.potential = Some(PotentialReading {
            volts: 0.00042315,
            fetched_at: Utc::now(),
            fresh: true,
        });
        let view = SessionView::from_snapshot(&snap);
        assert!(view.to_string().contains("Potential: 0.00042315"));
    }

    #[test]
    fn test_ended_session_offers_nothing() {
        let mut snap = snapshot();
        snap.ended = true;
        assert_eq!(
            Controls::from_snapshot(&snap),
            Controls {
                open_driver: false,
                close_driver: false,
                device_toggle: false,
                cell_toggle: false,
            }
        );
    }
}
