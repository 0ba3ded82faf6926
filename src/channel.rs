//! Per-channel targets derived from the array document.
//!
//! A configured voltage of zero or below is the "do not use" sentinel. It is turned into
//! [`Setpoint::Disabled`] at load time so the rest of the crate never compares raw numbers
//! against the sentinel.

use crate::error::{AppResult, PsuError};
use serde::Serialize;

/// Current limit written to channels that must stay de-energized, in amperes.
///
/// The instrument must never report an undefined limit while an output is off, so disabled
/// channels get this small floor instead of zero.
pub const DEFAULT_SAFETY_FLOOR_AMPS: f64 = 0.001;

/// Fail unless `amps` is a usable safety floor: finite and above zero.
pub fn check_safety_floor(amps: f64) -> AppResult<()> {
    if amps.is_finite() && amps > 0.0 {
        Ok(())
    } else {
        Err(PsuError::Configuration(format!(
            "safety floor must be a positive current, got {amps} A"
        )))
    }
}

/// Target state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Setpoint {
    /// Channel must remain de-energized.
    Disabled,
    /// Channel is energized at `voltage` volts with an over-current limit of `current_limit` amps.
    Enabled { voltage: f64, current_limit: f64 },
}

impl Setpoint {
    /// Map a raw configured `(voltage, current_limit)` pair onto a setpoint.
    ///
    /// Returns `None` when the channel would be energized without a positive current limit.
    pub fn from_raw(voltage: f64, current_limit: f64) -> Option<Self> {
        if voltage <= 0.0 {
            return Some(Setpoint::Disabled);
        }
        if current_limit > 0.0 && current_limit.is_finite() && voltage.is_finite() {
            Some(Setpoint::Enabled {
                voltage,
                current_limit,
            })
        } else {
            None
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Setpoint::Enabled { .. })
    }

    /// Voltage that provisioning writes to the instrument.
    pub fn effective_voltage(&self) -> f64 {
        match self {
            Setpoint::Disabled => 0.0,
            Setpoint::Enabled { voltage, .. } => *voltage,
        }
    }

    /// Current limit that provisioning writes to the instrument.
    pub fn effective_current_limit(&self, safety_floor: f64) -> f64 {
        match self {
            Setpoint::Disabled => safety_floor,
            Setpoint::Enabled { current_limit, .. } => *current_limit,
        }
    }
}

/// Validated target for one physical channel, identified by supply name and 1-based index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSpec {
    pub supply: String,
    pub index: usize,
    pub setpoint: Setpoint,
}

impl ChannelSpec {
    pub fn new(supply: impl Into<String>, index: usize, setpoint: Setpoint) -> Self {
        Self {
            supply: supply.into(),
            index,
            setpoint,
        }
    }

    pub fn disabled(supply: impl Into<String>, index: usize) -> Self {
        Self::new(supply, index, Setpoint::Disabled)
    }

    pub fn enabled(supply: impl Into<String>, index: usize, voltage: f64, current_limit: f64) -> Self {
        Self::new(
            supply,
            index,
            Setpoint::Enabled {
                voltage,
                current_limit,
            },
        )
    }
}

impl std::fmt::Display for ChannelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.setpoint {
            Setpoint::Disabled => write!(f, "{} CH{}: disabled", self.supply, self.index),
            Setpoint::Enabled {
                voltage,
                current_limit,
            } => write!(
                f,
                "{} CH{}: {} V, limit {} A",
                self.supply, self.index, voltage, current_limit
            ),
        }
    }
}
