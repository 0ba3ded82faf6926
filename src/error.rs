//! Custom error types for the application.
//!
//! This module defines the primary error type, `PsuError`, for the entire crate. Using the
//! `thiserror` crate, it provides a single place where every failure of the supply array is
//! named, from unreachable instruments to malformed instrument replies.
//!
//! ## Error Hierarchy
//!
//! - **`SupplyUnreachable`**: a supply could not be opened or failed its identification query
//!   during provisioning. Fatal for the whole array build.
//! - **`InvalidChannel`**: a channel index outside `1..=n_ch`. A programming error, never retried.
//! - **`MalformedResponse`** / **`MalformedTraceResponse`**: an instrument reply could not be
//!   coerced into the expected numbers. Never replaced by a default value.
//! - **`Transport`**: the connection failed during a command or query.
//! - **`Configuration`** / **`Settings`**: the array document or the settings file was rejected
//!   before any instrument I/O happened.
//! - **`PowerDownFailed`**: the aggregated failures of a power-down pass that kept going.
//!
//! Nothing in this crate retries automatically; repeated writes to a power supply are not
//! idempotent in general.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, PsuError>;

#[derive(Error, Debug)]
pub enum PsuError {
    #[error("Supply '{supply}' is unreachable at {address}: {reason}")]
    SupplyUnreachable {
        supply: String,
        address: String,
        reason: String,
    },

    #[error("Invalid channel {channel} for {address} (valid range 1..={n_ch})")]
    InvalidChannel {
        address: String,
        channel: usize,
        n_ch: usize,
    },

    #[error("Invalid current limit {value} A on channel {channel}: limit must not be negative")]
    InvalidCurrentLimit { channel: usize, value: f64 },

    #[error("Invalid voltage {value} V on channel {channel}: voltage must be finite")]
    InvalidVoltage { channel: usize, value: f64 },

    #[error("Malformed response from '{supply}' at {address} to '{command}': '{response}'")]
    MalformedResponse {
        supply: String,
        address: String,
        command: String,
        response: String,
    },

    #[error(
        "Malformed trace response from '{supply}' at {address}: {values} values for {rows} rows of 3 columns"
    )]
    MalformedTraceResponse {
        supply: String,
        address: String,
        rows: usize,
        values: usize,
    },

    #[error("Trace acquisition cannot {operation} while {state}")]
    InvalidTraceState {
        operation: &'static str,
        state: crate::trace::TraceState,
    },

    #[error("Invalid trace parameters: {0}")]
    InvalidTraceParameters(String),

    #[error("Transport error on {address} during '{command}': {reason}")]
    Transport {
        address: String,
        command: String,
        reason: String,
    },

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Settings error: {0}")]
    Settings(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Power-down completed with {} failure(s): {}", .0.len(), join_errors(.0))]
    PowerDownFailed(Vec<PsuError>),

    #[error("Closing sessions failed with {} error(s): {}", .0.len(), join_errors(.0))]
    TeardownFailed(Vec<PsuError>),
}

fn join_errors(errors: &[PsuError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl PsuError {
    /// Build a transport error for a failed exchange.
    pub fn transport(
        address: impl Into<String>,
        command: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        PsuError::Transport {
            address: address.into(),
            command: command.into(),
            reason: reason.to_string(),
        }
    }

    /// Name the supply a malformed reply came from.
    ///
    /// Reply parsers do not know which instrument they are reading; the session fills this in.
    /// Other variants pass through unchanged.
    pub fn for_supply(mut self, name: &str, at: &str) -> Self {
        if let PsuError::MalformedResponse {
            supply, address, ..
        }
        | PsuError::MalformedTraceResponse {
            supply, address, ..
        } = &mut self
        {
            if supply.is_empty() {
                *supply = name.to_string();
                *address = at.to_string();
            }
        }
        self
    }

    /// Whether the error is a connection-level failure rather than a protocol or usage error.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PsuError::Transport { .. } | PsuError::SupplyUnreachable { .. } | PsuError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_names_the_supply() {
        let err = PsuError::SupplyUnreachable {
            supply: "S3".into(),
            address: "10.10.1.53".into(),
            reason: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'S3'"));
        assert!(msg.contains("10.10.1.53"));
        assert!(err.is_transport());
    }

    #[test]
    fn power_down_failure_counts_children() {
        let err = PsuError::PowerDownFailed(vec![
            PsuError::transport("10.0.0.1", "OUTP:STAT CH1,OFF", "timed out"),
            PsuError::transport("10.0.0.2", "OUTP:STAT CH2,OFF", "reset by peer"),
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("Power-down completed with 2 failure(s): "));
        assert!(msg.contains("10.0.0.2"));
        assert!(!err.is_transport());
    }

    #[test]
    fn malformed_reply_names_its_supply() {
        let err = PsuError::MalformedResponse {
            supply: String::new(),
            address: String::new(),
            command: "*IDN?".into(),
            response: "GARBAGE".into(),
        }
        .for_supply("S3", "10.10.1.53");
        let msg = err.to_string();
        assert!(msg.contains("'S3'"));
        assert!(msg.contains("10.10.1.53"));
        assert!(msg.contains("*IDN?"));

        let untouched = PsuError::Configuration("bad".into()).for_supply("S3", "10.10.1.53");
        assert!(!untouched.to_string().contains("S3"));
    }

    #[test]
    fn transport_error_carries_command() {
        let err = PsuError::transport("10.0.0.1", ":SOURCE:VOLT 3.6", "broken pipe");
        assert!(err.to_string().contains(":SOURCE:VOLT 3.6"));
    }
}
