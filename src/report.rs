//! Status snapshots of the array and their console rendering.

use crate::array::SupplyArray;
use crate::error::AppResult;
use crate::session::SupplySession;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Output state and measurement triple of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    pub channel: usize,
    pub output_on: bool,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

/// Snapshot of one supply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplyStatus {
    pub supply: String,
    pub identity: String,
    pub channels: Vec<ChannelStatus>,
}

impl SupplyStatus {
    /// Query identity, then output state and `MEASure:ALL?` for every channel.
    pub async fn read(session: &mut SupplySession) -> AppResult<Self> {
        let identity = session.identify().await?;
        let mut channels = Vec::with_capacity(session.channel_count());
        for channel in session.channels() {
            let output_on = session.output_enabled(channel).await?;
            let (voltage, current, power) = session.read_all(channel).await?;
            channels.push(ChannelStatus {
                channel,
                output_on,
                voltage,
                current,
                power,
            });
        }
        Ok(Self {
            supply: session.name().to_string(),
            identity,
            channels,
        })
    }
}

/// Snapshot of the whole array, supplies in configuration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub taken_at: DateTime<Utc>,
    pub supplies: Vec<SupplyStatus>,
}

impl StatusReport {
    pub async fn collect(array: &mut SupplyArray) -> AppResult<Self> {
        let mut supplies = Vec::with_capacity(array.len());
        for session in array.iter_mut() {
            supplies.push(SupplyStatus::read(session).await?);
        }
        Ok(Self {
            taken_at: Utc::now(),
            supplies,
        })
    }

    pub fn supply(&self, name: &str) -> Option<&SupplyStatus> {
        self.supplies.iter().find(|s| s.supply == name)
    }
}

impl fmt::Display for SupplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.identity)?;
        writeln!(f, "\tChannel\t| Status\t| V\t\t| I (A)\t\t| P (W)")?;
        for ch in &self.channels {
            let state = if ch.output_on { "ON" } else { "OFF" };
            writeln!(
                f,
                "\t{:7}\t| {:8}\t| {:3.4}\t| {:3.4}\t| {:3.4}",
                ch.channel, state, ch.voltage, ch.current, ch.power
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for supply in &self.supplies {
            writeln!(f, "{supply}")?;
        }
        Ok(())
    }
}
