//! Array-wide power sequencing.
//!
//! All passes walk supplies in configuration order and channels in ascending order, one
//! exchange at a time.

use crate::array::SupplyArray;
use crate::config::SequencingSettings;
use crate::error::{AppResult, PsuError};
use crate::report::StatusReport;
use std::time::Duration;
use tracing::{info, warn};

/// Snapshots taken around a power-down pass.
#[derive(Debug, Clone, Default)]
pub struct PowerDownReport {
    pub before: Option<StatusReport>,
    pub after: Option<StatusReport>,
}

/// Coordinates power-up, power-down and power-cycle across a [`SupplyArray`].
#[derive(Debug, Clone)]
pub struct PowerSequencer {
    settle_delay: Duration,
    cycle_pause: Duration,
}

impl Default for PowerSequencer {
    fn default() -> Self {
        Self::new(&SequencingSettings::default())
    }
}

impl PowerSequencer {
    pub fn new(settings: &SequencingSettings) -> Self {
        Self {
            settle_delay: settings.settle_delay,
            cycle_pause: settings.cycle_pause,
        }
    }

    /// Override the wait before a post-change status report
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Override the on-time of each channel during a power cycle
    pub fn with_cycle_pause(mut self, pause: Duration) -> Self {
        self.cycle_pause = pause;
        self
    }

    /// Enable every channel that was provisioned with a voltage.
    ///
    /// Disabled channels are never touched. With `report`, waits the settle delay and returns
    /// a status snapshot.
    pub async fn power_up(
        &self,
        array: &mut SupplyArray,
        report: bool,
    ) -> AppResult<Option<StatusReport>> {
        let mut enabled = 0usize;
        for session in array.iter_mut() {
            for channel in session.channels() {
                if session.cached_voltage(channel)? > 0.0 {
                    session.enable_output(channel).await?;
                    enabled += 1;
                }
            }
        }
        info!(channels = enabled, "Array powered up");

        if report {
            tokio::time::sleep(self.settle_delay).await;
            Ok(Some(self.report_status(array).await?))
        } else {
            Ok(None)
        }
    }

    /// Disable every channel, including disabled ones.
    ///
    /// The pass never stops early: a channel that fails to switch off is logged and the next
    /// one is attempted. All failures are returned together as [`PsuError::PowerDownFailed`].
    /// A failed status snapshot is logged and left out of the report.
    pub async fn power_down(
        &self,
        array: &mut SupplyArray,
        report: bool,
    ) -> AppResult<PowerDownReport> {
        let mut result = PowerDownReport::default();
        if report {
            result.before = self.snapshot(array, "before power-down").await;
        }

        let mut failures = Vec::new();
        for session in array.iter_mut() {
            for channel in session.channels() {
                if let Err(err) = session.disable_output(channel).await {
                    warn!(
                        supply = %session.name(),
                        channel,
                        error = %err,
                        "Failed to disable output, continuing power-down"
                    );
                    failures.push(err);
                }
            }
        }

        if report {
            tokio::time::sleep(self.settle_delay).await;
            result.after = self.snapshot(array, "after power-down").await;
        }

        if failures.is_empty() {
            info!("Array powered down");
            Ok(result)
        } else {
            warn!(failures = failures.len(), "Power-down finished with failures");
            Err(PsuError::PowerDownFailed(failures))
        }
    }

    /// Switch each enabled channel on, wait the cycle pause, and switch it off again.
    pub async fn power_cycle(&self, array: &mut SupplyArray) -> AppResult<()> {
        for session in array.iter_mut() {
            for channel in session.channels() {
                if session.cached_voltage(channel)? <= 0.0 {
                    continue;
                }
                info!(supply = %session.name(), channel, "Power cycling channel");
                let enabled = session.enable_output(channel).await;
                tokio::time::sleep(self.cycle_pause).await;
                session.disable_output(channel).await?;
                enabled?;
            }
        }
        Ok(())
    }

    /// Identity, output state and measurements of every channel.
    pub async fn report_status(&self, array: &mut SupplyArray) -> AppResult<StatusReport> {
        StatusReport::collect(array).await
    }

    async fn snapshot(&self, array: &mut SupplyArray, when: &str) -> Option<StatusReport> {
        match StatusReport::collect(array).await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(error = %err, "Status report {when} failed");
                None
            }
        }
    }
}
