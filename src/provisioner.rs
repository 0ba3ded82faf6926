//! Turns a validated [`ArrayConfig`] into an open, configured [`SupplyArray`].
//!
//! For every supply, in document order: open a session, identify the instrument, then walk
//! its channels in ascending order applying
//!
//! ```text
//!   :OUTP:OCP ..ON           over-current protection on
//!   :SOURCe..:VOLTage:ILIMit  current limit (configured value, or the safety floor)
//!   :SOURCE..:FUNC VOLT       voltage-source mode
//!   :SOURCE..:VOLT            voltage (configured value, or 0)
//! ```
//!
//! The limit is always written before the voltage, and no output is switched on. The build
//! is all-or-nothing: on any failure every session opened so far is closed before the error
//! is returned.

use crate::array::SupplyArray;
use crate::array_config::{ArrayConfig, SupplyDefinition};
use crate::channel::{check_safety_floor, ChannelSpec, DEFAULT_SAFETY_FLOOR_AMPS};
use crate::config::ProvisioningSettings;
use crate::error::{AppResult, PsuError};
use crate::session::SupplySession;
use crate::transport::ResourceManager;
use tracing::{debug, info, info_span, warn, Instrument};

/// Builds supply arrays through an explicit [`ResourceManager`].
pub struct ArrayProvisioner<'rm> {
    rm: &'rm dyn ResourceManager,
    safety_floor: f64,
}

impl<'rm> ArrayProvisioner<'rm> {
    pub fn new(rm: &'rm dyn ResourceManager) -> Self {
        Self {
            rm,
            safety_floor: DEFAULT_SAFETY_FLOOR_AMPS,
        }
    }

    pub fn from_settings(rm: &'rm dyn ResourceManager, settings: &ProvisioningSettings) -> Self {
        Self::new(rm).with_safety_floor(settings.safety_floor_amps)
    }

    /// Current limit written to disabled channels (and substituted for a zero limit).
    pub fn with_safety_floor(mut self, amps: f64) -> Self {
        self.safety_floor = amps;
        self
    }

    pub fn safety_floor(&self) -> f64 {
        self.safety_floor
    }

    /// Open and configure every supply of `config`.
    pub async fn provision(&self, config: &ArrayConfig) -> AppResult<SupplyArray> {
        check_safety_floor(self.safety_floor)?;
        info!(
            supplies = config.len(),
            backend = self.rm.kind(),
            "Provisioning supply array"
        );
        let mut sessions: Vec<SupplySession> = Vec::with_capacity(config.len());

        for definition in config.iter() {
            let span = info_span!(
                "provision_supply",
                supply = %definition.name,
                address = %definition.address
            );
            match self.provision_supply(definition).instrument(span).await {
                Ok(session) => sessions.push(session),
                Err(err) => {
                    close_quietly(&mut sessions).await;
                    return Err(err);
                }
            }
        }

        info!(supplies = sessions.len(), "Supply array provisioned");
        Ok(SupplyArray::from_sessions(sessions))
    }

    async fn provision_supply(&self, definition: &SupplyDefinition) -> AppResult<SupplySession> {
        let unreachable = |err: PsuError| PsuError::SupplyUnreachable {
            supply: definition.name.clone(),
            address: definition.address.clone(),
            reason: err.to_string(),
        };

        let mut session = SupplySession::open(
            self.rm,
            definition.name.as_str(),
            &definition.address,
            definition.channel_count(),
            self.safety_floor,
        )
        .await
        .map_err(unreachable)?;

        let identity = match session.identify().await {
            Ok(identity) => identity,
            Err(err) => {
                close_one(&mut session).await;
                return Err(unreachable(err));
            }
        };
        info!(%identity, channels = definition.channel_count(), "Supply identified");

        for spec in &definition.channels {
            if let Err(err) = self.apply_channel(&mut session, spec).await {
                close_one(&mut session).await;
                return Err(err);
            }
        }
        Ok(session)
    }

    async fn apply_channel(&self, session: &mut SupplySession, spec: &ChannelSpec) -> AppResult<()> {
        let limit = spec.setpoint.effective_current_limit(self.safety_floor);
        let voltage = spec.setpoint.effective_voltage();
        debug!(channel = spec.index, enabled = spec.setpoint.is_enabled(), voltage, limit, "Configuring channel");

        session.enable_ocp(spec.index).await?;
        session.set_current_limit(spec.index, limit).await?;
        session.set_voltage(spec.index, voltage).await
    }
}

/// Convenience wrapper around [`ArrayProvisioner::provision`].
pub async fn provision(
    config: &ArrayConfig,
    rm: &dyn ResourceManager,
    settings: &ProvisioningSettings,
) -> AppResult<SupplyArray> {
    ArrayProvisioner::from_settings(rm, settings)
        .provision(config)
        .await
}

async fn close_one(session: &mut SupplySession) {
    if let Err(err) = session.close().await {
        warn!(supply = %session.name(), error = %err, "Failed to close session during rollback");
    }
}

async fn close_quietly(sessions: &mut [SupplySession]) {
    for session in sessions.iter_mut() {
        close_one(session).await;
    }
}
