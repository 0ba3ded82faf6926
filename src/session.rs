//! One connection to one multi-channel supply.
//!
//! [`SupplySession`] turns channel-level intent ("set channel 2 to 3.6 V") into command
//! exchanges over its [`Transport`], and caches the setpoints it wrote so the array can later
//! answer "what should this channel be" without asking the instrument.
//!
//! Every operation is one awaited round trip. Channels are 1-based; an index outside
//! `1..=n_ch` fails with [`PsuError::InvalidChannel`] before anything is sent.

use crate::channel::check_safety_floor;
use crate::error::{AppResult, PsuError};
use crate::scpi::{self, CommandSet};
use crate::transport::{ResourceManager, Transport};
use tracing::{debug, warn};

/// Session with one supply.
pub struct SupplySession {
    name: String,
    address: String,
    n_ch: usize,
    transport: Box<dyn Transport>,
    commands: CommandSet,
    voltages: Vec<f64>,
    current_limits: Vec<f64>,
    safety_floor: f64,
}

impl std::fmt::Debug for SupplySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupplySession")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("n_ch", &self.n_ch)
            .field("voltages", &self.voltages)
            .field("current_limits", &self.current_limits)
            .finish_non_exhaustive()
    }
}

impl SupplySession {
    /// Wrap an already-open transport.
    ///
    /// # Arguments
    /// * `name` - Supply name from the array document (used in logs and errors)
    /// * `transport` - Open connection; the session owns it from now on
    /// * `n_ch` - Number of output channels (at least 1)
    /// * `safety_floor` - Limit that replaces a requested limit of zero
    ///
    /// Fails with [`PsuError::Configuration`] for zero channels or a non-positive floor.
    pub fn new(
        name: impl Into<String>,
        transport: Box<dyn Transport>,
        n_ch: usize,
        safety_floor: f64,
    ) -> AppResult<Self> {
        let name = name.into();
        check_shape(&name, n_ch, safety_floor)?;
        Ok(Self {
            name,
            address: transport.address().to_string(),
            n_ch,
            transport,
            commands: CommandSet::for_channel_count(n_ch),
            voltages: vec![0.0; n_ch],
            current_limits: vec![0.0; n_ch],
            safety_floor,
        })
    }

    /// Open a connection through `rm` and wrap it.
    pub async fn open(
        rm: &dyn ResourceManager,
        name: impl Into<String>,
        address: &str,
        n_ch: usize,
        safety_floor: f64,
    ) -> AppResult<Self> {
        let name = name.into();
        check_shape(&name, n_ch, safety_floor)?;
        let transport = rm.open(address).await?;
        Self::new(name, transport, n_ch, safety_floor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn channel_count(&self) -> usize {
        self.n_ch
    }

    pub fn commands(&self) -> CommandSet {
        self.commands
    }

    /// Cached voltage setpoints, index 0 is channel 1.
    pub fn voltages(&self) -> &[f64] {
        &self.voltages
    }

    /// Cached current-limit setpoints, index 0 is channel 1.
    pub fn current_limits(&self) -> &[f64] {
        &self.current_limits
    }

    pub fn cached_voltage(&self, channel: usize) -> AppResult<f64> {
        self.check_channel(channel)?;
        Ok(self.voltages[channel - 1])
    }

    pub fn cached_current_limit(&self, channel: usize) -> AppResult<f64> {
        self.check_channel(channel)?;
        Ok(self.current_limits[channel - 1])
    }

    pub fn safety_floor(&self) -> f64 {
        self.safety_floor
    }

    /// Iterator over valid channel numbers, ascending.
    pub fn channels(&self) -> std::ops::RangeInclusive<usize> {
        1..=self.n_ch
    }

    /// Fail with [`PsuError::InvalidChannel`] unless `1 <= channel <= n_ch`.
    pub fn check_channel(&self, channel: usize) -> AppResult<()> {
        if (1..=self.n_ch).contains(&channel) {
            Ok(())
        } else {
            Err(PsuError::InvalidChannel {
                address: self.address.clone(),
                channel,
                n_ch: self.n_ch,
            })
        }
    }

    /// Tag a malformed-reply error with this supply's name and address.
    pub fn attribute(&self, err: PsuError) -> PsuError {
        err.for_supply(&self.name, &self.address)
    }

    /// Send a raw query and log the exchange.
    pub async fn ask(&mut self, question: &str) -> AppResult<String> {
        let response = self.transport.query(question).await?;
        debug!(supply = %self.name, question, %response, "SCPI query");
        Ok(response)
    }

    /// Send a raw command.
    pub async fn tell(&mut self, statement: &str) -> AppResult<()> {
        debug!(supply = %self.name, statement, "SCPI write");
        self.transport.write(statement).await
    }

    async fn ask_f64(&mut self, question: &str) -> AppResult<f64> {
        let response = self.ask(question).await?;
        scpi::parse_f64_response(question, &response).map_err(|e| self.attribute(e))
    }

    /// Raw `*IDN?` reply.
    pub async fn idn(&mut self) -> AppResult<String> {
        self.ask(scpi::IDN).await
    }

    /// Human-readable identity: `IDN: <serial field> IP: <address>`.
    pub async fn identify(&mut self) -> AppResult<String> {
        let idn = self.idn().await?;
        let field = scpi::identity_field(&idn).map_err(|e| self.attribute(e))?;
        Ok(format!("IDN: {field} IP: {}", self.address))
    }

    pub async fn reset(&mut self) -> AppResult<()> {
        self.tell(scpi::RST).await
    }

    /// Device clear on the transport.
    pub async fn clear(&mut self) -> AppResult<()> {
        debug!(supply = %self.name, "Device clear");
        self.transport.clear().await
    }

    pub async fn init(&mut self) -> AppResult<()> {
        self.tell(scpi::INIT).await
    }

    pub async fn wait(&mut self) -> AppResult<()> {
        self.tell(scpi::WAI).await
    }

    pub async fn trigger(&mut self) -> AppResult<()> {
        self.tell(scpi::TRG).await
    }

    pub async fn abort(&mut self) -> AppResult<()> {
        self.tell(scpi::ABOR).await
    }

    /// Select voltage-source mode and write the voltage setpoint.
    pub async fn set_voltage(&mut self, channel: usize, volts: f64) -> AppResult<()> {
        self.check_channel(channel)?;
        if !volts.is_finite() {
            return Err(PsuError::InvalidVoltage {
                channel,
                value: volts,
            });
        }
        let mode = self.commands.voltage_mode(channel);
        self.tell(&mode).await?;
        let set = self.commands.set_voltage(channel, volts);
        self.tell(&set).await?;
        self.voltages[channel - 1] = volts;
        Ok(())
    }

    /// Voltage setpoint as reported by the instrument.
    pub async fn get_voltage(&mut self, channel: usize) -> AppResult<f64> {
        self.check_channel(channel)?;
        let query = self.commands.voltage_query(channel);
        self.ask_f64(&query).await
    }

    /// Write the over-current limit.
    ///
    /// A limit of zero is replaced by the safety floor. Negative limits are rejected.
    pub async fn set_current_limit(&mut self, channel: usize, amps: f64) -> AppResult<()> {
        self.check_channel(channel)?;
        if !(amps.is_finite() && amps >= 0.0) {
            return Err(PsuError::InvalidCurrentLimit {
                channel,
                value: amps,
            });
        }
        let amps = if amps == 0.0 {
            warn!(
                supply = %self.name,
                channel,
                floor = self.safety_floor,
                "Zero current limit replaced by safety floor"
            );
            self.safety_floor
        } else {
            amps
        };
        let set = self.commands.set_current_limit(channel, amps);
        self.tell(&set).await?;
        self.current_limits[channel - 1] = amps;
        Ok(())
    }

    /// Over-current limit as reported by the instrument.
    pub async fn get_current_limit(&mut self, channel: usize) -> AppResult<f64> {
        self.check_channel(channel)?;
        let query = self.commands.current_limit_query(channel);
        self.ask_f64(&query).await
    }

    /// Turn on over-current protection reporting for a channel.
    pub async fn enable_ocp(&mut self, channel: usize) -> AppResult<()> {
        self.check_channel(channel)?;
        let cmd = self.commands.enable_ocp(channel);
        self.tell(&cmd).await
    }

    pub async fn enable_output(&mut self, channel: usize) -> AppResult<()> {
        self.check_channel(channel)?;
        let cmd = self.commands.output_state(channel, true);
        self.tell(&cmd).await
    }

    pub async fn disable_output(&mut self, channel: usize) -> AppResult<()> {
        self.check_channel(channel)?;
        let cmd = self.commands.output_state(channel, false);
        self.tell(&cmd).await
    }

    /// Output relay state as reported by the instrument.
    pub async fn output_enabled(&mut self, channel: usize) -> AppResult<bool> {
        self.check_channel(channel)?;
        let query = self.commands.output_state_query(channel);
        let response = self.ask(&query).await?;
        scpi::parse_output_state(&query, &response).map_err(|e| self.attribute(e))
    }

    pub async fn measure_voltage(&mut self, channel: usize) -> AppResult<f64> {
        self.check_channel(channel)?;
        let query = self.commands.measure_voltage(channel);
        self.ask_f64(&query).await
    }

    pub async fn measure_current(&mut self, channel: usize) -> AppResult<f64> {
        self.check_channel(channel)?;
        let query = self.commands.measure_current(channel);
        self.ask_f64(&query).await
    }

    /// Combined measurement: `(voltage, current, power)`.
    pub async fn read_all(&mut self, channel: usize) -> AppResult<(f64, f64, f64)> {
        self.check_channel(channel)?;
        let query = self.commands.measure_all(channel);
        let response = self.ask(&query).await?;
        scpi::parse_measure_all(&query, &response).map_err(|e| self.attribute(e))
    }

    /// Close the transport. The session is unusable afterwards.
    pub async fn close(&mut self) -> AppResult<()> {
        debug!(supply = %self.name, address = %self.address, "Closing session");
        self.transport.close().await
    }
}

fn check_shape(name: &str, n_ch: usize, safety_floor: f64) -> AppResult<()> {
    if n_ch == 0 {
        return Err(PsuError::Configuration(format!(
            "Supply '{name}' must have at least one channel"
        )));
    }
    check_safety_floor(safety_floor)
}
