//! SCPI command vocabulary and response parsing.
//!
//! Every string the crate puts on the wire is built here, so the exact grammar of the target
//! instrument family lives in one place.
//!
//! # Channel addressing
//!
//! A single-channel source-measure unit takes unaddressed commands (`OUTP:STAT ON`). A
//! multi-channel supply takes the channel either as a `CH<n>` argument
//! (`OUTP:STAT CH2,ON`, `MEASure:ALL? CH2`) or as a numeric header suffix
//! (`:SOURCE2:VOLT 3.6`). Callers always pass a channel; [`CommandSet`] decides how it is
//! rendered.

use crate::error::{AppResult, PsuError};

/// Identity query.
pub const IDN: &str = "*IDN?";
/// Reset to power-on defaults.
pub const RST: &str = "*RST";
/// Initiate the trigger model.
pub const INIT: &str = "INIT";
/// Wait for pending operations.
pub const WAI: &str = "*WAI";
/// Software trigger.
pub const TRG: &str = "*TRG";
/// Abort the running trigger model.
pub const ABOR: &str = "ABOR";

/// How channel numbers are rendered into commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Single-channel instrument; the channel is never written.
    Implicit,
    /// Multi-channel instrument; every channel command names its channel.
    Explicit,
}

/// Builder for the channel-level command vocabulary of one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSet {
    addressing: Addressing,
}

impl CommandSet {
    pub fn new(addressing: Addressing) -> Self {
        Self { addressing }
    }

    /// Pick the addressing mode from the number of channels the instrument has.
    pub fn for_channel_count(n_ch: usize) -> Self {
        if n_ch <= 1 {
            Self::new(Addressing::Implicit)
        } else {
            Self::new(Addressing::Explicit)
        }
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// `CH<n>,` prefix for set-style arguments.
    fn arg_prefix(&self, channel: usize) -> String {
        match self.addressing {
            Addressing::Implicit => String::new(),
            Addressing::Explicit => format!("CH{channel},"),
        }
    }

    /// ` CH<n>` suffix for queries.
    fn query_suffix(&self, channel: usize) -> String {
        match self.addressing {
            Addressing::Implicit => String::new(),
            Addressing::Explicit => format!(" CH{channel}"),
        }
    }

    /// Numeric header suffix (`SOURCE2`).
    fn header_suffix(&self, channel: usize) -> String {
        match self.addressing {
            Addressing::Implicit => String::new(),
            Addressing::Explicit => channel.to_string(),
        }
    }

    pub fn output_state(&self, channel: usize, on: bool) -> String {
        let state = if on { "ON" } else { "OFF" };
        match self.addressing {
            Addressing::Implicit => format!("OUTP:STAT {state}"),
            Addressing::Explicit => format!("OUTP:STAT CH{channel},{state}"),
        }
    }

    pub fn output_state_query(&self, channel: usize) -> String {
        format!("OUTP:STAT?{}", self.query_suffix(channel))
    }

    pub fn enable_ocp(&self, channel: usize) -> String {
        format!(":OUTP:OCP {}ON", self.arg_prefix(channel))
    }

    pub fn voltage_mode(&self, channel: usize) -> String {
        format!(":SOURCE{}:FUNC VOLT", self.header_suffix(channel))
    }

    pub fn set_voltage(&self, channel: usize, volts: f64) -> String {
        format!(":SOURCE{}:VOLT {volts}", self.header_suffix(channel))
    }

    pub fn voltage_query(&self, channel: usize) -> String {
        format!(":SOURCE{}:VOLT?", self.header_suffix(channel))
    }

    pub fn set_current_limit(&self, channel: usize, amps: f64) -> String {
        format!(":SOURCe{}:VOLTage:ILIMit {amps}", self.header_suffix(channel))
    }

    pub fn current_limit_query(&self, channel: usize) -> String {
        format!(":SOURCe{}:VOLTage:ILIMit?", self.header_suffix(channel))
    }

    /// Make `channel` the target of instrument-wide subsystems such as the trace buffer.
    ///
    /// Single-channel instruments have nothing to select.
    pub fn select_channel(&self, channel: usize) -> Option<String> {
        match self.addressing {
            Addressing::Implicit => None,
            Addressing::Explicit => Some(format!("INST:NSEL {channel}")),
        }
    }

    pub fn measure_current(&self, channel: usize) -> String {
        format!(":MEASURE:CURRENT:DC?{}", self.query_suffix(channel))
    }

    pub fn measure_voltage(&self, channel: usize) -> String {
        format!(":MEASURE:VOLTAGE:DC?{}", self.query_suffix(channel))
    }

    pub fn measure_all(&self, channel: usize) -> String {
        format!("MEASure:ALL?{}", self.query_suffix(channel))
    }
}

/// Trace-buffer and trigger-model commands for one named reading buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceCommands {
    buffer: String,
}

impl TraceCommands {
    pub fn new(buffer: impl Into<String>) -> Self {
        Self {
            buffer: buffer.into(),
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn select_current_function() -> &'static str {
        "SENS:FUNC \"CURR\""
    }

    pub fn current_autorange() -> &'static str {
        "SENS:CURR:RANG:AUTO ON"
    }

    pub fn delete_buffer(&self) -> String {
        format!(":TRACe:DELete \"{}\"", self.buffer)
    }

    pub fn make_buffer(&self, capacity: usize) -> String {
        format!("TRACE:MAKE \"{}\", {capacity}", self.buffer)
    }

    /// Trigger template that measures every `period_s` seconds into the buffer until stopped.
    pub fn load_loop_until_event(&self, period_s: f64) -> String {
        format!(
            ":TRIGger:LOAD \"LoopUntilEvent\", COMM, 0, NEV, {period_s:.6}, \"{}\"",
            self.buffer
        )
    }

    pub fn actual_count_query(&self) -> String {
        format!(":TRAC:ACTUAL? \"{}\"", self.buffer)
    }

    pub fn data_query(&self, rows: usize) -> String {
        format!(
            ":TRAC:DATA? 1, {rows}, \"{}\", SOUR, READ, REL",
            self.buffer
        )
    }
}

/// Parse a floating-point response from a SCPI query.
pub fn parse_f64_response(command: &str, response: &str) -> AppResult<f64> {
    response
        .trim()
        .parse::<f64>()
        .map_err(|_| malformed(command, response))
}

/// Parse an integer count (e.g. buffer fill level). Accepts `"12"` and `"+1.200000E+01"`.
pub fn parse_count_response(command: &str, response: &str) -> AppResult<usize> {
    let trimmed = response.trim();
    if let Ok(count) = trimmed.parse::<usize>() {
        return Ok(count);
    }
    let value = parse_f64_response(command, trimmed)?;
    if value >= 0.0 && value.fract() == 0.0 && value <= usize::MAX as f64 {
        Ok(value as usize)
    } else {
        Err(malformed(command, response))
    }
}

/// Parse a comma-separated list of numbers.
///
/// An empty response yields an empty list; any non-numeric field fails the whole parse.
pub fn parse_f64_list(command: &str, response: &str) -> AppResult<Vec<f64>> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split(',')
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|_| malformed(command, response))
        })
        .collect()
}

/// Parse the `MEASure:ALL?` reply into `(voltage, current, power)`.
pub fn parse_measure_all(command: &str, response: &str) -> AppResult<(f64, f64, f64)> {
    match parse_f64_list(command, response)?.as_slice() {
        [v, i, p] => Ok((*v, *i, *p)),
        _ => Err(malformed(command, response)),
    }
}

/// Parse an output-state reply (`ON`/`OFF`/`1`/`0`).
pub fn parse_output_state(command: &str, response: &str) -> AppResult<bool> {
    match response.trim().to_ascii_uppercase().as_str() {
        "ON" | "1" => Ok(true),
        "OFF" | "0" => Ok(false),
        _ => Err(malformed(command, response)),
    }
}

/// Extract the model/serial field from an `*IDN?` reply: the second-to-last comma field.
pub fn identity_field(response: &str) -> AppResult<String> {
    let fields: Vec<&str> = response.trim().split(',').collect();
    if fields.len() < 2 {
        return Err(malformed(IDN, response));
    }
    Ok(fields[fields.len() - 2].trim().to_string())
}

fn malformed(command: &str, response: &str) -> PsuError {
    PsuError::MalformedResponse {
        supply: String::new(),
        address: String::new(),
        command: command.to_string(),
        response: response.to_string(),
    }
}
