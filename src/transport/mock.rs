//! Mock instrument transport for testing
//!
//! [`MockInstrument`] simulates a multi-channel SCPI power supply that understands the
//! command vocabulary in [`crate::scpi`]. It provides:
//! - A command log of every write and query, in order, for sequence verification
//! - Per-channel state (setpoints, output relay, OCP flag) and simulated measurements
//! - A trace buffer and trigger loop that fill with synthetic samples
//! - Controllable failure injection (one-shot, or persistent per command prefix)
//!
//! Handles are cheap clones sharing the same state, so a test can keep one handle for
//! inspection while a session owns another.
//!
//! # Example
//!
//! ```
//! use psu_array::transport::{MockInstrument, Transport};
//!
//! # tokio_test::block_on(async {
//! let mut instr = MockInstrument::new("10.10.1.53", 2);
//! instr.write(":SOURCE2:VOLT 3.6").await.unwrap();
//! assert_eq!(instr.channel(2).unwrap().voltage, 3.6);
//! assert_eq!(instr.command_log(), vec![":SOURCE2:VOLT 3.6"]);
//! # })
//! ```

use crate::error::{AppResult, PsuError};
use crate::transport::{ResourceManager, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Commands of every instrument registered with one resource manager, as `<address> <command>`.
type Journal = Arc<Mutex<Vec<String>>>;

/// Load resistance every simulated channel drives, in ohms.
const DEFAULT_LOAD_OHMS: f64 = 10.0;

/// Simulated state of one output channel.
#[derive(Debug, Clone, PartialEq)]
pub struct MockChannel {
    pub voltage: f64,
    pub current_limit: f64,
    pub output_on: bool,
    pub ocp_enabled: bool,
    pub voltage_mode: bool,
    pub load_ohms: f64,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self {
            voltage: 0.0,
            current_limit: 0.1,
            output_on: false,
            ocp_enabled: false,
            voltage_mode: false,
            load_ohms: DEFAULT_LOAD_OHMS,
        }
    }
}

impl MockChannel {
    fn measured_voltage(&self) -> f64 {
        if self.output_on {
            self.voltage
        } else {
            0.0
        }
    }

    fn measured_current(&self) -> f64 {
        if self.output_on {
            (self.voltage / self.load_ohms).min(self.current_limit)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default)]
struct MockTrace {
    buffers: HashMap<String, Vec<[f64; 3]>>,
    capacities: HashMap<String, usize>,
    loaded: Option<(String, f64)>,
    initiated: bool,
    running: bool,
    rows_on_stop: Option<usize>,
    data_override: Option<String>,
    /// Channel chosen with `INST:NSEL`; the trace loop samples it.
    selected: Option<usize>,
}

#[derive(Debug)]
struct MockState {
    idn: String,
    channels: Vec<MockChannel>,
    log: Vec<String>,
    trace: MockTrace,
    fail_next: bool,
    fail_prefixes: Vec<String>,
    clears: usize,
    closed: bool,
    journal: Option<Journal>,
}

/// Simulated SCPI power supply.
#[derive(Debug, Clone)]
pub struct MockInstrument {
    address: String,
    state: Arc<Mutex<MockState>>,
}

impl MockInstrument {
    /// Create a mock supply with `n_ch` channels at `address`.
    pub fn new(address: impl Into<String>, n_ch: usize) -> Self {
        let address = address.into();
        let idn = format!("MOCK INSTRUMENTS,PSU-{n_ch}CH,SN-{address},1.0.0");
        Self {
            address,
            state: Arc::new(Mutex::new(MockState {
                idn,
                channels: vec![MockChannel::default(); n_ch.max(1)],
                log: Vec::new(),
                trace: MockTrace::default(),
                fail_next: false,
                fail_prefixes: Vec::new(),
                clears: 0,
                closed: false,
                journal: None,
            })),
        }
    }

    /// Set the `*IDN?` reply
    pub fn with_idn(self, idn: impl Into<String>) -> Self {
        self.set_idn(idn);
        self
    }

    /// Change the `*IDN?` reply of a live instrument.
    pub fn set_idn(&self, idn: impl Into<String>) {
        self.lock().idn = idn.into();
    }

    /// Set the simulated load on one channel
    pub fn with_load(self, channel: usize, ohms: f64) -> Self {
        if let Some(ch) = self.lock().channels.get_mut(channel.wrapping_sub(1)) {
            ch.load_ohms = ohms;
        }
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next write or query
    pub fn trigger_failure(&self) {
        self.lock().fail_next = true;
    }

    /// Fail every command starting with `prefix` until cleared
    pub fn fail_commands_starting_with(&self, prefix: impl Into<String>) {
        self.lock().fail_prefixes.push(prefix.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_next = false;
        state.fail_prefixes.clear();
    }

    /// Number of rows the trace loop will have captured when it is stopped.
    ///
    /// Defaults to half the buffer capacity.
    pub fn set_trace_rows(&self, rows: usize) {
        self.lock().trace.rows_on_stop = Some(rows);
    }

    /// Reply to the next trace data queries with `response` verbatim.
    pub fn set_trace_data_response(&self, response: impl Into<String>) {
        self.lock().trace.data_override = Some(response.into());
    }

    /// Get a copy of the command log for verification
    pub fn command_log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn clear_command_log(&self) {
        self.lock().log.clear();
    }

    pub fn channel(&self, channel: usize) -> Option<MockChannel> {
        self.lock().channels.get(channel.wrapping_sub(1)).cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    /// Capacity of a named trace buffer, if it exists.
    pub fn trace_capacity(&self, buffer: &str) -> Option<usize> {
        self.lock().trace.capacities.get(buffer).copied()
    }

    pub fn trace_running(&self) -> bool {
        self.lock().trace.running
    }

    pub fn clear_count(&self) -> usize {
        self.lock().clears
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn reject(&self, command: &str, reason: &str) -> PsuError {
        PsuError::transport(self.address.as_str(), command, reason)
    }

    /// Log the command and apply failure injection.
    fn admit(&self, state: &mut MockState, command: &str) -> AppResult<()> {
        if state.closed {
            return Err(self.reject(command, "connection is closed"));
        }
        state.log.push(command.to_string());
        if let Some(journal) = &state.journal {
            journal
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(format!("{} {command}", self.address));
        }
        if std::mem::take(&mut state.fail_next) {
            return Err(self.reject(command, "injected failure"));
        }
        if state.fail_prefixes.iter().any(|p| command.starts_with(p.as_str())) {
            return Err(self.reject(command, "injected failure"));
        }
        Ok(())
    }

    fn channel_mut<'a>(
        &self,
        state: &'a mut MockState,
        command: &str,
        channel: usize,
    ) -> AppResult<&'a mut MockChannel> {
        let reason = format!("channel {channel} out of range");
        state
            .channels
            .get_mut(channel.wrapping_sub(1))
            .ok_or_else(|| self.reject(command, &reason))
    }

    fn apply_write(&self, state: &mut MockState, command: &str) -> AppResult<()> {
        match command {
            "*RST" => {
                for ch in state.channels.iter_mut() {
                    let load = ch.load_ohms;
                    *ch = MockChannel {
                        load_ohms: load,
                        ..MockChannel::default()
                    };
                }
                state.trace.loaded = None;
                state.trace.selected = None;
                state.trace.initiated = false;
                state.trace.running = false;
                return Ok(());
            }
            "*WAI" => return Ok(()),
            "INIT" => {
                if state.trace.loaded.is_none() {
                    return Err(self.reject(command, "no trigger model loaded"));
                }
                state.trace.initiated = true;
                return Ok(());
            }
            "*TRG" => {
                if state.trace.initiated {
                    state.trace.running = true;
                }
                return Ok(());
            }
            "ABOR" => {
                self.stop_trace(state);
                return Ok(());
            }
            "SENS:FUNC \"CURR\"" | "SENS:CURR:RANG:AUTO ON" => return Ok(()),
            _ => {}
        }

        if let Some(rest) = command.strip_prefix("INST:NSEL ") {
            let channel = rest
                .trim()
                .parse()
                .map_err(|_| self.reject(command, "bad channel number"))?;
            self.channel_mut(state, command, channel)?;
            state.trace.selected = Some(channel);
            return Ok(());
        }

        if let Some(rest) = command.strip_prefix("OUTP:STAT ") {
            let (channel, value) = split_channel_arg(rest);
            let on = match value {
                "ON" | "1" => true,
                "OFF" | "0" => false,
                _ => return Err(self.reject(command, "invalid output state")),
            };
            self.channel_mut(state, command, channel)?.output_on = on;
            return Ok(());
        }

        if let Some(rest) = command.strip_prefix(":OUTP:OCP ") {
            let (channel, value) = split_channel_arg(rest);
            self.channel_mut(state, command, channel)?.ocp_enabled = value == "ON";
            return Ok(());
        }

        if let Some((channel, tail)) = split_source_header(command) {
            if tail == ":FUNC VOLT" {
                self.channel_mut(state, command, channel)?.voltage_mode = true;
                return Ok(());
            }
            if let Some(value) = tail.strip_prefix(":VOLT ") {
                let volts = parse_number(value).ok_or_else(|| self.reject(command, "bad number"))?;
                self.channel_mut(state, command, channel)?.voltage = volts;
                return Ok(());
            }
            if let Some(value) = tail.strip_prefix(":VOLTage:ILIMit ") {
                let amps = parse_number(value).ok_or_else(|| self.reject(command, "bad number"))?;
                self.channel_mut(state, command, channel)?.current_limit = amps;
                return Ok(());
            }
        }

        if let Some(rest) = command.strip_prefix(":TRACe:DELete ") {
            let name = unquote(rest);
            state.trace.buffers.remove(name);
            state.trace.capacities.remove(name);
            return Ok(());
        }

        if let Some(rest) = command.strip_prefix("TRACE:MAKE ") {
            let mut parts = rest.splitn(2, ',');
            let name = unquote(parts.next().unwrap_or_default()).to_string();
            let capacity = parts
                .next()
                .and_then(|c| c.trim().parse::<usize>().ok())
                .ok_or_else(|| self.reject(command, "bad buffer size"))?;
            if state.trace.capacities.contains_key(&name) {
                return Err(self.reject(command, "buffer already exists"));
            }
            state.trace.capacities.insert(name.clone(), capacity);
            state.trace.buffers.insert(name, Vec::new());
            return Ok(());
        }

        if let Some(rest) = command.strip_prefix(":TRIGger:LOAD \"LoopUntilEvent\",") {
            let fields: Vec<&str> = rest.split(',').map(str::trim).collect();
            let (period, name) = match fields.as_slice() {
                [_, _, _, period, name] => (parse_number(period), unquote(name).to_string()),
                _ => (None, String::new()),
            };
            let period = period.ok_or_else(|| self.reject(command, "bad trigger template"))?;
            if !state.trace.capacities.contains_key(&name) {
                return Err(self.reject(command, "unknown reading buffer"));
            }
            state.trace.loaded = Some((name, period));
            state.trace.initiated = false;
            return Ok(());
        }

        debug!(address = %self.address, command, "MockInstrument ignoring unknown command");
        Ok(())
    }

    fn stop_trace(&self, state: &mut MockState) {
        if !state.trace.running {
            state.trace.initiated = false;
            return;
        }
        state.trace.running = false;
        state.trace.initiated = false;

        let Some((name, period)) = state.trace.loaded.clone() else {
            return;
        };
        let capacity = state.trace.capacities.get(&name).copied().unwrap_or(0);
        let rows = state
            .trace
            .rows_on_stop
            .unwrap_or(capacity / 2)
            .min(capacity);
        let selected = state.trace.selected.unwrap_or(1);
        let channel = state
            .channels
            .get(selected - 1)
            .cloned()
            .unwrap_or_default();
        let samples = (0..rows)
            .map(|i| {
                [
                    channel.voltage,
                    channel.measured_current(),
                    i as f64 * period,
                ]
            })
            .collect();
        state.trace.buffers.insert(name, samples);
    }

    fn answer_query(&self, state: &mut MockState, command: &str) -> AppResult<String> {
        if command == "*IDN?" {
            return Ok(state.idn.clone());
        }

        if let Some(rest) = command.strip_prefix("OUTP:STAT?") {
            let channel = parse_query_channel(rest);
            let on = self.channel_mut(state, command, channel)?.output_on;
            return Ok(if on { "ON" } else { "OFF" }.to_string());
        }

        if let Some(rest) = command.strip_prefix(":MEASURE:CURRENT:DC?") {
            let channel = parse_query_channel(rest);
            let ch = self.channel_mut(state, command, channel)?;
            return Ok(format!("{:.6E}", ch.measured_current()));
        }

        if let Some(rest) = command.strip_prefix(":MEASURE:VOLTAGE:DC?") {
            let channel = parse_query_channel(rest);
            let ch = self.channel_mut(state, command, channel)?;
            return Ok(format!("{:.6E}", ch.measured_voltage()));
        }

        if let Some(rest) = command.strip_prefix("MEASure:ALL?") {
            let channel = parse_query_channel(rest);
            let ch = self.channel_mut(state, command, channel)?;
            let (v, i) = (ch.measured_voltage(), ch.measured_current());
            return Ok(format!("{v:.4},{i:.4},{:.4}", v * i));
        }

        if let Some((channel, tail)) = split_source_header(command) {
            let ch = self.channel_mut(state, command, channel)?;
            match tail {
                ":VOLT?" => return Ok(format!("{:.6E}", ch.voltage)),
                ":VOLTage:ILIMit?" => return Ok(format!("{:.6E}", ch.current_limit)),
                _ => {}
            }
        }

        if let Some(rest) = command.strip_prefix(":TRAC:ACTUAL? ") {
            let name = unquote(rest);
            let rows = state
                .trace
                .buffers
                .get(name)
                .map(Vec::len)
                .ok_or_else(|| self.reject(command, "unknown reading buffer"))?;
            return Ok(rows.to_string());
        }

        if let Some(rest) = command.strip_prefix(":TRAC:DATA? ") {
            if let Some(response) = &state.trace.data_override {
                return Ok(response.clone());
            }
            let fields: Vec<&str> = rest.split(',').map(str::trim).collect();
            let (count, name) = match fields.as_slice() {
                [_, count, name, ..] => (count.parse::<usize>().ok(), unquote(name)),
                _ => (None, ""),
            };
            let count = count.ok_or_else(|| self.reject(command, "bad index range"))?;
            let rows = state
                .trace
                .buffers
                .get(name)
                .ok_or_else(|| self.reject(command, "unknown reading buffer"))?;
            let flat: Vec<String> = rows
                .iter()
                .take(count)
                .flat_map(|row| row.iter().map(|v| format!("{v:E}")))
                .collect();
            return Ok(flat.join(","));
        }

        Err(self.reject(command, "undefined header"))
    }
}

#[async_trait]
impl Transport for MockInstrument {
    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&mut self, command: &str) -> AppResult<()> {
        let mut state = self.lock();
        self.admit(&mut state, command)?;
        self.apply_write(&mut state, command)
    }

    async fn query(&mut self, command: &str) -> AppResult<String> {
        let mut state = self.lock();
        self.admit(&mut state, command)?;
        self.answer_query(&mut state, command)
    }

    async fn clear(&mut self) -> AppResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(self.reject("clear", "connection is closed"));
        }
        state.clears += 1;
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        let mut state = self.lock();
        state.closed = true;
        if std::mem::take(&mut state.fail_next) {
            return Err(self.reject("close", "injected failure"));
        }
        Ok(())
    }
}

/// Resource manager handing out [`MockInstrument`] handles by address.
#[derive(Debug, Default, Clone)]
pub struct MockResourceManager {
    instruments: Arc<Mutex<HashMap<String, MockInstrument>>>,
    unreachable: Arc<Mutex<HashSet<String>>>,
    opened: Arc<Mutex<Vec<String>>>,
    journal: Journal,
}

impl MockResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a simulated supply and return a handle for inspection.
    pub fn add_instrument(&self, address: &str, n_ch: usize) -> MockInstrument {
        let instrument = MockInstrument::new(address, n_ch);
        self.register(instrument.clone());
        instrument
    }

    pub fn register(&self, instrument: MockInstrument) {
        instrument.lock().journal = Some(self.journal.clone());
        self.instruments
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(instrument.address.clone(), instrument);
    }

    /// Make every open of `address` fail as if the host did not answer.
    pub fn mark_unreachable(&self, address: &str) {
        self.unreachable
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(address.to_string());
    }

    pub fn instrument(&self, address: &str) -> Option<MockInstrument> {
        self.instruments
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(address)
            .cloned()
    }

    /// Every command sent to any registered instrument, in the order they arrived.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// Addresses successfully opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl ResourceManager for MockResourceManager {
    async fn open(&self, address: &str) -> AppResult<Box<dyn Transport>> {
        if self
            .unreachable
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(address)
        {
            return Err(PsuError::transport(address, "connect", "host unreachable"));
        }
        let instrument = self
            .instrument(address)
            .ok_or_else(|| PsuError::transport(address, "connect", "connection refused"))?;
        instrument.lock().closed = false;
        self.opened
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(address.to_string());
        Ok(Box::new(instrument))
    }

    fn kind(&self) -> &str {
        "mock"
    }
}

/// Split `CH2,ON` into `(2, "ON")`; a bare `ON` addresses channel 1.
fn split_channel_arg(arg: &str) -> (usize, &str) {
    let arg = arg.trim();
    if let Some(rest) = arg.strip_prefix("CH") {
        if let Some((num, value)) = rest.split_once(',') {
            if let Ok(channel) = num.trim().parse() {
                return (channel, value.trim());
            }
        }
    }
    (1, arg)
}

/// Parse the optional ` CH<n>` argument of a query.
fn parse_query_channel(rest: &str) -> usize {
    rest.trim()
        .strip_prefix("CH")
        .and_then(|n| n.parse().ok())
        .unwrap_or(1)
}

/// Split `:SOURCE2:VOLT 3.6` into `(2, ":VOLT 3.6")`.
fn split_source_header(command: &str) -> Option<(usize, &str)> {
    let rest = command
        .strip_prefix(":SOURCE")
        .or_else(|| command.strip_prefix(":SOURCe"))?;
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    let channel = if digits == 0 {
        1
    } else {
        rest[..digits].parse().ok()?
    };
    Some((channel, &rest[digits..]))
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse().ok()
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_setpoints_and_outputs() {
        let mut instr = MockInstrument::new("10.0.0.1", 2);
        instr.write(":SOURCe2:VOLTage:ILIMit 2").await.unwrap();
        instr.write(":SOURCE2:VOLT 3.6").await.unwrap();
        instr.write("OUTP:STAT CH2,ON").await.unwrap();

        let ch2 = instr.channel(2).unwrap();
        assert_eq!(ch2.voltage, 3.6);
        assert_eq!(ch2.current_limit, 2.0);
        assert!(ch2.output_on);
        assert!(!instr.channel(1).unwrap().output_on);

        assert_eq!(instr.query("OUTP:STAT? CH2").await.unwrap(), "ON");
        assert_eq!(instr.query("MEASure:ALL? CH2").await.unwrap(), "3.6000,0.3600,1.2960");
    }

    #[tokio::test]
    async fn unaddressed_commands_hit_channel_one() {
        let mut instr = MockInstrument::new("10.0.0.1", 1);
        instr.write(":SOURCE:VOLT 4.2").await.unwrap();
        instr.write("OUTP:STAT ON").await.unwrap();
        let v: f64 = instr.query(":MEASURE:VOLTAGE:DC?").await.unwrap().parse().unwrap();
        assert_eq!(v, 4.2);
    }

    #[tokio::test]
    async fn current_is_clamped_by_the_limit() {
        let mut instr = MockInstrument::new("10.0.0.1", 1).with_load(1, 1.0);
        instr.write(":SOURCe:VOLTage:ILIMit 0.5").await.unwrap();
        instr.write(":SOURCE:VOLT 5").await.unwrap();
        instr.write("OUTP:STAT ON").await.unwrap();
        let i: f64 = instr.query(":MEASURE:CURRENT:DC?").await.unwrap().parse().unwrap();
        assert_eq!(i, 0.5);
    }

    #[tokio::test]
    async fn out_of_range_channel_is_rejected() {
        let mut instr = MockInstrument::new("10.0.0.1", 2);
        assert!(instr.write("OUTP:STAT CH3,ON").await.is_err());
    }

    #[tokio::test]
    async fn failure_is_one_shot() {
        let mut instr = MockInstrument::new("10.0.0.1", 1);
        instr.trigger_failure();
        assert!(instr.write("*RST").await.is_err());
        assert!(instr.write("*RST").await.is_ok());
        assert_eq!(instr.command_log(), vec!["*RST", "*RST"]);
    }

    #[tokio::test]
    async fn prefix_failures_persist_until_cleared() {
        let mut instr = MockInstrument::new("10.0.0.1", 2);
        instr.fail_commands_starting_with("OUTP:STAT CH1");
        assert!(instr.write("OUTP:STAT CH1,OFF").await.is_err());
        assert!(instr.write("OUTP:STAT CH1,OFF").await.is_err());
        assert!(instr.write("OUTP:STAT CH2,OFF").await.is_ok());
        instr.clear_failures();
        assert!(instr.write("OUTP:STAT CH1,OFF").await.is_ok());
    }

    #[tokio::test]
    async fn trace_loop_fills_buffer_on_abort() {
        let mut instr = MockInstrument::new("10.0.0.1", 1);
        instr.write("TRACE:MAKE \"buf\", 10").await.unwrap();
        instr
            .write(":TRIGger:LOAD \"LoopUntilEvent\", COMM, 0, NEV, 0.500000, \"buf\"")
            .await
            .unwrap();
        instr.write("INIT").await.unwrap();
        instr.write("*TRG").await.unwrap();
        assert!(instr.trace_running());
        instr.write("ABOR").await.unwrap();
        assert!(!instr.trace_running());

        assert_eq!(instr.query(":TRAC:ACTUAL? \"buf\"").await.unwrap(), "5");
        let data = instr
            .query(":TRAC:DATA? 1, 5, \"buf\", SOUR, READ, REL")
            .await
            .unwrap();
        assert_eq!(data.split(',').count(), 15);
    }

    #[tokio::test]
    async fn making_an_existing_buffer_fails() {
        let mut instr = MockInstrument::new("10.0.0.1", 1);
        instr.write("TRACE:MAKE \"buf\", 10").await.unwrap();
        assert!(instr.write("TRACE:MAKE \"buf\", 10").await.is_err());
        instr.write(":TRACe:DELete \"buf\"").await.unwrap();
        assert!(instr.write("TRACE:MAKE \"buf\", 20").await.is_ok());
        assert_eq!(instr.trace_capacity("buf"), Some(20));
    }

    #[tokio::test]
    async fn closed_instrument_rejects_commands() {
        let mut instr = MockInstrument::new("10.0.0.1", 1);
        instr.close().await.unwrap();
        assert!(instr.is_closed());
        assert!(instr.query("*IDN?").await.is_err());
    }

    #[tokio::test]
    async fn resource_manager_opens_registered_addresses() {
        let rm = MockResourceManager::new();
        rm.add_instrument("10.0.0.1", 2);
        rm.mark_unreachable("10.0.0.2");

        let mut transport = rm.open("10.0.0.1").await.unwrap();
        assert!(transport.query("*IDN?").await.unwrap().contains("SN-10.0.0.1"));
        assert!(rm.open("10.0.0.2").await.is_err());
        assert!(rm.open("10.0.0.3").await.is_err());
        assert_eq!(rm.opened(), vec!["10.0.0.1"]);
    }
}
