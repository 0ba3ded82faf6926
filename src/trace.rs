//! Buffered current tracking on the instrument.
//!
//! The instrument measures into an onboard reading buffer on a timer, without a round trip
//! per sample. [`TraceAcquisition`] drives that protocol:
//!
//! # State Machine
//!
//! ```text
//!            configure              arm                 capture
//!   Idle ─────────────> Configured ─────> Armed ──────────────────> Captured
//!    ▲                     ▲  │                                        │
//!    │                     └──┘ configure                              │
//!    │                                                                 │
//!    └────────── any failure ◄──────── configure ◄─────────────────────┘
//! ```
//!
//! - **configure**: current function, autorange, fresh reading buffer of
//!   `ceil(margin * max_duration / sample_period)` rows, `LoopUntilEvent` trigger template
//! - **arm**: `INIT`, `*TRG`
//! - **capture**: `ABOR`, actual row count, `row_count x 3` readback
//!
//! Anything else fails with [`PsuError::InvalidTraceState`] without touching the instrument.

use crate::config::TraceSettings;
use crate::error::{AppResult, PsuError};
use crate::scpi::{self, TraceCommands};
use crate::session::SupplySession;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Oversizing factor applied to the expected sample count when creating the buffer.
pub const DEFAULT_BUFFER_MARGIN: f64 = 2.0;

/// Columns of one buffer row, in readback order.
pub const TRACE_COLUMNS: [&str; 3] = ["source", "reading", "relative_time"];

/// Acquisition lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceState {
    /// Nothing configured on the instrument
    Idle,
    /// Buffer and trigger template loaded
    Configured,
    /// Trigger loop running
    Armed,
    /// Loop stopped and data read back
    Captured,
}

impl std::fmt::Display for TraceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceState::Idle => write!(f, "Idle"),
            TraceState::Configured => write!(f, "Configured"),
            TraceState::Armed => write!(f, "Armed"),
            TraceState::Captured => write!(f, "Captured"),
        }
    }
}

impl TraceState {
    pub fn can_configure(&self) -> bool {
        !matches!(self, TraceState::Armed)
    }

    pub fn can_arm(&self) -> bool {
        matches!(self, TraceState::Configured)
    }

    pub fn can_capture(&self) -> bool {
        matches!(self, TraceState::Armed)
    }
}

/// Number of buffer rows needed for `max_duration` at `sample_period`, oversized by `margin`.
pub fn buffer_capacity(
    max_duration: Duration,
    sample_period: Duration,
    margin: f64,
) -> AppResult<usize> {
    if max_duration.is_zero() {
        return Err(PsuError::InvalidTraceParameters(
            "max_duration must be greater than 0".into(),
        ));
    }
    if sample_period.is_zero() {
        return Err(PsuError::InvalidTraceParameters(
            "sample_period must be greater than 0".into(),
        ));
    }
    if !(margin.is_finite() && margin >= 1.0) {
        return Err(PsuError::InvalidTraceParameters(format!(
            "buffer margin must be at least 1.0, got {margin}"
        )));
    }
    let rows = (margin * max_duration.as_secs_f64() / sample_period.as_secs_f64()).ceil();
    if rows > u32::MAX as f64 {
        return Err(PsuError::InvalidTraceParameters(format!(
            "buffer of {rows} rows is too large"
        )));
    }
    Ok((rows as usize).max(1))
}

/// One row of a captured trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TraceSample {
    /// Source setpoint at the time of the reading
    pub source: f64,
    /// Measured current
    pub reading: f64,
    /// Seconds since the first reading
    pub relative_time: f64,
}

/// Data read back from the instrument buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceBuffer {
    channel: usize,
    capacity: usize,
    rows: Vec<[f64; 3]>,
    captured_at: DateTime<Utc>,
}

impl TraceBuffer {
    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Borrowed `row_count x 3` matrix.
    pub fn rows(&self) -> &[[f64; 3]] {
        &self.rows
    }

    /// Owned copy of the sample matrix.
    pub fn to_matrix(&self) -> Vec<[f64; 3]> {
        self.rows.clone()
    }

    pub fn samples(&self) -> impl Iterator<Item = TraceSample> + '_ {
        self.rows.iter().map(|row| TraceSample {
            source: row[0],
            reading: row[1],
            relative_time: row[2],
        })
    }

    /// One column of the matrix (0 = source, 1 = reading, 2 = relative time).
    pub fn column(&self, index: usize) -> Option<Vec<f64>> {
        (index < TRACE_COLUMNS.len()).then(|| self.rows.iter().map(|row| row[index]).collect())
    }

    /// Write the samples as CSV with a `source,reading,relative_time` header.
    #[cfg(feature = "storage_csv")]
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> AppResult<()> {
        // Header row comes from the TraceSample field names.
        let mut csv = csv::Writer::from_writer(writer);
        if self.rows.is_empty() {
            csv.write_record(TRACE_COLUMNS).map_err(std::io::Error::from)?;
        }
        for sample in self.samples() {
            csv.serialize(sample).map_err(std::io::Error::from)?;
        }
        csv.flush()?;
        Ok(())
    }

    #[cfg(not(feature = "storage_csv"))]
    pub fn write_csv<W: std::io::Write>(&self, _writer: W) -> AppResult<()> {
        Err(PsuError::FeatureNotEnabled("storage_csv".to_string()))
    }

    /// Create `path` and write the samples to it as CSV.
    pub fn save_csv<P: AsRef<std::path::Path>>(&self, path: P) -> AppResult<()> {
        let file = std::fs::File::create(path.as_ref())?;
        self.write_csv(std::io::BufWriter::new(file))
    }
}

/// Drives one buffered acquisition on one session.
#[derive(Debug, Clone)]
pub struct TraceAcquisition {
    commands: TraceCommands,
    margin: f64,
    state: TraceState,
    channel: usize,
    capacity: usize,
}

impl TraceAcquisition {
    pub fn new(buffer_name: impl Into<String>) -> Self {
        Self {
            commands: TraceCommands::new(buffer_name),
            margin: DEFAULT_BUFFER_MARGIN,
            state: TraceState::Idle,
            channel: 1,
            capacity: 0,
        }
    }

    pub fn from_settings(settings: &TraceSettings) -> Self {
        Self::new(settings.buffer_name.as_str()).with_margin(settings.buffer_margin)
    }

    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    pub fn state(&self) -> TraceState {
        self.state
    }

    pub fn buffer_name(&self) -> &str {
        self.commands.buffer()
    }

    /// Rows of the buffer created by the last `configure`.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn require(&self, allowed: bool, operation: &'static str) -> AppResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(PsuError::InvalidTraceState {
                operation,
                state: self.state,
            })
        }
    }

    /// Prepare the instrument: channel, current function, autorange, buffer, trigger template.
    pub async fn configure(
        &mut self,
        session: &mut SupplySession,
        channel: usize,
        max_duration: Duration,
        sample_period: Duration,
    ) -> AppResult<()> {
        self.require(self.state.can_configure(), "configure")?;
        session.check_channel(channel)?;
        let capacity = buffer_capacity(max_duration, sample_period, self.margin)?;

        self.state = TraceState::Idle;
        if let Some(select) = session.commands().select_channel(channel) {
            session.tell(&select).await?;
        }
        session.tell(TraceCommands::select_current_function()).await?;
        session.tell(TraceCommands::current_autorange()).await?;
        session.tell(&self.commands.delete_buffer()).await?;
        session.tell(&self.commands.make_buffer(capacity)).await?;
        session
            .tell(&self.commands.load_loop_until_event(sample_period.as_secs_f64()))
            .await?;

        self.channel = channel;
        self.capacity = capacity;
        self.state = TraceState::Configured;
        debug!(
            supply = %session.name(),
            buffer = self.commands.buffer(),
            capacity,
            "Trace configured"
        );
        Ok(())
    }

    /// Start the trigger loop.
    pub async fn arm(&mut self, session: &mut SupplySession) -> AppResult<()> {
        self.require(self.state.can_arm(), "arm")?;
        let started = async {
            session.init().await?;
            session.trigger().await
        }
        .await;
        if let Err(err) = started {
            self.state = TraceState::Idle;
            return Err(err);
        }
        self.state = TraceState::Armed;
        info!(supply = %session.name(), buffer = self.commands.buffer(), "Trace armed");
        Ok(())
    }

    /// Stop the loop and read the buffer back.
    pub async fn capture(&mut self, session: &mut SupplySession) -> AppResult<TraceBuffer> {
        self.require(self.state.can_capture(), "capture")?;
        match self.read_back(session).await.map_err(|e| session.attribute(e)) {
            Ok(buffer) => {
                self.state = TraceState::Captured;
                info!(
                    supply = %session.name(),
                    rows = buffer.row_count(),
                    capacity = buffer.capacity(),
                    "Trace captured"
                );
                Ok(buffer)
            }
            Err(err) => {
                self.state = TraceState::Idle;
                Err(err)
            }
        }
    }

    async fn read_back(&self, session: &mut SupplySession) -> AppResult<TraceBuffer> {
        session.abort().await?;

        let count_query = self.commands.actual_count_query();
        let response = session.ask(&count_query).await?;
        let rows = scpi::parse_count_response(&count_query, &response)?;
        if rows > self.capacity {
            return Err(PsuError::MalformedResponse {
                supply: String::new(),
                address: String::new(),
                command: count_query,
                response,
            });
        }

        let matrix = if rows == 0 {
            Vec::new()
        } else {
            let data_query = self.commands.data_query(rows);
            let response = session.ask(&data_query).await?;
            let values = scpi::parse_f64_list(&data_query, &response)?;
            reshape(rows, &values)?
        };

        Ok(TraceBuffer {
            channel: self.channel,
            capacity: self.capacity,
            rows: matrix,
            captured_at: Utc::now(),
        })
    }
}

/// Flat `[s0, r0, t0, s1, r1, t1, ...]` into rows of three.
fn reshape(rows: usize, values: &[f64]) -> AppResult<Vec<[f64; 3]>> {
    if values.len() % 3 != 0 || values.len() != rows * 3 {
        return Err(PsuError::MalformedTraceResponse {
            supply: String::new(),
            address: String::new(),
            rows,
            values: values.len(),
        });
    }
    Ok(values
        .chunks_exact(3)
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect())
}

/// Configure, arm, wait `max_duration`, and capture.
pub async fn track_current(
    session: &mut SupplySession,
    channel: usize,
    max_duration: Duration,
    sample_period: Duration,
    settings: &TraceSettings,
) -> AppResult<TraceBuffer> {
    let mut acquisition = TraceAcquisition::from_settings(settings);
    acquisition
        .configure(session, channel, max_duration, sample_period)
        .await?;
    acquisition.arm(session).await?;
    tokio::time::sleep(max_duration).await;
    acquisition.capture(session).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockInstrument;

    fn session() -> (SupplySession, MockInstrument) {
        let instr = MockInstrument::new("169.254.127.39", 1);
        (
            SupplySession::new("smu", Box::new(instr.clone()), 1, 0.001).unwrap(),
            instr,
        )
    }

    #[test]
    fn capacity_is_oversized() {
        let secs = Duration::from_secs;
        assert_eq!(buffer_capacity(secs(5), secs(1), 2.0).unwrap(), 10);
        assert_eq!(
            buffer_capacity(secs(1), Duration::from_millis(300), 2.0).unwrap(),
            7
        );
        assert_eq!(buffer_capacity(secs(5), secs(1), 1.0).unwrap(), 5);
        assert!(buffer_capacity(Duration::ZERO, secs(1), 2.0).is_err());
        assert!(buffer_capacity(secs(5), Duration::ZERO, 2.0).is_err());
        assert!(buffer_capacity(secs(5), secs(1), 0.5).is_err());
    }

    #[test]
    fn reshape_rejects_ragged_data() {
        assert!(matches!(
            reshape(2, &[1.0, 2.0, 3.0, 4.0]),
            Err(PsuError::MalformedTraceResponse { rows: 2, values: 4, .. })
        ));
        assert!(matches!(
            reshape(2, &[1.0, 2.0, 3.0]),
            Err(PsuError::MalformedTraceResponse { .. })
        ));
        assert_eq!(
            reshape(2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
            vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]
        );
    }

    #[tokio::test]
    async fn full_cycle_emits_protocol_in_order() {
        let (mut session, instr) = session();
        let mut trace = TraceAcquisition::new("testData4");
        trace
            .configure(&mut session, 1, Duration::from_secs(5), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(trace.state(), TraceState::Configured);
        assert_eq!(instr.trace_capacity("testData4"), Some(10));

        trace.arm(&mut session).await.unwrap();
        assert!(instr.trace_running());
        instr.set_trace_rows(4);
        let buffer = trace.capture(&mut session).await.unwrap();

        assert_eq!(trace.state(), TraceState::Captured);
        assert_eq!(buffer.row_count(), 4);
        assert_eq!(buffer.capacity(), 10);
        assert_eq!(buffer.column(2).unwrap(), vec![0.0, 1.0, 2.0, 3.0]);
        assert!(buffer.column(3).is_none());
        assert_eq!(
            instr.command_log(),
            vec![
                "SENS:FUNC \"CURR\"",
                "SENS:CURR:RANG:AUTO ON",
                ":TRACe:DELete \"testData4\"",
                "TRACE:MAKE \"testData4\", 10",
                ":TRIGger:LOAD \"LoopUntilEvent\", COMM, 0, NEV, 1.000000, \"testData4\"",
                "INIT",
                "*TRG",
                "ABOR",
                ":TRAC:ACTUAL? \"testData4\"",
                ":TRAC:DATA? 1, 4, \"testData4\", SOUR, READ, REL",
            ]
        );
    }

    #[tokio::test]
    async fn multi_channel_trace_samples_the_selected_channel() {
        let instr = MockInstrument::new("10.10.1.53", 2);
        let mut session = SupplySession::new("S3", Box::new(instr.clone()), 2, 0.001).unwrap();
        session.set_current_limit(2, 2.0).await.unwrap();
        session.set_voltage(2, 3.6).await.unwrap();
        session.enable_output(2).await.unwrap();
        instr.clear_command_log();

        let mut trace = TraceAcquisition::new("buf");
        trace
            .configure(&mut session, 2, Duration::from_secs(1), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(instr.command_log()[0], "INST:NSEL 2");
        trace.arm(&mut session).await.unwrap();
        instr.set_trace_rows(2);
        let buffer = trace.capture(&mut session).await.unwrap();

        assert_eq!(buffer.column(0).unwrap(), vec![3.6, 3.6]);
        assert!((buffer.rows()[0][1] - 0.36).abs() < 1e-12);
    }

    #[tokio::test]
    async fn out_of_order_transitions_are_rejected() {
        let (mut session, instr) = session();
        let mut trace = TraceAcquisition::new("buf");
        assert!(matches!(
            trace.arm(&mut session).await,
            Err(PsuError::InvalidTraceState { operation: "arm", state: TraceState::Idle })
        ));
        assert!(matches!(
            trace.capture(&mut session).await,
            Err(PsuError::InvalidTraceState { operation: "capture", .. })
        ));
        trace
            .configure(&mut session, 1, Duration::from_secs(1), Duration::from_millis(100))
            .await
            .unwrap();
        trace.arm(&mut session).await.unwrap();
        let log_len = instr.command_log().len();
        assert!(trace
            .configure(&mut session, 1, Duration::from_secs(1), Duration::from_millis(100))
            .await
            .is_err());
        assert_eq!(instr.command_log().len(), log_len);
    }

    #[tokio::test]
    async fn empty_buffer_skips_data_query() {
        let (mut session, instr) = session();
        let mut trace = TraceAcquisition::new("buf");
        trace
            .configure(&mut session, 1, Duration::from_secs(1), Duration::from_millis(100))
            .await
            .unwrap();
        trace.arm(&mut session).await.unwrap();
        instr.set_trace_rows(0);
        let buffer = trace.capture(&mut session).await.unwrap();
        assert!(buffer.is_empty());
        assert!(!instr
            .command_log()
            .iter()
            .any(|c| c.starts_with(":TRAC:DATA?")));
    }

    #[tokio::test]
    async fn malformed_readback_is_reported() {
        let (mut session, instr) = session();
        let mut trace = TraceAcquisition::new("buf");
        trace
            .configure(&mut session, 1, Duration::from_secs(5), Duration::from_secs(1))
            .await
            .unwrap();
        trace.arm(&mut session).await.unwrap();
        instr.set_trace_rows(2);
        instr.set_trace_data_response("1,2,3,4");
        assert!(matches!(
            trace.capture(&mut session).await,
            Err(PsuError::MalformedTraceResponse { rows: 2, values: 4, .. })
        ));
        assert_eq!(trace.state(), TraceState::Idle);
    }

    #[tokio::test]
    async fn reconfigure_after_capture_recreates_buffer() {
        let (mut session, instr) = session();
        let mut trace = TraceAcquisition::new("buf");
        for _ in 0..2 {
            trace
                .configure(&mut session, 1, Duration::from_secs(2), Duration::from_secs(1))
                .await
                .unwrap();
            trace.arm(&mut session).await.unwrap();
            trace.capture(&mut session).await.unwrap();
        }
        assert_eq!(instr.trace_capacity("buf"), Some(4));
    }

    #[cfg(feature = "storage_csv")]
    #[tokio::test]
    async fn csv_export_has_header_and_rows() {
        let (mut session, instr) = session();
        let mut trace = TraceAcquisition::new("buf");
        trace
            .configure(&mut session, 1, Duration::from_secs(1), Duration::from_millis(500))
            .await
            .unwrap();
        trace.arm(&mut session).await.unwrap();
        instr.set_trace_rows(2);
        let buffer = trace.capture(&mut session).await.unwrap();

        let mut out = Vec::new();
        buffer.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "source,reading,relative_time");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "0.0,0.0,0.5");
    }
}
