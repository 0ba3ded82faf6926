//! Buffered current tracking against a simulated source-measure unit.

use psu_array::config::TraceSettings;
use psu_array::session::SupplySession;
use psu_array::trace::{self, TraceAcquisition, TraceState};
use psu_array::transport::{MockInstrument, MockResourceManager};
use psu_array::PsuError;
use std::time::Duration;

async fn smu() -> (SupplySession, MockInstrument) {
    let rm = MockResourceManager::new();
    let instr = rm
        .add_instrument("169.254.127.39", 1)
        .with_idn("KEITHLEY INSTRUMENTS,MODEL 2450,04418791,1.7.3c");
    let mut session = SupplySession::open(&rm, "smu", "169.254.127.39", 1, 0.001)
        .await
        .unwrap();
    session.set_current_limit(1, 0.1).await.unwrap();
    session.set_voltage(1, 4.2).await.unwrap();
    session.enable_output(1).await.unwrap();
    instr.clear_command_log();
    (session, instr)
}

#[tokio::test]
async fn identity_uses_serial_field() {
    let (mut session, _instr) = smu().await;
    assert_eq!(
        session.identify().await.unwrap(),
        "IDN: 04418791 IP: 169.254.127.39"
    );
}

#[tokio::test]
async fn five_seconds_at_one_hertz_needs_ten_rows() {
    let (mut session, instr) = smu().await;
    let mut acquisition = TraceAcquisition::new("testData4");
    acquisition
        .configure(&mut session, 1, Duration::from_secs(5), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(acquisition.capacity() >= 10);
    assert_eq!(instr.trace_capacity("testData4"), Some(acquisition.capacity()));
}

#[tokio::test]
async fn captured_matrix_has_three_columns() {
    let (mut session, instr) = smu().await;
    let settings = TraceSettings::default();
    let mut acquisition = TraceAcquisition::from_settings(&settings);

    acquisition
        .configure(&mut session, 1, Duration::from_secs(2), Duration::from_millis(500))
        .await
        .unwrap();
    acquisition.arm(&mut session).await.unwrap();
    instr.set_trace_rows(3);
    let buffer = acquisition.capture(&mut session).await.unwrap();

    assert_eq!(acquisition.state(), TraceState::Captured);
    assert_eq!(buffer.capacity(), 8);
    assert_eq!(buffer.row_count(), 3);
    let samples: Vec<_> = buffer.samples().collect();
    assert_eq!(samples[0].source, 4.2);
    assert!((samples[0].reading - 0.1).abs() < 1e-12);
    assert_eq!(buffer.column(2).unwrap(), vec![0.0, 0.5, 1.0]);

    let mut copy = buffer.to_matrix();
    copy[0][0] = -1.0;
    assert_eq!(buffer.rows()[0][0], 4.2);
}

#[tokio::test]
async fn readback_not_multiple_of_three_is_malformed() {
    let (mut session, instr) = smu().await;
    let mut acquisition = TraceAcquisition::new("buf");
    acquisition
        .configure(&mut session, 1, Duration::from_secs(5), Duration::from_secs(1))
        .await
        .unwrap();
    acquisition.arm(&mut session).await.unwrap();
    instr.set_trace_rows(2);
    instr.set_trace_data_response("1,2,3,4");

    let err = acquisition.capture(&mut session).await.unwrap_err();
    assert!(matches!(err, PsuError::MalformedTraceResponse { values: 4, .. }));
    assert!(err.to_string().contains("'smu' at 169.254.127.39"));
}

#[tokio::test]
async fn non_numeric_readback_is_malformed_response() {
    let (mut session, instr) = smu().await;
    let mut acquisition = TraceAcquisition::new("buf");
    acquisition
        .configure(&mut session, 1, Duration::from_secs(5), Duration::from_secs(1))
        .await
        .unwrap();
    acquisition.arm(&mut session).await.unwrap();
    instr.set_trace_rows(1);
    instr.set_trace_data_response("1,NaN?,3");

    assert!(matches!(
        acquisition.capture(&mut session).await,
        Err(PsuError::MalformedResponse { .. })
    ));
}

#[tokio::test]
async fn invalid_parameters_are_rejected_before_io() {
    let (mut session, instr) = smu().await;
    let mut acquisition = TraceAcquisition::new("buf");
    assert!(matches!(
        acquisition
            .configure(&mut session, 1, Duration::from_secs(5), Duration::ZERO)
            .await,
        Err(PsuError::InvalidTraceParameters(_))
    ));
    assert!(matches!(
        acquisition
            .configure(&mut session, 2, Duration::from_secs(5), Duration::from_secs(1))
            .await,
        Err(PsuError::InvalidChannel { .. })
    ));
    assert!(instr.command_log().is_empty());
    assert_eq!(acquisition.state(), TraceState::Idle);
}

#[tokio::test]
async fn track_current_runs_the_whole_protocol() {
    let (mut session, instr) = smu().await;
    let settings = TraceSettings {
        buffer_name: "tracked".into(),
        ..TraceSettings::default()
    };

    let buffer = trace::track_current(
        &mut session,
        1,
        Duration::from_millis(50),
        Duration::from_millis(10),
        &settings,
    )
    .await
    .unwrap();

    assert_eq!(buffer.capacity(), 10);
    assert_eq!(buffer.row_count(), 5);
    assert!(!instr.trace_running());
}
