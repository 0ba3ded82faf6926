//! Power passes across a provisioned, simulated array.

use psu_array::array_config::ArrayConfig;
use psu_array::provisioner::ArrayProvisioner;
use psu_array::sequencer::PowerSequencer;
use psu_array::transport::{MockInstrument, MockResourceManager};
use psu_array::{PsuError, SupplyArray, DEFAULT_SAFETY_FLOOR_AMPS};
use std::time::Duration;

const ARRAY: &str = r#"
S2:
  IP: "10.10.1.52"
  NCH: 3
  CH1: { V: 5.0, OCP: 1.25 }
  CH2: { V: -99, OCP: 0.01 }
  CH3: { V: 2.4, OCP: 3.0 }
S3:
  IP: "10.10.1.53"
  NCH: 2
  CH1: { V: -99, OCP: 0.01 }
  CH2: { V: 3.6, OCP: 2.0 }
"#;

struct Bench {
    rm: MockResourceManager,
    array: SupplyArray,
    s2: MockInstrument,
    s3: MockInstrument,
}

async fn bench() -> Bench {
    let config = ArrayConfig::from_yaml_str(ARRAY).unwrap();
    let rm = MockResourceManager::new();
    let s2 = rm.add_instrument("10.10.1.52", 3);
    let s3 = rm.add_instrument("10.10.1.53", 2);
    let array = ArrayProvisioner::new(&rm).provision(&config).await.unwrap();
    s2.clear_command_log();
    s3.clear_command_log();
    rm.clear_journal();
    Bench { rm, array, s2, s3 }
}

fn sequencer() -> PowerSequencer {
    PowerSequencer::default()
        .with_settle_delay(Duration::ZERO)
        .with_cycle_pause(Duration::ZERO)
}

#[tokio::test]
async fn power_up_enables_configured_channels_in_order() {
    let mut bench = bench().await;
    sequencer().power_up(&mut bench.array, false).await.unwrap();

    assert_eq!(
        bench.s2.command_log(),
        vec!["OUTP:STAT CH1,ON", "OUTP:STAT CH3,ON"]
    );
    assert_eq!(bench.s3.command_log(), vec!["OUTP:STAT CH2,ON"]);
    assert_eq!(
        bench.rm.journal(),
        vec![
            "10.10.1.52 OUTP:STAT CH1,ON",
            "10.10.1.52 OUTP:STAT CH3,ON",
            "10.10.1.53 OUTP:STAT CH2,ON",
        ]
    );
    assert!(!bench.s2.channel(2).unwrap().output_on);
    assert!(!bench.s3.channel(1).unwrap().output_on);
}

#[tokio::test]
async fn end_to_end_s3() {
    let mut bench = bench().await;
    let s3 = bench.array.get("S3").unwrap();
    assert_eq!(s3.voltages(), &[0.0, 3.6]);
    assert_eq!(s3.current_limits(), &[DEFAULT_SAFETY_FLOOR_AMPS, 2.0]);

    let report = sequencer()
        .power_up(&mut bench.array, true)
        .await
        .unwrap()
        .unwrap();
    let status = report.supply("S3").unwrap();
    assert_eq!(status.identity, "IDN: SN-10.10.1.53 IP: 10.10.1.53");
    assert!(!status.channels[0].output_on);
    assert!(status.channels[1].output_on);
    assert_eq!(status.channels[1].voltage, 3.6);

    let table = report.to_string();
    assert!(table.contains("\tChannel\t| Status\t| V\t\t| I (A)\t\t| P (W)"));
}

#[tokio::test]
async fn power_down_touches_every_channel() {
    let mut bench = bench().await;
    let seq = sequencer();
    seq.power_up(&mut bench.array, false).await.unwrap();
    bench.s2.clear_command_log();
    bench.s3.clear_command_log();
    bench.rm.clear_journal();

    seq.power_down(&mut bench.array, false).await.unwrap();
    assert_eq!(
        bench.rm.journal(),
        vec![
            "10.10.1.52 OUTP:STAT CH1,OFF",
            "10.10.1.52 OUTP:STAT CH2,OFF",
            "10.10.1.52 OUTP:STAT CH3,OFF",
            "10.10.1.53 OUTP:STAT CH1,OFF",
            "10.10.1.53 OUTP:STAT CH2,OFF",
        ]
    );
    assert_eq!(
        bench.s2.command_log(),
        vec!["OUTP:STAT CH1,OFF", "OUTP:STAT CH2,OFF", "OUTP:STAT CH3,OFF"]
    );
    assert_eq!(
        bench.s3.command_log(),
        vec!["OUTP:STAT CH1,OFF", "OUTP:STAT CH2,OFF"]
    );
}

#[tokio::test]
async fn power_down_aggregates_failures_across_supplies() {
    let mut bench = bench().await;
    let seq = sequencer();
    seq.power_up(&mut bench.array, false).await.unwrap();
    bench.s2.fail_commands_starting_with("OUTP:STAT CH3");
    bench.s3.fail_commands_starting_with("OUTP:STAT CH1");

    match seq.power_down(&mut bench.array, false).await {
        Err(PsuError::PowerDownFailed(errors)) => {
            assert_eq!(errors.len(), 2);
            assert!(errors.iter().all(PsuError::is_transport));
        }
        other => panic!("expected PowerDownFailed, got {other:?}"),
    }
    assert!(!bench.s2.channel(1).unwrap().output_on);
    assert!(!bench.s3.channel(2).unwrap().output_on);
}

#[tokio::test]
async fn power_cycle_never_energizes_do_not_use_channels() {
    let mut bench = bench().await;
    sequencer().power_cycle(&mut bench.array).await.unwrap();

    assert_eq!(
        bench.s2.command_log(),
        vec![
            "OUTP:STAT CH1,ON",
            "OUTP:STAT CH1,OFF",
            "OUTP:STAT CH3,ON",
            "OUTP:STAT CH3,OFF",
        ]
    );
    assert_eq!(
        bench.s3.command_log(),
        vec!["OUTP:STAT CH2,ON", "OUTP:STAT CH2,OFF"]
    );
}

#[tokio::test]
async fn status_report_is_observational() {
    let mut bench = bench().await;
    let report = sequencer().report_status(&mut bench.array).await.unwrap();
    assert_eq!(report.supplies.len(), 2);
    assert!(bench
        .s2
        .command_log()
        .iter()
        .all(|c| c.ends_with('?') || c.contains("? CH")));
}

#[tokio::test]
async fn garbage_identity_names_the_supply_in_status() {
    let mut bench = bench().await;
    bench.s3.set_idn("GARBAGE");

    match sequencer().report_status(&mut bench.array).await {
        Err(err @ PsuError::MalformedResponse { .. }) => {
            let msg = err.to_string();
            assert!(msg.contains("'S3'"), "{msg}");
            assert!(msg.contains("10.10.1.53"), "{msg}");
        }
        other => panic!("expected MalformedResponse, got {other:?}"),
    }
}

#[tokio::test]
async fn disabling_twice_is_harmless() {
    let mut bench = bench().await;
    let session = bench.array.get_mut("S2").unwrap();
    session.disable_output(1).await.unwrap();
    session.disable_output(1).await.unwrap();
    assert_eq!(
        bench.s2.command_log(),
        vec!["OUTP:STAT CH1,OFF", "OUTP:STAT CH1,OFF"]
    );
    assert!(!bench.s2.channel(1).unwrap().output_on);
}
