//! CLI entry point for psu-array
//!
//! Every subcommand provisions the array described by the array document first and closes
//! every session before exiting.
//!
//! # Usage
//!
//! ```bash
//! psu-array config/array.yaml up --report
//! psu-array config/array.yaml trace --supply S3 --channel 2 --duration 5 --period 0.5 --output trace.csv
//! psu-array --simulate config/array.yaml down --report
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use psu_array::array_config::ArrayConfig;
use psu_array::config::{Settings, DEFAULT_SETTINGS_PATH};
use psu_array::provisioner::ArrayProvisioner;
use psu_array::sequencer::PowerSequencer;
use psu_array::transport::{MockResourceManager, ResourceManager, TcpResourceManager};
use psu_array::{logging, trace, SupplyArray};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "psu-array")]
#[command(about = "Provision, sequence and monitor an array of SCPI power supplies", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    /// Use simulated supplies instead of the network
    #[arg(long)]
    simulate: bool,

    /// Open instruments through VISA (requires the `instrument_visa` feature)
    #[arg(long, conflicts_with = "simulate")]
    visa: bool,

    /// Log every SCPI exchange
    #[arg(short, long)]
    verbose: bool,

    /// Array document (YAML)
    array: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the array and print each supply's identity
    Provision,

    /// Enable every channel that has a voltage
    Up {
        /// Print a status table after the settle delay
        #[arg(long)]
        report: bool,
    },

    /// Disable every channel
    Down {
        /// Print status tables before and after
        #[arg(long)]
        report: bool,
    },

    /// Switch each enabled channel on and off again
    Cycle,

    /// Print output state and measurements of every channel
    Status {
        /// Print JSON instead of the table
        #[arg(long)]
        json: bool,
    },

    /// Capture a buffered current trace on one supply
    Trace {
        /// Supply name from the array document
        #[arg(long)]
        supply: String,

        #[arg(long, default_value_t = 1)]
        channel: usize,

        /// Acquisition length in seconds
        #[arg(long)]
        duration: f64,

        /// Sample period in seconds
        #[arg(long)]
        period: f64,

        /// Write the samples to this CSV file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Send a raw query and/or command to every supply
    Send {
        #[arg(long)]
        ask: Option<String>,

        #[arg(long)]
        tell: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.settings)
        .with_context(|| format!("loading settings from {}", cli.settings.display()))?;
    if cli.verbose {
        settings.application.log_level = "debug".to_string();
    }
    logging::init_from_settings(&settings)?;

    let config = ArrayConfig::load(&cli.array)
        .with_context(|| format!("loading array document {}", cli.array.display()))?;
    let rm = resource_manager(&cli, &settings, &config)?;
    info!(backend = rm.kind(), supplies = config.len(), "Starting");

    let mut array = ArrayProvisioner::from_settings(rm.as_ref(), &settings.provisioning)
        .provision(&config)
        .await?;

    let outcome = run(cli.command, &mut array, &settings).await;
    let teardown = array.close_all().await;
    outcome?;
    teardown?;
    Ok(())
}

fn resource_manager(
    cli: &Cli,
    settings: &Settings,
    config: &ArrayConfig,
) -> Result<Box<dyn ResourceManager>> {
    if cli.simulate {
        let rm = MockResourceManager::new();
        for supply in config.iter() {
            rm.add_instrument(&supply.address, supply.channel_count());
        }
        return Ok(Box::new(rm));
    }
    if cli.visa {
        return visa_resource_manager(settings);
    }
    Ok(Box::new(TcpResourceManager::from_settings(&settings.transport)))
}

#[cfg(feature = "instrument_visa")]
fn visa_resource_manager(settings: &Settings) -> Result<Box<dyn ResourceManager>> {
    let rm = psu_array::transport::visa::VisaResourceManager::new(&settings.transport)?;
    Ok(Box::new(rm))
}

#[cfg(not(feature = "instrument_visa"))]
fn visa_resource_manager(_settings: &Settings) -> Result<Box<dyn ResourceManager>> {
    Err(psu_array::PsuError::FeatureNotEnabled("instrument_visa".to_string()).into())
}

async fn run(command: Commands, array: &mut SupplyArray, settings: &Settings) -> Result<()> {
    let sequencer = PowerSequencer::new(&settings.sequencing);

    match command {
        Commands::Provision => {
            for session in array.iter_mut() {
                let identity = session.identify().await?;
                println!("{}: {identity}", session.name());
            }
        }
        Commands::Up { report } => {
            if let Some(status) = sequencer.power_up(array, report).await? {
                print!("{status}");
            }
        }
        Commands::Down { report } => {
            let snapshots = sequencer.power_down(array, report).await?;
            if let Some(before) = snapshots.before {
                print!("{before}");
                println!("----------------------");
            }
            if let Some(after) = snapshots.after {
                print!("{after}");
            }
        }
        Commands::Cycle => sequencer.power_cycle(array).await?,
        Commands::Status { json } => {
            let status = sequencer.report_status(array).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{status}");
            }
        }
        Commands::Trace {
            supply,
            channel,
            duration,
            period,
            output,
        } => {
            let duration = Duration::try_from_secs_f64(duration)
                .map_err(|e| anyhow!("invalid --duration: {e}"))?;
            let period = Duration::try_from_secs_f64(period)
                .map_err(|e| anyhow!("invalid --period: {e}"))?;
            let session = array
                .get_mut(&supply)
                .ok_or_else(|| anyhow!("no supply named '{supply}' in the array document"))?;

            let buffer =
                trace::track_current(session, channel, duration, period, &settings.trace).await?;
            match output {
                Some(path) => {
                    buffer.save_csv(&path)?;
                    println!(
                        "Wrote {} of {} samples to {}",
                        buffer.row_count(),
                        buffer.capacity(),
                        path.display()
                    );
                }
                None => buffer.write_csv(std::io::stdout().lock())?,
            }
        }
        Commands::Send { ask, tell } => {
            if ask.is_none() && tell.is_none() {
                return Err(anyhow!("send needs --ask and/or --tell"));
            }
            let replies = array
                .apply_to_all(ask.as_deref(), tell.as_deref())
                .await?;
            for reply in replies {
                if let Some(response) = reply.response {
                    println!("{}: {}", reply.supply, response);
                }
            }
        }
    }
    Ok(())
}
