//! # PSU Array Core Library
//!
//! This crate drives an array of programmable power supplies over the network using SCPI. An
//! operator declares the desired voltage and over-current limit of every channel in an array
//! document; the library provisions the supplies, sequences their outputs, reports their
//! status, and captures buffered current traces.
//!
//! ## Crate Structure
//!
//! - **`array_config`**: The YAML array document, validated into `ArrayConfig` before any I/O.
//! - **`channel`**: `ChannelSpec` and the `Disabled | Enabled` setpoint.
//! - **`config`**: Process settings (TOML file + `PSU_ARRAY_*` environment) via `figment`.
//! - **`error`**: The `PsuError` enum and `AppResult` alias.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`scpi`**: Every command string the crate sends, and reply parsing.
//! - **`transport`**: The `Transport` / `ResourceManager` traits with TCP, mock and VISA
//!   backends.
//! - **`session`**: `SupplySession`, channel-level operations on one supply.
//! - **`provisioner`**: Builds a `SupplyArray` from an `ArrayConfig`, limit before voltage.
//! - **`array`**: The provisioned `SupplyArray`.
//! - **`sequencer`**: Power-up, power-down and power-cycle passes.
//! - **`report`**: Status snapshots and their console table.
//! - **`trace`**: Buffered current acquisition.
//!
//! Everything is sequential: one supply, one channel, one exchange at a time.

pub mod array;
pub mod array_config;
pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod provisioner;
pub mod report;
pub mod scpi;
pub mod sequencer;
pub mod session;
pub mod trace;
pub mod transport;

pub use array::SupplyArray;
pub use array_config::{ArrayConfig, SupplyDefinition};
pub use channel::{ChannelSpec, Setpoint, DEFAULT_SAFETY_FLOOR_AMPS};
pub use config::Settings;
pub use error::{AppResult, PsuError};
pub use provisioner::ArrayProvisioner;
pub use sequencer::PowerSequencer;
pub use session::SupplySession;
pub use trace::{TraceAcquisition, TraceBuffer, TraceState, DEFAULT_BUFFER_MARGIN};
