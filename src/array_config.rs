//! Array document: which supplies exist and what every channel should be set to.
//!
//! The document is YAML, one top-level key per supply, in the order the supplies are to be
//! provisioned and sequenced:
//!
//! ```yaml
//! S3:
//!   address: "10.10.1.53"
//!   channel_count: 2
//!   channels:
//!     1: { voltage: -99, current_limit: 0.01 }   # do not use
//!     2: { voltage: 3.6, current_limit: 2.0 }
//! ```
//!
//! `channel_count` may be omitted, in which case the declared channels must be `1..=n`.
//! The older flat layout is accepted too (`IP`, `NCH`, and `CH<n>: { V, OCP }` entries next
//! to them). Validation happens entirely here, before any connection is opened.

use crate::channel::{ChannelSpec, Setpoint};
use crate::error::{AppResult, PsuError};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawChannel {
    #[serde(alias = "V")]
    voltage: f64,
    #[serde(default, alias = "OCP")]
    current_limit: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSupply {
    #[serde(alias = "IP")]
    address: String,
    #[serde(default, alias = "NCH")]
    channel_count: Option<usize>,
    #[serde(default)]
    channels: IndexMap<usize, RawChannel>,
    /// `CH<n>` entries of the flat layout.
    #[serde(flatten)]
    flat_channels: IndexMap<String, RawChannel>,
}

/// One supply as declared in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyDefinition {
    pub name: String,
    pub address: String,
    /// One entry per channel, ascending index, covering `1..=channel_count`.
    pub channels: Vec<ChannelSpec>,
}

impl SupplyDefinition {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&ChannelSpec> {
        self.channels.get(index.checked_sub(1)?)
    }

    /// Channels that will be energized on power-up.
    pub fn enabled_channels(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.channels.iter().filter(|spec| spec.setpoint.is_enabled())
    }
}

/// Validated array document, supplies in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayConfig {
    pub supplies: Vec<SupplyDefinition>,
}

impl ArrayConfig {
    /// Read and validate an array document from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate an array document.
    pub fn from_yaml_str(text: &str) -> AppResult<Self> {
        let raw: IndexMap<String, RawSupply> = if text.trim().is_empty() {
            IndexMap::new()
        } else {
            serde_yaml::from_str::<Option<IndexMap<String, RawSupply>>>(text)
                .map_err(|e| PsuError::Configuration(format!("Invalid array document: {e}")))?
                .unwrap_or_default()
        };
        if raw.is_empty() {
            return Err(PsuError::Configuration(
                "Array document declares no supplies".into(),
            ));
        }

        let mut addresses = HashSet::new();
        let mut supplies = Vec::with_capacity(raw.len());
        for (name, supply) in raw {
            let definition = validate_supply(name, supply)?;
            if !addresses.insert(definition.address.clone()) {
                return Err(PsuError::Configuration(format!(
                    "Supply '{}': address {} is already used by another supply",
                    definition.name, definition.address
                )));
            }
            supplies.push(definition);
        }
        Ok(Self { supplies })
    }

    pub fn supply(&self, name: &str) -> Option<&SupplyDefinition> {
        self.supplies.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SupplyDefinition> {
        self.supplies.iter()
    }

    pub fn len(&self) -> usize {
        self.supplies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supplies.is_empty()
    }
}

fn validate_supply(name: String, raw: RawSupply) -> AppResult<SupplyDefinition> {
    let fail = |msg: String| PsuError::Configuration(format!("Supply '{name}': {msg}"));

    if name.trim().is_empty() {
        return Err(PsuError::Configuration("Supply name must not be empty".into()));
    }
    let address = raw.address.trim().to_string();
    if address.is_empty() {
        return Err(fail("address must not be empty".into()));
    }

    let mut declared: IndexMap<usize, RawChannel> = raw.channels;
    for (key, channel) in raw.flat_channels {
        let index = parse_flat_key(&key)
            .ok_or_else(|| fail(format!("unknown key '{key}'")))?;
        if declared.insert(index, channel).is_some() {
            return Err(fail(format!("channel {index} is declared twice")));
        }
    }

    // Without an explicit count the declared channels must be exactly 1..=n.
    let n_ch = raw.channel_count.unwrap_or(declared.len());
    if n_ch == 0 {
        return Err(fail("channel_count must be at least 1".into()));
    }

    if let Some(index) = declared.keys().find(|i| !(1..=n_ch).contains(*i)) {
        return Err(fail(format!(
            "channel {index} is outside 1..={n_ch}"
        )));
    }

    let mut channels = Vec::with_capacity(n_ch);
    for index in 1..=n_ch {
        let raw_channel = declared
            .get(&index)
            .ok_or_else(|| fail(format!("channel {index} is not declared")))?;
        let limit = raw_channel.current_limit.unwrap_or(0.0);
        let setpoint = Setpoint::from_raw(raw_channel.voltage, limit).ok_or_else(|| {
            fail(format!(
                "channel {index} is enabled at {} V but has no positive current limit ({limit})",
                raw_channel.voltage
            ))
        })?;
        channels.push(ChannelSpec::new(name.as_str(), index, setpoint));
    }

    Ok(SupplyDefinition {
        name,
        address,
        channels,
    })
}

/// `CH2` / `ch2` -> 2
fn parse_flat_key(key: &str) -> Option<usize> {
    let digits = key
        .strip_prefix("CH")
        .or_else(|| key.strip_prefix("ch"))?;
    digits.parse().ok()
}
