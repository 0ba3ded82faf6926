//! VISA transport for TCPIP/LXI instruments
//!
//! Wraps the `visa-rs` crate. VISA I/O is blocking, so every exchange runs on Tokio's
//! blocking pool. Addresses are turned into `TCPIP0::<address>::INSTR` resource strings
//! unless they already are a full resource string.

use crate::config::TransportSettings;
use crate::error::{AppResult, PsuError};
use crate::transport::{ResourceManager, Transport};
use async_trait::async_trait;
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use visa_rs::prelude::*;

/// Process-wide VISA resource manager.
pub struct VisaResourceManager {
    rm: Arc<Mutex<DefaultRM>>,
    timeout: Duration,
    write_termination: String,
}

impl VisaResourceManager {
    /// Open the default VISA resource manager
    pub fn new(settings: &TransportSettings) -> AppResult<Self> {
        let rm = DefaultRM::new()
            .map_err(|e| PsuError::transport("visa", "open resource manager", format!("{e:?}")))?;
        Ok(Self {
            rm: Arc::new(Mutex::new(rm)),
            timeout: settings.timeout,
            write_termination: settings.write_termination.clone(),
        })
    }

    fn resource_string(address: &str) -> String {
        if address.contains("::") {
            address.to_string()
        } else {
            format!("TCPIP0::{address}::INSTR")
        }
    }
}

#[async_trait]
impl ResourceManager for VisaResourceManager {
    async fn open(&self, address: &str) -> AppResult<Box<dyn Transport>> {
        let resource = Self::resource_string(address);
        let rm = Arc::clone(&self.rm);
        let timeout = self.timeout;
        let owned_address = address.to_string();

        let instrument = tokio::task::spawn_blocking(move || {
            let name = CString::new(resource.clone())
                .map_err(|e| PsuError::transport(owned_address.as_str(), "connect", e))?;
            let rm = rm
                .lock()
                .map_err(|_| PsuError::transport(owned_address.as_str(), "connect", "poisoned lock"))?;
            rm.open(&name.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| {
                    PsuError::transport(owned_address.as_str(), "connect", format!("{e:?}"))
                })
        })
        .await
        .map_err(|e| PsuError::transport(address, "connect", e))??;

        Ok(Box::new(VisaTransport {
            address: address.to_string(),
            instrument: Some(Arc::new(Mutex::new(instrument))),
            write_termination: self.write_termination.clone(),
        }))
    }

    fn kind(&self) -> &str {
        "visa"
    }
}

/// One open VISA session.
pub struct VisaTransport {
    address: String,
    instrument: Option<Arc<Mutex<Instrument>>>,
    write_termination: String,
}

impl VisaTransport {
    /// Run a blocking operation against the instrument on the blocking pool.
    async fn with_instrument<T, F>(&self, command: &str, op: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Instrument) -> std::io::Result<T> + Send + 'static,
    {
        let instrument = self
            .instrument
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| PsuError::transport(self.address.as_str(), command, "session is closed"))?;
        let address = self.address.clone();
        let cmd = command.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = instrument
                .lock()
                .map_err(|_| PsuError::transport(address.as_str(), cmd.as_str(), "poisoned lock"))?;
            op(&mut guard).map_err(|e| PsuError::transport(address.as_str(), cmd.as_str(), e))
        })
        .await
        .map_err(|e| PsuError::transport(self.address.as_str(), command, e))?
    }
}

#[async_trait]
impl Transport for VisaTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&mut self, command: &str) -> AppResult<()> {
        let line = format!("{command}{}", self.write_termination);
        self.with_instrument(command, move |instr| instr.write_all(line.as_bytes()))
            .await
    }

    async fn query(&mut self, command: &str) -> AppResult<String> {
        let line = format!("{command}{}", self.write_termination);
        self.with_instrument(command, move |instr| {
            instr.write_all(line.as_bytes())?;
            let mut response = String::new();
            BufReader::new(&*instr).read_line(&mut response)?;
            Ok(response.trim_end().to_string())
        })
        .await
    }

    async fn clear(&mut self) -> AppResult<()> {
        self.with_instrument("clear", |instr| {
            instr
                .clear()
                .map_err(|e| std::io::Error::other(format!("{e:?}")))
        })
        .await
    }

    async fn close(&mut self) -> AppResult<()> {
        // Dropping the last handle closes the VISA session.
        self.instrument.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_addresses_become_tcpip_resources() {
        assert_eq!(
            VisaResourceManager::resource_string("10.10.1.53"),
            "TCPIP0::10.10.1.53::INSTR"
        );
        assert_eq!(
            VisaResourceManager::resource_string("USB0::0x05E6::0x2450::04418791::INSTR"),
            "USB0::0x05E6::0x2450::04418791::INSTR"
        );
    }
}
