//! Raw-socket SCPI transport
//!
//! Most LXI instruments expose their SCPI parser on a plain TCP socket (port 5025). Each
//! command is one line; each query reply is one line. Every exchange is bounded by the
//! configured timeout so an unresponsive instrument surfaces as a [`PsuError::Transport`]
//! instead of blocking the caller forever.
//!
//! A failed exchange drops the connection. A late reply left in the socket would otherwise be
//! read as the answer to the next query, so every later call fails until the supply is reopened.

use crate::config::TransportSettings;
use crate::error::{AppResult, PsuError};
use crate::transport::{ResourceManager, Transport};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Opens [`TcpTransport`] connections.
///
/// # Example
/// ```no_run
/// use psu_array::config::TransportSettings;
/// use psu_array::transport::{ResourceManager, TcpResourceManager};
///
/// # async fn example() -> psu_array::error::AppResult<()> {
/// let rm = TcpResourceManager::from_settings(&TransportSettings::default());
/// let mut instr = rm.open("10.10.1.53").await?;
/// let idn = instr.query("*IDN?").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpResourceManager {
    port: u16,
    timeout: Duration,
    write_termination: String,
    read_termination: u8,
}

impl TcpResourceManager {
    /// Create a resource manager with default settings
    pub fn new() -> Self {
        Self::from_settings(&TransportSettings::default())
    }

    /// Apply port, timeout and terminators from [`TransportSettings`].
    pub fn from_settings(settings: &TransportSettings) -> Self {
        Self {
            port: settings.port,
            timeout: settings.timeout,
            write_termination: settings.write_termination.clone(),
            read_termination: settings.read_termination.bytes().next().unwrap_or(b'\n'),
        }
    }

    /// Set the default port used for addresses without one
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set connect and exchange timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `host` becomes `host:<port>`; `host:port` and `[v6]:port` are kept as given.
    fn socket_address(&self, address: &str) -> String {
        let has_port = if address.starts_with('[') {
            address.contains("]:")
        } else {
            address.matches(':').count() == 1
        };
        if has_port {
            address.to_string()
        } else if address.contains(':') {
            format!("[{address}]:{}", self.port)
        } else {
            format!("{address}:{}", self.port)
        }
    }
}

impl Default for TcpResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceManager for TcpResourceManager {
    async fn open(&self, address: &str) -> AppResult<Box<dyn Transport>> {
        let socket_address = self.socket_address(address);
        debug!(address, %socket_address, "Opening SCPI socket");

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&socket_address))
            .await
            .map_err(|_| PsuError::transport(address, "connect", "connection timed out"))?
            .map_err(|e| PsuError::transport(address, "connect", e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| PsuError::transport(address, "connect", e))?;

        Ok(Box::new(TcpTransport {
            address: address.to_string(),
            stream: Some(BufReader::new(stream)),
            timeout: self.timeout,
            write_termination: self.write_termination.clone(),
            read_termination: self.read_termination,
        }))
    }

    fn kind(&self) -> &str {
        "tcp"
    }
}

/// One open raw-socket connection.
pub struct TcpTransport {
    address: String,
    stream: Option<BufReader<TcpStream>>,
    timeout: Duration,
    write_termination: String,
    read_termination: u8,
}

impl TcpTransport {
    fn stream(&mut self, command: &str) -> AppResult<&mut BufReader<TcpStream>> {
        let address = &self.address;
        self.stream
            .as_mut()
            .ok_or_else(|| PsuError::transport(address.as_str(), command, "connection is closed"))
    }

    async fn send_line(&mut self, command: &str) -> AppResult<()> {
        let line = format!("{command}{}", self.write_termination);
        let timeout = self.timeout;
        let address = self.address.clone();
        let stream = self.stream(command)?;

        tokio::time::timeout(timeout, stream.get_mut().write_all(line.as_bytes()))
            .await
            .map_err(|_| PsuError::transport(address.as_str(), command, "write timed out"))?
            .map_err(|e| PsuError::transport(address.as_str(), command, e))
    }

    fn drain(&mut self) -> AppResult<()> {
        let address = self.address.clone();
        let stream = self.stream("clear")?;

        // Drop whatever is already buffered, then drain the socket without blocking.
        let buffered = stream.buffer().len();
        stream.consume(buffered);
        let mut scratch = [0u8; 512];
        loop {
            match stream.get_ref().try_read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(PsuError::transport(address, "clear", e)),
            }
        }
        Ok(())
    }

    /// Forget the socket after a failed exchange.
    fn drop_on_error<T>(&mut self, command: &str, result: AppResult<T>) -> AppResult<T> {
        if let Err(err) = &result {
            if self.stream.take().is_some() {
                warn!(
                    address = %self.address,
                    command,
                    error = %err,
                    "Dropping SCPI connection after failed exchange"
                );
            }
        }
        result
    }

    async fn read_line(&mut self, command: &str) -> AppResult<String> {
        let timeout = self.timeout;
        let terminator = self.read_termination;
        let address = self.address.clone();
        let stream = self.stream(command)?;

        let mut buf = Vec::with_capacity(64);
        let read = tokio::time::timeout(timeout, stream.read_until(terminator, &mut buf))
            .await
            .map_err(|_| PsuError::transport(address.as_str(), command, "read timed out"))?
            .map_err(|e| PsuError::transport(address.as_str(), command, e))?;
        if read == 0 {
            return Err(PsuError::transport(
                address.as_str(),
                command,
                "connection closed by instrument",
            ));
        }

        if buf.last() == Some(&terminator) {
            buf.pop();
        }
        let response = String::from_utf8_lossy(&buf);
        Ok(response.trim_end_matches('\r').to_string())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn write(&mut self, command: &str) -> AppResult<()> {
        let result = self.send_line(command).await;
        self.drop_on_error(command, result)
    }

    async fn query(&mut self, command: &str) -> AppResult<String> {
        let result = match self.send_line(command).await {
            Ok(()) => self.read_line(command).await,
            Err(err) => Err(err),
        };
        self.drop_on_error(command, result)
    }

    async fn clear(&mut self) -> AppResult<()> {
        let result = self.drain();
        self.drop_on_error("clear", result)
    }

    async fn close(&mut self) -> AppResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .get_mut()
                .shutdown()
                .await
                .map_err(|e| PsuError::transport(self.address.as_str(), "close", e))?;
        }
        Ok(())
    }
}
