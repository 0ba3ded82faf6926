//! Instrument transports.
//!
//! A [`Transport`] is one open, line-oriented connection to one instrument. A
//! [`ResourceManager`] opens transports by address; it is created once per process and passed
//! explicitly to whoever needs to open connections.
//!
//! Implementations:
//! - [`tcp::TcpResourceManager`]: raw SCPI socket (port 5025 by default)
//! - [`mock::MockResourceManager`]: in-process simulated supplies, for tests and `--simulate`
//! - `visa::VisaResourceManager` (feature `instrument_visa`): VISA `TCPIP0::<addr>::INSTR`

use crate::error::AppResult;
use async_trait::async_trait;

pub mod mock;
pub mod tcp;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use mock::{MockInstrument, MockResourceManager};
pub use tcp::{TcpResourceManager, TcpTransport};

/// Capability interface of one open instrument connection.
///
/// Commands and responses are text lines; terminators are added and stripped by the
/// implementation. Every call is one complete round trip.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address the connection was opened with.
    fn address(&self) -> &str;

    /// Send a command that produces no response.
    async fn write(&mut self, command: &str) -> AppResult<()>;

    /// Send a query and return its response line (terminator stripped).
    async fn query(&mut self, command: &str) -> AppResult<String>;

    /// Device clear: discard pending input/output on the connection.
    async fn clear(&mut self) -> AppResult<()>;

    /// Close the connection. Further calls fail.
    async fn close(&mut self) -> AppResult<()>;
}

/// Factory for instrument connections.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Open a connection to the instrument at `address`.
    async fn open(&self, address: &str) -> AppResult<Box<dyn Transport>>;

    /// Short name of the backend (`"tcp"`, `"mock"`, `"visa"`).
    fn kind(&self) -> &str;
}
