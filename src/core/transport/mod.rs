//! Transport layer for the monitored byte stream
//!
//! Supports:
//! - Serial ports (RS-232, USB-Serial adapters)
//! - An in-memory loopback used for embedding and tests
//!
//! Every transport separates its read path from its write path so the
//! reader loop and the foreground caller never contend on one handle.

mod memory;
mod serial;

pub use memory::{MemoryPeer, MemoryTransport};
pub use serial::{list_ports, SerialConfig, SerialTransport};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Disconnected
    #[error("Disconnected")]
    Disconnected,

    /// Send error
    #[error("Send error: {0}")]
    SendError(String),

    /// Receive error
    #[error("Receive error: {0}")]
    ReceiveError(String),
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Writes performed
    pub packets_sent: u64,
    /// Non-empty reads
    pub packets_received: u64,
    /// Read or write errors
    pub errors: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Byte-stream endpoint driven by the engine.
///
/// All methods take `&self`: implementations keep their read and write
/// handles behind separate locks, so `receive` may be in flight on the
/// reader task while `send` or a reconfiguration runs elsewhere.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportTrait: Send + Sync {
    /// Open the endpoint
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the endpoint
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Write the whole buffer in one call
    async fn send(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Wait for data up to the read timeout.
    ///
    /// An empty buffer means the timeout elapsed with nothing to read.
    async fn receive(&self) -> Result<Bytes, TransportError>;

    /// Apply a new baud rate to the open handle
    async fn set_baud_rate(&self, baud_rate: u32) -> Result<(), TransportError>;

    /// Move the open session to another endpoint
    async fn set_port(&self, port: &str) -> Result<(), TransportError>;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;
}
