//! Serial port transport implementation

use super::{TransportError, TransportStats, TransportTrait};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 4096;

type PortHandle = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Upper bound on a single blocking read
    pub read_timeout: Duration,
}

impl SerialConfig {
    /// Create a new serial configuration with a one second read timeout
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            read_timeout: Duration::from_secs(1),
        }
    }

    /// Set read timeout
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 115_200)
    }
}

/// Serial port transport.
///
/// Holds two OS handles to the same device: the original one is used by the
/// reader, a `try_clone` of it by writers and reconfiguration.
pub struct SerialTransport {
    config: RwLock<SerialConfig>,
    reader: PortHandle,
    writer: PortHandle,
    stats: Arc<RwLock<TransportStats>>,
    connected_at: RwLock<Option<Instant>>,
}

impl SerialTransport {
    /// Create a new, unopened serial transport
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config: RwLock::new(config),
            reader: Arc::new(Mutex::new(None)),
            writer: Arc::new(Mutex::new(None)),
            stats: Arc::new(RwLock::new(TransportStats::default())),
            connected_at: RwLock::new(None),
        }
    }

    /// Current configuration
    pub fn config(&self) -> SerialConfig {
        self.config.read().clone()
    }
}

fn open_handles(
    config: &SerialConfig,
) -> Result<(Box<dyn SerialPort>, Box<dyn SerialPort>), TransportError> {
    let reader = serialport::new(&config.port, config.baud_rate)
        .timeout(config.read_timeout)
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound(config.port.clone()),
            serialport::ErrorKind::InvalidInput => {
                TransportError::InvalidConfiguration(e.to_string())
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                TransportError::PortNotFound(config.port.clone())
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(config.port.clone())
            }
            _ => TransportError::ConnectionFailed(e.to_string()),
        })?;

    let writer = reader
        .try_clone()
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    Ok((reader, writer))
}

fn join_error(e: tokio::task::JoinError) -> TransportError {
    TransportError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[async_trait]
impl TransportTrait for SerialTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let config = self.config();
        let (reader, writer) = open_handles(&config)?;

        *self.reader.lock() = Some(reader);
        *self.writer.lock() = Some(writer);
        *self.connected_at.write() = Some(Instant::now());
        *self.stats.write() = TransportStats::default();

        tracing::info!("Opened {} @ {} baud", config.port, config.baud_rate);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        *self.writer.lock() = None;
        // The reader lock may be held by an in-flight read for up to one timeout.
        let reader = Arc::clone(&self.reader);
        tokio::task::spawn_blocking(move || {
            *reader.lock() = None;
        })
        .await
        .map_err(join_error)?;
        *self.connected_at.write() = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.lock().is_some()
    }

    async fn send(&self, data: &[u8]) -> Result<usize, TransportError> {
        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();

        let result = tokio::task::spawn_blocking(move || {
            let mut guard = writer.lock();
            let port = guard.as_mut().ok_or(TransportError::Disconnected)?;
            port.write_all(&data)?;
            port.flush()?;
            Ok::<usize, TransportError>(data.len())
        })
        .await
        .map_err(join_error)?;

        let mut stats = self.stats.write();
        match result {
            Ok(written) => {
                stats.bytes_sent += written as u64;
                stats.packets_sent += 1;
                Ok(written)
            }
            Err(e) => {
                stats.errors += 1;
                Err(e)
            }
        }
    }

    async fn receive(&self) -> Result<Bytes, TransportError> {
        let reader = Arc::clone(&self.reader);

        let result = tokio::task::spawn_blocking(move || {
            let mut guard = reader.lock();
            let port = guard.as_mut().ok_or(TransportError::Disconnected)?;

            let mut buffer = vec![0u8; READ_CHUNK];
            match port.read(&mut buffer) {
                Ok(n) => {
                    buffer.truncate(n);
                    Ok(Bytes::from(buffer))
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Bytes::new()),
                Err(e) => Err(TransportError::IoError(e)),
            }
        })
        .await
        .map_err(join_error)?;

        let mut stats = self.stats.write();
        match result {
            Ok(bytes) => {
                if !bytes.is_empty() {
                    stats.bytes_received += bytes.len() as u64;
                    stats.packets_received += 1;
                }
                Ok(bytes)
            }
            Err(e) => {
                stats.errors += 1;
                Err(e)
            }
        }
    }

    async fn set_baud_rate(&self, baud_rate: u32) -> Result<(), TransportError> {
        {
            let mut guard = self.writer.lock();
            let port = guard.as_mut().ok_or(TransportError::NotConnected)?;
            // Both handles share the device, so the reader picks this up too.
            port.set_baud_rate(baud_rate)
                .map_err(|e| TransportError::InvalidConfiguration(e.to_string()))?;
        }
        self.config.write().baud_rate = baud_rate;
        Ok(())
    }

    async fn set_port(&self, port: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut config = self.config();
        config.port = port.to_string();
        // Open the new device first so a failure leaves the old session intact.
        let (reader, writer) = open_handles(&config)?;

        *self.writer.lock() = Some(writer);
        let reader_slot = Arc::clone(&self.reader);
        tokio::task::spawn_blocking(move || {
            *reader_slot.lock() = Some(reader);
        })
        .await
        .map_err(join_error)?;

        *self.config.write() = config;
        *self.connected_at.write() = Some(Instant::now());
        Ok(())
    }

    fn connection_info(&self) -> String {
        let config = self.config.read();
        format!("{} @ {} baud", config.port, config.baud_rate)
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if let Some(connected_at) = *self.connected_at.read() {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}
