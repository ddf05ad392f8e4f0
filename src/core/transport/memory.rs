//! In-memory transport
//!
//! A loopback endpoint for embedding the engine without hardware. The
//! [`MemoryPeer`] half plays the device: it injects inbound bytes or read
//! faults and observes everything the engine wrote or reconfigured.

use super::{TransportError, TransportStats, TransportTrait};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

enum Inbound {
    Data(Bytes),
    Fault(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    port: String,
    baud_rate: u32,
    connected: bool,
    written: Vec<Bytes>,
    reconfigurations: usize,
    fail_connect: bool,
    fail_writes: bool,
    stats: TransportStats,
}

/// Engine-side half of the loopback
pub struct MemoryTransport {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    state: Arc<Mutex<MemoryState>>,
    read_timeout: Duration,
}

/// Device-side half of the loopback
#[derive(Clone)]
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<Inbound>,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    /// Create a connected pair with a 100 ms read timeout
    pub fn pair(port: &str, baud_rate: u32) -> (Self, MemoryPeer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MemoryState {
            port: port.to_string(),
            baud_rate,
            ..MemoryState::default()
        }));

        let transport = Self {
            inbound: tokio::sync::Mutex::new(rx),
            state: Arc::clone(&state),
            read_timeout: Duration::from_millis(100),
        };
        (transport, MemoryPeer { tx, state })
    }

    /// Set read timeout
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

#[async_trait]
impl TransportTrait for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_connect {
            return Err(TransportError::PortNotFound(state.port.clone()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn send(&self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        if state.fail_writes {
            state.stats.errors += 1;
            return Err(TransportError::SendError("write rejected by peer".to_string()));
        }
        state.written.push(Bytes::copy_from_slice(data));
        state.stats.bytes_sent += data.len() as u64;
        state.stats.packets_sent += 1;
        Ok(data.len())
    }

    async fn receive(&self) -> Result<Bytes, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut inbound = self.inbound.lock().await;
        match tokio::time::timeout(self.read_timeout, inbound.recv()).await {
            Ok(Some(Inbound::Data(bytes))) => {
                let mut state = self.state.lock();
                state.stats.bytes_received += bytes.len() as u64;
                state.stats.packets_received += 1;
                Ok(bytes)
            }
            Ok(Some(Inbound::Fault(reason))) => {
                self.state.lock().stats.errors += 1;
                Err(TransportError::ReceiveError(reason))
            }
            Ok(None) => Err(TransportError::Disconnected),
            Err(_) => Ok(Bytes::new()),
        }
    }

    async fn set_baud_rate(&self, baud_rate: u32) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.baud_rate = baud_rate;
        state.reconfigurations += 1;
        Ok(())
    }

    async fn set_port(&self, port: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.port = port.to_string();
        state.reconfigurations += 1;
        Ok(())
    }

    fn connection_info(&self) -> String {
        let state = self.state.lock();
        format!("{} @ {} baud (memory)", state.port, state.baud_rate)
    }

    fn stats(&self) -> TransportStats {
        self.state.lock().stats.clone()
    }
}

impl MemoryPeer {
    /// Push raw bytes toward the engine
    pub fn inject(&self, data: &[u8]) {
        let _ = self.tx.send(Inbound::Data(Bytes::copy_from_slice(data)));
    }

    /// Push one newline-terminated line toward the engine
    pub fn inject_line(&self, line: &str) {
        self.inject(format!("{line}\n").as_bytes());
    }

    /// Make the next read fail
    pub fn inject_read_error(&self, reason: &str) {
        let _ = self.tx.send(Inbound::Fault(reason.to_string()));
    }

    /// Every buffer written by the engine, in order
    pub fn written(&self) -> Vec<Bytes> {
        self.state.lock().written.clone()
    }

    /// Written buffers decoded lossily as text
    pub fn written_text(&self) -> Vec<String> {
        self.state
            .lock()
            .written
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    /// Current endpoint name as seen by the device
    pub fn port(&self) -> String {
        self.state.lock().port.clone()
    }

    /// Current baud rate as seen by the device
    pub fn baud_rate(&self) -> u32 {
        self.state.lock().baud_rate
    }

    /// Number of applied port or baud changes
    pub fn reconfigurations(&self) -> usize {
        self.state.lock().reconfigurations
    }

    /// Whether the engine side is open
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Refuse the next `connect` calls
    pub fn set_fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    /// Refuse writes
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_roundtrip() {
        let (transport, peer) = MemoryTransport::pair("loop0", 9600);
        transport.connect().await.unwrap();

        peer.inject_line("hello");
        let bytes = transport.receive().await.unwrap();
        assert_eq!(&bytes[..], b"hello\n");

        transport.send(b"AT\r").await.unwrap();
        assert_eq!(peer.written_text(), vec!["AT\r".to_string()]);
        assert_eq!(transport.stats().packets_sent, 1);
    }

    #[tokio::test]
    async fn test_timeout_yields_empty_read() {
        let (transport, _peer) = MemoryTransport::pair("loop0", 9600);
        let transport = transport.read_timeout(Duration::from_millis(10));
        transport.connect().await.unwrap();

        let bytes = transport.receive().await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_injected_fault_and_reconfiguration() {
        let (transport, peer) = MemoryTransport::pair("loop0", 9600);
        transport.connect().await.unwrap();

        peer.inject_read_error("framing");
        assert!(matches!(
            transport.receive().await,
            Err(TransportError::ReceiveError(_))
        ));

        transport.set_baud_rate(57_600).await.unwrap();
        transport.set_port("loop1").await.unwrap();
        assert_eq!(peer.baud_rate(), 57_600);
        assert_eq!(peer.port(), "loop1");
        assert_eq!(peer.reconfigurations(), 2);
    }

    #[tokio::test]
    async fn test_refused_connect() {
        let (transport, peer) = MemoryTransport::pair("loop0", 9600);
        peer.set_fail_connect(true);
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::PortNotFound(_))
        ));
        assert!(!peer.is_connected());
    }
}
