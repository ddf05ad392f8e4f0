//! Transport session record and engine lifecycle states

use serde::Serialize;
use std::fmt;

/// Engine lifecycle.
///
/// `Closed -> Open -> Running -> Stopping -> Closed`; a failed open lands in
/// `Failed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// Transport not open
    Closed,
    /// Transport open, reader not started
    Open,
    /// Reader loop running
    Running,
    /// Stop requested, waiting for the reader to exit
    Stopping,
    /// Transport could not be opened
    Failed,
}

impl EngineState {
    /// True while the transport is usable
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open | Self::Running)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a port or baud change request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    /// New value applied
    Changed,
    /// Requested value equals the current one
    Unchanged,
}

impl ConfigChange {
    /// True if something was applied
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed)
    }
}

/// Endpoint, speed and state of the monitored connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportSession {
    /// Endpoint name (e.g., /dev/ttyUSB0)
    pub endpoint: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Lifecycle state
    pub state: EngineState,
}

impl TransportSession {
    /// New closed session
    pub fn new(endpoint: &str, baud_rate: u32) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            baud_rate,
            state: EngineState::Closed,
        }
    }

    /// Status line for the embedding UI
    pub fn status_line(&self) -> String {
        if self.state.is_open() {
            format!("Connected to {} ; Baudrate {}", self.endpoint, self.baud_rate)
        } else {
            format!("{} ({}) ; Baudrate {}", self.endpoint, self.state, self.baud_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        let mut session = TransportSession::new("/dev/ttyUSB0", 115_200);
        assert_eq!(session.status_line(), "/dev/ttyUSB0 (closed) ; Baudrate 115200");

        session.state = EngineState::Running;
        assert_eq!(session.status_line(), "Connected to /dev/ttyUSB0 ; Baudrate 115200");
    }

    #[test]
    fn test_open_states() {
        assert!(EngineState::Open.is_open());
        assert!(EngineState::Running.is_open());
        assert!(!EngineState::Stopping.is_open());
        assert!(!EngineState::Failed.is_open());
    }
}
