//! Command dispatcher
//!
//! Frames a command with the configured line ending and writes it in one call.

use super::transport::{TransportError, TransportTrait};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Line ending appended to outgoing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// CR only
    #[default]
    Cr,
    /// LF only
    Lf,
    /// CR+LF
    Crlf,
}

impl LineEnding {
    /// Terminator text
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cr => "\r",
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
        }
    }
}

impl FromStr for LineEnding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cr" => Ok(Self::Cr),
            "lf" => Ok(Self::Lf),
            "crlf" => Ok(Self::Crlf),
            other => Err(format!("unknown line ending: {other} (expected cr, lf or crlf)")),
        }
    }
}

/// Encode a command for the wire.
///
/// Any trailing CR/LF already on the command is replaced by `ending`, so a
/// line read from a script file is not sent with a doubled terminator.
pub fn frame_command(command: &str, ending: LineEnding) -> Vec<u8> {
    let body = command.trim_end_matches(['\r', '\n']);
    let mut frame = Vec::with_capacity(body.len() + 2);
    frame.extend_from_slice(body.as_bytes());
    frame.extend_from_slice(ending.as_str().as_bytes());
    frame
}

/// Writes single commands to the shared transport
#[derive(Clone)]
pub struct CommandDispatcher {
    transport: Arc<dyn TransportTrait>,
    line_ending: LineEnding,
}

impl CommandDispatcher {
    /// Create a dispatcher using CR termination
    pub fn new(transport: Arc<dyn TransportTrait>) -> Self {
        Self {
            transport,
            line_ending: LineEnding::Cr,
        }
    }

    /// Set line ending
    #[must_use]
    pub fn line_ending(mut self, ending: LineEnding) -> Self {
        self.line_ending = ending;
        self
    }

    /// Frame and write one command. Failures are returned, never retried.
    pub async fn send(&self, command: &str) -> Result<usize, TransportError> {
        let frame = frame_command(command, self.line_ending);
        tracing::debug!("TX {:?}", String::from_utf8_lossy(&frame));
        self.transport.send(&frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::MockTransportTrait;

    #[test]
    fn test_frame_appends_cr_once() {
        assert_eq!(frame_command("AT", LineEnding::Cr), b"AT\r");
        assert_eq!(frame_command("AT\r", LineEnding::Cr), b"AT\r");
        assert_eq!(frame_command("AT\n", LineEnding::Cr), b"AT\r");
        assert_eq!(frame_command("AT\r\n", LineEnding::Crlf), b"AT\r\n");
        assert_eq!(frame_command("reset", LineEnding::Lf), b"reset\n");
    }

    #[test]
    fn test_parse_line_ending() {
        assert_eq!("CRLF".parse::<LineEnding>().unwrap(), LineEnding::Crlf);
        assert_eq!("lf".parse::<LineEnding>().unwrap(), LineEnding::Lf);
        assert!("none".parse::<LineEnding>().is_err());
    }

    #[tokio::test]
    async fn test_single_write_with_terminator() {
        let mut mock = MockTransportTrait::new();
        mock.expect_send()
            .withf(|data: &[u8]| data == b"version\r")
            .times(1)
            .returning(|data| Ok(data.len()));

        let dispatcher = CommandDispatcher::new(Arc::new(mock));
        assert_eq!(dispatcher.send("version").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_write_error_is_returned() {
        let mut mock = MockTransportTrait::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Err(TransportError::Disconnected));

        let dispatcher = CommandDispatcher::new(Arc::new(mock));
        assert!(matches!(
            dispatcher.send("reboot").await,
            Err(TransportError::Disconnected)
        ));
    }
}
