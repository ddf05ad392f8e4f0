//! Script playback
//!
//! A script is a list of entries, one per line. `delay <n>` pauses the
//! calling task for `n` delay units (seconds by default); blank lines are
//! skipped; anything else is sent verbatim as a command.
//!
//! ```text
//! reset
//! delay 2
//! version
//! ```

use super::dispatcher::CommandDispatcher;
use super::transport::TransportError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Keyword that introduces a pause
pub const DELAY_DIRECTIVE: &str = "delay";

/// Extensions that mark submitted text as a script path
pub const SCRIPT_EXTENSIONS: &[&str] = &["txt", "sh"];

/// Script errors
#[derive(Error, Debug)]
pub enum ScriptError {
    /// Script file could not be opened or read
    #[error("Can't read script {path}: {source}")]
    File {
        /// Script path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// `delay` followed by something other than a non-negative integer
    #[error("Malformed delay argument: {argument:?}")]
    MalformedDelay {
        /// Text after the directive
        argument: String,
    },

    /// The command could not be written
    #[error("Failed to send {command:?}: {source}")]
    Dispatch {
        /// Command text
        command: String,
        /// Underlying transport error
        #[source]
        source: TransportError,
    },
}

/// One parsed script line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEntry {
    /// Pause for this many delay units
    Delay(u64),
    /// Command to dispatch
    Command(String),
}

/// Parse one raw entry. Blank entries yield `Ok(None)`.
pub fn parse_entry(raw: &str) -> Result<Option<ScriptEntry>, ScriptError> {
    let entry = raw.trim_end_matches(['\r', '\n']);
    if entry.trim().is_empty() {
        return Ok(None);
    }

    let (head, rest) = match entry.split_once(' ') {
        Some((head, rest)) => (head, Some(rest)),
        None => (entry, None),
    };

    if head != DELAY_DIRECTIVE {
        return Ok(Some(ScriptEntry::Command(entry.to_string())));
    }

    let argument = rest.unwrap_or_default().trim();
    argument
        .parse::<u64>()
        .map(|units| Some(ScriptEntry::Delay(units)))
        .map_err(|_| ScriptError::MalformedDelay {
            argument: argument.to_string(),
        })
}

/// True if submitted text names a script file rather than a command
pub fn is_script_path(text: &str) -> bool {
    Path::new(text.trim())
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext))
}

/// An entry that did not play
#[derive(Debug)]
pub struct EntryFailure {
    /// 1-based position in the script
    pub line: usize,
    /// Raw entry text
    pub entry: String,
    /// Why it failed
    pub error: ScriptError,
}

/// Outcome of one playback
#[derive(Debug, Default)]
pub struct PlaybackReport {
    /// Commands written, in order
    pub sent: Vec<String>,
    /// Total delay units waited
    pub delayed_units: u64,
    /// Entries that failed; later entries still played
    pub failures: Vec<EntryFailure>,
}

impl PlaybackReport {
    /// True if every entry played
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Plays scripts through a dispatcher
#[derive(Clone)]
pub struct ScriptPlayer {
    dispatcher: CommandDispatcher,
    delay_unit: Duration,
}

impl ScriptPlayer {
    /// Create a player with one-second delay units
    pub fn new(dispatcher: CommandDispatcher) -> Self {
        Self {
            dispatcher,
            delay_unit: Duration::from_secs(1),
        }
    }

    /// Set the length of one delay unit
    #[must_use]
    pub fn delay_unit(mut self, unit: Duration) -> Self {
        self.delay_unit = unit;
        self
    }

    /// Play entries in order, pausing only the calling task on delays
    pub async fn play<I, S>(&self, lines: I) -> PlaybackReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = PlaybackReport::default();

        for (index, raw) in lines.into_iter().enumerate() {
            let raw = raw.as_ref();
            let line = index + 1;

            let outcome = match parse_entry(raw) {
                Ok(None) => Ok(()),
                Ok(Some(ScriptEntry::Delay(units))) => {
                    if units > 0 {
                        tracing::debug!("Script delay {} unit(s)", units);
                        tokio::time::sleep(self.delay_unit.saturating_mul(units_u32(units))).await;
                    }
                    report.delayed_units += units;
                    Ok(())
                }
                Ok(Some(ScriptEntry::Command(command))) => {
                    match self.dispatcher.send(&command).await {
                        Ok(_) => {
                            report.sent.push(command);
                            Ok(())
                        }
                        Err(source) => Err(ScriptError::Dispatch { command, source }),
                    }
                }
                Err(e) => Err(e),
            };

            if let Err(error) = outcome {
                tracing::warn!("Script line {}: {}", line, error);
                report.failures.push(EntryFailure {
                    line,
                    entry: raw.to_string(),
                    error,
                });
            }
        }

        report
    }

    /// Read a script file and play it
    pub async fn play_file(&self, path: impl AsRef<Path>) -> Result<PlaybackReport, ScriptError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ScriptError::File {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::info!("Playing script {}", path.display());
        Ok(self.play(content.lines()).await)
    }
}

fn units_u32(units: u64) -> u32 {
    u32::try_from(units).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{MemoryPeer, MemoryTransport, TransportTrait};
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_parse_entries() {
        assert_eq!(parse_entry("delay 2").unwrap(), Some(ScriptEntry::Delay(2)));
        assert_eq!(parse_entry("delay 0\n").unwrap(), Some(ScriptEntry::Delay(0)));
        assert_eq!(
            parse_entry("PING").unwrap(),
            Some(ScriptEntry::Command("PING".to_string()))
        );
        assert_eq!(
            parse_entry("delayed start").unwrap(),
            Some(ScriptEntry::Command("delayed start".to_string()))
        );
        assert_eq!(parse_entry("   ").unwrap(), None);
        assert_eq!(parse_entry("\r\n").unwrap(), None);
    }

    #[test]
    fn test_malformed_delay() {
        for raw in ["delay abc", "delay -1", "delay", "delay 1.5"] {
            assert!(
                matches!(parse_entry(raw), Err(ScriptError::MalformedDelay { .. })),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_script_path_detection() {
        assert!(is_script_path("boot.txt"));
        assert!(is_script_path("/tmp/flash.sh"));
        assert!(!is_script_path("fw.bin"));
        assert!(!is_script_path("AT+CSQ"));
        assert!(!is_script_path("set ip 10.0.0.1"));
    }

    async fn player(unit: Duration) -> (ScriptPlayer, MemoryPeer) {
        let (transport, peer) = MemoryTransport::pair("loop0", 115_200);
        transport.connect().await.unwrap();
        let dispatcher = CommandDispatcher::new(Arc::new(transport));
        (ScriptPlayer::new(dispatcher).delay_unit(unit), peer)
    }

    #[tokio::test]
    async fn test_delays_and_order() {
        let (player, peer) = player(Duration::from_millis(20)).await;

        let started = Instant::now();
        let report = player.play(["delay 2", "PING", "delay 0", "PONG"]).await;

        assert!(started.elapsed() >= Duration::from_millis(40));
        assert!(report.is_clean());
        assert_eq!(report.delayed_units, 2);
        assert_eq!(peer.written_text(), vec!["PING\r".to_string(), "PONG\r".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_delay_does_not_abort() {
        let (player, peer) = player(Duration::from_millis(1)).await;

        let report = player.play(["first", "delay soon", "second"]).await;

        assert_eq!(report.sent, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].line, 2);
        assert_eq!(peer.written().len(), 2);
    }

    #[tokio::test]
    async fn test_write_failures_are_reported_per_entry() {
        let (player, peer) = player(Duration::from_millis(1)).await;
        peer.set_fail_writes(true);

        let report = player.play(["a", "b"]).await;
        assert!(report.sent.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(report.failures[0].error, ScriptError::Dispatch { .. }));
    }

    #[tokio::test]
    async fn test_play_file() {
        let (player, peer) = player(Duration::from_millis(1)).await;

        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file, "reset").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "delay 1").unwrap();
        writeln!(file, "version").unwrap();

        let report = player.play_file(file.path()).await.unwrap();
        assert_eq!(report.sent, vec!["reset".to_string(), "version".to_string()]);
        assert_eq!(peer.written_text(), vec!["reset\r".to_string(), "version\r".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let (player, peer) = player(Duration::from_millis(1)).await;
        let result = player.play_file("/nonexistent/serialwatch/boot.txt").await;
        assert!(matches!(result, Err(ScriptError::File { .. })));
        assert!(peer.written().is_empty());
    }
}
