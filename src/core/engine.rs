//! Monitor engine
//!
//! Owns the transport session, the rule table and the reader task. An
//! [`Engine`] is a cheap, cloneable handle; every clone drives the same
//! session, so configuration, dispatch and playback may run from any task
//! while the reader loop keeps polling.
//!
//! ```rust,no_run
//! use serialwatch_core::{ActionKind, Engine, EngineConfig, EngineEvent};
//!
//! # async fn demo() -> Result<(), serialwatch_core::EngineError> {
//! let engine = Engine::open_serial(EngineConfig::new("/dev/ttyUSB0", 115_200)).await?;
//! engine.add_pattern("panic");
//! engine.add_condition(1, "login:", "root", ActionKind::Command);
//!
//! let mut events = engine.subscribe();
//! engine.run()?;
//! while let Ok(event) = events.recv().await {
//!     if let EngineEvent::LineReceived { text, matched } = event {
//!         println!("{} {}", if matched { '*' } else { ' ' }, text);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use super::dispatcher::{CommandDispatcher, LineEnding};
use super::history::{HistoryEntry, LineHistory};
use super::matcher::{self, MatchResult};
use super::reader::{LineReader, ReadOutcome};
use super::rules::{ActionKind, Condition, ConditionId, RuleTable};
use super::script::{self, PlaybackReport, ScriptError, ScriptPlayer};
use super::session::{ConfigChange, EngineState, TransportSession};
use super::transport::{SerialConfig, SerialTransport, TransportError, TransportStats, TransportTrait};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    /// The transport could not be opened; the engine is `Failed`
    #[error("Can't open port {port}: {source}")]
    Open {
        /// Endpoint name
        port: String,
        /// Underlying transport error
        #[source]
        source: TransportError,
    },

    /// Operation not allowed in the current state
    #[error("Engine is {state}, operation requires {required}")]
    InvalidState {
        /// Current state
        state: EngineState,
        /// What the operation needed
        required: &'static str,
    },

    /// Baud rate must be positive
    #[error("Invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    /// Transport failure on an explicit write or reconfiguration
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Script file failure
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Trace export failure
    #[error("Failed to save traces: {0}")]
    Io(#[from] std::io::Error),
}

/// Notifications for the embedding application, in line-arrival order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A line was read and evaluated
    LineReceived {
        /// Line text without terminator
        text: String,
        /// Match verdict
        matched: bool,
    },
    /// An event-kind condition fired
    PatternDetected {
        /// Condition that fired
        condition_id: ConditionId,
        /// Action payload
        payload: String,
    },
    /// Submitted input was handled; the input field can be cleared
    CommandAreaShouldClear,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Endpoint name
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Transport read timeout; also the stop latency bound
    pub read_timeout: Duration,
    /// Terminator for dispatched commands
    pub line_ending: LineEnding,
    /// Lines retained for trace export
    pub history_limit: usize,
    /// Surface unterminated input after an idle read
    pub flush_partial_lines: bool,
    /// Length of one `delay` unit in scripts
    pub delay_unit: Duration,
    /// Notification channel capacity.
    ///
    /// A subscriber that falls this many notifications behind misses the
    /// oldest ones and sees `RecvError::Lagged` instead.
    pub event_capacity: usize,
    /// Initial rules
    pub rules: RuleTable,
    /// Initial stored command list
    pub commands: Vec<String>,
}

impl EngineConfig {
    /// Configuration with defaults for everything but the endpoint
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            read_timeout: Duration::from_secs(1),
            line_ending: LineEnding::Cr,
            history_limit: 10_000,
            flush_partial_lines: true,
            delay_unit: Duration::from_secs(1),
            event_capacity: 1024,
            rules: RuleTable::new(),
            commands: Vec::new(),
        }
    }

    /// Serial settings derived from this configuration
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig::new(&self.port, self.baud_rate).read_timeout(self.read_timeout)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 115_200)
    }
}

/// What [`Engine::submit`] did with its input
#[derive(Debug)]
pub enum Submission {
    /// Input was empty
    Ignored,
    /// Input was sent as one command
    Command,
    /// Input named a script file, which was played
    Script(PlaybackReport),
}

struct Inner {
    config: EngineConfig,
    session: RwLock<TransportSession>,
    transport: Arc<dyn TransportTrait>,
    rules: RwLock<RuleTable>,
    commands: RwLock<Vec<String>>,
    history: RwLock<LineHistory>,
    dispatcher: CommandDispatcher,
    player: ScriptPlayer,
    events: broadcast::Sender<EngineEvent>,
    cancel: Mutex<CancellationToken>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a monitor engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Create a closed engine over a transport
    pub fn new(config: EngineConfig, transport: Box<dyn TransportTrait>) -> Self {
        let transport: Arc<dyn TransportTrait> = Arc::from(transport);
        let dispatcher = CommandDispatcher::new(Arc::clone(&transport)).line_ending(config.line_ending);
        let player = ScriptPlayer::new(dispatcher.clone()).delay_unit(config.delay_unit);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let inner = Inner {
            session: RwLock::new(TransportSession::new(&config.port, config.baud_rate)),
            rules: RwLock::new(config.rules.clone()),
            commands: RwLock::new(config.commands.clone()),
            history: RwLock::new(LineHistory::new(config.history_limit)),
            transport,
            dispatcher,
            player,
            events,
            cancel: Mutex::new(CancellationToken::new()),
            reader_task: Mutex::new(None),
            config,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Create and open an engine on a serial port
    pub async fn open_serial(config: EngineConfig) -> Result<Self, EngineError> {
        let transport = SerialTransport::new(config.serial_config());
        let engine = Self::new(config, Box::new(transport));
        engine.open().await?;
        Ok(engine)
    }

    /// Open the transport: `Closed -> Open`, or `Failed` on error
    pub async fn open(&self) -> Result<(), EngineError> {
        self.expect_state(&[EngineState::Closed], "closed")?;

        match self.inner.transport.connect().await {
            Ok(()) => {
                self.set_state(EngineState::Open);
                tracing::info!("Session open: {}", self.inner.transport.connection_info());
                Ok(())
            }
            Err(source) => {
                self.set_state(EngineState::Failed);
                let port = self.port_name();
                tracing::error!("Can't open port {}: {}", port, source);
                Err(EngineError::Open { port, source })
            }
        }
    }

    /// Start the reader loop: `Open -> Running`.
    ///
    /// Each run gets its own stop token, so an engine reopened after
    /// [`Engine::stop`] reads again.
    pub fn run(&self) -> Result<(), EngineError> {
        self.expect_state(&[EngineState::Open], "open")?;

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock() = cancel.clone();

        let reader = LineReader::new(Arc::clone(&self.inner.transport))
            .flush_partial(self.inner.config.flush_partial_lines);
        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.read_loop(reader, cancel).await });

        *self.inner.reader_task.lock() = Some(handle);
        self.set_state(EngineState::Running);
        Ok(())
    }

    /// Stop the reader and close the transport: `-> Stopping -> Closed`.
    ///
    /// Returns within about one read timeout. Calling it on a closed or
    /// failed engine does nothing.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let state = self.state();
        if !state.is_open() {
            return Ok(());
        }

        self.set_state(EngineState::Stopping);
        self.inner.cancel.lock().cancel();

        let handle = self.inner.reader_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Reader task ended abnormally: {}", e);
            }
        }

        let closed = self.inner.transport.disconnect().await;
        self.set_state(EngineState::Closed);
        tracing::info!("Session closed");
        closed.map_err(EngineError::from)
    }

    async fn read_loop(self, mut reader: LineReader, cancel: CancellationToken) {
        let backoff = self.inner.config.read_timeout;
        tracing::debug!("Reader loop started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match reader.poll().await {
                ReadOutcome::Line(line) => {
                    self.process_line(line).await;
                }
                ReadOutcome::Idle | ReadOutcome::Dropped => {}
                ReadOutcome::Fault(_) => {
                    // An immediately failing read would otherwise spin.
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        tracing::debug!("Reader loop stopped");
    }

    /// Evaluate one line, carry out its actions and publish it.
    ///
    /// The reader loop calls this for every line; it is public so an
    /// embedding application can also feed lines it obtained elsewhere.
    pub async fn process_line(&self, line: String) -> MatchResult {
        let evaluation = {
            let rules = self.inner.rules.read();
            matcher::evaluate(&rules, &line)
        };

        for action in evaluation.actions {
            match action.kind {
                ActionKind::Event => {
                    tracing::debug!("Condition {} raised event {:?}", action.condition_id, action.payload);
                    let _ = self.inner.events.send(EngineEvent::PatternDetected {
                        condition_id: action.condition_id,
                        payload: action.payload,
                    });
                }
                ActionKind::Command => {
                    tracing::debug!("Condition {} sends {:?}", action.condition_id, action.payload);
                    if let Err(e) = self.inner.dispatcher.send(&action.payload).await {
                        tracing::warn!(
                            "Condition {} failed to send {:?}: {}",
                            action.condition_id,
                            action.payload,
                            e
                        );
                    }
                }
            }
        }

        let matched = evaluation.result.matched;
        self.inner.history.write().push(&line, matched);
        let _ = self.inner.events.send(EngineEvent::LineReceived { text: line, matched });
        evaluation.result
    }

    /// Subscribe to notifications.
    ///
    /// Each receiver gets every notification sent after it subscribed, as
    /// long as it keeps within [`EngineConfig::event_capacity`] of the
    /// sender. A receiver that lags loses the oldest pending notifications,
    /// `LineReceived` included; `recv` reports how many with
    /// `RecvError::Lagged`. Use [`Engine::history`] for a lossless record.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    // Rule table

    /// Add a pattern; empty text and duplicates are ignored
    pub fn add_pattern(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        self.inner.rules.write().add_pattern(text)
    }

    /// Replace every pattern
    pub fn set_patterns<I, S>(&self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.is_empty())
            .collect();
        self.inner.rules.write().set_patterns(patterns);
    }

    /// Remove every pattern
    pub fn clear_patterns(&self) {
        self.inner.rules.write().clear_patterns();
    }

    /// Patterns in insertion order
    pub fn patterns(&self) -> Vec<String> {
        self.inner.rules.read().patterns()
    }

    /// Insert or replace a condition, returning the replaced one
    pub fn add_condition(
        &self,
        id: ConditionId,
        pattern: &str,
        action: &str,
        kind: ActionKind,
    ) -> Option<Condition> {
        self.inner
            .rules
            .write()
            .add_condition(id, Condition::new(pattern, action, kind))
    }

    /// Remove a condition; absent ids are ignored
    pub fn remove_condition(&self, id: ConditionId) -> Option<Condition> {
        self.inner.rules.write().remove_condition(id)
    }

    /// Remove every condition
    pub fn clear_conditions(&self) {
        self.inner.rules.write().clear_conditions();
    }

    /// Look up one condition
    pub fn condition(&self, id: ConditionId) -> Option<Condition> {
        self.inner.rules.read().condition(id)
    }

    /// All conditions, ascending by id
    pub fn conditions(&self) -> Vec<(ConditionId, Condition)> {
        self.inner.rules.read().conditions()
    }

    /// Snapshot of the whole rule table
    pub fn rules(&self) -> RuleTable {
        self.inner.rules.read().clone()
    }

    // Commands and scripts

    /// Write one command
    pub async fn send_command(&self, command: &str) -> Result<(), EngineError> {
        self.expect_open()?;
        self.inner.dispatcher.send(command).await?;
        Ok(())
    }

    /// Play script entries; pauses only the calling task
    pub async fn play_script<I, S>(&self, lines: I) -> Result<PlaybackReport, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.expect_open()?;
        Ok(self.inner.player.play(lines).await)
    }

    /// Read and play a script file
    pub async fn play_script_file(&self, path: impl AsRef<Path>) -> Result<PlaybackReport, EngineError> {
        self.expect_open()?;
        Ok(self.inner.player.play_file(path).await?)
    }

    /// Handle text typed by the user.
    ///
    /// Empty input is ignored. A path ending in `.txt` or `.sh` is played as
    /// a script file; anything else is sent as one command. On success the
    /// command area is told to clear.
    pub async fn submit(&self, text: &str) -> Result<Submission, EngineError> {
        if text.trim().is_empty() {
            return Ok(Submission::Ignored);
        }

        let submission = if script::is_script_path(text) {
            Submission::Script(self.play_script_file(text.trim()).await?)
        } else {
            self.send_command(text).await?;
            Submission::Command
        };

        let _ = self.inner.events.send(EngineEvent::CommandAreaShouldClear);
        Ok(submission)
    }

    /// Replace the stored command list
    pub fn set_commands<I, S>(&self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.inner.commands.write() = commands
            .into_iter()
            .map(Into::into)
            .filter(|c: &String| !c.is_empty())
            .collect();
    }

    /// Append to the stored command list
    pub fn add_command(&self, command: &str) {
        if !command.is_empty() {
            self.inner.commands.write().push(command.to_string());
        }
    }

    /// Empty the stored command list
    pub fn clear_commands(&self) {
        self.inner.commands.write().clear();
    }

    /// Stored command list
    pub fn commands(&self) -> Vec<String> {
        self.inner.commands.read().clone()
    }

    /// Play the stored command list as a script, then empty it
    pub async fn send_stored_commands(&self) -> Result<PlaybackReport, EngineError> {
        self.expect_open()?;
        let commands = std::mem::take(&mut *self.inner.commands.write());
        Ok(self.inner.player.play(commands).await)
    }

    // Session

    /// Change the baud rate of the live session
    pub async fn change_baudrate(&self, baud_rate: u32) -> Result<ConfigChange, EngineError> {
        if baud_rate == 0 {
            return Err(EngineError::InvalidBaudRate(baud_rate));
        }
        if self.baud_rate() == baud_rate {
            return Ok(ConfigChange::Unchanged);
        }
        self.expect_open()?;

        self.inner.transport.set_baud_rate(baud_rate).await?;
        self.inner.session.write().baud_rate = baud_rate;
        tracing::info!("Baud rate changed to {}", baud_rate);
        Ok(ConfigChange::Changed)
    }

    /// Move the live session to another port
    pub async fn change_port(&self, port: &str) -> Result<ConfigChange, EngineError> {
        if self.port_name() == port {
            return Ok(ConfigChange::Unchanged);
        }
        self.expect_open()?;

        self.inner.transport.set_port(port).await?;
        self.inner.session.write().endpoint = port.to_string();
        tracing::info!("Port changed to {}", port);
        Ok(ConfigChange::Changed)
    }

    /// Endpoint name
    pub fn port_name(&self) -> String {
        self.inner.session.read().endpoint.clone()
    }

    /// Baud rate
    pub fn baud_rate(&self) -> u32 {
        self.inner.session.read().baud_rate
    }

    /// Lifecycle state
    pub fn state(&self) -> EngineState {
        self.inner.session.read().state
    }

    /// Snapshot of the session record
    pub fn session(&self) -> TransportSession {
        self.inner.session.read().clone()
    }

    /// Transport description
    pub fn connection_info(&self) -> String {
        self.inner.transport.connection_info()
    }

    /// Transport counters
    pub fn stats(&self) -> TransportStats {
        self.inner.transport.stats()
    }

    // History

    /// Retained lines, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.history.read().entries()
    }

    /// Forget retained lines
    pub fn clear_history(&self) {
        self.inner.history.write().clear();
    }

    /// Write retained lines to a text file
    pub fn save_traces(&self, path: impl AsRef<Path>, show_timestamp: bool) -> Result<(), EngineError> {
        self.inner.history.read().save(path.as_ref(), show_timestamp)?;
        Ok(())
    }

    fn set_state(&self, state: EngineState) {
        self.inner.session.write().state = state;
    }

    fn expect_state(&self, allowed: &[EngineState], required: &'static str) -> Result<(), EngineError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(EngineError::InvalidState { state, required })
        }
    }

    fn expect_open(&self) -> Result<(), EngineError> {
        self.expect_state(&[EngineState::Open, EngineState::Running], "an open session")
    }
}
