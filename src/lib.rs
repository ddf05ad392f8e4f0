//! # Serialwatch Core Library
//!
//! A line-oriented serial monitor with pattern rules:
//! - Reads a serial endpoint line by line in a background task
//! - Flags lines containing any watched pattern
//! - Fires conditions: send a reply command or raise an event
//! - Sends commands and plays scripts with `delay` directives
//! - Exports the received traces to a text file
//!
//! ## Example
//!
//! ```rust,no_run
//! use serialwatch_core::{ActionKind, Engine, EngineConfig, EngineEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::open_serial(EngineConfig::new("/dev/ttyUSB0", 115200)).await?;
//!     engine.add_pattern("ERROR");
//!     engine.add_condition(1, "Press any key", " ", ActionKind::Command);
//!
//!     let mut rx = engine.subscribe();
//!     engine.run()?;
//!     engine.send_command("version").await?;
//!
//!     while let Ok(event) = rx.recv().await {
//!         if let EngineEvent::LineReceived { text, matched } = event {
//!             println!("{} {}", if matched { '*' } else { ' ' }, text);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::dispatcher::{CommandDispatcher, LineEnding};
pub use crate::core::engine::{Engine, EngineConfig, EngineError, EngineEvent, Submission};
pub use crate::core::history::{HistoryEntry, LineHistory};
pub use crate::core::matcher::{evaluate, Evaluation, FiredAction, MatchResult};
pub use crate::core::reader::{LineFramer, LineReader, ReadOutcome};
pub use crate::core::rules::{ActionKind, Condition, ConditionId, RuleTable};
pub use crate::core::script::{PlaybackReport, ScriptError, ScriptPlayer};
pub use crate::core::session::{ConfigChange, EngineState, TransportSession};
pub use crate::core::transport::{
    list_ports, MemoryPeer, MemoryTransport, SerialConfig, SerialTransport, TransportError,
    TransportStats, TransportTrait,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
