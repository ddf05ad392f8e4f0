//! CLI Module
//!
//! Provides command-line interface support including:
//! - Exit codes for automation
//! - Output format selection
//! - Logging initialization

pub mod exit_codes;
pub mod logging;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use logging::{init_logging, level_for, LogOptions};

/// Output format for CLI listings and monitor events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}
