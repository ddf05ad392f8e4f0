//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::engine::EngineError;
use crate::core::script::ScriptError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Script error
    pub const SCRIPT_ERROR: u8 = 15;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a final message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Script finished with failed entries
    pub fn script_failed(failures: usize) -> Self {
        Self::Error(
            ExitCodes::SCRIPT_ERROR,
            format!("{} script entr{} failed", failures, if failures == 1 { "y" } else { "ies" }),
        )
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

fn io_code(err: &std::io::Error) -> u8 {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
        ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
        _ => ExitCodes::ERROR,
    }
}

fn transport_code(err: &TransportError) -> u8 {
    match err {
        TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
        TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
        TransportError::InvalidConfiguration(_) => ExitCodes::INVALID_ARGS,
        _ => ExitCodes::CONNECTION_FAILED,
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        Self::Error(io_code(&err), err.to_string())
    }
}

impl From<&EngineError> for CliResult {
    fn from(err: &EngineError) -> Self {
        let code = match err {
            EngineError::Open { source, .. } | EngineError::Transport(source) => transport_code(source),
            EngineError::InvalidState { .. } => ExitCodes::ERROR,
            EngineError::InvalidBaudRate(_) => ExitCodes::INVALID_ARGS,
            EngineError::Script(ScriptError::File { source, .. }) => io_code(source),
            EngineError::Script(_) => ExitCodes::SCRIPT_ERROR,
            EngineError::Io(source) => io_code(source),
        };
        Self::Error(code, err.to_string())
    }
}

impl From<EngineError> for CliResult {
    fn from(err: EngineError) -> Self {
        Self::from(&err)
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        11 => "Operation cancelled",
        14 => "Port not found",
        15 => "Script error",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 6, 7, 8, 11, 14, 15, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));
    }

    #[test]
    fn test_from_io_error() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let result = CliResult::from(err);
        assert_eq!(result.code(), ExitCodes::FILE_NOT_FOUND);
    }

    #[test]
    fn test_from_engine_error() {
        let open = EngineError::Open {
            port: "/dev/ttyUSB9".to_string(),
            source: TransportError::PortNotFound("/dev/ttyUSB9".to_string()),
        };
        assert_eq!(CliResult::from(&open).code(), ExitCodes::PORT_NOT_FOUND);

        let script = EngineError::Script(ScriptError::File {
            path: PathBuf::from("boot.txt"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        });
        assert_eq!(CliResult::from(script).code(), ExitCodes::FILE_NOT_FOUND);

        assert_eq!(
            CliResult::from(EngineError::InvalidBaudRate(0)).code(),
            ExitCodes::INVALID_ARGS
        );
    }

    #[test]
    fn test_script_failed_message() {
        assert_eq!(CliResult::script_failed(1).message(), Some("1 script entry failed"));
        assert_eq!(CliResult::script_failed(3).code(), ExitCodes::SCRIPT_ERROR);
    }
}
