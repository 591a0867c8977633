//! CLI Exit Codes
//!
//! Exit codes for CI pipelines driving the bench.

use crate::config::ConfigError;
use crate::core::registry::LoadError;
use crate::core::script::ParseError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Test passed or command succeeded
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// A line could not be opened
    pub const CONNECTION_FAILED: u8 = 3;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Script failed to parse
    pub const SCRIPT_ERROR: u8 = 15;

    /// Test ran and failed
    pub const TEST_FAILED: u8 = 18;

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

    /// Success with a closing message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Invalid command-line arguments
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::INVALID_ARGS, msg.into())
    }

    /// Missing input file
    pub fn file_not_found(path: &str) -> Self {
        Self::Error(ExitCodes::FILE_NOT_FOUND, format!("File not found: {path}"))
    }

    /// Test ran to the end and failed
    pub fn test_failed(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::TEST_FAILED, msg.into())
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

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
            _ => ExitCodes::ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<ParseError> for CliResult {
    fn from(err: ParseError) -> Self {
        Self::Error(ExitCodes::SCRIPT_ERROR, err.to_string())
    }
}

impl From<TransportError> for CliResult {
    fn from(err: TransportError) -> Self {
        let code = match err {
            TransportError::OpenFailed { .. } => ExitCodes::CONNECTION_FAILED,
            _ => ExitCodes::ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<LoadError> for CliResult {
    fn from(err: LoadError) -> Self {
        let code = match &err {
            LoadError::UnknownTest(_) => ExitCodes::INVALID_ARGS,
            LoadError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ExitCodes::FILE_NOT_FOUND
            }
            LoadError::Io { .. } => ExitCodes::ERROR,
            LoadError::Parse { .. } => ExitCodes::SCRIPT_ERROR,
        };
        Self::Error(code, err.to_string())
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
        8 => "Configuration error",
        15 => "Script error",
        18 => "Test failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 6, 8, 15, 18, 127] {
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
        assert_eq!(success.message(), None);

        let failed = CliResult::test_failed("SampleTest failed");
        assert!(!failed.is_success());
        assert_eq!(failed.code(), 18);
        assert_eq!(failed.message(), Some("SampleTest failed"));
    }

    #[test]
    fn test_from_io_error() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        assert_eq!(CliResult::from(err).code(), ExitCodes::FILE_NOT_FOUND);
    }

    #[test]
    fn test_from_domain_errors() {
        let parse = ParseError::UnknownCommand {
            line_no: 3,
            command: "frob".to_string(),
        };
        assert_eq!(CliResult::from(parse).code(), ExitCodes::SCRIPT_ERROR);

        let open = TransportError::OpenFailed {
            port: "/dev/ttyS9".to_string(),
            reason: "no such device".to_string(),
        };
        assert_eq!(CliResult::from(open).code(), ExitCodes::CONNECTION_FAILED);

        let unknown = LoadError::UnknownTest("Nope".to_string());
        assert_eq!(CliResult::from(unknown).code(), ExitCodes::INVALID_ARGS);

        let missing = LoadError::Io {
            path: PathBuf::from("tests"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(CliResult::from(missing).code(), ExitCodes::FILE_NOT_FOUND);
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(exit_code_description(18), "Test failed");
        assert_eq!(exit_code_description(42), "Unknown error");
    }
}
