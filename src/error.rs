//! Error types for the buzzer engine.
//!
//! Two families live here:
//!
//! - [`BuzzerError`]: operational failures (transport, I/O, configuration). Only a
//!   failure to acquire the transport at startup is ever surfaced as fatal, and even
//!   then the engine can keep running against the simulated transport.
//! - [`Rejection`]: a command that was understood but not legal in the current
//!   session state. Rejections are ordinary return values, never panics or errors
//!   that tear down the reactor.
//!
//! Protocol framing problems (bad checksum, unknown header, garbled text) are not
//! represented at all: the codec drops the bytes and resynchronizes.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use buzzwire::BuzzerError;
//!
//! let error = BuzzerError::transport_unavailable("/dev/ttyUSB0 not found");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T, E = BuzzerError> = std::result::Result<T, E>;

/// Main error type for engine operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuzzerError {
    #[error("Buzzer hardware unavailable: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error on {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {details}")]
    Config { path: PathBuf, details: String },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Engine is no longer running")]
    EngineStopped,

    #[error("Command rejected: {0}")]
    Rejected(#[from] Rejection),
}

impl BuzzerError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            BuzzerError::Transport { .. } => true,
            BuzzerError::Io { .. } => true,
            BuzzerError::Timeout { .. } => true,
            BuzzerError::Config { .. } => false,
            BuzzerError::Parse { .. } => false,
            BuzzerError::EngineStopped => false,
            BuzzerError::Rejected(_) => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            BuzzerError::Transport { .. } => vec![
                "Check the coordinator is plugged in and powered",
                "Verify the configured serial port path",
                "Check permissions on the serial device (dialout group)",
                "Run with --simulate to continue without hardware",
            ],
            BuzzerError::Io { .. } => vec![
                "Check the serial cable and USB connection",
                "Reconnect the coordinator and restart the engine",
            ],
            BuzzerError::Config { .. } => vec![
                "Check the YAML syntax of the configuration file",
                "Compare the file against the documented configuration keys",
            ],
            BuzzerError::Parse { .. } => vec![
                "Verify the input was captured from a coordinator",
                "Check whether the capture uses the binary or text protocol",
            ],
            BuzzerError::Timeout { .. } => vec![
                "Increase the timeout duration",
                "Verify the coordinator is responding",
            ],
            BuzzerError::EngineStopped => vec![
                "Restart the engine",
                "Check the logs for the reason the reactor exited",
            ],
            BuzzerError::Rejected(_) => vec![
                "Check the current session state before issuing the command",
            ],
        }
    }

    /// Helper constructor for a missing or unusable transport.
    pub fn transport_unavailable(reason: impl Into<String>) -> Self {
        BuzzerError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_unavailable_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        BuzzerError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BuzzerError::Io { context: context.into(), source }
    }

    /// Helper constructor for configuration errors.
    pub fn config(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        BuzzerError::Config { path: path.into(), details: details.into() }
    }

    /// Helper constructor for parse errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        BuzzerError::Parse { context: context.into(), details: details.into() }
    }

    /// The session rejection behind this error, if any.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            BuzzerError::Rejected(rejection) => Some(*rejection),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BuzzerError {
    fn from(err: std::io::Error) -> Self {
        BuzzerError::Io { context: "<unknown>".to_string(), source: err }
    }
}

/// Reason a session command or buzzer press was not accepted.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    #[error("no question is currently accepting presses")]
    NoActiveQuestion,

    #[error("this group has already buzzed for the current question")]
    AlreadyBuzzed,

    #[error("a question is already on air")]
    QuestionAlreadyActive,

    #[error("the question has not ended yet")]
    QuestionNotEnded,

    #[error("no press is waiting for evaluation")]
    NothingToEvaluate,

    #[error("the game is over")]
    GameOver,
}
