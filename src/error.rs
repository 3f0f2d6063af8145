//! Error types and Result aliases for jointcal

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{CalibrationStep, SessionStatus};

/// Result type alias for jointcal operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for jointcal
#[derive(Debug)]
pub enum Error {
    // === Session errors ===
    /// Robot is not reachable through the device link
    NotConnected {
        robot_id: String,
    },

    /// Another session is still active for the robot
    AlreadyRunning {
        robot_id: String,
        session_id: String,
    },

    /// Operation is not valid for the session's current step or status
    InvalidStepTransition {
        step: Option<CalibrationStep>,
        status: SessionStatus,
        operation: String,
    },

    /// Interactive channel ended before the calibration reported completion
    ChannelClosedUnexpectedly {
        command: String,
        reason: String,
    },

    /// Parsed measurements failed validation before persisting
    MeasurementValidationFailed {
        messages: Vec<String>,
    },

    /// Writing calibration files to the robot failed
    PersistenceFailed {
        path: String,
        reason: String,
    },

    /// Session id is unknown to the registry
    SessionNotFound {
        session_id: String,
    },

    /// Session task has exited and no longer accepts commands
    SessionClosed {
        session_id: String,
    },

    /// A prompt is already waiting for an operator response
    ResponseWaitInProgress,

    /// Session was cancelled by the operator
    SessionCancelled,

    // === Channel errors ===
    /// Channel operation before `start`
    ChannelNotStarted,

    /// Channel was started twice
    ChannelAlreadyStarted,

    /// Failed to create PTY
    PtyCreationFailed {
        command: String,
        reason: String,
    },

    /// Failed to spawn command in PTY
    CommandSpawnFailed {
        command: String,
        reason: String,
    },

    /// Failed to clone PTY reader
    PtyReaderCloneFailed {
        reason: String,
    },

    /// Failed to take PTY writer
    PtyWriterTakeFailed {
        reason: String,
    },

    /// Failed to send input to PTY
    PtyInputSendFailed {
        reason: String,
    },

    /// Failed to send signal to process
    SignalSendFailed {
        signal: String,
        reason: String,
    },

    /// Signal handling not supported on platform
    SignalNotSupported {
        signal: String,
        platform: String,
    },

    // === Device errors ===
    /// Remote command could not be executed
    CommandFailed {
        command: String,
        reason: String,
    },

    /// Remote command timeout
    CommandTimeout {
        command: String,
        duration: Duration,
    },

    /// Robot has no registered endpoint
    UnknownRobot {
        robot_id: String,
    },

    /// Calibration file content could not be parsed
    CalibrationFileInvalid {
        path: String,
        reason: String,
    },

    // === Configuration errors ===
    /// Failed to load configuration file
    ConfigLoadFailed {
        path: PathBuf,
        reason: String,
    },

    /// Failed to save configuration file
    ConfigSaveFailed {
        path: PathBuf,
        reason: String,
    },

    /// Configuration file not found
    ConfigNotFound,

    /// Configuration validation failed
    ConfigValidationFailed {
        field: String,
        reason: String,
    },

    /// Failed to serialize configuration
    ConfigSerializationFailed {
        format: String,
        reason: String,
    },

    /// Failed to parse configuration
    ConfigParseFailed {
        format: String,
        reason: String,
    },

    // === I/O and serialization errors ===
    /// I/O errors
    Io(std::io::Error),

    /// JSON errors
    Serde(serde_json::Error),

    /// YAML errors
    Yaml(serde_yaml::Error),

    /// TOML parsing errors
    Toml(toml::de::Error),

    /// Regex compilation errors
    Regex(regex::Error),

    // === Generic fallback (use sparingly) ===
    Other(String),
}

impl Error {
    /// Whether the error ends the session as cancelled rather than failed
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::SessionCancelled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Session errors
            Error::NotConnected { robot_id } => {
                write!(f, "Robot '{}' is not connected", robot_id)
            }
            Error::AlreadyRunning {
                robot_id,
                session_id,
            } => {
                write!(
                    f,
                    "Robot '{}' already has an active calibration session '{}'",
                    robot_id, session_id
                )
            }
            Error::InvalidStepTransition {
                step,
                status,
                operation,
            } => match step {
                Some(step) => write!(
                    f,
                    "Cannot {} while session is at step {} ({})",
                    operation, step, status
                ),
                None => write!(f, "Cannot {} while session is {}", operation, status),
            },
            Error::ChannelClosedUnexpectedly { command, reason } => {
                write!(f, "Calibration command '{}' ended abnormally: {}", command, reason)
            }
            Error::MeasurementValidationFailed { messages } => {
                write!(f, "Measurement validation failed: {}", messages.join("; "))
            }
            Error::PersistenceFailed { path, reason } => {
                write!(f, "Failed to persist '{}': {}", path, reason)
            }
            Error::SessionNotFound { session_id } => {
                write!(f, "Calibration session '{}' not found", session_id)
            }
            Error::SessionClosed { session_id } => {
                write!(f, "Calibration session '{}' has already finished", session_id)
            }
            Error::ResponseWaitInProgress => {
                write!(f, "A prompt is already waiting for a response")
            }
            Error::SessionCancelled => write!(f, "Calibration cancelled by user"),

            // Channel errors
            Error::ChannelNotStarted => write!(f, "Interactive channel has not been started"),
            Error::ChannelAlreadyStarted => {
                write!(f, "Interactive channel has already been started")
            }
            Error::PtyCreationFailed { command, reason } => {
                write!(f, "Failed to create PTY for command '{}': {}", command, reason)
            }
            Error::CommandSpawnFailed { command, reason } => {
                write!(f, "Failed to spawn command '{}': {}", command, reason)
            }
            Error::PtyReaderCloneFailed { reason } => {
                write!(f, "Failed to clone PTY reader: {}", reason)
            }
            Error::PtyWriterTakeFailed { reason } => {
                write!(f, "Failed to take PTY writer: {}", reason)
            }
            Error::PtyInputSendFailed { reason } => {
                write!(f, "Failed to send input to PTY: {}", reason)
            }
            Error::SignalSendFailed { signal, reason } => {
                write!(f, "Failed to send signal '{}': {}", signal, reason)
            }
            Error::SignalNotSupported { signal, platform } => {
                write!(f, "Signal '{}' not supported on {}", signal, platform)
            }

            // Device errors
            Error::CommandFailed { command, reason } => {
                write!(f, "Remote command '{}' failed: {}", command, reason)
            }
            Error::CommandTimeout { command, duration } => {
                write!(f, "Remote command '{}' timed out after {:?}", command, duration)
            }
            Error::UnknownRobot { robot_id } => {
                write!(f, "No endpoint registered for robot '{}'", robot_id)
            }
            Error::CalibrationFileInvalid { path, reason } => {
                write!(f, "Calibration file '{}' is invalid: {}", path, reason)
            }

            // Configuration errors
            Error::ConfigLoadFailed { path, reason } => {
                write!(f, "Failed to load config from '{}': {}", path.display(), reason)
            }
            Error::ConfigSaveFailed { path, reason } => {
                write!(f, "Failed to save config to '{}': {}", path.display(), reason)
            }
            Error::ConfigNotFound => write!(f, "Configuration file not found"),
            Error::ConfigValidationFailed { field, reason } => {
                write!(f, "Configuration validation failed for '{}': {}", field, reason)
            }
            Error::ConfigSerializationFailed { format, reason } => {
                write!(f, "Failed to serialize config as {}: {}", format, reason)
            }
            Error::ConfigParseFailed { format, reason } => {
                write!(f, "Failed to parse {} config: {}", format, reason)
            }

            // I/O and serialization errors
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Serde(err) => write!(f, "Serialization error: {}", err),
            Error::Yaml(err) => write!(f, "YAML error: {}", err),
            Error::Toml(err) => write!(f, "TOML parsing error: {}", err),
            Error::Regex(err) => write!(f, "Regex compilation error: {}", err),

            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Yaml(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Toml(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Regex(err)
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}
