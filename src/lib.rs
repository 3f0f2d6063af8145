//! jointcal - calibration session orchestration for humanoid robots
//!
//! Drives interactive calibration programs on a robot over a
//! pseudo-terminal (or an in-process simulator), answers their prompts,
//! folds the reported actuator positions into per-joint records and
//! writes the results back to the robot's calibration files.
//!
//! ## Module Organization
//!
//! - [`session`] - Session registry, zero-point step machine, head-hand runs
//! - [`channel`] - Interactive channel contract and the PTY backend
//! - [`simulator`] - Scripted channel, simulated device link, mock files
//! - [`parser`] - Slave position extraction, status keywords, validation
//! - [`prompts`] - Prompt rule tables per calibration kind
//! - [`coordinator`] - Single-slot prompt/response rendezvous
//! - [`device`] - Device link contract and the `ssh` implementation
//! - [`store`] - Calibration file formats and stores
//! - [`events`] - Event payloads and the broadcast bus
//! - [`config`] - Configuration structures and loading
//! - [`models`] - Session, joint and measurement types
//! - [`mod@error`] - Error types and Result aliases
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use jointcal::{Config, EventBus, Services, SessionRegistry, ZeroPointScope};
//!
//! # async fn run() -> jointcal::Result<()> {
//! let events = Arc::new(EventBus::new(256));
//! let services = Services::simulated(Config::simulated(), events.clone())?;
//! let registry = SessionRegistry::new(services);
//!
//! let session = registry.start_zero_point("sim-robot", ZeroPointScope::ArmsOnly).await?;
//! session.confirm_tool(0).await?;
//! session.confirm_tool(1).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Every session runs on its own tokio task and is the only writer of its
//! state. The PTY backend keeps blocking reads and writes on dedicated
//! threads bridged to the session task by channels.

#[macro_use]
extern crate tracing;

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod events;
pub mod models;
pub mod parser;
pub mod prompts;
pub mod session;
pub mod simulator;
pub mod store;

// Re-exports for core functionality
pub use config::loader::ConfigLoader;
pub use config::Config;
pub use error::{Error, Result};
pub use events::{CalibrationEvent, EventBus, EventSink, NullSink};
pub use models::{
    CalibrationKind, CalibrationStep, JointEdit, SessionSnapshot, SessionStatus, ZeroPointScope,
};
pub use session::{Services, SessionHandle, SessionRegistry, SessionSummary};

/// The current version of jointcal from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The application name from Cargo.toml
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Load configuration from the default locations, falling back to defaults
pub fn load_config() -> Config {
    match ConfigLoader::load() {
        Ok(config) => {
            info!("Configuration loaded from default location");
            config
        }
        Err(e) => {
            warn!("Failed to load configuration: {}. Using defaults", e);
            Config::default()
        }
    }
}

/// Load configuration from an explicit file
pub fn load_config_from(path: &std::path::Path) -> Result<Config> {
    info!("Loading {} v{} config from {}", NAME, VERSION, path.display());
    if !path.exists() {
        return Err(Error::ConfigLoadFailed {
            path: path.to_path_buf(),
            reason: "Configuration file does not exist".to_string(),
        });
    }
    ConfigLoader::load_from_path(path)
}

/// Operator-facing explanation for an error that stops the program
pub fn handle_startup_error(error: &Error) -> String {
    match error {
        Error::ConfigLoadFailed { path, reason } => {
            format!(
                "Configuration Error: Failed to load config from '{}': {}\n\nTry:\n• Check configuration file syntax\n• Use default configuration",
                path.display(),
                reason
            )
        }
        Error::ConfigParseFailed { format, reason } => {
            format!(
                "Configuration Error: Failed to parse {} config: {}",
                format, reason
            )
        }
        Error::ConfigValidationFailed { field, reason } => {
            format!(
                "Configuration Error: Validation failed for '{}': {}",
                field, reason
            )
        }
        Error::NotConnected { robot_id } => {
            format!(
                "Connection Error: Robot '{}' is not reachable\n\nTry:\n• Check the host and user settings\n• Use --simulate for an offline run",
                robot_id
            )
        }
        Error::AlreadyRunning {
            robot_id,
            session_id,
        } => {
            format!(
                "Session Error: Robot '{}' is busy with session '{}'",
                robot_id, session_id
            )
        }
        _ => format!("Unexpected Error: {}", error),
    }
}
