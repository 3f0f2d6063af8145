//! Configuration management for jointcal
//!
//! Device access, channel timing, prompt handling, calibration commands
//! and simulator settings. Every section has working defaults so an
//! empty file (or none at all) is a valid configuration.

pub mod loader;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::ZeroPointScope;

/// Main configuration structure for jointcal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub channel: ChannelConfig,
    pub prompts: PromptConfig,
    pub calibration: CalibrationConfig,
    pub simulator: SimulatorConfig,
}

impl Config {
    /// Configuration wired to the in-process simulator
    pub fn simulated() -> Self {
        let mut config = Config::default();
        config.simulator.enabled = true;
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device.validate()?;
        self.channel.validate()?;
        self.prompts.validate()?;
        self.calibration.validate()?;
        Ok(())
    }
}

/// How robots are reached
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Program used for remote access
    pub ssh_program: String,
    /// Extra arguments placed before the destination
    pub ssh_args: Vec<String>,
    pub user: String,
    pub port: u16,
    /// robot id -> host name or address
    pub hosts: HashMap<String, String>,
    pub connect_timeout_secs: u64,
    /// Upper bound for one non-interactive remote command
    pub command_timeout_secs: u64,
    /// Query printing the robot's current joint positions
    pub joint_state_command: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            ssh_args: Vec::new(),
            user: "root".to_string(),
            port: 22,
            hosts: HashMap::new(),
            connect_timeout_secs: 10,
            command_timeout_secs: 30,
            joint_state_command: "rostopic echo -n 1 /joint_states | grep -A 20 'position:'"
                .to_string(),
        }
    }
}

impl DeviceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ssh_program.trim().is_empty() {
            return Err(ConfigError::EmptyField("device.ssh_program"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("device.connect_timeout_secs"));
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("device.command_timeout_secs"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Interactive channel timing and sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub poll_interval_ms: u64,
    pub rows: u16,
    pub cols: u16,
    /// Delay after opening the shell before the command is sent
    pub warmup_ms: u64,
    pub read_buffer_size: usize,
    pub max_consecutive_read_errors: u32,
    /// Grace period between interrupt and kill on terminate
    pub terminate_grace_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            rows: 40,
            cols: 160,
            warmup_ms: 500,
            read_buffer_size: 4096,
            max_consecutive_read_errors: 5,
            terminate_grace_ms: 1000,
        }
    }
}

impl ChannelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("channel.poll_interval_ms"));
        }
        if self.poll_interval_ms > 5000 {
            return Err(ConfigError::OutOfRange {
                field: "channel.poll_interval_ms",
                value: self.poll_interval_ms as f64,
                max: 5000.0,
            });
        }
        if self.rows == 0 || self.cols == 0 {
            return Err(ConfigError::InvalidTerminalSize(self.cols, self.rows));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::EmptyField("channel.read_buffer_size"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// A prompt rule added on top of the built-in tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraPromptRule {
    pub pattern: String,
    pub response: String,
    /// `zero_point`, `head_hand`, or omitted for both
    #[serde(default)]
    pub kind: Option<String>,
}

/// Prompt detection and response policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Answer every prompt with its rule's default response
    pub auto_respond: bool,
    pub auto_respond_delay_ms: u64,
    /// How long an operator has to answer before the default is sent
    pub response_timeout_secs: u64,
    /// Tried after the built-in rules
    pub extra_rules: Vec<ExtraPromptRule>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            auto_respond: false,
            auto_respond_delay_ms: 1000,
            response_timeout_secs: 300,
            extra_rules: Vec::new(),
        }
    }
}

impl PromptConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.response_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("prompts.response_timeout_secs"));
        }
        for rule in &self.extra_rules {
            regex::Regex::new(&rule.pattern)
                .map_err(|e| ConfigError::InvalidPattern(rule.pattern.clone(), e.to_string()))?;
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn auto_respond_delay(&self) -> Duration {
        Duration::from_millis(self.auto_respond_delay_ms)
    }
}

/// Advisory warning thresholds applied when reading calibration files
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarningThresholds {
    pub zero: f64,
    pub offset: f64,
    pub drift: f64,
}

impl Default for WarningThresholds {
    fn default() -> Self {
        Self {
            zero: 10.0,
            offset: 5.0,
            drift: 3.0,
        }
    }
}

/// Calibration commands, file locations and flow policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub full_body_command: String,
    pub arms_only_command: String,
    pub legs_only_command: String,
    pub head_hand_command: String,
    pub verification_command: String,
    /// Directory on the robot holding the calibration files
    pub remote_config_dir: String,
    pub arms_zero_file: String,
    pub legs_offset_file: String,
    pub thresholds: WarningThresholds,
    /// Largest plausible measured position magnitude
    pub position_bound: f64,
    /// Log lines carried in each snapshot
    pub log_retention: usize,
    /// Move on to INITIALIZE_ZERO as soon as READ_CONFIG succeeds
    pub auto_advance: bool,
    /// Active sessions older than this are reclaimed at admission
    pub stale_session_secs: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        let launch = "roslaunch humanoid_controllers load_kuavo_real.launch";
        Self {
            full_body_command: format!("{} cali:=true cali_leg:=true cali_arm:=true", launch),
            arms_only_command: format!("{} cali:=true cali_arm:=true", launch),
            legs_only_command: format!("{} cali:=true cali_leg:=true", launch),
            head_hand_command:
                "/root/kuavo_ws/src/kuavo-ros-opensource/scripts/joint_cali/One_button_start.sh"
                    .to_string(),
            verification_command: launch.to_string(),
            remote_config_dir: "/home/lab/.config/lejuconfig".to_string(),
            arms_zero_file: "arms_zero.yaml".to_string(),
            legs_offset_file: "offset.csv".to_string(),
            thresholds: WarningThresholds::default(),
            position_bound: crate::parser::POSITION_BOUND,
            log_retention: 200,
            auto_advance: true,
            stale_session_secs: 300,
        }
    }
}

impl CalibrationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let commands = [
            ("calibration.full_body_command", &self.full_body_command),
            ("calibration.arms_only_command", &self.arms_only_command),
            ("calibration.legs_only_command", &self.legs_only_command),
            ("calibration.head_hand_command", &self.head_hand_command),
        ];
        for (field, command) in commands {
            if command.trim().is_empty() {
                return Err(ConfigError::EmptyField(field));
            }
        }
        if self.position_bound <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "calibration.position_bound",
                value: self.position_bound,
                max: f64::INFINITY,
            });
        }
        if self.log_retention == 0 {
            return Err(ConfigError::EmptyField("calibration.log_retention"));
        }
        Ok(())
    }

    /// Launch command for a zero-point scope
    pub fn command_for(&self, scope: ZeroPointScope) -> &str {
        match scope {
            ZeroPointScope::FullBody => &self.full_body_command,
            ZeroPointScope::ArmsOnly => &self.arms_only_command,
            ZeroPointScope::LegsOnly => &self.legs_only_command,
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_session_secs)
    }
}

/// In-process robot stand-in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub enabled: bool,
    /// Seed for randomized calibration values; fixed values when unset
    pub seed: Option<u64>,
    /// Delay between scripted output lines
    pub line_delay_ms: u64,
    /// Multiplier applied to scripted pauses (0 disables them)
    pub pause_scale: f64,
    /// How long a scripted prompt waits for input
    pub input_timeout_secs: u64,
    /// Root directory for simulated calibration files
    pub file_root: Option<PathBuf>,
    /// Robots the simulated link reports as connected
    pub robots: Vec<String>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            seed: None,
            line_delay_ms: 50,
            pause_scale: 1.0,
            input_timeout_secs: 300,
            file_root: None,
            robots: vec!["sim-robot".to_string()],
        }
    }
}

impl SimulatorConfig {
    pub fn line_delay(&self) -> Duration {
        Duration::from_millis(self.line_delay_ms)
    }

    pub fn scaled(&self, millis: u64) -> Duration {
        Duration::from_secs_f64((millis as f64 / 1000.0) * self.pause_scale.max(0.0))
    }

    pub fn input_timeout(&self) -> Duration {
        Duration::from_secs(self.input_timeout_secs)
    }

    pub fn file_root(&self) -> PathBuf {
        self.file_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("jointcal-sim"))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("{field} out of range: {value} (maximum {max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("Invalid terminal size: {0}x{1}")]
    InvalidTerminalSize(u16, u16),

    #[error("Invalid prompt pattern '{0}': {1}")]
    InvalidPattern(String, String),
}
