//! Calibration Session Model
//!
//! Identity, lifecycle and checklist types for a calibration session.
//! The mutable session state itself lives with the session task; this
//! module only holds what is shared with callers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::joint::JointRecord;
use crate::parser::StatusKeyword;

/// Which joints a zero-point run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ZeroPointScope {
    #[default]
    FullBody,
    ArmsOnly,
    LegsOnly,
}

impl ZeroPointScope {
    pub fn includes_arms(self) -> bool {
        matches!(self, ZeroPointScope::FullBody | ZeroPointScope::ArmsOnly)
    }

    pub fn includes_legs(self) -> bool {
        matches!(self, ZeroPointScope::FullBody | ZeroPointScope::LegsOnly)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ZeroPointScope::FullBody => "full_body",
            ZeroPointScope::ArmsOnly => "arms_only",
            ZeroPointScope::LegsOnly => "legs_only",
        }
    }
}

impl fmt::Display for ZeroPointScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ZeroPointScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_body" | "full" => Ok(ZeroPointScope::FullBody),
            "arms_only" | "arms" => Ok(ZeroPointScope::ArmsOnly),
            "legs_only" | "legs" => Ok(ZeroPointScope::LegsOnly),
            other => Err(format!("unknown calibration scope '{}'", other)),
        }
    }
}

/// Kind of calibration a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationKind {
    /// Four-step guided zero-point calibration
    ZeroPoint { scope: ZeroPointScope },
    /// Single interactive head and hand calibration script
    HeadHand,
}

impl CalibrationKind {
    /// Label used as `calibration_type` in status events
    pub fn type_label(self) -> &'static str {
        match self {
            CalibrationKind::ZeroPoint { .. } => "zero_point",
            CalibrationKind::HeadHand => "head_hand",
        }
    }

    pub fn scope(self) -> Option<ZeroPointScope> {
        match self {
            CalibrationKind::ZeroPoint { scope } => Some(scope),
            CalibrationKind::HeadHand => None,
        }
    }
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationKind::ZeroPoint { scope } => write!(f, "zero_point/{}", scope),
            CalibrationKind::HeadHand => f.write_str("head_hand"),
        }
    }
}

/// Steps of the zero-point flow, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStep {
    ConfirmTools,
    ReadConfig,
    InitializeZero,
    RemoveTools,
}

impl CalibrationStep {
    /// One-based position, as shown to operators
    pub fn number(self) -> u8 {
        match self {
            CalibrationStep::ConfirmTools => 1,
            CalibrationStep::ReadConfig => 2,
            CalibrationStep::InitializeZero => 3,
            CalibrationStep::RemoveTools => 4,
        }
    }
}

impl fmt::Display for CalibrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CalibrationStep::ConfirmTools => "confirm_tools",
            CalibrationStep::ReadConfig => "read_config",
            CalibrationStep::InitializeZero => "initialize_zero",
            CalibrationStep::RemoveTools => "remove_tools",
        };
        f.write_str(name)
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Pending,
    Running,
    WaitingForUser,
    Success,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// Active sessions hold their robot's registry slot
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionStatus::Pending | SessionStatus::Running | SessionStatus::WaitingForUser
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::WaitingForUser => "waiting_for_user",
            SessionStatus::Success => "success",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A fixture the operator installs before a zero-point run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolItem {
    pub name: String,
    pub description: String,
    pub image_path: String,
    pub confirmed: bool,
}

impl ToolItem {
    fn new(name: &str, description: &str, image_path: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            image_path: image_path.to_string(),
            confirmed: false,
        }
    }

    /// Installation checklist for a scope
    pub fn checklist(scope: ZeroPointScope) -> Vec<ToolItem> {
        let leg_jig = ToolItem::new(
            "leg_jig",
            "Install the leg calibration jig on both legs",
            "/static/images/install_leg_tools.jpg",
        );
        let foot_jig = ToolItem::new(
            "foot_jig",
            "Install the foot calibration jig under both feet",
            "/static/images/install_foot_tools.jpg",
        );
        let arms = ToolItem::new(
            "arms_hanging",
            "Let both arms hang naturally at the sides",
            "/static/images/adjust_arms.jpg",
        );
        let head = ToolItem::new(
            "head_centered",
            "Center the head and keep it upright",
            "/static/images/adjust_head.jpg",
        );

        match scope {
            ZeroPointScope::FullBody => vec![leg_jig, foot_jig, arms, head],
            ZeroPointScope::ArmsOnly => vec![arms, head],
            ZeroPointScope::LegsOnly => vec![leg_jig, foot_jig],
        }
    }
}

/// Progress flags accumulated across the zero-point steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    pub tools_confirmed: bool,
    pub config_loaded: bool,
    pub joint_count: usize,
    pub warnings_count: usize,
    pub ready_to_calibrate: bool,
    pub calibration_started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_status: Option<StatusKeyword>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calibration_warnings: Vec<String>,
    pub calibration_saved: bool,
    pub validation_completed: bool,
    pub tools_removed: bool,
}

impl StepProgress {
    /// Forget everything learned from READ_CONFIG onwards
    pub fn reset_from_read_config(&mut self) {
        let tools_confirmed = self.tools_confirmed;
        *self = StepProgress {
            tools_confirmed,
            ..StepProgress::default()
        };
    }
}

/// Point-in-time copy of a session, safe to hand to other tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub robot_id: String,
    pub kind: CalibrationKind,
    /// Zero-point step; `None` for head-hand sessions
    pub step: Option<CalibrationStep>,
    pub status: SessionStatus,
    pub pending_prompt: Option<String>,
    pub joint_measurements: Vec<JointRecord>,
    pub warnings: Vec<String>,
    pub step_progress: StepProgress,
    pub tools: Vec<ToolItem>,
    pub error_message: Option<String>,
    /// Most recent log lines
    pub log_tail: Vec<String>,
    /// Total number of log lines recorded so far
    pub log_len: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn is_waiting(&self) -> bool {
        self.status == SessionStatus::WaitingForUser
    }
}
