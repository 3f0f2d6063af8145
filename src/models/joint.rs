//! Joint Records
//!
//! One record per joint, as read from the arm zero file or the leg
//! offset file and updated by measurements during a run.

use serde::{Deserialize, Serialize};

use super::session::ZeroPointScope;

/// Session keys for arm joints in full-body runs are shifted by this
/// amount so they do not collide with leg joint ids.
pub const FULL_BODY_ARM_KEY_OFFSET: u32 = 100;

/// Canonical names for the EtherCAT slave order
const JOINT_NAMES: [&str; 22] = [
    "left_hip_yaw",
    "left_hip_roll",
    "left_hip_pitch",
    "left_knee_pitch",
    "left_ankle_pitch",
    "left_ankle_roll",
    "right_hip_yaw",
    "right_hip_roll",
    "right_hip_pitch",
    "right_knee_pitch",
    "right_ankle_pitch",
    "right_ankle_roll",
    "left_shoulder_pitch",
    "left_shoulder_roll",
    "left_shoulder_yaw",
    "left_elbow_pitch",
    "right_shoulder_pitch",
    "right_shoulder_roll",
    "right_shoulder_yaw",
    "right_elbow_pitch",
    "neck_pitch",
    "neck_yaw",
];

/// Name for a slave/joint id, synthesizing `joint_NN` for unknown ids
pub fn canonical_joint_name(id: u32) -> String {
    id.checked_sub(1)
        .and_then(|index| JOINT_NAMES.get(index as usize))
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("joint_{:02}", id))
}

/// Which calibration file a joint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointGroup {
    Legs,
    Arms,
}

/// Advisory health of a joint record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthFlag {
    #[default]
    Normal,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointRecord {
    /// Id within the joint's calibration file
    pub id: u32,
    pub name: String,
    pub group: JointGroup,
    pub current_position: f64,
    pub zero_position: f64,
    pub offset: f64,
    pub health: HealthFlag,
    /// Set once a slave measurement has been folded in during a run
    #[serde(default)]
    pub measured: bool,
}

impl JointRecord {
    pub fn new(id: u32, name: impl Into<String>, group: JointGroup) -> Self {
        Self {
            id,
            name: name.into(),
            group,
            current_position: 0.0,
            zero_position: 0.0,
            offset: 0.0,
            health: HealthFlag::Normal,
            measured: false,
        }
    }

    /// Key of this record in a session's joint map
    pub fn session_key(&self, scope: ZeroPointScope) -> u32 {
        match (self.group, scope) {
            (JointGroup::Arms, ZeroPointScope::FullBody) => self.id + FULL_BODY_ARM_KEY_OFFSET,
            _ => self.id,
        }
    }

    /// Fold a measured position into the record
    pub fn apply_measurement(&mut self, position: f64) {
        self.current_position = position;
        self.offset = position - self.zero_position;
        self.measured = true;
    }
}

/// Operator correction applied before execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointEdit {
    /// Session key of the joint
    pub joint_id: u32,
    #[serde(default)]
    pub zero_position: Option<f64>,
    #[serde(default)]
    pub offset: Option<f64>,
}
