//! Calibration file formats
//!
//! Arm zero file: YAML mapping `joint_02..joint_13`, `neck_01`, `neck_02`.
//! Leg offset file: one offset per line for joints 1..=14.

use std::collections::BTreeMap;

use super::FileKind;
use crate::error::{Error, Result};
use crate::models::{HealthFlag, JointGroup, JointRecord};

/// Display name of a joint within its calibration file
pub fn joint_name(kind: FileKind, id: u32) -> String {
    match (kind, id) {
        (FileKind::ArmsZero, 2..=7) => format!("left_arm_{:02}", id - 1),
        (FileKind::ArmsZero, 8..=13) => format!("right_arm_{:02}", id - 7),
        (FileKind::ArmsZero, 14) => "head_yaw".to_string(),
        (FileKind::ArmsZero, 15) => "head_pitch".to_string(),
        (FileKind::LegsOffset, 1..=6) => format!("left_leg_{:02}", id),
        (FileKind::LegsOffset, 7..=12) => format!("right_leg_{:02}", id - 6),
        (FileKind::LegsOffset, 13) => "left_shoulder".to_string(),
        (FileKind::LegsOffset, 14) => "right_shoulder".to_string(),
        _ => format!("joint_{:02}", id),
    }
}

/// YAML key for an arm joint id
fn arm_key(id: u32) -> String {
    if id <= 13 {
        format!("joint_{:02}", id)
    } else {
        format!("neck_{:02}", id - 13)
    }
}

fn record(kind: FileKind, id: u32) -> JointRecord {
    JointRecord::new(id, joint_name(kind, id), kind.group())
}

/// Records used when a calibration file does not exist yet
pub fn default_records(kind: FileKind) -> Vec<JointRecord> {
    kind.ids()
        .map(|id| {
            let mut joint = record(kind, id);
            joint.health = HealthFlag::Warning;
            joint
        })
        .collect()
}

pub fn parse_arms_zero(content: &str, path: &str) -> Result<Vec<JointRecord>> {
    let mapping: BTreeMap<String, serde_yaml::Value> = if content.trim().is_empty() {
        BTreeMap::new()
    } else {
        serde_yaml::from_str(content).map_err(|e| Error::CalibrationFileInvalid {
            path: path.to_string(),
            reason: e.to_string(),
        })?
    };

    Ok(FileKind::ArmsZero
        .ids()
        .map(|id| {
            let mut joint = record(FileKind::ArmsZero, id);
            match mapping.get(&arm_key(id)).and_then(serde_yaml::Value::as_f64) {
                Some(zero) => joint.zero_position = zero,
                None => joint.health = HealthFlag::Warning,
            }
            joint
        })
        .collect())
}

pub fn render_arms_zero(records: &[JointRecord]) -> Result<String> {
    let mapping: BTreeMap<String, f64> = records
        .iter()
        .filter(|joint| joint.group == JointGroup::Arms)
        .map(|joint| (arm_key(joint.id), joint.zero_position))
        .collect();
    Ok(serde_yaml::to_string(&mapping)?)
}

pub fn parse_legs_offset(content: &str) -> Vec<JointRecord> {
    let mut values = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));

    FileKind::LegsOffset
        .ids()
        .map(|id| {
            let mut joint = record(FileKind::LegsOffset, id);
            match values.next().map(str::parse::<f64>) {
                Some(Ok(offset)) => joint.offset = offset,
                Some(Err(_)) | None => joint.health = HealthFlag::Warning,
            }
            joint
        })
        .collect()
}

pub fn render_legs_offset(records: &[JointRecord]) -> String {
    let mut legs: Vec<&JointRecord> = records
        .iter()
        .filter(|joint| joint.group == JointGroup::Legs)
        .collect();
    legs.sort_by_key(|joint| joint.id);
    let mut content = legs
        .iter()
        .map(|joint| joint.offset.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    content.push('\n');
    content
}
