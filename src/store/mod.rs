//! Calibration File Store
//!
//! Reads and writes the arm zero file and the leg offset file for a
//! robot. Every write backs up the previous file and replaces it
//! atomically.

pub mod formats;
mod local;
mod remote;

pub use local::LocalFileStore;
pub use remote::RemoteFileStore;

use std::collections::HashMap;
use std::ops::RangeInclusive;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::config::{CalibrationConfig, WarningThresholds};
use crate::error::Result;
use crate::models::{HealthFlag, JointGroup, JointRecord, ZeroPointScope};

/// The two calibration files kept on a robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    ArmsZero,
    LegsOffset,
}

impl FileKind {
    pub fn group(self) -> JointGroup {
        match self {
            FileKind::ArmsZero => JointGroup::Arms,
            FileKind::LegsOffset => JointGroup::Legs,
        }
    }

    pub fn for_group(group: JointGroup) -> Self {
        match group {
            JointGroup::Arms => FileKind::ArmsZero,
            JointGroup::Legs => FileKind::LegsOffset,
        }
    }

    /// Joint ids stored in the file
    pub fn ids(self) -> RangeInclusive<u32> {
        match self {
            FileKind::ArmsZero => 2..=15,
            FileKind::LegsOffset => 1..=14,
        }
    }

    pub fn file_name(self, config: &CalibrationConfig) -> &str {
        match self {
            FileKind::ArmsZero => &config.arms_zero_file,
            FileKind::LegsOffset => &config.legs_offset_file,
        }
    }

    /// Files touched by a scope, legs first
    pub fn for_scope(scope: ZeroPointScope) -> Vec<FileKind> {
        let mut kinds = Vec::with_capacity(2);
        if scope.includes_legs() {
            kinds.push(FileKind::LegsOffset);
        }
        if scope.includes_arms() {
            kinds.push(FileKind::ArmsZero);
        }
        kinds
    }

    pub fn label(self) -> &'static str {
        match self {
            FileKind::ArmsZero => "arms_zero",
            FileKind::LegsOffset => "legs_offset",
        }
    }
}

/// Persistent calibration files for a robot
#[async_trait]
pub trait CalibrationStore: Send + Sync {
    /// Read a file; a missing file yields default records flagged `warning`
    async fn read(&self, robot_id: &str, kind: FileKind) -> Result<Vec<JointRecord>>;

    /// Back up the current file and atomically replace it
    async fn write(&self, robot_id: &str, kind: FileKind, records: &[JointRecord]) -> Result<()>;

    async fn backup_count(&self, robot_id: &str, kind: FileKind) -> Result<usize>;
}

/// Backup file name for `name` taken at `now`
pub fn backup_file_name(name: &str, now: DateTime<Local>) -> String {
    format!("{}.{}.bak", name, now.format("%Y%m%d_%H%M%S"))
}

/// Render records in the file's format
pub fn render(kind: FileKind, records: &[JointRecord]) -> Result<String> {
    match kind {
        FileKind::ArmsZero => formats::render_arms_zero(records),
        FileKind::LegsOffset => Ok(formats::render_legs_offset(records)),
    }
}

/// Parse file content; `path` is only used in error messages
pub fn parse(kind: FileKind, content: &str, path: &str) -> Result<Vec<JointRecord>> {
    match kind {
        FileKind::ArmsZero => formats::parse_arms_zero(content, path),
        FileKind::LegsOffset => Ok(formats::parse_legs_offset(content)),
    }
}

/// Copy live positions into records by file joint id
pub fn merge_live_positions(records: &mut [JointRecord], positions: &HashMap<u32, f64>) {
    for joint in records.iter_mut() {
        if let Some(position) = positions.get(&joint.id) {
            joint.current_position = *position;
        }
    }
}

/// Flag implausible values and return one advisory message per finding
pub fn validate_joint_records(
    records: &mut [JointRecord],
    thresholds: &WarningThresholds,
) -> Vec<String> {
    let mut warnings = Vec::new();
    for joint in records.iter_mut() {
        let values = [joint.current_position, joint.zero_position, joint.offset];
        if values.iter().any(|v| !v.is_finite()) {
            joint.health = HealthFlag::Error;
            warnings.push(format!("{}: non-numeric calibration value", joint.name));
            continue;
        }

        let mut flagged = false;
        if joint.zero_position.abs() > thresholds.zero {
            warnings.push(format!(
                "{}: zero position out of range ({:.3})",
                joint.name, joint.zero_position
            ));
            flagged = true;
        }
        if joint.offset.abs() > thresholds.offset {
            warnings.push(format!(
                "{}: offset out of range ({:.3})",
                joint.name, joint.offset
            ));
            flagged = true;
        }
        let drift = (joint.current_position - joint.zero_position).abs();
        if drift > thresholds.drift {
            warnings.push(format!(
                "{}: current position far from zero ({:.3})",
                joint.name, drift
            ));
            flagged = true;
        }
        if flagged {
            joint.health = HealthFlag::Warning;
        }
    }
    warnings
}
