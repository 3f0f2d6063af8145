//! Calibration Output Parsing
//!
//! Turns raw lines of calibration output into structured data:
//! slave position reports, completion/failure keywords, and
//! higher-level summaries over an accumulated log.
//!
//! All functions here are pure and safe to call repeatedly on the
//! same text.

mod summary;
mod validation;

pub use summary::{
    extract_log_highlights, format_offset_csv, summarize, CalibrationSummary, HighlightKind,
    LogHighlight, SummaryVerdict,
};
pub use validation::{validate, validate_with_bound, ValidationReport, POSITION_BOUND};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{canonical_joint_name, MeasurementFormat, SlaveMeasurement};

/// Largest slave id accepted from device output; larger ids are noise
pub const MAX_SLAVE_ID: u32 = 64;

const NUMBER: &str = r"([-+]?\d*\.?\d+(?:[eE][-+]?\d+)?)";

/// Recognized slave report formats, tried in order; first match wins
static SLAVE_PATTERNS: Lazy<Vec<(MeasurementFormat, Regex)>> = Lazy::new(|| {
    let table = [
        (
            MeasurementFormat::Plain,
            format!(r"(?i)\bSlave\s*(\d+)\s+actual\s+position\s*:?\s*{}", NUMBER),
        ),
        (
            MeasurementFormat::Joint,
            format!(r"(?i)\bJoint\s+(\d+)\s+position\s*:\s*{}", NUMBER),
        ),
        (
            MeasurementFormat::Bracketed,
            format!(r"(?i)\[slave_(\d+)\]\s+position\s*:\s*{}", NUMBER),
        ),
        (
            MeasurementFormat::Tabular,
            format!(r"(?im)^\s*(\d+)\s+{}\s+actual\b", NUMBER),
        ),
    ];
    table
        .into_iter()
        .filter_map(|(format, pattern)| match Regex::new(&pattern) {
            Ok(regex) => Some((format, regex)),
            Err(e) => {
                error!("Invalid slave pattern {:?}: {}", format, e);
                None
            }
        })
        .collect()
});

/// Extract every slave position report from one line of output.
///
/// Patterns are tried in a fixed order and only the first pattern that
/// matches the line is used, so a line is never reported twice under
/// different formats.
pub fn extract_measurements(line: &str) -> Vec<SlaveMeasurement> {
    for (format, pattern) in SLAVE_PATTERNS.iter() {
        if !pattern.is_match(line) {
            continue;
        }

        let mut found = Vec::new();
        for caps in pattern.captures_iter(line) {
            let slave_id = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .filter(|id| (1..=MAX_SLAVE_ID).contains(id));
            let position = caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
            match (slave_id, position) {
                (Some(slave_id), Some(position)) if position.is_finite() => {
                    found.push(SlaveMeasurement {
                        slave_id,
                        position,
                        joint_name: canonical_joint_name(slave_id),
                        format: *format,
                        raw_line: line.trim().to_string(),
                    });
                }
                _ => {
                    debug!("Skipping malformed slave report: {}", line.trim());
                }
            }
        }
        return found;
    }
    Vec::new()
}

/// Extract measurements from every line of a block of text
pub fn extract_all(text: &str) -> Vec<SlaveMeasurement> {
    text.lines().flat_map(extract_measurements).collect()
}

/// Outcome keyword recognized in a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKeyword {
    Completed,
    Failed,
    Warning,
}

const COMPLETED_KEYWORDS: &[&str] = &[
    "calibration complete",
    "calibration finished",
    "calibration done",
    "标定完成",
    "校准完成",
];

const FAILED_KEYWORDS: &[&str] = &[
    "calibration failed",
    "calibration error",
    "error in calibration",
    "标定失败",
    "校准失败",
];

const WARNING_KEYWORDS: &[&str] = &["warning", "warn", "caution", "警告"];

/// Classify a line by the outcome keywords it contains.
///
/// Completion is checked before failure, and failure before warning.
pub fn classify_status(line: &str) -> Option<StatusKeyword> {
    let lower = line.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if contains_any(COMPLETED_KEYWORDS) {
        Some(StatusKeyword::Completed)
    } else if contains_any(FAILED_KEYWORDS) {
        Some(StatusKeyword::Failed)
    } else if contains_any(WARNING_KEYWORDS) {
        Some(StatusKeyword::Warning)
    } else {
        None
    }
}
