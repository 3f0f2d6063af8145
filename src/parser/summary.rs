//! Summaries over accumulated calibration output

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{classify_status, extract_all, StatusKeyword};
use crate::models::{canonical_joint_name, SlaveMeasurement};

/// Overall verdict derived from a block of output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryVerdict {
    Completed,
    Failed,
    Error,
    DataCollected,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationSummary {
    /// Highest slave id seen
    pub total_slaves: u32,
    pub successful_readings: usize,
    pub positions: Vec<SlaveMeasurement>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub verdict: SummaryVerdict,
}

/// Summarize a block of calibration output
pub fn summarize(text: &str) -> CalibrationSummary {
    let positions = extract_all(text);
    let lower = text.to_lowercase();
    let keywords: Vec<StatusKeyword> = text.lines().filter_map(classify_status).collect();

    let verdict = if keywords.contains(&StatusKeyword::Completed) {
        SummaryVerdict::Completed
    } else if keywords.contains(&StatusKeyword::Failed) {
        SummaryVerdict::Failed
    } else if lower.contains("error") {
        SummaryVerdict::Error
    } else if !positions.is_empty() {
        SummaryVerdict::DataCollected
    } else {
        SummaryVerdict::Unknown
    };

    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    for line in text.lines() {
        let line_lower = line.to_lowercase();
        if line_lower.contains("warn") {
            warnings.push(line.trim().to_string());
        } else if line_lower.contains("error") || line_lower.contains("failed") {
            errors.push(line.trim().to_string());
        }
    }

    CalibrationSummary {
        total_slaves: positions.iter().map(|p| p.slave_id).max().unwrap_or(0),
        successful_readings: positions.len(),
        positions,
        warnings,
        errors,
        verdict,
    }
}

/// Render measurements as an offset CSV, sorted by slave id.
///
/// Returns an empty string for an empty batch.
pub fn format_offset_csv(measurements: &[SlaveMeasurement]) -> String {
    if measurements.is_empty() {
        return String::new();
    }

    let mut sorted: Vec<&SlaveMeasurement> = measurements.iter().collect();
    sorted.sort_by_key(|m| m.slave_id);

    let mut lines = vec![
        "# Generated from calibration actual positions".to_string(),
        "joint_name,slave_id,offset".to_string(),
    ];
    for m in sorted {
        let name = if m.joint_name.is_empty() {
            canonical_joint_name(m.slave_id)
        } else {
            m.joint_name.clone()
        };
        lines.push(format!("{},{},{:.6}", name, m.slave_id, m.position));
    }
    lines.join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightKind {
    Info,
    Success,
    Error,
    Data,
    Warning,
}

/// A noteworthy line picked out of the log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogHighlight {
    pub line_number: usize,
    pub kind: HighlightKind,
    pub description: &'static str,
    pub content: String,
}

static HIGHLIGHT_PATTERNS: Lazy<Vec<(Regex, HighlightKind, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)calibration\s+(started|begin|initialized)", HighlightKind::Info, "calibration started"),
        (r"(?i)calibration\s+(completed|finished|done)", HighlightKind::Success, "calibration finished"),
        (r"(?i)calibration\s+(failed|error)", HighlightKind::Error, "calibration failed"),
        (r"(?i)slave\s*\d+\s+actual\s+position", HighlightKind::Data, "slave position"),
        (r"(?i)warning:", HighlightKind::Warning, "warning"),
        (r"(?i)error:", HighlightKind::Error, "error"),
        (r"(?i)roslaunch.*launch", HighlightKind::Info, "ros launch"),
        (r"(?i)saving.*offset\.csv", HighlightKind::Info, "saving offsets"),
    ]
    .into_iter()
    .filter_map(|(pattern, kind, description)| {
        Regex::new(pattern).ok().map(|re| (re, kind, description))
    })
    .collect()
});

/// Pick out lines worth showing in a condensed log view
pub fn extract_log_highlights(text: &str) -> Vec<LogHighlight> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            HIGHLIGHT_PATTERNS
                .iter()
                .find(|(re, _, _)| re.is_match(line))
                .map(|(_, kind, description)| LogHighlight {
                    line_number: index + 1,
                    kind: *kind,
                    description,
                    content: line.to_string(),
                })
        })
        .collect()
}
