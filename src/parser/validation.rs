//! Measurement batch validation

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::models::SlaveMeasurement;

/// Largest plausible joint position magnitude, in radians
pub const POSITION_BOUND: f64 = 10.0;

/// Missing ids listed by value in a gap message
const LISTED_MISSING_IDS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub messages: Vec<String>,
}

/// Validate a batch against the default position bound
pub fn validate(measurements: &[SlaveMeasurement]) -> ValidationReport {
    validate_with_bound(measurements, POSITION_BOUND)
}

/// Check a batch of measurements for completeness and plausibility.
///
/// Missing ids in `1..=max_id` and out-of-range positions invalidate the
/// batch; duplicates are reported but do not.
pub fn validate_with_bound(measurements: &[SlaveMeasurement], bound: f64) -> ValidationReport {
    if measurements.is_empty() {
        return ValidationReport {
            is_valid: false,
            messages: vec!["No slave position data detected".to_string()],
        };
    }

    let mut messages = Vec::new();
    let mut is_valid = true;

    let present: BTreeSet<u32> = measurements.iter().map(|m| m.slave_id).collect();
    let max_id = present.iter().next_back().copied().unwrap_or(0);
    let missing_count = max_id as usize - present.iter().filter(|id| **id >= 1).count();
    if missing_count > 0 {
        let listed: Vec<u32> = (1..=max_id)
            .filter(|id| !present.contains(id))
            .take(LISTED_MISSING_IDS)
            .collect();
        if missing_count > listed.len() {
            messages.push(format!(
                "Missing slave data: {} ids, first {:?}",
                missing_count, listed
            ));
        } else {
            messages.push(format!("Missing slave data: {:?}", listed));
        }
        is_valid = false;
    }

    let mut seen = HashSet::new();
    let duplicates: BTreeSet<u32> = measurements
        .iter()
        .filter(|m| !seen.insert(m.slave_id))
        .map(|m| m.slave_id)
        .collect();
    if !duplicates.is_empty() {
        messages.push(format!(
            "Duplicate slave data: {:?}",
            duplicates.into_iter().collect::<Vec<_>>()
        ));
    }

    let out_of_range: Vec<String> = measurements
        .iter()
        .filter(|m| m.position.abs() > bound)
        .map(|m| format!("Slave {}: {}", m.slave_id, m.position))
        .collect();
    if !out_of_range.is_empty() {
        messages.push(format!("Implausible positions: {}", out_of_range.join(", ")));
        is_valid = false;
    }

    if is_valid && messages.is_empty() {
        messages.push(format!(
            "Parsed {} slave positions, data complete and plausible",
            measurements.len()
        ));
    }

    ValidationReport { is_valid, messages }
}
