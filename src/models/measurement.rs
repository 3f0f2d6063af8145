//! Slave Measurements
//!
//! A position report for one EtherCAT slave, as extracted from a
//! single line of calibration output.

use serde::{Deserialize, Serialize};

/// Line format a measurement was recognized in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementFormat {
    /// `Slave 07 actual position: -16.849`
    Plain,
    /// `Joint 3 position: 1.25`
    Joint,
    /// `[slave_3] position: 1.25`
    Bracketed,
    /// `3    1.25    actual`
    Tabular,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaveMeasurement {
    pub slave_id: u32,
    pub position: f64,
    pub joint_name: String,
    pub format: MeasurementFormat,
    pub raw_line: String,
}
