//! Core data models for jointcal
//!
//! Session identity and lifecycle types, joint records shared by the
//! calibration files and the session state, and slave measurements
//! extracted from device output.

pub mod joint;
pub mod measurement;
pub mod session;

// Re-exports for convenience
pub use joint::{canonical_joint_name, HealthFlag, JointEdit, JointGroup, JointRecord};
pub use measurement::{MeasurementFormat, SlaveMeasurement};
pub use session::{
    CalibrationKind, CalibrationStep, SessionSnapshot, SessionStatus, StepProgress, ToolItem,
    ZeroPointScope,
};
