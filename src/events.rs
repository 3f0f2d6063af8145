//! Calibration Event Broadcasting
//!
//! Sessions publish progress as typed events. Each event serializes to
//! `{"type": ..., "data": {...}}` and is addressed to the robot it
//! concerns; subscribers can follow one robot or all of them.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{CalibrationStep, SessionStatus, StepProgress};

/// Events emitted by calibration sessions
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CalibrationEvent {
    /// One line of calibration output or a session note
    CalibrationLog {
        session_id: String,
        robot_id: String,
        log: String,
    },
    /// Lifecycle change, prompt or failure
    CalibrationStatus {
        session_id: String,
        robot_id: String,
        calibration_type: String,
        status: SessionStatus,
        current_step: Option<CalibrationStep>,
        user_prompt: Option<String>,
        error_message: Option<String>,
    },
    /// Zero-point step progress
    ZeroPointCalibrationUpdate {
        session_id: String,
        robot_id: String,
        calibration_type: String,
        current_step: Option<CalibrationStep>,
        status: SessionStatus,
        step_progress: StepProgress,
        warnings: Vec<String>,
        error_message: Option<String>,
        joint_data_count: usize,
    },
    /// A slave position parsed from output
    SlavePositionUpdate {
        session_id: String,
        robot_id: String,
        slave_id: u32,
        position: f64,
        joint_name: String,
        raw_line: String,
    },
}

impl CalibrationEvent {
    pub fn session_id(&self) -> &str {
        match self {
            CalibrationEvent::CalibrationLog { session_id, .. }
            | CalibrationEvent::CalibrationStatus { session_id, .. }
            | CalibrationEvent::ZeroPointCalibrationUpdate { session_id, .. }
            | CalibrationEvent::SlavePositionUpdate { session_id, .. } => session_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CalibrationEvent::CalibrationLog { .. } => "calibration_log",
            CalibrationEvent::CalibrationStatus { .. } => "calibration_status",
            CalibrationEvent::ZeroPointCalibrationUpdate { .. } => "zero_point_calibration_update",
            CalibrationEvent::SlavePositionUpdate { .. } => "slave_position_update",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Destination for session events
pub trait EventSink: Send + Sync {
    fn broadcast(&self, robot_id: &str, event: CalibrationEvent);
}

/// An event together with the robot it is addressed to
#[derive(Debug, Clone)]
pub struct RobotEvent {
    pub robot_id: String,
    pub event: CalibrationEvent,
}

/// Event bus for calibration events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RobotEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Follow every robot
    pub fn subscribe(&self) -> RobotSubscription {
        RobotSubscription {
            receiver: self.sender.subscribe(),
            robot_id: None,
        }
    }

    /// Follow a single robot
    pub fn subscribe_robot(&self, robot_id: impl Into<String>) -> RobotSubscription {
        RobotSubscription {
            receiver: self.sender.subscribe(),
            robot_id: Some(robot_id.into()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for EventBus {
    fn broadcast(&self, robot_id: &str, event: CalibrationEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(RobotEvent {
            robot_id: robot_id.to_string(),
            event,
        });
    }
}

/// Subscription handle, optionally filtered to one robot
pub struct RobotSubscription {
    receiver: broadcast::Receiver<RobotEvent>,
    robot_id: Option<String>,
}

impl RobotSubscription {
    fn accepts(&self, event: &RobotEvent) -> bool {
        self.robot_id
            .as_deref()
            .map_or(true, |robot_id| robot_id == event.robot_id)
    }

    /// Receive the next event for this subscription
    pub async fn recv(&mut self) -> Option<RobotEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!("Calibration event subscriber lagged by {} events", count);
                }
            }
        }
    }

    /// Receive without waiting
    pub fn try_recv(&mut self) -> Option<RobotEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!("Calibration event subscriber lagged by {} events", count);
                }
                Err(_) => return None,
            }
        }
    }
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn broadcast(&self, _robot_id: &str, _event: CalibrationEvent) {}
}
