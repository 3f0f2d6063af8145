//! Contract Tests for Event Payloads
//!
//! Front ends depend on the JSON shape and on the order in which a
//! session emits its events.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;

use jointcal::models::StepProgress;
use jointcal::{
    CalibrationEvent, CalibrationStep, EventBus, EventSink, SessionRegistry, SessionStatus,
    ZeroPointScope,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use test_utils::*;

fn to_value(event: &CalibrationEvent) -> Value {
    serde_json::from_str(&event.to_json().unwrap()).unwrap()
}

#[test]
fn test_slave_update_shape() {
    let event = CalibrationEvent::SlavePositionUpdate {
        session_id: "s-1".to_string(),
        robot_id: "r-1".to_string(),
        slave_id: 3,
        position: 1.2521667,
        joint_name: "slave_03".to_string(),
        raw_line: "Slave 3 actual position 1.2521667".to_string(),
    };
    assert_eq!(event.type_name(), "slave_position_update");
    assert_eq!(
        to_value(&event),
        json!({
            "type": "slave_position_update",
            "data": {
                "session_id": "s-1",
                "robot_id": "r-1",
                "slave_id": 3,
                "position": 1.2521667,
                "joint_name": "slave_03",
                "raw_line": "Slave 3 actual position 1.2521667",
            }
        })
    );
}

#[test]
fn test_status_shape() {
    let event = CalibrationEvent::CalibrationStatus {
        session_id: "s-1".to_string(),
        robot_id: "r-1".to_string(),
        calibration_type: "zero_point".to_string(),
        status: SessionStatus::WaitingForUser,
        current_step: Some(CalibrationStep::InitializeZero),
        user_prompt: Some("是否开始标定？(y/n):".to_string()),
        error_message: None,
    };
    let value = to_value(&event);
    assert_eq!(value["type"], "calibration_status");
    assert_eq!(value["data"]["status"], "waiting_for_user");
    assert_eq!(value["data"]["current_step"], "initialize_zero");
    assert_eq!(value["data"]["user_prompt"], "是否开始标定？(y/n):");
    assert!(value["data"]["error_message"].is_null());
}

#[test]
fn test_zero_point_update_shape() {
    let progress = StepProgress {
        tools_confirmed: true,
        config_loaded: true,
        joint_count: 14,
        ..StepProgress::default()
    };
    let event = CalibrationEvent::ZeroPointCalibrationUpdate {
        session_id: "s-1".to_string(),
        robot_id: "r-1".to_string(),
        calibration_type: "zero_point".to_string(),
        current_step: Some(CalibrationStep::ReadConfig),
        status: SessionStatus::Running,
        step_progress: progress,
        warnings: vec!["left_arm_03: zero position out of range (45.000)".to_string()],
        error_message: None,
        joint_data_count: 14,
    };
    let value = to_value(&event);
    let progress = &value["data"]["step_progress"];
    assert_eq!(progress["tools_confirmed"], true);
    assert_eq!(progress["joint_count"], 14);
    // Unset optional progress fields are left out entirely
    assert!(progress.get("command").is_none());
    assert!(progress.get("calibration_warnings").is_none());
    assert_eq!(value["data"]["joint_data_count"], 14);
    assert_eq!(value["data"]["warnings"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_log_event_precedes_slave_update() {
    let dir = TempDir::new().unwrap();
    let sink = RecordingSink::new();
    let registry = SessionRegistry::new(simulated_services(dir.path(), sink.clone()));

    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();
    for index in 0..session.snapshot().tools.len() {
        session.confirm_tool(index).await.unwrap();
    }
    session
        .wait_until(
            |s| s.step == Some(CalibrationStep::InitializeZero),
            TEST_TIMEOUT,
        )
        .await
        .unwrap();
    session.begin_execution().await.unwrap();
    session
        .wait_until(
            |s| s.step == Some(CalibrationStep::RemoveTools) || s.status.is_terminal(),
            TEST_TIMEOUT,
        )
        .await
        .unwrap();

    let events: Vec<CalibrationEvent> = sink.events().into_iter().map(|e| e.event).collect();
    assert!(events.iter().all(|e| e.session_id() == session.session_id()));

    let mut updates = 0;
    for (index, event) in events.iter().enumerate() {
        if let CalibrationEvent::SlavePositionUpdate { raw_line, .. } = event {
            updates += 1;
            let logged_before = events[..index].iter().rev().find_map(|e| match e {
                CalibrationEvent::CalibrationLog { log, .. } => Some(log),
                _ => None,
            });
            assert_eq!(logged_before.map(String::as_str), Some(raw_line.as_str()));
        }
    }
    assert_eq!(updates, 14);

    // Slave ids arrive in output order
    let ids: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            CalibrationEvent::SlavePositionUpdate { slave_id, .. } => Some(*slave_id),
            _ => None,
        })
        .collect();
    assert_eq!(ids, (1..=14).collect::<Vec<u32>>());
}

#[tokio::test]
async fn test_bus_filters_by_robot() {
    let bus = Arc::new(EventBus::new(16));
    let mut all = bus.subscribe();
    let mut only_b = bus.subscribe_robot("robot-b");
    assert_eq!(bus.subscriber_count(), 2);

    for robot in ["robot-a", "robot-b"] {
        bus.broadcast(
            robot,
            CalibrationEvent::CalibrationLog {
                session_id: "s".to_string(),
                robot_id: robot.to_string(),
                log: format!("hello from {}", robot),
            },
        );
    }

    assert_eq!(all.recv().await.unwrap().robot_id, "robot-a");
    assert_eq!(all.recv().await.unwrap().robot_id, "robot-b");
    let event = only_b.recv().await.unwrap();
    assert_eq!(event.robot_id, "robot-b");
    assert!(only_b.try_recv().is_none());
}
