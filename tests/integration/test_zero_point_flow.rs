//! Integration Tests for the Zero-Point Flow
//!
//! Full runs against the simulator, plus scripted channels for the
//! failure paths that the simulator never produces.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;

use jointcal::models::JointEdit;
use jointcal::simulator::script::BASE_SLAVE_POSITIONS;
use jointcal::store::{CalibrationStore, FileKind, LocalFileStore};
use jointcal::{
    CalibrationStep, Error, Services, SessionHandle, SessionRegistry, SessionStatus,
    ZeroPointScope,
};
use tempfile::TempDir;
use test_utils::*;

async fn confirm_all_tools(session: &SessionHandle) {
    let count = session.snapshot().tools.len();
    for index in 0..count {
        assert!(session.confirm_tool(index).await.unwrap());
    }
}

async fn wait_for_step(session: &SessionHandle, step: CalibrationStep) {
    session
        .wait_until(
            |s| s.step == Some(step) || s.status.is_terminal(),
            TEST_TIMEOUT,
        )
        .await
        .unwrap();
}

/// Registry over a scripted channel, a fake device and an in-memory store
fn scripted_registry(
    dir: &TempDir,
    scripts: Vec<Vec<ChannelStep>>,
) -> (SessionRegistry, Arc<ScriptedChannelFactory>, Arc<MemoryStore>) {
    let channels = ScriptedChannelFactory::new(scripts);
    let store = MemoryStore::new();
    let services = Services::new(
        create_test_config(dir.path()),
        FakeDevice::new(&[TEST_ROBOT]),
        store.clone(),
        channels.clone(),
        RecordingSink::new(),
    );
    (SessionRegistry::new(services), channels, store)
}

fn completed_run(slaves: &[u32]) -> Vec<ChannelStep> {
    let mut steps: Vec<ChannelStep> = slaves
        .iter()
        .map(|id| ChannelStep::output(slave_line(*id, 0.25 * *id as f64)))
        .collect();
    steps.push(ChannelStep::output("零点标定完成！\n"));
    steps
}

#[tokio::test]
async fn test_arms_only_zero_point_completes() {
    let dir = TempDir::new().unwrap();
    let sink = RecordingSink::new();
    let services = simulated_services(dir.path(), sink.clone());
    let config = services.config.clone();
    let registry = SessionRegistry::new(services);

    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly)
        .await
        .unwrap();
    let snapshot = session.snapshot();
    assert_eq!(snapshot.step, Some(CalibrationStep::ConfirmTools));
    assert_eq!(snapshot.tools.len(), 2);

    confirm_all_tools(&session).await;
    wait_for_step(&session, CalibrationStep::InitializeZero).await;

    // Only the arm file is read: joint ids 2..=15
    let snapshot = session.snapshot();
    let ids: Vec<u32> = snapshot.joint_measurements.iter().map(|j| j.id).collect();
    assert_eq!(ids, (2..=15).collect::<Vec<u32>>());
    assert!(snapshot.step_progress.config_loaded);
    assert_eq!(snapshot.step_progress.joint_count, 14);
    assert!(snapshot.step_progress.ready_to_calibrate);
    // joint_04 holds 45.0 in the mock file, beyond the zero threshold
    assert!(snapshot.warnings.iter().any(|w| w.contains("45")));

    session.begin_execution().await.unwrap();
    wait_for_step(&session, CalibrationStep::RemoveTools).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Running);
    assert_eq!(
        snapshot.step_progress.command.as_deref(),
        Some(config.calibration.arms_only_command.as_str())
    );
    assert!(snapshot.step_progress.calibration_saved);
    assert!(snapshot.step_progress.validation_completed);

    let output = session.run_verification().await.unwrap();
    assert!(output.contains("verification complete"));
    session.confirm_tools_removed().await.unwrap();

    let snapshot = session.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Success);
    assert!(snapshot.step_progress.tools_removed);
    assert!(snapshot.completed_at.is_some());
    assert!(snapshot.error_message.is_none());

    // Arm zeros now hold the measured slave positions; the legs file is untouched
    let store = LocalFileStore::new(dir.path(), &config.calibration);
    let arms = store.read(TEST_ROBOT, FileKind::ArmsZero).await.unwrap();
    let joint_2 = arms.iter().find(|j| j.id == 2).unwrap();
    assert!((joint_2.zero_position - BASE_SLAVE_POSITIONS[1]).abs() < 0.06);
    let measured_2 = snapshot
        .joint_measurements
        .iter()
        .find(|j| j.id == 2)
        .unwrap();
    assert!((joint_2.zero_position - measured_2.current_position).abs() < 1e-6);
    assert_eq!(arms.iter().find(|j| j.id == 15).unwrap().zero_position, 0.0);
    assert_eq!(
        store.backup_count(TEST_ROBOT, FileKind::ArmsZero).await.unwrap(),
        1
    );

    let legs = store.read(TEST_ROBOT, FileKind::LegsOffset).await.unwrap();
    assert_eq!(legs.iter().find(|j| j.id == 4).unwrap().offset, 60.0);
    assert_eq!(
        store.backup_count(TEST_ROBOT, FileKind::LegsOffset).await.unwrap(),
        0
    );

    assert_eq!(sink.of_type("slave_position_update").len(), 14);
}

#[tokio::test]
async fn test_full_body_writes_both_files() {
    let dir = TempDir::new().unwrap();
    let services = simulated_services(dir.path(), RecordingSink::new());
    let config = services.config.clone();
    let registry = SessionRegistry::new(services);

    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::FullBody)
        .await
        .unwrap();
    assert_eq!(session.snapshot().tools.len(), 4);
    confirm_all_tools(&session).await;
    wait_for_step(&session, CalibrationStep::InitializeZero).await;

    // Legs keep their ids, arms are shifted out of the way
    let snapshot = session.snapshot();
    assert_eq!(snapshot.joint_measurements.len(), 28);
    let legs: Vec<_> = snapshot
        .joint_measurements
        .iter()
        .filter(|j| j.id <= 14 && j.offset == 60.0)
        .collect();
    assert_eq!(legs.len(), 2);

    session.begin_execution().await.unwrap();
    wait_for_step(&session, CalibrationStep::RemoveTools).await;
    session.confirm_tools_removed().await.unwrap();
    let snapshot = session.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Success);

    let store = LocalFileStore::new(dir.path(), &config.calibration);
    let legs = store.read(TEST_ROBOT, FileKind::LegsOffset).await.unwrap();
    assert!((legs[0].offset - BASE_SLAVE_POSITIONS[0]).abs() < 0.06);
    assert_eq!(
        store.backup_count(TEST_ROBOT, FileKind::LegsOffset).await.unwrap(),
        1
    );
    // Each slave report also refreshes the arm joint with the same id
    let arms = store.read(TEST_ROBOT, FileKind::ArmsZero).await.unwrap();
    assert_eq!(arms[0].id, 2);
    assert!((arms[0].zero_position - BASE_SLAVE_POSITIONS[1]).abs() < 0.06);
    let neck = arms.iter().find(|j| j.id == 14).unwrap();
    assert!((neck.zero_position - BASE_SLAVE_POSITIONS[13]).abs() < 0.06);
    // The seeded 45.0 zero was replaced by the measurement
    assert!(arms.iter().all(|j| j.zero_position.abs() < 10.0));
    assert_eq!(
        store.backup_count(TEST_ROBOT, FileKind::ArmsZero).await.unwrap(),
        1
    );

    let snapshot = session.snapshot();
    assert_eq!(snapshot.joint_measurements.len(), 28);
    assert!(snapshot
        .joint_measurements
        .iter()
        .filter(|j| (2..=14).contains(&j.id))
        .all(|j| j.measured));
}

#[tokio::test]
async fn test_tool_index_out_of_range() {
    let dir = TempDir::new().unwrap();
    let registry = SessionRegistry::new(simulated_services(dir.path(), RecordingSink::new()));
    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();

    assert!(!session.confirm_tool(7).await.unwrap());
    let snapshot = session.snapshot();
    assert_eq!(snapshot.step, Some(CalibrationStep::ConfirmTools));
    assert!(snapshot.tools.iter().all(|t| !t.confirmed));

    assert!(session.confirm_tool(0).await.unwrap());
    let snapshot = session.snapshot();
    assert!(snapshot.tools[0].confirmed);
    assert_eq!(snapshot.step, Some(CalibrationStep::ConfirmTools));
}

#[tokio::test]
async fn test_commands_out_of_step_are_rejected() {
    let dir = TempDir::new().unwrap();
    let registry = SessionRegistry::new(simulated_services(dir.path(), RecordingSink::new()));
    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly)
        .await
        .unwrap();

    assert!(matches!(
        session.begin_execution().await,
        Err(Error::InvalidStepTransition { .. })
    ));
    assert!(matches!(
        session.confirm_tools_removed().await,
        Err(Error::InvalidStepTransition { .. })
    ));
    assert!(matches!(
        session.rewind(CalibrationStep::ReadConfig).await,
        Err(Error::InvalidStepTransition { .. })
    ));
    assert!(matches!(
        session.run_verification().await,
        Err(Error::InvalidStepTransition { .. })
    ));

    // Nothing changed
    let snapshot = session.snapshot();
    assert_eq!(snapshot.step, Some(CalibrationStep::ConfirmTools));
    assert!(snapshot.status.is_active());
    assert!(snapshot.error_message.is_none());
}

#[tokio::test]
async fn test_rewind_rereads_configuration() {
    let dir = TempDir::new().unwrap();
    let registry = SessionRegistry::new(simulated_services(dir.path(), RecordingSink::new()));
    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly)
        .await
        .unwrap();
    confirm_all_tools(&session).await;
    wait_for_step(&session, CalibrationStep::InitializeZero).await;

    session
        .confirm_config(vec![JointEdit {
            joint_id: 4,
            zero_position: Some(1.5),
            offset: None,
        }])
        .await
        .unwrap();
    let edited = session.snapshot();
    assert_eq!(
        edited.joint_measurements.iter().find(|j| j.id == 4).unwrap().zero_position,
        1.5
    );

    assert!(matches!(
        session.rewind(CalibrationStep::ConfirmTools).await,
        Err(Error::InvalidStepTransition { .. })
    ));
    session.rewind(CalibrationStep::ReadConfig).await.unwrap();

    let snapshot = session
        .wait_until(
            |s| {
                s.log_tail.iter().any(|l| l == "rewound to read_config")
                    && s.step == Some(CalibrationStep::InitializeZero)
            },
            TEST_TIMEOUT,
        )
        .await
        .unwrap();
    let joint_4 = snapshot
        .joint_measurements
        .iter()
        .find(|j| j.id == 4)
        .unwrap();
    assert_eq!(joint_4.zero_position, 45.0);
    assert_eq!(snapshot.joint_measurements.len(), 14);
    assert!(!snapshot.warnings.is_empty());
    assert!(snapshot.step_progress.tools_confirmed);
    assert!(!snapshot.step_progress.calibration_started);
}

#[tokio::test]
async fn test_manual_advance_waits_for_confirm_config() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.calibration.auto_advance = false;
    let registry = SessionRegistry::new(Services::simulated(config, RecordingSink::new()).unwrap());
    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();
    confirm_all_tools(&session).await;

    let snapshot = session
        .wait_until(|s| s.step_progress.config_loaded, TEST_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(snapshot.step, Some(CalibrationStep::ReadConfig));
    assert!(matches!(
        session.begin_execution().await,
        Err(Error::InvalidStepTransition { .. })
    ));

    session
        .confirm_config(vec![JointEdit {
            joint_id: 99,
            zero_position: Some(1.0),
            offset: None,
        }])
        .await
        .unwrap();
    let snapshot = session.snapshot();
    assert_eq!(snapshot.step, Some(CalibrationStep::InitializeZero));
    assert!(snapshot.step_progress.ready_to_calibrate);
}

#[tokio::test]
async fn test_operator_answers_prompt() {
    let dir = TempDir::new().unwrap();
    let mut script = vec![
        ChannelStep::output("是否开始标定？(y/n): "),
        ChannelStep::AwaitInput,
    ];
    script.extend(completed_run(&[1, 2, 3]));
    let channels = ScriptedChannelFactory::new(vec![script]);
    let sink = RecordingSink::new();
    let mut config = create_test_config(dir.path());
    config.prompts.auto_respond = false;
    let services = Services::new(
        config,
        FakeDevice::new(&[TEST_ROBOT]),
        MemoryStore::new(),
        channels.clone(),
        sink.clone(),
    );
    let registry = SessionRegistry::new(services);

    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();
    confirm_all_tools(&session).await;
    wait_for_step(&session, CalibrationStep::InitializeZero).await;
    session.begin_execution().await.unwrap();

    let waiting = session
        .wait_until(|s| s.is_waiting(), TEST_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(waiting.pending_prompt.as_deref(), Some("是否开始标定？(y/n):"));
    assert!(session.is_waiting_for_response());
    assert!(registry.submit_response(session.session_id(), "y").unwrap());

    wait_for_step(&session, CalibrationStep::RemoveTools).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Running);
    assert!(snapshot.pending_prompt.is_none());
    assert_eq!(channels.inputs(), vec!["y"]);
    assert!(session.log().iter().any(|l| l == "> y"));
}

#[tokio::test]
async fn test_prompt_falls_back_to_default() {
    let dir = TempDir::new().unwrap();
    let mut script = vec![
        ChannelStep::output("按 'o' 启动机器人（进入站立状态）: "),
        ChannelStep::AwaitInput,
    ];
    script.extend(completed_run(&[1, 2]));
    let (registry, channels, _) = scripted_registry(&dir, vec![script]);

    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly)
        .await
        .unwrap();
    confirm_all_tools(&session).await;
    wait_for_step(&session, CalibrationStep::InitializeZero).await;
    session.begin_execution().await.unwrap();
    wait_for_step(&session, CalibrationStep::RemoveTools).await;

    assert_eq!(channels.inputs(), vec!["o"]);
    assert!(session.log().iter().any(|l| l == "> o (default)"));
}

#[tokio::test]
async fn test_slave_line_updates_joint() {
    let dir = TempDir::new().unwrap();
    let mut script = completed_run(&[1, 2, 3, 4, 5, 6]);
    script.insert(6, ChannelStep::output("Slave 07 actual position: -6.849\n"));
    let (registry, _, store) = scripted_registry(&dir, vec![script]);

    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();
    confirm_all_tools(&session).await;
    wait_for_step(&session, CalibrationStep::InitializeZero).await;
    session.begin_execution().await.unwrap();
    wait_for_step(&session, CalibrationStep::RemoveTools).await;

    let snapshot = session.snapshot();
    let joint_7 = snapshot
        .joint_measurements
        .iter()
        .find(|j| j.id == 7)
        .unwrap();
    assert_eq!(joint_7.current_position, -6.849);
    assert!(joint_7.measured);

    let writes = store.writes();
    assert_eq!(writes.len(), 1);
    let (_, kind, records) = &writes[0];
    assert_eq!(*kind, FileKind::LegsOffset);
    assert_eq!(records.iter().find(|j| j.id == 7).unwrap().offset, -6.849);
    // Joints without a measurement keep their previous offset
    assert_eq!(records.iter().find(|j| j.id == 9).unwrap().offset, 0.5);
}

#[tokio::test]
async fn test_gap_in_measurements_fails_before_persisting() {
    let dir = TempDir::new().unwrap();
    let (registry, _, store) = scripted_registry(&dir, vec![completed_run(&[1, 2, 4])]);

    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();
    confirm_all_tools(&session).await;
    wait_for_step(&session, CalibrationStep::InitializeZero).await;
    session.begin_execution().await.unwrap();

    let snapshot = session.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Failed);
    let message = snapshot.error_message.unwrap();
    assert!(message.contains("validation failed"), "{}", message);
    assert!(message.contains('3'), "{}", message);
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_failure_keyword_fails_session() {
    let dir = TempDir::new().unwrap();
    let script = vec![
        ChannelStep::output(slave_line(1, 0.1)),
        ChannelStep::output("标定失败：电机未使能\n"),
        ChannelStep::output("零点标定完成！\n"),
    ];
    let (registry, channels, store) = scripted_registry(&dir, vec![script]);

    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();
    confirm_all_tools(&session).await;
    wait_for_step(&session, CalibrationStep::InitializeZero).await;
    session.begin_execution().await.unwrap();

    let snapshot = session.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert!(snapshot.error_message.unwrap().contains("标定失败"));
    assert!(store.writes().is_empty());
    assert!(channels.terminated());
}

#[tokio::test]
async fn test_channel_closing_without_completion_fails() {
    let dir = TempDir::new().unwrap();
    let script = vec![
        ChannelStep::output(slave_line(1, 0.1)),
        ChannelStep::output(slave_line(2, 0.2)),
    ];
    let (registry, _, store) = scripted_registry(&dir, vec![script]);

    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();
    confirm_all_tools(&session).await;
    wait_for_step(&session, CalibrationStep::InitializeZero).await;
    session.begin_execution().await.unwrap();

    let snapshot = session.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert!(snapshot.error_message.unwrap().contains("ended abnormally"));
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_persistence_failure_fails_session() {
    let dir = TempDir::new().unwrap();
    let (registry, _, store) = scripted_registry(&dir, vec![completed_run(&[1, 2])]);
    store.set_fail_writes(true);

    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();
    confirm_all_tools(&session).await;
    wait_for_step(&session, CalibrationStep::InitializeZero).await;
    session.begin_execution().await.unwrap();

    let snapshot = session.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert!(snapshot.error_message.unwrap().contains("disk full"));
    assert!(!snapshot.step_progress.calibration_saved);
}

#[tokio::test]
async fn test_summary_recomputed_from_log() {
    let dir = TempDir::new().unwrap();
    let (registry, _, _) = scripted_registry(&dir, vec![completed_run(&[1, 2, 3])]);

    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();
    confirm_all_tools(&session).await;
    wait_for_step(&session, CalibrationStep::InitializeZero).await;
    session.begin_execution().await.unwrap();
    wait_for_step(&session, CalibrationStep::RemoveTools).await;

    let summary = registry.summary(session.session_id()).unwrap();
    assert_eq!(summary.summary.total_slaves, 3);
    assert_eq!(summary.summary.successful_readings, 3);
    assert_eq!(
        summary.summary.verdict,
        jointcal::parser::SummaryVerdict::Completed
    );
    assert!(summary.validation.is_valid);
}
