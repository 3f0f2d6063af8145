//! Integration Tests for Session Cancellation

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;
use std::time::{Duration, Instant};

use jointcal::{
    CalibrationStep, Error, Services, SessionHandle, SessionRegistry, SessionStatus,
    ZeroPointScope,
};
use tempfile::TempDir;
use test_utils::*;

async fn start_running(
    registry: &SessionRegistry,
    scope: ZeroPointScope,
) -> SessionHandle {
    let session = registry.start_zero_point(TEST_ROBOT, scope).await.unwrap();
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
}

fn manual_registry(
    dir: &TempDir,
    script: Vec<ChannelStep>,
) -> (SessionRegistry, Arc<ScriptedChannelFactory>) {
    let channels = ScriptedChannelFactory::new(vec![script]);
    let mut config = create_test_config(dir.path());
    config.prompts.auto_respond = false;
    let services = Services::new(
        config,
        FakeDevice::new(&[TEST_ROBOT]),
        MemoryStore::new(),
        channels.clone(),
        RecordingSink::new(),
    );
    (SessionRegistry::new(services), channels)
}

#[tokio::test]
async fn test_cancel_while_waiting_for_operator() {
    let dir = TempDir::new().unwrap();
    let script = vec![
        ChannelStep::output(slave_line(1, 0.1)),
        ChannelStep::output("是否保存标定结果？(y/n): "),
        ChannelStep::AwaitInput,
        ChannelStep::output("零点标定完成！\n"),
    ];
    let (registry, channels) = manual_registry(&dir, script);
    let session = start_running(&registry, ZeroPointScope::LegsOnly).await;

    session
        .wait_until(|s| s.status == SessionStatus::WaitingForUser, TEST_TIMEOUT)
        .await
        .unwrap();

    let started = Instant::now();
    assert!(registry.cancel(session.session_id()).unwrap());
    let snapshot = session.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    assert_eq!(snapshot.status, SessionStatus::Cancelled);
    assert!(snapshot.pending_prompt.is_none());
    assert!(snapshot.completed_at.is_some());
    assert!(channels.terminated());
    assert!(channels.inputs().is_empty());
    assert!(!session.submit_response("y"));
    assert_eq!(
        session.log().last().map(String::as_str),
        Some("calibration cancelled")
    );
}

#[tokio::test]
async fn test_cancel_while_program_runs() {
    let dir = TempDir::new().unwrap();
    let script = vec![ChannelStep::output(slave_line(1, 0.1)), ChannelStep::Hang];
    let (registry, channels) = manual_registry(&dir, script);
    let session = start_running(&registry, ZeroPointScope::ArmsOnly).await;

    session
        .wait_until(|s| s.joint_measurements.iter().any(|j| j.measured), TEST_TIMEOUT)
        .await
        .unwrap();
    assert!(session.cancel());

    let snapshot = session.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
    assert!(snapshot.error_message.is_none());
    assert!(!snapshot.step_progress.calibration_saved);
    assert!(channels.terminated());
}

#[tokio::test]
async fn test_cancel_before_execution() {
    let dir = TempDir::new().unwrap();
    let (registry, channels) = manual_registry(&dir, Vec::new());
    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::FullBody)
        .await
        .unwrap();
    session.confirm_tool(0).await.unwrap();

    assert!(registry.cancel(session.session_id()).unwrap());
    let snapshot = session.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
    assert_eq!(snapshot.step, Some(CalibrationStep::ConfirmTools));
    assert_eq!(channels.opened(), 0);
}

#[tokio::test]
async fn test_cancel_after_finish_is_noop() {
    let dir = TempDir::new().unwrap();
    let registry = SessionRegistry::new(simulated_services(dir.path(), RecordingSink::new()));
    let session = registry.start_head_hand(TEST_ROBOT).await.unwrap();
    let finished = session.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(finished.status, SessionStatus::Success);

    assert!(!registry.cancel(session.session_id()).unwrap());
    assert_eq!(session.snapshot().status, SessionStatus::Success);
}

#[tokio::test]
async fn test_busy_session_rejects_step_commands() {
    let dir = TempDir::new().unwrap();
    let script = vec![ChannelStep::output(slave_line(1, 0.1)), ChannelStep::Hang];
    let (registry, _) = manual_registry(&dir, script);
    let session = start_running(&registry, ZeroPointScope::LegsOnly).await;
    session
        .wait_until(|s| s.log_len >= 2 && s.step_progress.calibration_started, TEST_TIMEOUT)
        .await
        .unwrap();

    match session.rewind(CalibrationStep::ReadConfig).await {
        Err(Error::InvalidStepTransition { operation, .. }) => {
            assert_eq!(operation, "rewind during execution");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(
        session.begin_execution().await,
        Err(Error::InvalidStepTransition { .. })
    ));
    assert!(matches!(
        session.confirm_tools_removed().await,
        Err(Error::InvalidStepTransition { .. })
    ));
    assert_eq!(session.snapshot().status, SessionStatus::Running);

    session.cancel();
    session.wait_finished(TEST_TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_cancel_simulated_prompt() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.prompts.auto_respond = false;
    let registry =
        SessionRegistry::new(Services::simulated(config, RecordingSink::new()).unwrap());
    let session = start_running(&registry, ZeroPointScope::ArmsOnly).await;

    let waiting = session
        .wait_until(|s| s.is_waiting(), TEST_TIMEOUT)
        .await
        .unwrap();
    assert!(waiting.pending_prompt.unwrap().contains("是否启动机器人控制系统"));

    assert!(registry.cancel(session.session_id()).unwrap());
    assert!(registry.active_for_robot(TEST_ROBOT).is_none());
    let snapshot = session.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_while_channel_starts() {
    let dir = TempDir::new().unwrap();
    let channels = ScriptedChannelFactory::with_start_delay(
        vec![vec![ChannelStep::output("零点标定完成！\n")]],
        Duration::from_secs(30),
    );
    let services = Services::new(
        create_test_config(dir.path()),
        FakeDevice::new(&[TEST_ROBOT]),
        MemoryStore::new(),
        channels.clone(),
        RecordingSink::new(),
    );
    let registry = SessionRegistry::new(services);

    let session = registry.start_head_hand(TEST_ROBOT).await.unwrap();
    session
        .wait_until(|s| s.step_progress.calibration_started, TEST_TIMEOUT)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cancelled_at = Instant::now();
    assert!(registry.cancel(session.session_id()).unwrap());
    let snapshot = session.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert!(cancelled_at.elapsed() < Duration::from_millis(500));
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
    // The program never got typed into the half-open channel
    assert!(channels.commands().is_empty());
    assert!(channels.terminated());
}
