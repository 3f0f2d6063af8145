//! Integration Tests for Session Admission
//!
//! One active session per robot, independent robots in parallel.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;

use jointcal::{Error, Services, SessionRegistry, SessionStatus, ZeroPointScope};
use tempfile::TempDir;
use test_utils::*;

const OTHER_ROBOT: &str = "sim-robot-2";

fn idle_registry(dir: &TempDir, robots: &[&str]) -> (SessionRegistry, Arc<FakeDevice>) {
    let device = FakeDevice::new(robots);
    let services = Services::new(
        create_test_config(dir.path()),
        device.clone(),
        MemoryStore::new(),
        ScriptedChannelFactory::new(Vec::new()),
        RecordingSink::new(),
    );
    (SessionRegistry::new(services), device)
}

#[tokio::test]
async fn test_second_session_on_robot_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (registry, _) = idle_registry(&dir, &[TEST_ROBOT]);

    let first = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly)
        .await
        .unwrap();
    match registry.start_head_hand(TEST_ROBOT).await {
        Err(Error::AlreadyRunning {
            robot_id,
            session_id,
        }) => {
            assert_eq!(robot_id, TEST_ROBOT);
            assert_eq!(session_id, first.session_id());
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("second session admitted"),
    }
    assert_eq!(registry.list().len(), 1);
    assert!(first.snapshot().status.is_active());
}

#[tokio::test]
async fn test_robots_run_in_parallel() {
    let dir = TempDir::new().unwrap();
    let (registry, _) = idle_registry(&dir, &[TEST_ROBOT, OTHER_ROBOT]);

    let a = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly)
        .await
        .unwrap();
    let b = registry
        .start_zero_point(OTHER_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();
    assert_ne!(a.session_id(), b.session_id());
    assert_eq!(
        registry.active_for_robot(OTHER_ROBOT).unwrap().session_id(),
        b.session_id()
    );

    // Progress on one robot does not touch the other
    a.confirm_tool(0).await.unwrap();
    assert!(b.snapshot().tools.iter().all(|t| !t.confirmed));
}

#[tokio::test]
async fn test_restart_after_cancel() {
    let dir = TempDir::new().unwrap();
    let (registry, _) = idle_registry(&dir, &[TEST_ROBOT]);

    let first = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::FullBody)
        .await
        .unwrap();
    assert!(registry.cancel(first.session_id()).unwrap());

    // The slot is released by the cancel itself, not by the task winding down
    let second = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::FullBody)
        .await
        .unwrap();
    assert_ne!(first.session_id(), second.session_id());

    let snapshot = first.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
    assert!(second.snapshot().status.is_active());
}

#[tokio::test]
async fn test_restart_after_failure() {
    let dir = TempDir::new().unwrap();
    let channels = ScriptedChannelFactory::new(vec![vec![ChannelStep::output("boom\n")]]);
    let services = Services::new(
        create_test_config(dir.path()),
        FakeDevice::new(&[TEST_ROBOT]),
        MemoryStore::new(),
        channels,
        RecordingSink::new(),
    );
    let registry = SessionRegistry::new(services);

    let failed = registry.start_head_hand(TEST_ROBOT).await.unwrap();
    let snapshot = failed.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Failed);

    let next = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly)
        .await
        .unwrap();
    assert!(next.snapshot().status.is_active());
    // Admission forgets the failed session; its handle still answers
    assert!(matches!(
        registry.snapshot(failed.session_id()),
        Err(Error::SessionNotFound { .. })
    ));
    assert_eq!(failed.snapshot().status, SessionStatus::Failed);
}

#[tokio::test]
async fn test_admission_drops_finished_sessions() {
    let dir = TempDir::new().unwrap();
    let (registry, _) = idle_registry(&dir, &[TEST_ROBOT]);

    for _ in 0..5 {
        let session = registry
            .start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly)
            .await
            .unwrap();
        assert_eq!(registry.list().len(), 1);
        registry.cancel(session.session_id()).unwrap();
        session.wait_finished(TEST_TIMEOUT).await.unwrap();
    }

    let last = registry.start_head_hand(TEST_ROBOT).await.unwrap();
    let listed: Vec<String> = registry
        .list()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert_eq!(listed, vec![last.session_id().to_string()]);
}

#[tokio::test]
async fn test_disconnected_robot_is_refused() {
    let dir = TempDir::new().unwrap();
    let (registry, device) = idle_registry(&dir, &[TEST_ROBOT]);
    device.disconnect(TEST_ROBOT);

    assert!(matches!(
        registry
            .start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly)
            .await,
        Err(Error::NotConnected { .. })
    ));
    assert!(matches!(
        registry.start_head_hand("unknown-robot").await,
        Err(Error::NotConnected { .. })
    ));
    assert!(registry.list().is_empty());
}

#[tokio::test]
async fn test_stale_session_is_reclaimed() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.calibration.stale_session_secs = 0;
    let services = Services::new(
        config,
        FakeDevice::new(&[TEST_ROBOT]),
        MemoryStore::new(),
        ScriptedChannelFactory::new(Vec::new()),
        RecordingSink::new(),
    );
    let registry = SessionRegistry::new(services);

    let stale = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let fresh = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly)
        .await
        .unwrap();

    let snapshot = stale.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
    assert_eq!(
        registry.active_for_robot(TEST_ROBOT).unwrap().session_id(),
        fresh.session_id()
    );
}

#[tokio::test]
async fn test_unknown_session_ids() {
    let dir = TempDir::new().unwrap();
    let (registry, _) = idle_registry(&dir, &[TEST_ROBOT]);

    assert!(matches!(
        registry.get("missing"),
        Err(Error::SessionNotFound { .. })
    ));
    assert!(matches!(
        registry.cancel("missing"),
        Err(Error::SessionNotFound { .. })
    ));
    assert!(matches!(
        registry.submit_response("missing", "y"),
        Err(Error::SessionNotFound { .. })
    ));
    assert!(matches!(
        registry.summary("missing"),
        Err(Error::SessionNotFound { .. })
    ));
}

#[tokio::test]
async fn test_response_without_prompt_is_ignored() {
    let dir = TempDir::new().unwrap();
    let (registry, _) = idle_registry(&dir, &[TEST_ROBOT]);
    let session = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();
    let before = session.snapshot();

    assert!(!registry.submit_response(session.session_id(), "y").unwrap());

    let after = session.snapshot();
    assert_eq!(after.status, before.status);
    assert_eq!(after.step, before.step);
    assert_eq!(after.log_len, before.log_len);
}

#[tokio::test]
async fn test_reap_and_cleanup() {
    let dir = TempDir::new().unwrap();
    let (registry, _) = idle_registry(&dir, &[TEST_ROBOT, OTHER_ROBOT]);

    let done = registry
        .start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let live = registry
        .start_zero_point(OTHER_ROBOT, ZeroPointScope::ArmsOnly)
        .await
        .unwrap();
    registry.cancel(done.session_id()).unwrap();
    done.wait_finished(TEST_TIMEOUT).await.unwrap();

    let listed: Vec<String> = registry
        .list()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert_eq!(listed, vec![done.session_id(), live.session_id()]);

    assert_eq!(registry.reap_finished(), 1);
    assert!(registry.get(done.session_id()).is_err());
    assert_eq!(registry.reap_finished(), 0);

    registry.cleanup(live.session_id()).unwrap();
    assert!(registry.list().is_empty());
    assert!(registry.active_for_robot(OTHER_ROBOT).is_none());
    let snapshot = live.wait_finished(TEST_TIMEOUT).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn test_shutdown_cancels_everything() {
    let dir = TempDir::new().unwrap();
    let (registry, _) = idle_registry(&dir, &[TEST_ROBOT, OTHER_ROBOT]);
    let a = registry.start_head_hand(TEST_ROBOT).await.unwrap();
    let b = registry
        .start_zero_point(OTHER_ROBOT, ZeroPointScope::LegsOnly)
        .await
        .unwrap();

    registry.shutdown().await;

    // Tasks have exited, so the final status is already published
    for session in [&a, &b] {
        let status = session.snapshot().status;
        assert!(status.is_terminal(), "{}", status);
    }
    assert_eq!(b.snapshot().status, SessionStatus::Cancelled);
    assert!(registry.active_for_robot(TEST_ROBOT).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_one() {
    let dir = TempDir::new().unwrap();
    let (registry, _) = idle_registry(&dir, &[TEST_ROBOT]);

    let attempts = (0..8).map(|_| registry.start_zero_point(TEST_ROBOT, ZeroPointScope::ArmsOnly));
    let results = futures::future::join_all(attempts).await;

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(Error::AlreadyRunning { .. })))
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(rejected, 7);
}
