//! Contract Tests for Interactive Channels
//!
//! Both backends must honor the same start/read/send/terminate contract.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::time::Duration;

use jointcal::channel::{ChannelRead, InteractiveChannel, LineAssembler, PtyChannel};
use jointcal::simulator::{SimulatedChannel, SimulatedChannelFactory};
use jointcal::channel::ChannelFactory;
use jointcal::Error;
use tempfile::TempDir;
use test_utils::*;

const POLL: Duration = Duration::from_millis(20);

/// Read until the channel closes, returning the complete lines seen
async fn drain_lines(channel: &mut dyn InteractiveChannel) -> Vec<String> {
    let mut assembler = LineAssembler::new();
    let mut lines = Vec::new();
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        match channel.read_chunk(POLL).await.unwrap() {
            ChannelRead::Data(chunk) => lines.extend(assembler.push(&chunk)),
            ChannelRead::Idle => {}
            ChannelRead::Closed => break,
        }
    }
    lines.extend(assembler.take_fragment());
    lines
}

/// Read until the unterminated tail contains `needle`
async fn read_until_fragment(channel: &mut dyn InteractiveChannel, needle: &str) -> String {
    let mut assembler = LineAssembler::new();
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if let ChannelRead::Data(chunk) = channel.read_chunk(POLL).await.unwrap() {
            assembler.push(&chunk);
        }
        if let Some(fragment) = assembler.fragment() {
            if fragment.contains(needle) {
                return fragment;
            }
        }
    }
    panic!("prompt containing '{}' never arrived", needle);
}

fn simulated_channel(dir: &TempDir) -> SimulatedChannel {
    let config = create_test_config(dir.path());
    SimulatedChannel::new(config.simulator, config.calibration)
}

#[tokio::test]
async fn test_simulated_prompt_blocks_until_input() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let mut channel = simulated_channel(&dir);
    channel
        .start(&config.calibration.head_hand_command)
        .await
        .unwrap();
    assert!(channel.is_alive());

    let prompt = read_until_fragment(&mut channel, "是否开始一键标定流程").await;
    assert!(prompt.ends_with("(y/n):"));

    // No answer yet, so nothing more arrives
    assert_eq!(channel.read_chunk(POLL).await.unwrap(), ChannelRead::Idle);

    channel.send("n").await.unwrap();
    let lines = drain_lines(&mut channel).await;
    assert!(lines.iter().any(|l| l == "用户取消操作"));
    assert_eq!(channel.read_chunk(POLL).await.unwrap(), ChannelRead::Closed);
}

#[tokio::test]
async fn test_simulated_terminate_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let mut channel = simulated_channel(&dir);
    channel
        .start(&config.calibration.arms_only_command)
        .await
        .unwrap();
    read_until_fragment(&mut channel, "是否启动机器人控制系统").await;

    channel.terminate().await.unwrap();
    channel.terminate().await.unwrap();
    assert!(!channel.is_alive());
    assert_eq!(channel.read_chunk(POLL).await.unwrap(), ChannelRead::Closed);
    assert!(channel.send("y").await.is_err());
}

#[tokio::test]
async fn test_simulated_unknown_command() {
    let dir = TempDir::new().unwrap();
    let mut channel = simulated_channel(&dir);
    channel.start("not-a-calibration --flag").await.unwrap();
    let lines = drain_lines(&mut channel).await;
    assert_eq!(lines, vec!["bash: not-a-calibration: command not found"]);
}

#[tokio::test]
async fn test_channel_lifecycle_errors() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let mut channel = simulated_channel(&dir);

    assert!(matches!(
        channel.read_chunk(POLL).await,
        Err(Error::ChannelNotStarted)
    ));
    assert!(matches!(
        channel.send("y").await,
        Err(Error::ChannelNotStarted)
    ));

    channel
        .start(&config.calibration.head_hand_command)
        .await
        .unwrap();
    assert!(matches!(
        channel.start(&config.calibration.head_hand_command).await,
        Err(Error::ChannelAlreadyStarted)
    ));
    channel.terminate().await.unwrap();
}

#[tokio::test]
async fn test_simulated_factory_knows_its_robots() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let factory = SimulatedChannelFactory::new(config.simulator, config.calibration);

    let channel = factory.open(TEST_ROBOT).await.unwrap();
    assert_eq!(channel.backend_name(), "simulator");
    assert!(matches!(
        factory.open("robot-that-does-not-exist").await,
        Err(Error::UnknownRobot { .. })
    ));
}

#[tokio::test]
async fn test_pty_runs_command_to_exit() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let mut channel = PtyChannel::new("sh", Vec::new(), config.channel);

    match channel.start("echo jointcal-$((40 + 2))").await {
        Ok(()) => {}
        Err(e) => {
            // Sandboxed environments may not provide a PTY
            eprintln!("skipping PTY contract: {}", e);
            return;
        }
    }
    assert!(channel.pid().is_some());

    let lines = drain_lines(&mut channel).await;
    assert!(
        lines.iter().any(|l| l.trim() == "jointcal-42"),
        "output: {:?}",
        lines
    );
    assert_eq!(channel.read_chunk(POLL).await.unwrap(), ChannelRead::Closed);
    assert!(!channel.is_alive());
    channel.terminate().await.unwrap();
}

#[tokio::test]
async fn test_pty_terminate_interrupts_running_command() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let mut channel = PtyChannel::new("sh", Vec::new(), config.channel);
    if let Err(e) = channel.start("sleep 30").await {
        eprintln!("skipping PTY contract: {}", e);
        return;
    }

    let started = std::time::Instant::now();
    channel.terminate().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!channel.is_alive());
    assert!(matches!(
        channel.start("true").await,
        Err(Error::ChannelAlreadyStarted)
    ));
}
