//! Robot Device Link
//!
//! Connectivity checks and one-shot remote commands. The production link
//! shells out to the system `ssh` program; the interactive calibration
//! shell is opened separately through [`DeviceLink::shell_command`].

use std::collections::{HashMap, HashSet};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::RwLock;

use crate::config::DeviceConfig;
use crate::error::{Error, Result};

/// Captured result of a non-interactive remote command
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Access to a robot for connectivity checks and one-shot commands
#[async_trait]
pub trait DeviceLink: Send + Sync {
    async fn is_connected(&self, robot_id: &str) -> bool;

    async fn execute(&self, robot_id: &str, command: &str) -> Result<CommandOutput>;

    /// Program and arguments that open an interactive shell on the robot
    async fn shell_command(&self, robot_id: &str) -> Result<(String, Vec<String>)>;
}

/// Where a robot is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotEndpoint {
    pub host: String,
    pub user: String,
    pub port: u16,
}

impl RobotEndpoint {
    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Device link backed by the system `ssh` client
pub struct SshDeviceLink {
    config: DeviceConfig,
    endpoints: RwLock<HashMap<String, RobotEndpoint>>,
    connected: RwLock<HashSet<String>>,
}

impl SshDeviceLink {
    pub fn new(config: DeviceConfig) -> Self {
        let endpoints = config
            .hosts
            .iter()
            .map(|(robot_id, host)| {
                (
                    robot_id.clone(),
                    RobotEndpoint {
                        host: host.clone(),
                        user: config.user.clone(),
                        port: config.port,
                    },
                )
            })
            .collect();
        Self {
            config,
            endpoints: RwLock::new(endpoints),
            connected: RwLock::new(HashSet::new()),
        }
    }

    pub async fn register(&self, robot_id: impl Into<String>, endpoint: RobotEndpoint) {
        let robot_id = robot_id.into();
        info!("Registered robot {} at {}", robot_id, endpoint.destination());
        self.endpoints.write().await.insert(robot_id, endpoint);
    }

    /// Probe the robot and remember it as connected on success
    pub async fn connect(&self, robot_id: &str) -> Result<()> {
        let endpoint = self.endpoint(robot_id).await?;
        let output = self.run_ssh(&endpoint, "true").await?;
        if !output.success {
            warn!("Connectivity probe to {} failed: {}", robot_id, output.stderr.trim());
            return Err(Error::NotConnected {
                robot_id: robot_id.to_string(),
            });
        }
        info!("Robot {} connected", robot_id);
        self.connected.write().await.insert(robot_id.to_string());
        Ok(())
    }

    pub async fn disconnect(&self, robot_id: &str) {
        if self.connected.write().await.remove(robot_id) {
            info!("Robot {} disconnected", robot_id);
        }
    }

    async fn endpoint(&self, robot_id: &str) -> Result<RobotEndpoint> {
        self.endpoints
            .read()
            .await
            .get(robot_id)
            .cloned()
            .ok_or_else(|| Error::UnknownRobot {
                robot_id: robot_id.to_string(),
            })
    }

    fn base_args(&self, endpoint: &RobotEndpoint) -> Vec<String> {
        let mut args = self.config.ssh_args.clone();
        args.extend([
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-p".to_string(),
            endpoint.port.to_string(),
        ]);
        args
    }

    async fn run_ssh(&self, endpoint: &RobotEndpoint, command: &str) -> Result<CommandOutput> {
        let mut args = self.base_args(endpoint);
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            endpoint.destination(),
            command.to_string(),
        ]);

        debug!("{} {}", self.config.ssh_program, args.join(" "));
        let child = Command::new(&self.config.ssh_program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let timeout = self.config.command_timeout();
        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| Error::CommandTimeout {
                command: command.to_string(),
                duration: timeout,
            })?
            .map_err(|e| Error::CommandFailed {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl DeviceLink for SshDeviceLink {
    async fn is_connected(&self, robot_id: &str) -> bool {
        self.connected.read().await.contains(robot_id)
    }

    async fn execute(&self, robot_id: &str, command: &str) -> Result<CommandOutput> {
        if !self.is_connected(robot_id).await {
            return Err(Error::NotConnected {
                robot_id: robot_id.to_string(),
            });
        }
        let endpoint = self.endpoint(robot_id).await?;
        self.run_ssh(&endpoint, command).await
    }

    async fn shell_command(&self, robot_id: &str) -> Result<(String, Vec<String>)> {
        let endpoint = self.endpoint(robot_id).await?;
        let mut args = self.base_args(&endpoint);
        args.push("-tt".to_string());
        args.push(endpoint.destination());
        Ok((self.config.ssh_program.clone(), args))
    }
}

/// Number of joint ids filled when the query yields nothing
const DEFAULT_JOINT_COUNT: u32 = 15;
/// Values taken from the query output
const MAX_QUERIED_JOINTS: usize = 14;

/// Parse the joint-state query output into `{joint_id -> position}`.
///
/// Accepts YAML list items (`- 0.12`), bare numbers, and inline lists
/// (`position: [0.1, 0.2]`). Falls back to zeros for ids 1..=15.
pub fn parse_joint_positions(output: &str) -> HashMap<u32, f64> {
    let mut values = Vec::new();
    for line in output.lines() {
        let trimmed = line.trim();
        let body = trimmed
            .strip_prefix("position:")
            .or_else(|| trimmed.strip_prefix("- "))
            .unwrap_or(trimmed)
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']');
        if body.is_empty() {
            continue;
        }
        let parsed: std::result::Result<Vec<f64>, _> =
            body.split(',').map(|part| part.trim().parse::<f64>()).collect();
        if let Ok(numbers) = parsed {
            values.extend(numbers);
        }
    }

    let positions: HashMap<u32, f64> = values
        .into_iter()
        .take(MAX_QUERIED_JOINTS)
        .enumerate()
        .map(|(index, value)| (index as u32 + 1, value))
        .collect();

    if positions.is_empty() {
        (1..=DEFAULT_JOINT_COUNT).map(|id| (id, 0.0)).collect()
    } else {
        positions
    }
}

/// Read the robot's current joint positions
pub async fn live_joint_positions(
    link: &dyn DeviceLink,
    robot_id: &str,
    query: &str,
) -> HashMap<u32, f64> {
    match link.execute(robot_id, query).await {
        Ok(output) if output.success => parse_joint_positions(&output.stdout),
        Ok(output) => {
            warn!("Joint state query failed on {}: {}", robot_id, output.stderr.trim());
            parse_joint_positions("")
        }
        Err(e) => {
            warn!("Joint state query failed on {}: {}", robot_id, e);
            parse_joint_positions("")
        }
    }
}

/// Probe a remote path with `test -f`
pub async fn remote_file_exists(link: &dyn DeviceLink, robot_id: &str, path: &str) -> Result<bool> {
    let output = link
        .execute(robot_id, &format!("test -f {} && echo exists || echo missing", path))
        .await?;
    Ok(output.stdout.trim() == "exists")
}
