//! Simulated robot link and calibration files

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;

use super::script::BASE_SLAVE_POSITIONS;
use crate::config::Config;
use crate::device::{CommandOutput, DeviceLink};
use crate::error::{Error, Result};
use crate::store::{FileKind, LocalFileStore};

/// Upper-body zero file shipped with a fresh simulated robot
pub const MOCK_ARMS_ZERO_YAML: &str = "\
# upper body zero positions
# 2-7: left arm, 8-13: right arm, 14-15: head
joint_02: 0.0
joint_03: -15.0
joint_04: 45.0
joint_05: -30.0
joint_06: 0.0
joint_07: 0.0
joint_08: 0.0
joint_09: 15.0
joint_10: -45.0
joint_11: 30.0
joint_12: 0.0
joint_13: 0.0
neck_01: 0.0
neck_02: 0.0
";

/// Leg offset file shipped with a fresh simulated robot
pub const MOCK_OFFSET_CSV: &str = "\
0.0
0.0
-30.0
60.0
-30.0
0.0
0.0
0.0
-30.0
60.0
-30.0
0.0
0.0
0.0
";

/// Write the mock calibration files for `robot_id` unless they already exist
pub fn seed_mock_files(store: &LocalFileStore, robot_id: &str) -> Result<()> {
    for (kind, content) in [
        (FileKind::ArmsZero, MOCK_ARMS_ZERO_YAML),
        (FileKind::LegsOffset, MOCK_OFFSET_CSV),
    ] {
        if !store.path_for(robot_id, kind).exists() {
            let path = store.seed(robot_id, kind, content)?;
            debug!("Seeded simulated {} at {}", kind.label(), path.display());
        }
    }
    Ok(())
}

/// Device link answering like a connected robot
pub struct SimulatedDevice {
    connected: RwLock<HashSet<String>>,
    joint_state_command: String,
    verification_command: String,
    rng: Mutex<StdRng>,
}

impl SimulatedDevice {
    pub fn new(config: &Config) -> Self {
        let rng = match config.simulator.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            connected: RwLock::new(config.simulator.robots.iter().cloned().collect()),
            joint_state_command: config.device.joint_state_command.clone(),
            verification_command: config.calibration.verification_command.clone(),
            rng: Mutex::new(rng),
        }
    }

    pub async fn connect(&self, robot_id: &str) {
        info!("Simulated robot {} connected", robot_id);
        self.connected.write().await.insert(robot_id.to_string());
    }

    pub async fn disconnect(&self, robot_id: &str) {
        if self.connected.write().await.remove(robot_id) {
            info!("Simulated robot {} disconnected", robot_id);
        }
    }

    fn joint_state_output(&self) -> String {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let values: Vec<String> = BASE_SLAVE_POSITIONS
            .iter()
            .map(|base| format!("{:.6}", base + rng.gen_range(-0.01..0.01)))
            .collect();
        format!("position: [{}]\n", values.join(", "))
    }

    fn verification_output() -> String {
        [
            "joint check: all 14 joints responding",
            "zero offsets loaded",
            "verification complete",
        ]
        .join("\n")
    }
}

#[async_trait]
impl DeviceLink for SimulatedDevice {
    async fn is_connected(&self, robot_id: &str) -> bool {
        self.connected.read().await.contains(robot_id)
    }

    async fn execute(&self, robot_id: &str, command: &str) -> Result<CommandOutput> {
        if !self.is_connected(robot_id).await {
            return Err(Error::NotConnected {
                robot_id: robot_id.to_string(),
            });
        }

        let command = command.trim();
        let output = if command == self.joint_state_command {
            CommandOutput::ok(self.joint_state_output())
        } else if !self.verification_command.is_empty() && command == self.verification_command {
            CommandOutput::ok(Self::verification_output())
        } else if command.starts_with("rosversion") {
            CommandOutput::ok("1.2.3-sim")
        } else {
            CommandOutput::ok(format!("Command executed: {}", command))
        };
        Ok(output)
    }

    async fn shell_command(&self, robot_id: &str) -> Result<(String, Vec<String>)> {
        Err(Error::CommandFailed {
            command: format!("interactive shell on {}", robot_id),
            reason: "simulated robots run programs in-process".to_string(),
        })
    }
}
