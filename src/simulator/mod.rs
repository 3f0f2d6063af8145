//! Robot Simulator
//!
//! In-process stand-ins for the robot: a scripted interactive channel
//! and a device link with local calibration files. Sessions drive them
//! exactly as they drive the real backends.

pub mod device;
pub mod script;

pub use device::{seed_mock_files, SimulatedDevice, MOCK_ARMS_ZERO_YAML, MOCK_OFFSET_CSV};
pub use script::{Accept, OnReject, Script, ScriptStep};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::channel::{ChannelFactory, ChannelRead, InteractiveChannel};
use crate::config::{CalibrationConfig, SimulatorConfig};
use crate::error::{Error, Result};

/// Pick the program a command line would run
pub fn script_for_command(
    command: &str,
    calibration: &CalibrationConfig,
    rng: Option<&mut StdRng>,
) -> Script {
    let command = command.trim();
    let zero_point_commands = [
        calibration.full_body_command.as_str(),
        calibration.arms_only_command.as_str(),
        calibration.legs_only_command.as_str(),
    ];

    if zero_point_commands.contains(&command) {
        script::zero_point(rng)
    } else if command == calibration.head_hand_command {
        script::head_hand()
    } else {
        script::unknown_command(command)
    }
}

/// Interactive channel backed by a scripted program
pub struct SimulatedChannel {
    config: SimulatorConfig,
    calibration: CalibrationConfig,
    rng: Option<StdRng>,
    output_rx: Option<UnboundedReceiver<String>>,
    input_tx: Option<UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
    started: bool,
}

impl SimulatedChannel {
    pub fn new(config: SimulatorConfig, calibration: CalibrationConfig) -> Self {
        let rng = config.seed.map(StdRng::seed_from_u64);
        Self {
            config,
            calibration,
            rng,
            output_rx: None,
            input_tx: None,
            task: None,
            started: false,
        }
    }

    /// Run an explicit script instead of resolving one from the command
    pub fn start_script(&mut self, script: Script) -> Result<()> {
        if self.started {
            return Err(Error::ChannelAlreadyStarted);
        }
        self.started = true;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        debug!("Simulator running script '{}'", script.name);
        self.task = Some(tokio::spawn(run_script(
            script,
            self.config.clone(),
            out_tx,
            in_rx,
        )));
        self.output_rx = Some(out_rx);
        self.input_tx = Some(in_tx);
        Ok(())
    }
}

#[async_trait]
impl InteractiveChannel for SimulatedChannel {
    async fn start(&mut self, command: &str) -> Result<()> {
        let script = script_for_command(command, &self.calibration, self.rng.as_mut());
        self.start_script(script)
    }

    async fn read_chunk(&mut self, wait: Duration) -> Result<ChannelRead> {
        let Some(rx) = self.output_rx.as_mut() else {
            return if self.started {
                Ok(ChannelRead::Closed)
            } else {
                Err(Error::ChannelNotStarted)
            };
        };

        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(chunk)) => Ok(ChannelRead::Data(chunk)),
            Ok(None) => {
                self.output_rx = None;
                Ok(ChannelRead::Closed)
            }
            Err(_) => Ok(ChannelRead::Idle),
        }
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        let tx = self.input_tx.as_ref().ok_or(Error::ChannelNotStarted)?;
        tx.send(text.to_string())
            .map_err(|_| Error::PtyInputSendFailed {
                reason: "simulated program has exited".to_string(),
            })
    }

    fn is_alive(&mut self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    async fn terminate(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Simulated program aborted");
        }
        self.input_tx = None;
        self.output_rx = None;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "simulator"
    }
}

impl Drop for SimulatedChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Interpret `script`, writing output chunks and blocking on input at prompts
async fn run_script(
    script: Script,
    config: SimulatorConfig,
    output: UnboundedSender<String>,
    mut input: UnboundedReceiver<String>,
) {
    let line_delay = config.line_delay();
    let mut steps = script.steps.into_iter();

    while let Some(step) = steps.next() {
        match step {
            ScriptStep::Line(text) => {
                if output.send(format!("{}\n", text)).is_err() {
                    return;
                }
                if !line_delay.is_zero() {
                    tokio::time::sleep(line_delay).await;
                }
            }
            ScriptStep::Pause(millis) => {
                let pause = config.scaled(millis);
                if pause.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(pause).await;
                }
            }
            ScriptStep::Prompt {
                text,
                accept,
                on_reject,
            } => {
                // Prompts carry no newline, like a real read() prompt
                if output.send(text).is_err() {
                    return;
                }
                let answer = match tokio::time::timeout(config.input_timeout(), input.recv()).await
                {
                    Ok(Some(answer)) => answer,
                    Ok(None) => return,
                    Err(_) => {
                        let _ = output.send("\n等待输入超时\n".to_string());
                        return;
                    }
                };
                let _ = output.send("\n".to_string());

                if accept.accepts(&answer) {
                    continue;
                }
                match on_reject {
                    OnReject::Abort(line) => {
                        if !line.is_empty() {
                            let _ = output.send(format!("{}\n", line));
                        }
                        return;
                    }
                    OnReject::Skip { line, steps: count } => {
                        let _ = output.send(format!("{}\n", line));
                        for _ in 0..count {
                            steps.next();
                        }
                    }
                }
            }
        }
    }
}

/// Opens simulated channels
pub struct SimulatedChannelFactory {
    config: SimulatorConfig,
    calibration: CalibrationConfig,
    /// Shared so successive runs draw different seeded values
    rng: Option<Arc<Mutex<StdRng>>>,
}

impl SimulatedChannelFactory {
    pub fn new(config: SimulatorConfig, calibration: CalibrationConfig) -> Self {
        let rng = config
            .seed
            .map(|seed| Arc::new(Mutex::new(StdRng::seed_from_u64(seed))));
        Self {
            config,
            calibration,
            rng,
        }
    }

    fn next_seed(&self) -> Option<u64> {
        use rand::Rng;

        let rng = self.rng.as_ref()?;
        match rng.lock() {
            Ok(mut rng) => Some(rng.gen()),
            Err(poisoned) => Some(poisoned.into_inner().gen()),
        }
    }
}

#[async_trait]
impl ChannelFactory for SimulatedChannelFactory {
    async fn open(&self, robot_id: &str) -> Result<Box<dyn InteractiveChannel>> {
        if !self.config.robots.iter().any(|r| r == robot_id) {
            return Err(Error::UnknownRobot {
                robot_id: robot_id.to_string(),
            });
        }
        let mut config = self.config.clone();
        config.seed = self.next_seed();
        Ok(Box::new(SimulatedChannel::new(
            config,
            self.calibration.clone(),
        )))
    }
}
