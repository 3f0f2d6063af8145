//! Calibration Sessions
//!
//! Each session runs on its own task (see [`actor`]) and owns all of its
//! state. Callers talk to it through a cloneable [`SessionHandle`]:
//! step commands travel over an mpsc channel with a oneshot reply,
//! snapshots are published on a watch channel, and prompt responses and
//! cancellation bypass the command queue so they work while the session
//! is busy driving a channel.

mod actor;
mod execution;
pub mod registry;
mod zero_point;

pub use registry::SessionRegistry;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelFactory, PtyChannelFactory};
use crate::config::Config;
use crate::coordinator::ResponseCoordinator;
use crate::device::{DeviceLink, SshDeviceLink};
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::models::{CalibrationKind, CalibrationStep, JointEdit, SessionSnapshot};
use crate::parser::{self, CalibrationSummary, ValidationReport};
use crate::simulator::{seed_mock_files, SimulatedChannelFactory, SimulatedDevice};
use crate::store::{CalibrationStore, LocalFileStore, RemoteFileStore};

/// Collaborators shared by every session
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub device: Arc<dyn DeviceLink>,
    pub store: Arc<dyn CalibrationStore>,
    pub channels: Arc<dyn ChannelFactory>,
    pub events: Arc<dyn EventSink>,
}

impl Services {
    pub fn new(
        config: Config,
        device: Arc<dyn DeviceLink>,
        store: Arc<dyn CalibrationStore>,
        channels: Arc<dyn ChannelFactory>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            device,
            store,
            channels,
            events,
        }
    }

    /// Real robots over `ssh`; callers connect robots on `link` themselves
    pub fn ssh(config: Config, link: Arc<SshDeviceLink>, events: Arc<dyn EventSink>) -> Self {
        let device: Arc<dyn DeviceLink> = link;
        let store = Arc::new(RemoteFileStore::new(Arc::clone(&device), &config.calibration));
        let channels = Arc::new(PtyChannelFactory::new(
            Arc::clone(&device),
            config.channel.clone(),
        ));
        Self::new(config, device, store, channels, events)
    }

    /// In-process simulated robots with mock files under the simulator root
    pub fn simulated(config: Config, events: Arc<dyn EventSink>) -> Result<Self> {
        let root: PathBuf = config.simulator.file_root();
        let store = LocalFileStore::new(&root, &config.calibration);
        for robot_id in &config.simulator.robots {
            seed_mock_files(&store, robot_id)?;
        }
        info!(
            "Simulator ready for {:?} (files under {})",
            config.simulator.robots,
            root.display()
        );

        let device = Arc::new(SimulatedDevice::new(&config));
        let channels = Arc::new(SimulatedChannelFactory::new(
            config.simulator.clone(),
            config.calibration.clone(),
        ));
        Ok(Self::new(config, device, Arc::new(store), channels, events))
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

/// Step commands delivered to a session task
pub(crate) enum SessionCommand {
    ConfirmTool { index: usize, reply: Reply<bool> },
    ConfirmConfig { edits: Vec<JointEdit>, reply: Reply<()> },
    BeginExecution { reply: Reply<()> },
    RunVerification { reply: Reply<String> },
    ConfirmToolsRemoved { reply: Reply<()> },
    Rewind { target: CalibrationStep, reply: Reply<()> },
}

impl SessionCommand {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            SessionCommand::ConfirmTool { .. } => "confirm_tool",
            SessionCommand::ConfirmConfig { .. } => "confirm_config",
            SessionCommand::BeginExecution { .. } => "begin_execution",
            SessionCommand::RunVerification { .. } => "run_verification",
            SessionCommand::ConfirmToolsRemoved { .. } => "confirm_tools_removed",
            SessionCommand::Rewind { .. } => "rewind",
        }
    }

    /// Answer the command with `error`; the caller may have stopped waiting
    pub(crate) fn reject(self, error: Error) {
        match self {
            SessionCommand::ConfirmTool { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            SessionCommand::RunVerification { reply } => {
                let _ = reply.send(Err(error));
            }
            SessionCommand::ConfirmConfig { reply, .. }
            | SessionCommand::BeginExecution { reply }
            | SessionCommand::ConfirmToolsRemoved { reply }
            | SessionCommand::Rewind { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// State reachable from any caller without going through the session task
pub(crate) struct SessionShared {
    pub coordinator: ResponseCoordinator,
    pub cancel: CancellationToken,
    pub log: RwLock<Vec<String>>,
    pub position_bound: f64,
}

impl SessionShared {
    pub(crate) fn log_lines(&self) -> Vec<String> {
        match self.log.read() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Aggregated view recomputed from a session's full log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub robot_id: String,
    pub summary: CalibrationSummary,
    pub validation: ValidationReport,
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    robot_id: String,
    kind: CalibrationKind,
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn robot_id(&self) -> &str {
        &self.robot_id
    }

    pub fn kind(&self) -> CalibrationKind {
        self.kind
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T> {
        let closed = || Error::SessionClosed {
            session_id: self.session_id.clone(),
        };
        let (reply, rx) = oneshot::channel();
        self.commands.send(build(reply)).await.map_err(|_| closed())?;
        rx.await.map_err(|_| closed())?
    }

    /// Acknowledge tool `index`; `Ok(false)` if the index does not exist
    pub async fn confirm_tool(&self, index: usize) -> Result<bool> {
        self.request(|reply| SessionCommand::ConfirmTool { index, reply })
            .await
    }

    /// Apply operator corrections and proceed to zero initialization
    pub async fn confirm_config(&self, edits: Vec<JointEdit>) -> Result<()> {
        self.request(|reply| SessionCommand::ConfirmConfig { edits, reply })
            .await
    }

    /// Start the interactive calibration run; returns once it is under way
    pub async fn begin_execution(&self) -> Result<()> {
        self.request(|reply| SessionCommand::BeginExecution { reply })
            .await
    }

    /// Run the configured verification command and return its output
    pub async fn run_verification(&self) -> Result<String> {
        self.request(|reply| SessionCommand::RunVerification { reply })
            .await
    }

    pub async fn confirm_tools_removed(&self) -> Result<()> {
        self.request(|reply| SessionCommand::ConfirmToolsRemoved { reply })
            .await
    }

    /// Jump back to `target`; only `ReadConfig` is a valid target
    pub async fn rewind(&self, target: CalibrationStep) -> Result<()> {
        self.request(|reply| SessionCommand::Rewind { target, reply })
            .await
    }

    /// Answer the pending prompt; `false` when nothing is waiting
    pub fn submit_response(&self, text: impl Into<String>) -> bool {
        self.shared.coordinator.submit(text)
    }

    /// Request cancellation; `false` if the session had already finished
    pub fn cancel(&self) -> bool {
        let active = !self.is_finished();
        if !self.shared.cancel.is_cancelled() {
            info!("Cancelling session {} on {}", self.session_id, self.robot_id);
            self.shared.cancel.cancel();
        }
        active
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.snapshots.borrow().status.is_terminal()
    }

    pub fn is_waiting_for_response(&self) -> bool {
        self.shared.coordinator.is_waiting()
    }

    /// Complete log, oldest line first
    pub fn log(&self) -> Vec<String> {
        self.shared.log_lines()
    }

    pub fn summary(&self) -> SessionSummary {
        let text = self.shared.log_lines().join("\n");
        let summary = parser::summarize(&text);
        let validation = parser::validate_with_bound(&summary.positions, self.shared.position_bound);
        SessionSummary {
            session_id: self.session_id.clone(),
            robot_id: self.robot_id.clone(),
            summary,
            validation,
        }
    }

    /// Wait until `predicate` holds for the latest snapshot
    pub async fn wait_until<F>(&self, mut predicate: F, timeout: Duration) -> Result<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.snapshots.clone();
        let wait = async {
            loop {
                {
                    let snapshot = rx.borrow_and_update();
                    if predicate(&*snapshot) {
                        return Ok(snapshot.clone());
                    }
                }
                if rx.changed().await.is_err() {
                    let snapshot = rx.borrow().clone();
                    return if predicate(&snapshot) {
                        Ok(snapshot)
                    } else {
                        Err(Error::SessionClosed {
                            session_id: self.session_id.clone(),
                        })
                    };
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::CommandTimeout {
                command: format!("wait for session {}", self.session_id),
                duration: timeout,
            })?
    }

    /// Wait for a terminal status
    pub async fn wait_finished(&self, timeout: Duration) -> Result<SessionSnapshot> {
        self.wait_until(|s| s.status.is_terminal(), timeout).await
    }
}
