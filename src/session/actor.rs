//! Session task
//!
//! One task per session owns every mutable field of the session. It
//! waits for step commands or cancellation, runs the step logic, and
//! publishes a fresh snapshot after each change.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Services, SessionCommand, SessionHandle, SessionShared};
use crate::coordinator::ResponseCoordinator;
use crate::error::{Error, Result};
use crate::events::CalibrationEvent;
use crate::models::joint::FULL_BODY_ARM_KEY_OFFSET;
use crate::models::{
    CalibrationKind, CalibrationStep, JointGroup, JointRecord, SessionSnapshot, SessionStatus,
    SlaveMeasurement, StepProgress, ToolItem, ZeroPointScope,
};

/// Queued step commands per session
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Everything the session task mutates
pub(crate) struct SessionState {
    pub session_id: String,
    pub robot_id: String,
    pub kind: CalibrationKind,
    pub step: Option<CalibrationStep>,
    pub status: SessionStatus,
    pub pending_prompt: Option<String>,
    /// Joint records keyed by session key
    pub joints: BTreeMap<u32, JointRecord>,
    pub warnings: Vec<String>,
    pub progress: StepProgress,
    pub tools: Vec<ToolItem>,
    pub error_message: Option<String>,
    /// Measurements captured by the current run, in output order
    pub measurements: Vec<SlaveMeasurement>,
    pub started_at: chrono::DateTime<Utc>,
    pub completed_at: Option<chrono::DateTime<Utc>>,
}

impl SessionState {
    fn new(session_id: String, robot_id: String, kind: CalibrationKind) -> Self {
        let (step, tools) = match kind {
            CalibrationKind::ZeroPoint { scope } => {
                (Some(CalibrationStep::ConfirmTools), ToolItem::checklist(scope))
            }
            CalibrationKind::HeadHand => (None, Vec::new()),
        };
        Self {
            session_id,
            robot_id,
            kind,
            step,
            status: SessionStatus::Pending,
            pending_prompt: None,
            joints: BTreeMap::new(),
            warnings: Vec::new(),
            progress: StepProgress::default(),
            tools,
            error_message: None,
            measurements: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn snapshot(&self, log: &[String], retention: usize) -> SessionSnapshot {
        let tail_start = log.len().saturating_sub(retention);
        SessionSnapshot {
            session_id: self.session_id.clone(),
            robot_id: self.robot_id.clone(),
            kind: self.kind,
            step: self.step,
            status: self.status,
            pending_prompt: self.pending_prompt.clone(),
            joint_measurements: self.joints.values().cloned().collect(),
            warnings: self.warnings.clone(),
            step_progress: self.progress.clone(),
            tools: self.tools.clone(),
            error_message: self.error_message.clone(),
            log_tail: log[tail_start..].to_vec(),
            log_len: log.len(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    /// Error for `operation` arriving in the current step
    pub fn invalid(&self, operation: &str) -> Error {
        Error::InvalidStepTransition {
            step: self.step,
            status: self.status,
            operation: operation.to_string(),
        }
    }
}

pub(crate) struct SessionActor {
    pub state: SessionState,
    pub services: Services,
    pub shared: Arc<SessionShared>,
    pub commands: mpsc::Receiver<SessionCommand>,
    snapshots: watch::Sender<SessionSnapshot>,
}

/// Create a session and start its task
pub(crate) fn spawn_session(
    services: Services,
    robot_id: &str,
    kind: CalibrationKind,
) -> (SessionHandle, JoinHandle<()>) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let state = SessionState::new(session_id.clone(), robot_id.to_string(), kind);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (snapshot_tx, snapshot_rx) =
        watch::channel(state.snapshot(&[], services.config.calibration.log_retention));

    let shared = Arc::new(SessionShared {
        coordinator: ResponseCoordinator::new(session_id.clone()),
        cancel: CancellationToken::new(),
        log: RwLock::new(Vec::new()),
        position_bound: services.config.calibration.position_bound,
    });

    let handle = SessionHandle {
        session_id,
        robot_id: robot_id.to_string(),
        kind,
        commands: command_tx,
        snapshots: snapshot_rx,
        shared: Arc::clone(&shared),
    };
    let actor = SessionActor {
        state,
        services,
        shared,
        commands: command_rx,
        snapshots: snapshot_tx,
    };

    (handle, tokio::spawn(actor.run()))
}

impl SessionActor {
    async fn run(mut self) {
        info!(
            "Session {} started: {} on {}",
            self.state.session_id, self.state.kind, self.state.robot_id
        );
        self.state.status = SessionStatus::Running;
        self.publish();

        if self.state.kind == CalibrationKind::HeadHand {
            self.run_head_hand().await;
        }

        while !self.state.status.is_terminal() {
            let command = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => None,
                command = self.commands.recv() => command,
            };
            match command {
                Some(command) => self.dispatch(command).await,
                None => {
                    // Cancelled, or every handle was dropped
                    self.finish_cancelled();
                }
            }
        }

        debug!(
            "Session {} task exiting with status {}",
            self.state.session_id, self.state.status
        );
    }

    async fn dispatch(&mut self, command: SessionCommand) {
        debug!(
            "Session {}: {} in {:?}",
            self.state.session_id,
            command.name(),
            self.state.step
        );
        let scope = match self.state.kind.scope() {
            Some(scope) => scope,
            None => {
                let error = self.state.invalid(command.name());
                command.reject(error);
                return;
            }
        };

        match command {
            SessionCommand::ConfirmTool { index, reply } => {
                self.confirm_tool(index, reply).await;
            }
            SessionCommand::ConfirmConfig { edits, reply } => {
                let result = self.confirm_config(edits);
                let _ = reply.send(result);
            }
            SessionCommand::BeginExecution { reply } => {
                match self.check_begin_execution() {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                        self.execute_zero_point(scope).await;
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            SessionCommand::RunVerification { reply } => {
                let result = self.run_verification().await;
                let _ = reply.send(result);
            }
            SessionCommand::ConfirmToolsRemoved { reply } => {
                let result = self.confirm_tools_removed();
                let _ = reply.send(result);
            }
            SessionCommand::Rewind { target, reply } => match self.check_rewind(target) {
                Ok(()) => {
                    let _ = reply.send(Ok(()));
                    self.rewind_to_read_config().await;
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
        }
    }

    async fn run_head_hand(&mut self) {
        let command = self.services.config.calibration.head_hand_command.clone();
        self.state.progress.calibration_started = true;
        self.state.progress.command = Some(command.clone());
        self.publish();

        match self.run_interactive(&command).await {
            Ok(()) => {
                self.log_line("head and hand calibration finished");
                self.finish_success();
            }
            Err(e) if e.is_cancellation() => self.finish_cancelled(),
            Err(e) => self.fail(e),
        }
    }

    /// Append a line to the log and forward it to subscribers
    pub fn log_line(&mut self, line: impl Into<String>) {
        let line = line.into();
        match self.shared.log.write() {
            Ok(mut log) => log.push(line.clone()),
            Err(poisoned) => poisoned.into_inner().push(line.clone()),
        }
        self.services.events.broadcast(
            &self.state.robot_id,
            CalibrationEvent::CalibrationLog {
                session_id: self.state.session_id.clone(),
                robot_id: self.state.robot_id.clone(),
                log: line,
            },
        );
    }

    /// Publish the current state as a snapshot and status events
    pub fn publish(&mut self) {
        let retention = self.services.config.calibration.log_retention;
        let snapshot = {
            let log = match self.shared.log.read() {
                Ok(log) => log,
                Err(poisoned) => poisoned.into_inner(),
            };
            self.state.snapshot(&log, retention)
        };
        self.snapshots.send_replace(snapshot);

        let state = &self.state;
        self.services.events.broadcast(
            &state.robot_id,
            CalibrationEvent::CalibrationStatus {
                session_id: state.session_id.clone(),
                robot_id: state.robot_id.clone(),
                calibration_type: state.kind.type_label().to_string(),
                status: state.status,
                current_step: state.step,
                user_prompt: state.pending_prompt.clone(),
                error_message: state.error_message.clone(),
            },
        );
        if matches!(state.kind, CalibrationKind::ZeroPoint { .. }) {
            self.services.events.broadcast(
                &state.robot_id,
                CalibrationEvent::ZeroPointCalibrationUpdate {
                    session_id: state.session_id.clone(),
                    robot_id: state.robot_id.clone(),
                    calibration_type: state.kind.type_label().to_string(),
                    current_step: state.step,
                    status: state.status,
                    step_progress: state.progress.clone(),
                    warnings: state.warnings.clone(),
                    error_message: state.error_message.clone(),
                    joint_data_count: state.joints.len(),
                },
            );
        }
    }

    pub fn fail(&mut self, error: Error) {
        error!(
            "Session {} on {} failed: {}",
            self.state.session_id, self.state.robot_id, error
        );
        let message = error.to_string();
        self.log_line(format!("calibration failed: {}", message));
        self.state.status = SessionStatus::Failed;
        self.state.error_message = Some(message);
        self.state.pending_prompt = None;
        self.state.completed_at = Some(Utc::now());
        self.publish();
    }

    pub fn finish_cancelled(&mut self) {
        if self.state.status.is_terminal() {
            return;
        }
        info!("Session {} cancelled", self.state.session_id);
        self.log_line("calibration cancelled");
        self.state.status = SessionStatus::Cancelled;
        self.state.pending_prompt = None;
        self.state.completed_at = Some(Utc::now());
        self.publish();
    }

    pub fn finish_success(&mut self) {
        info!("Session {} completed", self.state.session_id);
        self.state.status = SessionStatus::Success;
        self.state.pending_prompt = None;
        self.state.completed_at = Some(Utc::now());
        self.publish();
    }

    /// Fold a parsed measurement into the joint map.
    ///
    /// Full-body runs report each slave once for both calibration files,
    /// so slave N updates leg joint N and arm joint N alike.
    pub fn fold_measurement(&mut self, measurement: &SlaveMeasurement) {
        let scope = self.state.kind.scope();
        let group = match scope {
            Some(scope) if !scope.includes_legs() => JointGroup::Arms,
            _ => JointGroup::Legs,
        };
        let key = measurement.slave_id;

        let mut folded = false;
        if scope == Some(ZeroPointScope::FullBody) {
            let arm_key = key.saturating_add(FULL_BODY_ARM_KEY_OFFSET);
            if let Some(arm) = self.state.joints.get_mut(&arm_key) {
                arm.apply_measurement(measurement.position);
                folded = true;
            }
        }
        match self.state.joints.get_mut(&key) {
            Some(joint) => joint.apply_measurement(measurement.position),
            None if !folded => {
                let mut joint = JointRecord::new(key, measurement.joint_name.clone(), group);
                joint.apply_measurement(measurement.position);
                self.state.joints.insert(key, joint);
            }
            None => {}
        }
        self.state.measurements.push(measurement.clone());
    }
}

/// Reject `operation` once the session has finished
pub(crate) fn ensure_active(state: &SessionState, operation: &str) -> Result<()> {
    if state.status.is_active() {
        Ok(())
    } else {
        Err(state.invalid(operation))
    }
}
