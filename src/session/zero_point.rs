//! Zero-point steps: tool checklist, config read, execution, tool removal

use std::collections::BTreeMap;

use tokio::sync::oneshot;

use super::actor::{ensure_active, SessionActor};
use crate::device::live_joint_positions;
use crate::error::{Error, Result};
use crate::models::{CalibrationStep, JointEdit, JointGroup, JointRecord, ZeroPointScope};
use crate::parser::{validate_with_bound, StatusKeyword};
use crate::store::{merge_live_positions, validate_joint_records, FileKind};

impl SessionActor {
    fn require_step(&self, step: CalibrationStep, operation: &str) -> Result<()> {
        ensure_active(&self.state, operation)?;
        if self.state.step == Some(step) {
            Ok(())
        } else {
            Err(self.state.invalid(operation))
        }
    }

    pub(super) async fn confirm_tool(
        &mut self,
        index: usize,
        reply: oneshot::Sender<Result<bool>>,
    ) {
        if let Err(e) = self.require_step(CalibrationStep::ConfirmTools, "confirm_tool") {
            let _ = reply.send(Err(e));
            return;
        }
        let tool_count = self.state.tools.len();
        let Some(tool) = self.state.tools.get_mut(index) else {
            warn!(
                "Session {}: tool index {} out of range ({} tools)",
                self.state.session_id, index, tool_count
            );
            let _ = reply.send(Ok(false));
            return;
        };

        tool.confirmed = true;
        let name = tool.name.clone();
        self.log_line(format!("tool confirmed: {}", name));

        let all_confirmed = self.state.tools.iter().all(|t| t.confirmed);
        if all_confirmed {
            self.state.progress.tools_confirmed = true;
            self.state.step = Some(CalibrationStep::ReadConfig);
        }
        self.publish();
        let _ = reply.send(Ok(true));

        if all_confirmed {
            self.read_config().await;
        }
    }

    /// Load prior calibration values and live positions for the scope
    pub(super) async fn read_config(&mut self) {
        if let Err(e) = self.load_config().await {
            self.fail(e);
        }
    }

    async fn load_config(&mut self) -> Result<()> {
        let scope = self.scope()?;
        let config = self.services.config.clone();
        let robot_id = self.state.robot_id.clone();
        self.log_line(format!("reading calibration configuration ({})", scope));

        let positions = live_joint_positions(
            self.services.device.as_ref(),
            &robot_id,
            &config.device.joint_state_command,
        )
        .await;

        let mut joints = BTreeMap::new();
        let mut warnings = Vec::new();
        for kind in FileKind::for_scope(scope) {
            let mut records = self.services.store.read(&robot_id, kind).await?;
            merge_live_positions(&mut records, &positions);
            warnings.extend(validate_joint_records(
                &mut records,
                &config.calibration.thresholds,
            ));
            self.log_line(format!("loaded {} joints from {}", records.len(), kind.label()));
            for record in records {
                joints.insert(record.session_key(scope), record);
            }
        }

        for warning in &warnings {
            self.log_line(format!("warning: {}", warning));
        }

        self.state.progress.config_loaded = true;
        self.state.progress.joint_count = joints.len();
        self.state.progress.warnings_count = warnings.len();
        self.state.joints = joints;
        self.state.warnings = warnings;

        if config.calibration.auto_advance {
            self.state.step = Some(CalibrationStep::InitializeZero);
            self.state.progress.ready_to_calibrate = true;
        }
        self.publish();
        Ok(())
    }

    pub(super) fn confirm_config(&mut self, edits: Vec<JointEdit>) -> Result<()> {
        ensure_active(&self.state, "confirm_config")?;
        let allowed = match self.state.step {
            Some(CalibrationStep::InitializeZero) => !self.state.progress.calibration_started,
            Some(CalibrationStep::ReadConfig) => {
                !self.services.config.calibration.auto_advance && self.state.progress.config_loaded
            }
            _ => false,
        };
        if !allowed {
            return Err(self.state.invalid("confirm_config"));
        }

        let mut applied = 0;
        for edit in &edits {
            let Some(joint) = self.state.joints.get_mut(&edit.joint_id) else {
                debug!("Ignoring edit for unknown joint {}", edit.joint_id);
                continue;
            };
            if let Some(zero) = edit.zero_position {
                joint.zero_position = zero;
            }
            if let Some(offset) = edit.offset {
                joint.offset = offset;
            }
            applied += 1;
        }
        if applied > 0 {
            self.log_line(format!("applied {} joint edits", applied));
        }

        self.state.step = Some(CalibrationStep::InitializeZero);
        self.state.progress.ready_to_calibrate = true;
        self.publish();
        Ok(())
    }

    pub(super) fn check_begin_execution(&self) -> Result<()> {
        self.require_step(CalibrationStep::InitializeZero, "begin_execution")?;
        if self.state.progress.calibration_started || !self.state.progress.ready_to_calibrate {
            return Err(self.state.invalid("begin_execution"));
        }
        Ok(())
    }

    pub(super) async fn execute_zero_point(&mut self, scope: ZeroPointScope) {
        let command = self
            .services
            .config
            .calibration
            .command_for(scope)
            .to_string();
        self.state.measurements.clear();
        self.state.progress.calibration_started = true;
        self.state.progress.command = Some(command.clone());
        self.publish();

        if let Err(e) = self.run_interactive(&command).await {
            if e.is_cancellation() {
                self.finish_cancelled();
            } else {
                self.fail(e);
            }
            return;
        }

        let report = validate_with_bound(
            &self.state.measurements,
            self.services.config.calibration.position_bound,
        );
        for message in &report.messages {
            self.log_line(format!("validation: {}", message));
        }
        if !report.is_valid {
            self.fail(Error::MeasurementValidationFailed {
                messages: report.messages,
            });
            return;
        }
        self.state.progress.validation_completed = true;

        if let Err(e) = self.persist_results(scope).await {
            self.fail(e);
            return;
        }
        self.state.progress.calibration_saved = true;
        self.state.progress.calibration_status = Some(StatusKeyword::Completed);
        self.state.step = Some(CalibrationStep::RemoveTools);
        self.log_line("calibration results saved, remove the calibration tools");
        self.publish();
    }

    /// Write measured joints back to the calibration files of the scope
    async fn persist_results(&mut self, scope: ZeroPointScope) -> Result<()> {
        let robot_id = self.state.robot_id.clone();
        for kind in FileKind::for_scope(scope) {
            let records = records_to_persist(self.state.joints.values(), kind);
            if !records.iter().any(|joint| joint.measured) {
                debug!("No measured joints for {}, leaving it unchanged", kind.label());
                continue;
            }
            self.services.store.write(&robot_id, kind, &records).await?;
            self.log_line(format!("saved {} ({} joints)", kind.label(), records.len()));
        }
        Ok(())
    }

    pub(super) async fn run_verification(&mut self) -> Result<String> {
        self.require_step(CalibrationStep::RemoveTools, "run_verification")?;
        let command = self.services.config.calibration.verification_command.clone();
        if command.trim().is_empty() {
            self.log_line("no verification command configured");
            return Ok(String::new());
        }

        self.log_line(format!("$ {}", command));
        let output = self
            .services
            .device
            .execute(&self.state.robot_id, &command)
            .await?;
        for line in output.stdout.lines().chain(output.stderr.lines()) {
            if !line.trim().is_empty() {
                self.log_line(line);
            }
        }
        if !output.success {
            return Err(Error::CommandFailed {
                command,
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    pub(super) fn confirm_tools_removed(&mut self) -> Result<()> {
        self.require_step(CalibrationStep::RemoveTools, "confirm_tools_removed")?;
        self.state.progress.tools_removed = true;
        self.log_line("calibration tools removed");
        self.finish_success();
        Ok(())
    }

    pub(super) fn check_rewind(&self, target: CalibrationStep) -> Result<()> {
        ensure_active(&self.state, "rewind")?;
        match (target, self.state.step) {
            (CalibrationStep::ReadConfig, Some(step)) if step >= CalibrationStep::ReadConfig => {
                Ok(())
            }
            _ => Err(self.state.invalid(&format!("rewind to {}", target))),
        }
    }

    /// Drop everything learned since READ_CONFIG and run it again
    pub(super) async fn rewind_to_read_config(&mut self) {
        info!("Session {}: rewinding to read_config", self.state.session_id);
        self.state.joints.clear();
        self.state.warnings.clear();
        self.state.measurements.clear();
        self.state.progress.reset_from_read_config();
        self.state.error_message = None;
        self.state.step = Some(CalibrationStep::ReadConfig);
        self.log_line("rewound to read_config");
        self.publish();
        self.read_config().await;
    }

    fn scope(&self) -> Result<ZeroPointScope> {
        self.state
            .kind
            .scope()
            .ok_or_else(|| self.state.invalid("zero_point step"))
    }
}

/// Records written back to `kind`; measured joints take their new value
fn records_to_persist<'a>(
    joints: impl Iterator<Item = &'a JointRecord>,
    kind: FileKind,
) -> Vec<JointRecord> {
    let group = kind.group();
    let ids = kind.ids();
    let mut records: Vec<JointRecord> = joints
        .filter(|joint| joint.group == group && ids.contains(&joint.id))
        .cloned()
        .map(|mut joint| {
            if joint.measured {
                match group {
                    JointGroup::Arms => joint.zero_position = joint.current_position,
                    JointGroup::Legs => joint.offset = joint.current_position,
                }
            }
            joint
        })
        .collect();
    records.sort_by_key(|joint| joint.id);
    records
}
