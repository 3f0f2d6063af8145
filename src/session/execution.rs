//! Interactive calibration run
//!
//! Drives one channel from start to close. Output is split into lines in
//! arrival order; each line is logged, scanned for slave positions and
//! status keywords, and checked against the prompt rules. The
//! unterminated tail is re-checked on every poll because prompts rarely
//! end with a newline.

use std::sync::Arc;
use std::time::Duration;

use super::actor::SessionActor;
use super::SessionCommand;
use crate::channel::{ChannelRead, InteractiveChannel, LineAssembler};
use crate::coordinator::ResponseOutcome;
use crate::error::{Error, Result};
use crate::events::CalibrationEvent;
use crate::models::{CalibrationStep, SessionStatus};
use crate::parser::{classify_status, extract_measurements, StatusKeyword};
use crate::prompts::PromptRuleSet;

/// What one wait inside the poll loop produced
enum PollEvent {
    Cancelled,
    Command(Option<SessionCommand>),
    Read(Result<ChannelRead>),
}

/// Keywords seen so far in a run
#[derive(Debug, Default)]
struct RunTracker {
    completed: bool,
    failure: Option<String>,
}

impl RunTracker {
    fn finish(self, command: &str) -> Result<()> {
        if let Some(line) = self.failure {
            return Err(Error::CommandFailed {
                command: command.to_string(),
                reason: line,
            });
        }
        if self.completed {
            Ok(())
        } else {
            Err(Error::ChannelClosedUnexpectedly {
                command: command.to_string(),
                reason: "channel closed before a completion message".to_string(),
            })
        }
    }
}

/// Answer a command that arrived while the session is busy
fn reject_busy(command: SessionCommand, step: Option<CalibrationStep>, status: SessionStatus) {
    debug!("Rejecting {} while calibration is running", command.name());
    let operation = format!("{} during execution", command.name());
    command.reject(Error::InvalidStepTransition {
        step,
        status,
        operation,
    });
}

impl SessionActor {
    /// Run `command` on a fresh channel until it closes
    pub(super) async fn run_interactive(&mut self, command: &str) -> Result<()> {
        let config = Arc::clone(&self.services.config);
        let rules = PromptRuleSet::for_kind(self.state.kind, &config.prompts.extra_rules)?;

        let cancel = self.shared.cancel.clone();
        let connected = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::SessionCancelled),
            connected = self.services.device.is_connected(&self.state.robot_id) => connected,
        };
        if !connected {
            return Err(Error::NotConnected {
                robot_id: self.state.robot_id.clone(),
            });
        }
        let mut channel = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::SessionCancelled),
            channel = self.services.channels.open(&self.state.robot_id) => channel?,
        };
        info!(
            "Session {}: running '{}' via {}",
            self.state.session_id,
            command,
            channel.backend_name()
        );
        self.log_line(format!("$ {}", command));

        let result = self
            .drive_channel(channel.as_mut(), command, &rules, config.channel.poll_interval())
            .await;

        if let Err(e) = channel.terminate().await {
            warn!("Failed to release channel for {}: {}", self.state.robot_id, e);
        }
        result
    }

    async fn drive_channel(
        &mut self,
        channel: &mut dyn InteractiveChannel,
        command: &str,
        rules: &PromptRuleSet,
        poll: Duration,
    ) -> Result<()> {
        let cancel = self.shared.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::SessionCancelled),
            started = channel.start(command) => started?,
        }

        let mut assembler = LineAssembler::new();
        let mut tracker = RunTracker::default();
        let mut commands_open = true;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => PollEvent::Cancelled,
                command = self.commands.recv(), if commands_open => PollEvent::Command(command),
                read = channel.read_chunk(poll) => PollEvent::Read(read),
            };

            match event {
                PollEvent::Cancelled => return Err(Error::SessionCancelled),
                PollEvent::Command(Some(command)) => {
                    reject_busy(command, self.state.step, self.state.status);
                }
                PollEvent::Command(None) => commands_open = false,
                PollEvent::Read(read) => match read? {
                    ChannelRead::Data(chunk) => {
                        for line in assembler.push(&chunk) {
                            self.handle_line(channel, &line, rules, &mut tracker).await?;
                        }
                        self.check_fragment(channel, &mut assembler, rules, &mut tracker)
                            .await?;
                    }
                    ChannelRead::Idle => {
                        self.check_fragment(channel, &mut assembler, rules, &mut tracker)
                            .await?;
                    }
                    ChannelRead::Closed => {
                        if let Some(rest) = assembler.take_fragment() {
                            self.record_line(&rest, &mut tracker);
                        }
                        debug!("Session {}: channel closed", self.state.session_id);
                        break;
                    }
                },
            }
        }

        tracker.finish(command)
    }

    /// Treat the unterminated tail as a line if it is a prompt
    async fn check_fragment(
        &mut self,
        channel: &mut dyn InteractiveChannel,
        assembler: &mut LineAssembler,
        rules: &PromptRuleSet,
        tracker: &mut RunTracker,
    ) -> Result<()> {
        let is_prompt = assembler
            .fragment()
            .is_some_and(|fragment| rules.detect(&fragment).is_some());
        if !is_prompt {
            return Ok(());
        }
        match assembler.take_fragment() {
            Some(prompt) => self.handle_line(channel, &prompt, rules, tracker).await,
            None => Ok(()),
        }
    }

    async fn handle_line(
        &mut self,
        channel: &mut dyn InteractiveChannel,
        line: &str,
        rules: &PromptRuleSet,
        tracker: &mut RunTracker,
    ) -> Result<()> {
        self.record_line(line, tracker);

        let Some(rule) = rules.detect(line) else {
            return Ok(());
        };
        let default = rule.default_response().to_string();
        let outcome = self.await_response(line, &default).await?;

        let shown = if outcome.text().is_empty() {
            "<enter>"
        } else {
            outcome.text()
        };
        match &outcome {
            ResponseOutcome::Supplied(_) => self.log_line(format!("> {}", shown)),
            ResponseOutcome::TimedOut(_) => self.log_line(format!("> {} (default)", shown)),
        }
        channel.send(outcome.text()).await
    }

    /// Log a line and fold in any measurements and status keywords
    fn record_line(&mut self, line: &str, tracker: &mut RunTracker) {
        self.log_line(line);

        for measurement in extract_measurements(line) {
            self.fold_measurement(&measurement);
            self.services.events.broadcast(
                &self.state.robot_id,
                CalibrationEvent::SlavePositionUpdate {
                    session_id: self.state.session_id.clone(),
                    robot_id: self.state.robot_id.clone(),
                    slave_id: measurement.slave_id,
                    position: measurement.position,
                    joint_name: measurement.joint_name,
                    raw_line: measurement.raw_line,
                },
            );
        }

        match classify_status(line) {
            Some(StatusKeyword::Completed) => {
                tracker.completed = true;
                if tracker.failure.is_none() {
                    self.state.progress.calibration_status = Some(StatusKeyword::Completed);
                }
                self.publish();
            }
            Some(StatusKeyword::Failed) => {
                warn!("Session {}: failure reported: {}", self.state.session_id, line);
                tracker.failure.get_or_insert_with(|| line.to_string());
                self.state.progress.calibration_status = Some(StatusKeyword::Failed);
                self.publish();
            }
            Some(StatusKeyword::Warning) => {
                self.state.progress.calibration_warnings.push(line.to_string());
            }
            None => {}
        }
    }

    /// Mark the session waiting, then wait for an operator or the default
    async fn await_response(&mut self, prompt: &str, default: &str) -> Result<ResponseOutcome> {
        let config = Arc::clone(&self.services.config);
        let timeout = if config.prompts.auto_respond {
            config.prompts.auto_respond_delay()
        } else {
            config.prompts.response_timeout()
        };

        self.state.status = SessionStatus::WaitingForUser;
        self.state.pending_prompt = Some(prompt.to_string());
        self.publish();

        let shared = Arc::clone(&self.shared);
        let (step, status) = (self.state.step, self.state.status);
        let wait = shared
            .coordinator
            .await_response(default, timeout, &shared.cancel);
        tokio::pin!(wait);

        let mut commands_open = true;
        let outcome = loop {
            tokio::select! {
                biased;
                outcome = &mut wait => break outcome,
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => reject_busy(command, step, status),
                    None => commands_open = false,
                },
            }
        }?;

        self.state.status = SessionStatus::Running;
        self.state.pending_prompt = None;
        self.publish();
        Ok(outcome)
    }
}
