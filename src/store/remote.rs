use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;

use super::{backup_file_name, formats, parse, render, CalibrationStore, FileKind};
use crate::config::CalibrationConfig;
use crate::device::{remote_file_exists, DeviceLink};
use crate::error::{Error, Result};
use crate::models::JointRecord;

const HEREDOC_DELIMITER: &str = "JOINTCAL_EOF";

/// Calibration files on the robot, accessed through a device link
pub struct RemoteFileStore {
    link: Arc<dyn DeviceLink>,
    config_dir: String,
    arms_zero_file: String,
    legs_offset_file: String,
}

impl RemoteFileStore {
    pub fn new(link: Arc<dyn DeviceLink>, config: &CalibrationConfig) -> Self {
        Self {
            link,
            config_dir: config.remote_config_dir.trim_end_matches('/').to_string(),
            arms_zero_file: config.arms_zero_file.clone(),
            legs_offset_file: config.legs_offset_file.clone(),
        }
    }

    fn file_name(&self, kind: FileKind) -> &str {
        match kind {
            FileKind::ArmsZero => &self.arms_zero_file,
            FileKind::LegsOffset => &self.legs_offset_file,
        }
    }

    pub fn path_for(&self, kind: FileKind) -> String {
        format!("{}/{}", self.config_dir, self.file_name(kind))
    }

    fn backup_dir(&self) -> String {
        format!("{}/backup", self.config_dir)
    }

    async fn run_checked(&self, robot_id: &str, command: &str, path: &str) -> Result<String> {
        let output = self
            .link
            .execute(robot_id, command)
            .await
            .map_err(|e| Error::PersistenceFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        if !output.success {
            return Err(Error::PersistenceFailed {
                path: path.to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    async fn backup(&self, robot_id: &str, kind: FileKind) -> Result<()> {
        let path = self.path_for(kind);
        let backup_dir = self.backup_dir();
        self.run_checked(robot_id, &format!("mkdir -p {}", backup_dir), &backup_dir)
            .await?;

        if remote_file_exists(self.link.as_ref(), robot_id, &path).await? {
            let target = format!(
                "{}/{}",
                backup_dir,
                backup_file_name(self.file_name(kind), Local::now())
            );
            self.run_checked(robot_id, &format!("cp {} {}", path, target), &target)
                .await?;
            info!("Backed up {}:{} to {}", robot_id, path, target);
        }
        Ok(())
    }
}

#[async_trait]
impl CalibrationStore for RemoteFileStore {
    async fn read(&self, robot_id: &str, kind: FileKind) -> Result<Vec<JointRecord>> {
        let path = self.path_for(kind);
        if !remote_file_exists(self.link.as_ref(), robot_id, &path).await? {
            warn!("{}:{} not found, using default values", robot_id, path);
            return Ok(formats::default_records(kind));
        }

        let output = self.link.execute(robot_id, &format!("cat {}", path)).await?;
        if !output.success {
            return Err(Error::CommandFailed {
                command: format!("cat {}", path),
                reason: output.stderr.trim().to_string(),
            });
        }
        parse(kind, &output.stdout, &path)
    }

    async fn write(&self, robot_id: &str, kind: FileKind, records: &[JointRecord]) -> Result<()> {
        let path = self.path_for(kind);
        let content = render(kind, records)?;
        self.backup(robot_id, kind).await?;

        let tmp = format!("{}.tmp", path);
        let write_tmp = format!(
            "cat > {} << '{}'\n{}\n{}",
            tmp,
            HEREDOC_DELIMITER,
            content.trim_end(),
            HEREDOC_DELIMITER
        );
        self.run_checked(robot_id, &write_tmp, &tmp).await?;
        self.run_checked(robot_id, &format!("mv {} {}", tmp, path), &path)
            .await?;

        info!("Wrote {}:{} ({} joints)", robot_id, path, records.len());
        Ok(())
    }

    async fn backup_count(&self, robot_id: &str, kind: FileKind) -> Result<usize> {
        let command = format!(
            "ls {}/{}.* 2>/dev/null | wc -l",
            self.backup_dir(),
            self.file_name(kind)
        );
        let output = self.link.execute(robot_id, &command).await?;
        Ok(output.stdout.trim().parse().unwrap_or(0))
    }
}
