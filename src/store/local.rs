use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use tempfile::NamedTempFile;

use super::{backup_file_name, formats, parse, render, CalibrationStore, FileKind};
use crate::config::CalibrationConfig;
use crate::error::{Error, Result};
use crate::models::JointRecord;

/// Calibration files on the local filesystem, one directory per robot
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    arms_zero_file: String,
    legs_offset_file: String,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>, config: &CalibrationConfig) -> Self {
        Self {
            root: root.into(),
            arms_zero_file: config.arms_zero_file.clone(),
            legs_offset_file: config.legs_offset_file.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn robot_dir(&self, robot_id: &str) -> PathBuf {
        self.root.join(robot_id)
    }

    pub fn path_for(&self, robot_id: &str, kind: FileKind) -> PathBuf {
        let name = match kind {
            FileKind::ArmsZero => &self.arms_zero_file,
            FileKind::LegsOffset => &self.legs_offset_file,
        };
        self.robot_dir(robot_id).join(name)
    }

    fn backup_dir(&self, robot_id: &str) -> PathBuf {
        self.robot_dir(robot_id).join("backup")
    }

    /// Write raw content without a backup, used to seed fixtures
    pub fn seed(&self, robot_id: &str, kind: FileKind, content: &str) -> Result<PathBuf> {
        let path = self.path_for(robot_id, kind);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

fn persistence_error(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::PersistenceFailed {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

/// Back up `path` (if present) and replace it with `content` atomically
fn replace_with_backup(path: &Path, backup_dir: &Path, content: &str) -> Result<Option<PathBuf>> {
    let dir = path
        .parent()
        .ok_or_else(|| persistence_error(path, "path has no parent directory"))?;
    std::fs::create_dir_all(dir).map_err(|e| persistence_error(path, e))?;

    let backup = if path.exists() {
        std::fs::create_dir_all(backup_dir).map_err(|e| persistence_error(backup_dir, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut target = backup_dir.join(backup_file_name(&name, Local::now()));
        let mut suffix = 1;
        while target.exists() {
            target = backup_dir.join(format!(
                "{}.{}",
                backup_file_name(&name, Local::now()),
                suffix
            ));
            suffix += 1;
        }
        std::fs::copy(path, &target).map_err(|e| persistence_error(&target, e))?;
        Some(target)
    } else {
        None
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| persistence_error(path, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| persistence_error(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| persistence_error(path, e))?;
    tmp.persist(path).map_err(|e| persistence_error(path, e.error))?;
    Ok(backup)
}

#[async_trait]
impl CalibrationStore for LocalFileStore {
    async fn read(&self, robot_id: &str, kind: FileKind) -> Result<Vec<JointRecord>> {
        let path = self.path_for(robot_id, kind);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                debug!("Read {} ({} bytes)", path.display(), content.len());
                parse(kind, &content, &path.display().to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} not found, using default values", path.display());
                Ok(formats::default_records(kind))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, robot_id: &str, kind: FileKind, records: &[JointRecord]) -> Result<()> {
        let path = self.path_for(robot_id, kind);
        let backup_dir = self.backup_dir(robot_id);
        let content = render(kind, records)?;

        let target = path.clone();
        let backup = tokio::task::spawn_blocking(move || {
            replace_with_backup(&target, &backup_dir, &content)
        })
        .await
        .map_err(|e| persistence_error(&path, e))??;

        if let Some(backup) = backup {
            info!("Backed up {} to {}", path.display(), backup.display());
        }
        info!("Wrote {} ({} joints)", path.display(), records.len());
        Ok(())
    }

    async fn backup_count(&self, robot_id: &str, kind: FileKind) -> Result<usize> {
        let dir = self.backup_dir(robot_id);
        let name = self
            .path_for(robot_id, kind)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let prefix = format!("{}.", name);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                count += 1;
            }
        }
        Ok(count)
    }
}
