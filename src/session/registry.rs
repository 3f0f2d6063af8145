//! Session Registry
//!
//! Admission and removal of calibration sessions. At most one active
//! session exists per robot; the index lock is held only across
//! admission checks and map updates, never across an await.
//!
//! Finished sessions stay queryable until the next admission, which
//! drops them.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use tokio::task::JoinHandle;

use super::actor::spawn_session;
use super::{Services, SessionHandle, SessionSummary};
use crate::error::{Error, Result};
use crate::models::{CalibrationKind, SessionSnapshot, ZeroPointScope};

struct SessionEntry {
    handle: SessionHandle,
    task: Option<JoinHandle<()>>,
    started: Instant,
}

#[derive(Default)]
struct RegistryIndex {
    sessions: HashMap<String, SessionEntry>,
    /// robot id -> session id of its active session
    by_robot: HashMap<String, String>,
}

impl RegistryIndex {
    /// Release robot slots whose session has reached a terminal status
    fn release_finished(&mut self) {
        let sessions = &self.sessions;
        self.by_robot.retain(|_, session_id| {
            sessions
                .get(session_id)
                .is_some_and(|entry| !entry.handle.is_finished())
        });
    }

    /// Drop finished sessions and their logs; returns how many went
    fn remove_finished(&mut self) -> usize {
        self.release_finished();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| !entry.handle.is_finished());
        before - self.sessions.len()
    }
}

/// Owns every session and enforces one active session per robot
pub struct SessionRegistry {
    services: Services,
    index: Mutex<RegistryIndex>,
}

impl SessionRegistry {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            index: Mutex::new(RegistryIndex::default()),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    fn lock(&self) -> MutexGuard<'_, RegistryIndex> {
        match self.index.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start a zero-point calibration for `robot_id`
    pub async fn start_zero_point(
        &self,
        robot_id: &str,
        scope: ZeroPointScope,
    ) -> Result<SessionHandle> {
        self.start(robot_id, CalibrationKind::ZeroPoint { scope })
            .await
    }

    /// Start a head and hand calibration for `robot_id`
    pub async fn start_head_hand(&self, robot_id: &str) -> Result<SessionHandle> {
        self.start(robot_id, CalibrationKind::HeadHand).await
    }

    async fn start(&self, robot_id: &str, kind: CalibrationKind) -> Result<SessionHandle> {
        if !self.services.device.is_connected(robot_id).await {
            return Err(Error::NotConnected {
                robot_id: robot_id.to_string(),
            });
        }

        let stale_after = self.services.config.calibration.stale_after();
        let mut index = self.lock();
        let reaped = index.remove_finished();
        if reaped > 0 {
            debug!("Dropped {} finished sessions before admission", reaped);
        }

        if let Some(existing) = index.by_robot.get(robot_id).cloned() {
            let stale = index
                .sessions
                .get(&existing)
                .map(|entry| entry.started.elapsed() > stale_after)
                .unwrap_or(true);
            if !stale {
                return Err(Error::AlreadyRunning {
                    robot_id: robot_id.to_string(),
                    session_id: existing,
                });
            }
            warn!(
                "Reclaiming stale session {} on {} (older than {:?})",
                existing, robot_id, stale_after
            );
            if let Some(entry) = index.sessions.get(&existing) {
                entry.handle.cancel();
            }
            index.by_robot.remove(robot_id);
        }

        let (handle, task) = spawn_session(self.services.clone(), robot_id, kind);
        info!(
            "Admitted session {} ({}) for {}",
            handle.session_id(),
            kind,
            robot_id
        );
        index
            .by_robot
            .insert(robot_id.to_string(), handle.session_id().to_string());
        index.sessions.insert(
            handle.session_id().to_string(),
            SessionEntry {
                handle: handle.clone(),
                task: Some(task),
                started: Instant::now(),
            },
        );
        Ok(handle)
    }

    pub fn get(&self, session_id: &str) -> Result<SessionHandle> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| Error::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// The active session of `robot_id`, if any
    pub fn active_for_robot(&self, robot_id: &str) -> Option<SessionHandle> {
        let mut index = self.lock();
        index.release_finished();
        let session_id = index.by_robot.get(robot_id)?;
        index
            .sessions
            .get(session_id)
            .map(|entry| entry.handle.clone())
    }

    /// Cancel a session and free its robot slot at once.
    ///
    /// Returns `false` if the session had already finished.
    pub fn cancel(&self, session_id: &str) -> Result<bool> {
        let mut index = self.lock();
        let entry = index
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        let was_active = entry.handle.cancel();
        let robot_id = entry.handle.robot_id().to_string();
        if index.by_robot.get(&robot_id).map(String::as_str) == Some(session_id) {
            index.by_robot.remove(&robot_id);
        }
        Ok(was_active)
    }

    /// Forward an operator response; `Ok(false)` when no prompt is waiting
    pub fn submit_response(&self, session_id: &str, text: &str) -> Result<bool> {
        Ok(self.get(session_id)?.submit_response(text))
    }

    pub fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot> {
        Ok(self.get(session_id)?.snapshot())
    }

    pub fn summary(&self, session_id: &str) -> Result<SessionSummary> {
        Ok(self.get(session_id)?.summary())
    }

    /// Snapshots of every known session, oldest first
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> = self
            .lock()
            .sessions
            .values()
            .map(|entry| entry.handle.snapshot())
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.started_at);
        snapshots
    }

    /// Cancel `session_id` if it is still active and forget it
    pub fn cleanup(&self, session_id: &str) -> Result<()> {
        self.cancel(session_id)?;
        let mut index = self.lock();
        if let Some(entry) = index.sessions.remove(session_id) {
            debug!("Removed session {} for {}", session_id, entry.handle.robot_id());
        }
        Ok(())
    }

    /// Forget every finished session; returns how many were removed
    pub fn reap_finished(&self) -> usize {
        let removed = self.lock().remove_finished();
        if removed > 0 {
            debug!("Reaped {} finished sessions", removed);
        }
        removed
    }

    /// Cancel every session and wait for their tasks to exit
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut index = self.lock();
            for entry in index.sessions.values() {
                entry.handle.cancel();
            }
            index.by_robot.clear();
            index
                .sessions
                .values_mut()
                .filter_map(|entry| entry.task.take())
                .collect()
        };
        info!("Shutting down {} calibration sessions", tasks.len());
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("Session task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        let index = self.lock();
        for entry in index.sessions.values() {
            if !entry.handle.is_finished() {
                entry.handle.cancel();
            }
        }
    }
}
