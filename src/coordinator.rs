//! Prompt/Response Coordinator
//!
//! Hands operator responses from request handlers to the session task
//! waiting on a prompt. There is at most one outstanding wait per
//! session; a response arriving while nobody waits is dropped.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// How a prompt wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// An operator supplied the text
    Supplied(String),
    /// Nobody answered in time; carries the default
    TimedOut(String),
}

impl ResponseOutcome {
    pub fn text(&self) -> &str {
        match self {
            ResponseOutcome::Supplied(text) | ResponseOutcome::TimedOut(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ResponseOutcome::Supplied(text) | ResponseOutcome::TimedOut(text) => text,
        }
    }
}

#[derive(Debug)]
pub struct ResponseCoordinator {
    session_id: String,
    slot: Mutex<Option<oneshot::Sender<String>>>,
}

/// Clears the slot when a wait ends for any reason, including the
/// waiting future being dropped.
struct SlotGuard<'a> {
    slot: &'a Mutex<Option<oneshot::Sender<String>>>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.take();
        }
    }
}

impl ResponseCoordinator {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            slot: Mutex::new(None),
        }
    }

    /// Wait for an operator response, the timeout, or cancellation.
    ///
    /// Fails with `ResponseWaitInProgress` if another wait is outstanding.
    pub async fn await_response(
        &self,
        default: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ResponseOutcome> {
        let rx = {
            let mut slot = self
                .slot
                .lock()
                .map_err(|_| Error::Other("response slot poisoned".to_string()))?;
            if slot.is_some() {
                return Err(Error::ResponseWaitInProgress);
            }
            let (tx, rx) = oneshot::channel();
            *slot = Some(tx);
            rx
        };
        let _guard = SlotGuard { slot: &self.slot };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Session {} cancelled while waiting for a response", self.session_id);
                Err(Error::SessionCancelled)
            }
            received = tokio::time::timeout(timeout, rx) => match received {
                Ok(Ok(text)) => Ok(ResponseOutcome::Supplied(text)),
                Ok(Err(_)) => Err(Error::SessionCancelled),
                Err(_) => {
                    info!(
                        "Session {}: no response within {:?}, using default '{}'",
                        self.session_id, timeout, default
                    );
                    Ok(ResponseOutcome::TimedOut(default.to_string()))
                }
            }
        }
    }

    /// Deliver a response to the current wait.
    ///
    /// Returns `false` (and discards the text) when nothing is waiting.
    pub fn submit(&self, response: impl Into<String>) -> bool {
        let response = response.into();
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                warn!(
                    "Session {}: response '{}' arrived with no prompt waiting, discarded",
                    self.session_id, response
                );
                false
            }
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}
