//! Process Signals
//!
//! Interrupting and killing the local process that carries a remote
//! calibration session.

use crate::error::{Error, Result};

/// Signals the channel sends to its child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ctrl+C
    Interrupt,
    /// Graceful shutdown
    Terminate,
    /// Forceful termination
    Kill,
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
        }
    }
}

/// Send `signal` to `pid`
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;

    let nix_signal = match signal {
        Signal::Interrupt => NixSignal::SIGINT,
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    let raw = i32::try_from(pid).map_err(|_| Error::SignalSendFailed {
        signal: signal.name().to_string(),
        reason: format!("pid {} out of range", pid),
    })?;

    kill(Pid::from_raw(raw), nix_signal).map_err(|e| Error::SignalSendFailed {
        signal: signal.name().to_string(),
        reason: e.to_string(),
    })?;
    debug!("Sent {} to pid {}", signal.name(), pid);
    Ok(())
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, signal: Signal) -> Result<()> {
    Err(Error::SignalNotSupported {
        signal: signal.name().to_string(),
        platform: std::env::consts::OS.to_string(),
    })
}

/// Whether a process with `pid` still exists
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        Ok(raw) => nix::sys::signal::kill(Pid::from_raw(raw), None).is_ok(),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn process_exists(_pid: u32) -> bool {
    false
}
