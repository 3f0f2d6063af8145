//! Interactive Channels
//!
//! A channel runs one calibration command inside an interactive session
//! on the robot and exposes it as non-blocking reads and line-oriented
//! writes. Two backends exist: a real PTY-backed remote shell and the
//! in-process simulator.

pub mod lines;
pub mod pty;
pub mod signals;
pub mod streams;

pub use lines::{clean_line, strip_ansi, LineAssembler, Utf8Accumulator};
pub use pty::{PtyChannel, PtyChannelFactory};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Result of one poll of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRead {
    /// Output arrived
    Data(String),
    /// Nothing arrived within the wait
    Idle,
    /// The remote side has finished
    Closed,
}

/// Driver for one interactive calibration command
#[async_trait]
pub trait InteractiveChannel: Send {
    /// Open the session and send `command`
    async fn start(&mut self, command: &str) -> Result<()>;

    /// Wait at most `wait` for output
    async fn read_chunk(&mut self, wait: Duration) -> Result<ChannelRead>;

    /// Send `text` as if typed, followed by a line terminator
    async fn send(&mut self, text: &str) -> Result<()>;

    /// Non-blocking liveness check
    fn is_alive(&mut self) -> bool;

    /// Interrupt and release the session; safe to call more than once
    async fn terminate(&mut self) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}

/// Opens channels for a robot
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open(&self, robot_id: &str) -> Result<Box<dyn InteractiveChannel>>;
}
