//! PTY Streams
//!
//! Bridges the blocking PTY master reader/writer threads to async code
//! using channels.

use std::sync::mpsc::Sender as StdSender;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::{Error, Result};

/// Outcome of a timed read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRead {
    Data(Vec<u8>),
    Timeout,
    Closed,
}

/// PTY I/O streams wrapper
pub struct PtyStreams {
    /// Output bytes from the PTY reader thread
    output_rx: UnboundedReceiver<Vec<u8>>,
    /// Input bytes for the PTY writer thread
    input_tx: StdSender<Vec<u8>>,
    stats: StreamStats,
}

impl PtyStreams {
    pub fn from_channels(
        output_rx: UnboundedReceiver<Vec<u8>>,
        input_tx: StdSender<Vec<u8>>,
    ) -> Self {
        Self {
            output_rx,
            input_tx,
            stats: StreamStats::default(),
        }
    }

    /// Queue bytes for the PTY stdin
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.input_tx
            .send(data.to_vec())
            .map_err(|e| Error::PtyInputSendFailed {
                reason: e.to_string(),
            })?;
        self.stats.bytes_written += data.len() as u64;
        self.stats.write_operations += 1;
        Ok(())
    }

    /// Wait up to `wait` for the next output chunk
    pub async fn read_with_timeout(&mut self, wait: Duration) -> StreamRead {
        match tokio::time::timeout(wait, self.output_rx.recv()).await {
            Ok(Some(bytes)) => {
                self.stats.bytes_read += bytes.len() as u64;
                self.stats.read_operations += 1;
                StreamRead::Data(bytes)
            }
            Ok(None) => StreamRead::Closed,
            Err(_) => {
                self.stats.read_timeouts += 1;
                StreamRead::Timeout
            }
        }
    }

    /// Discard all output already buffered; returns the byte count dropped
    pub fn drain_output(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(bytes) = self.output_rx.try_recv() {
            dropped += bytes.len();
        }
        dropped
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }
}

/// Stream statistics for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_operations: u64,
    pub write_operations: u64,
    pub read_timeouts: u64,
}
