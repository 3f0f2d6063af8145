//! PTY-backed remote shell channel
//!
//! Spawns the device link's shell program (normally `ssh -tt host`) in a
//! pseudoterminal. Blocking reads and writes on the PTY master run on
//! dedicated threads and are bridged to async code by [`PtyStreams`].

use std::io::{Read, Write};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc::unbounded_channel;

use super::signals::{send_signal, Signal};
use super::streams::{PtyStreams, StreamRead};
use super::{ChannelFactory, ChannelRead, InteractiveChannel, Utf8Accumulator};
use crate::config::ChannelConfig;
use crate::device::DeviceLink;
use crate::error::{Error, Result};

/// EIO: on Linux the master reports this once the slave side is gone
const EIO: i32 = 5;

/// Interactive channel running a program inside a pseudoterminal
pub struct PtyChannel {
    program: String,
    args: Vec<String>,
    config: ChannelConfig,
    master: Option<Box<dyn MasterPty + Send>>,
    child: Option<Box<dyn Child + Send + Sync>>,
    streams: Option<PtyStreams>,
    decoder: Utf8Accumulator,
    pid: Option<u32>,
    closed: bool,
}

impl PtyChannel {
    pub fn new(program: impl Into<String>, args: Vec<String>, config: ChannelConfig) -> Self {
        Self {
            program: program.into(),
            args,
            config,
            master: None,
            child: None,
            streams: None,
            decoder: Utf8Accumulator::new(),
            pid: None,
            closed: false,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn spawn(&mut self) -> Result<PtyStreams> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: self.config.rows,
                cols: self.config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::PtyCreationFailed {
                command: self.program.clone(),
                reason: e.to_string(),
            })?;

        let mut cmd_builder = CommandBuilder::new(&self.program);
        cmd_builder.args(&self.args);
        cmd_builder.env("TERM", "xterm");

        let child = pair
            .slave
            .spawn_command(cmd_builder)
            .map_err(|e| Error::CommandSpawnFailed {
                command: self.program.clone(),
                reason: e.to_string(),
            })?;
        // Only the child keeps the slave open, so EOF follows its exit
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::PtyReaderCloneFailed {
                reason: e.to_string(),
            })?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::PtyWriterTakeFailed {
                reason: e.to_string(),
            })?;

        self.pid = child.process_id();
        self.child = Some(child);
        self.master = Some(pair.master);

        Ok(bridge_streams(
            reader,
            writer,
            self.config.read_buffer_size,
            self.config.max_consecutive_read_errors,
        ))
    }

    fn streams_mut(&mut self) -> Result<&mut PtyStreams> {
        self.streams.as_mut().ok_or(Error::ChannelNotStarted)
    }

    fn release(&mut self) {
        self.streams = None;
        self.master = None;
        self.child = None;
        self.closed = true;
    }
}

/// Start the reader and writer threads for a PTY master
fn bridge_streams(
    mut reader: Box<dyn Read + Send>,
    mut writer: Box<dyn Write + Send>,
    buffer_size: usize,
    max_consecutive_errors: u32,
) -> PtyStreams {
    let (tx_out, rx_out) = unbounded_channel::<Vec<u8>>();
    let (tx_in, rx_in) = channel::<Vec<u8>>();

    thread::spawn(move || {
        let mut buf = vec![0u8; buffer_size.max(256)];
        let mut consecutive_errors = 0;

        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("PTY read EOF - remote session finished");
                    break;
                }
                Ok(n) => {
                    consecutive_errors = 0;
                    if tx_out.send(buf[..n].to_vec()).is_err() {
                        debug!("PTY read: receiver dropped, stopping reader thread");
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) if e.raw_os_error() == Some(EIO) => {
                    debug!("PTY read EIO - slave side closed");
                    break;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        "PTY read error ({}): {} (attempt {}/{})",
                        e.kind(),
                        e,
                        consecutive_errors,
                        max_consecutive_errors
                    );
                    if consecutive_errors >= max_consecutive_errors {
                        error!("PTY read: too many consecutive errors, stopping reader thread");
                        break;
                    }
                    thread::sleep(Duration::from_millis(50));
                }
            }
        }
        debug!("PTY reader thread exiting");
    });

    thread::spawn(move || {
        while let Ok(data) = rx_in.recv() {
            if let Err(e) = writer.write_all(&data) {
                warn!("PTY write error ({}): {}", e.kind(), e);
                if e.kind() != std::io::ErrorKind::Interrupted {
                    break;
                }
                continue;
            }
            if let Err(e) = writer.flush() {
                debug!("PTY flush error: {}", e);
            }
        }
        debug!("PTY writer thread exiting");
    });

    PtyStreams::from_channels(rx_out, tx_in)
}

#[async_trait]
impl InteractiveChannel for PtyChannel {
    async fn start(&mut self, command: &str) -> Result<()> {
        if self.streams.is_some() || self.closed {
            return Err(Error::ChannelAlreadyStarted);
        }

        let mut streams = self.spawn()?;
        info!(
            "Opened interactive session via {} (pid {:?})",
            self.program, self.pid
        );

        // Let the login banner and shell prompt settle before typing
        tokio::time::sleep(self.config.warmup()).await;
        let dropped = streams.drain_output();
        debug!("Discarded {} bytes of session banner", dropped);

        // The shell exits with the command, which closes the channel
        streams.write(format!("{}; exit\n", command).as_bytes())?;
        self.streams = Some(streams);
        Ok(())
    }

    async fn read_chunk(&mut self, wait: Duration) -> Result<ChannelRead> {
        if self.closed {
            return Ok(ChannelRead::Closed);
        }
        let read = self.streams_mut()?.read_with_timeout(wait).await;

        match read {
            StreamRead::Data(bytes) => {
                let text = self.decoder.decode(&bytes);
                if text.is_empty() {
                    Ok(ChannelRead::Idle)
                } else {
                    Ok(ChannelRead::Data(text))
                }
            }
            StreamRead::Timeout => Ok(ChannelRead::Idle),
            StreamRead::Closed => {
                if let Some(streams) = self.streams.as_ref() {
                    let stats = streams.stats();
                    debug!(
                        "PTY closed after {} bytes read, {} bytes written",
                        stats.bytes_read, stats.bytes_written
                    );
                }
                self.release();
                let rest = self.decoder.finish();
                if rest.is_empty() {
                    Ok(ChannelRead::Closed)
                } else {
                    Ok(ChannelRead::Data(rest))
                }
            }
        }
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        if self.closed {
            return Err(Error::PtyInputSendFailed {
                reason: "session already closed".to_string(),
            });
        }
        self.streams_mut()?.write(format!("{}\n", text).as_bytes())
    }

    fn is_alive(&mut self) -> bool {
        if self.closed {
            return false;
        }
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.child.is_none() {
            self.release();
            return Ok(());
        }

        if let Some(streams) = self.streams.as_mut() {
            if let Err(e) = streams.write(b"\x03") {
                debug!("Could not send Ctrl+C to session: {}", e);
            }
        }
        if let Some(pid) = self.pid {
            if let Err(e) = send_signal(pid, Signal::Interrupt) {
                debug!("Interrupt for pid {} failed: {}", pid, e);
            }
        }

        let grace = self.config.terminate_grace();
        let step = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        while waited < grace && self.is_alive() {
            tokio::time::sleep(step).await;
            waited += step;
        }

        if self.is_alive() {
            if let Some(child) = self.child.as_mut() {
                warn!("Session pid {:?} ignored interrupt, killing", self.pid);
                child.kill().map_err(|e| Error::SignalSendFailed {
                    signal: Signal::Kill.name().to_string(),
                    reason: e.to_string(),
                })?;
            }
        }

        self.release();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "pty"
    }
}

/// Opens PTY channels through the device link's shell command
pub struct PtyChannelFactory {
    link: Arc<dyn DeviceLink>,
    config: ChannelConfig,
}

impl PtyChannelFactory {
    pub fn new(link: Arc<dyn DeviceLink>, config: ChannelConfig) -> Self {
        Self { link, config }
    }
}

#[async_trait]
impl ChannelFactory for PtyChannelFactory {
    async fn open(&self, robot_id: &str) -> Result<Box<dyn InteractiveChannel>> {
        let (program, args) = self.link.shell_command(robot_id).await?;
        debug!("Channel for {} will run {} {:?}", robot_id, program, args);
        Ok(Box::new(PtyChannel::new(program, args, self.config.clone())))
    }
}
