// tshark subprocess as a packet source

use super::{CaptureMode, Packet, PacketSource};
use crate::config::{parse_duration, CaptureConfig};
use crate::error::{PciError, Result};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Packets read from a `tshark` child process printing one tab-separated
/// record per packet.
///
/// End of output is a normal end of stream only for a bounded (file) capture
/// whose process exited successfully. Anything else is a `CaptureFailed`.
pub struct TsharkSource {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    /// Yields the last non-empty stderr line once tshark closes stderr
    stderr_task: Option<JoinHandle<Option<String>>>,
    poll_interval: Duration,
    bounded: bool,
    finished: bool,
    closed: bool,
}

impl TsharkSource {
    /// Start tshark for the given mode. Must be called inside a tokio runtime.
    pub fn spawn(mode: &CaptureMode, config: &CaptureConfig) -> Result<Self> {
        let poll_interval =
            parse_duration(&config.poll_interval).ok_or_else(|| PciError::InvalidConfigValue {
                path: "capture.poll_interval".to_string(),
                message: format!("Invalid duration: {}", config.poll_interval),
            })?;

        if let CaptureMode::Ring { ring, .. } = mode {
            if let Some(parent) = ring.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| PciError::Io {
                        source: e,
                        context: format!("Failed to create ring buffer directory: {:?}", parent),
                    })?;
                }
            }
        }

        let args = build_args(mode, &config.fields);
        tracing::debug!("Running {:?} {}", config.tshark_path, args.join(" "));

        let mut command = Command::new(&config.tshark_path);
        command.args(&args);

        Self::from_command(command, poll_interval, mode.is_bounded())
    }

    /// Wrap an arbitrary command whose stdout follows the tshark record format.
    /// `bounded` marks output that is expected to end.
    pub(crate) fn from_command(
        mut command: Command,
        poll_interval: Duration,
        bounded: bool,
    ) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PciError::Io {
                source: e,
                context: "Failed to start tshark".to_string(),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("tshark stdout was not captured"))?;

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut last = None;
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim();
                    if !line.is_empty() {
                        tracing::debug!(target: "pci::tshark", "{}", line);
                        last = Some(line.to_string());
                    }
                }
                last
            })
        });

        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
            stderr_task,
            poll_interval,
            bounded,
            finished: false,
            closed: false,
        })
    }

    /// Collect the exit status of the child
    async fn reap(&mut self) -> Option<ExitStatus> {
        match self.child.wait().await {
            Ok(status) => {
                tracing::debug!("tshark exited: {}", status);
                Some(status)
            }
            Err(e) => {
                tracing::warn!("Failed to wait for tshark: {}", e);
                None
            }
        }
    }

    /// Last diagnostic tshark wrote before exiting
    async fn stderr_tail(&mut self) -> Option<String> {
        match self.stderr_task.take() {
            Some(task) => task.await.ok().flatten(),
            None => None,
        }
    }

    /// stdout is exhausted: decide between a clean end and a failed capture
    async fn end_of_output(&mut self) -> Result<Option<Packet>> {
        self.finished = true;
        let status = self.reap().await;
        let tail = self.stderr_tail().await;

        let problem = match status {
            Some(status) if status.success() && self.bounded => return Ok(None),
            Some(status) if status.success() => {
                "tshark stopped while capturing an interface".to_string()
            }
            Some(status) => format!("tshark exited with {}", status),
            None => "tshark exit status unknown".to_string(),
        };

        Err(PciError::CaptureFailed(match tail {
            Some(line) => format!("{}: {}", problem, line),
            None => problem,
        }))
    }
}

#[async_trait]
impl PacketSource for TsharkSource {
    async fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if self.finished || self.closed {
                return Ok(None);
            }

            match tokio::time::timeout(self.poll_interval, self.lines.next_line()).await {
                // Idle, not end of stream
                Err(_) => {
                    tracing::debug!(
                        "No packets in the last {:?}, still capturing",
                        self.poll_interval
                    );
                }
                Ok(Ok(Some(line))) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Packet::from_record(&line).map(Some);
                }
                Ok(Ok(None)) => return self.end_of_output().await,
                Ok(Err(e)) => {
                    return Err(PciError::Io {
                        source: e,
                        context: "Failed to read tshark output".to_string(),
                    });
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !self.finished {
            if let Ok(None) = self.child.try_wait() {
                if let Err(e) = self.child.start_kill() {
                    tracing::warn!("Failed to stop tshark: {}", e);
                }
            }
            self.reap().await;
        }

        self.stderr_tail().await;

        tracing::info!("Capture closed");
        Ok(())
    }
}

/// Command line for one capture mode
fn build_args(mode: &CaptureMode, fields: &[String]) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    match mode {
        CaptureMode::File { path } => {
            args.extend(["-r".to_string(), path.display().to_string()]);
        }
        CaptureMode::Live { interface } => {
            args.extend(["-i".to_string(), interface.clone()]);
        }
        CaptureMode::Ring { interface, ring } => {
            args.extend([
                "-i".to_string(),
                interface.clone(),
                "-b".to_string(),
                format!("filesize:{}", ring.file_size_kb),
                "-b".to_string(),
                format!("files:{}", ring.files),
                "-w".to_string(),
                ring.path.display().to_string(),
                // keep printing records while writing the ring files
                "-P".to_string(),
            ]);
        }
    }

    for flag in [
        "-n",
        "-l",
        "-T",
        "fields",
        "-E",
        "separator=/t",
        "-E",
        "occurrence=f",
        "-E",
        "quote=n",
    ] {
        args.push(flag.to_string());
    }

    for field in fields {
        args.push("-e".to_string());
        args.push(field.clone());
    }

    args
}
