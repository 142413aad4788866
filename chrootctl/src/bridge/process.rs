//! [`HostBridge`] backed by local processes.
//!
//! Commands run through `sh -c`. When root is requested the command is
//! wrapped in `su -c` instead, which is how both KernelSU and Magisk expose
//! root to an unprivileged process.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::{BridgeEvent, CommandId, CommandResult, ExecMethod, HostBridge, RunningCommand};
use chrootctl_shared::errors::{ChrootError, ChrootResult};

struct RunningEntry {
    command: String,
    start_time: DateTime<Utc>,
    started: Instant,
}

type Registry = Arc<Mutex<HashMap<CommandId, RunningEntry>>>;

/// Runs commands as child processes and tracks the ones still in flight.
pub struct ProcessBridge {
    /// Program used to gain root, `None` to run everything unprivileged.
    root_wrapper: Option<String>,
    method: ExecMethod,
    running: Registry,
}

impl ProcessBridge {
    /// Bridge that escalates through `su -c` when asked for root.
    pub fn new() -> Self {
        Self {
            root_wrapper: Some("su".into()),
            method: ExecMethod::Sulib,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Bridge that ignores `as_root` and always runs as the current user.
    pub fn unprivileged() -> Self {
        Self {
            root_wrapper: None,
            method: ExecMethod::None,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn command(&self, command: &str, as_root: bool) -> Command {
        let mut cmd = match (&self.root_wrapper, as_root) {
            (Some(wrapper), true) => {
                let mut cmd = Command::new(wrapper);
                cmd.arg("-c").arg(command);
                cmd
            }
            _ => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                cmd
            }
        };
        cmd.stdin(Stdio::null());
        cmd
    }
}

impl Default for ProcessBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostBridge for ProcessBridge {
    fn exec_method(&self) -> ExecMethod {
        self.method
    }

    async fn execute(&self, command: &str, as_root: bool) -> ChrootResult<String> {
        let output = self
            .command(command, as_root)
            .output()
            .await
            .map_err(|e| ChrootError::Bridge(format!("failed to spawn: {e}")))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ChrootError::CommandFailed(match output.status.code() {
            Some(code) if stderr.trim().is_empty() => format!("exit code {code}"),
            Some(code) => format!("exit code {code}: {}", stderr.trim()),
            None => "terminated by signal".to_string(),
        }))
    }

    fn execute_async(
        &self,
        command: &str,
        as_root: bool,
        events: mpsc::UnboundedSender<BridgeEvent>,
    ) -> ChrootResult<CommandId> {
        let mut child = self
            .command(command, as_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ChrootError::Bridge(format!("failed to spawn: {e}")))?;

        let id = uuid::Uuid::new_v4().to_string();
        self.running.lock().insert(
            id.clone(),
            RunningEntry {
                command: command.to_string(),
                start_time: Utc::now(),
                started: Instant::now(),
            },
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let running = Arc::clone(&self.running);
        let task_id = id.clone();

        tokio::spawn(async move {
            let mut collected = String::new();
            let mut errors = String::new();

            let mut out_lines = stdout.map(LineStream::new);
            let mut err_lines = stderr.map(LineStream::new);

            loop {
                tokio::select! {
                    line = next_line(&mut out_lines), if out_lines.is_some() => match line {
                        Some(line) => {
                            collected.push_str(&line);
                            collected.push('\n');
                            let _ = events.send(BridgeEvent::Output(line));
                        }
                        None => out_lines = None,
                    },
                    line = next_line(&mut err_lines), if err_lines.is_some() => match line {
                        Some(line) => {
                            errors.push_str(&line);
                            errors.push('\n');
                            let _ = events.send(BridgeEvent::Output(line));
                        }
                        None => err_lines = None,
                    },
                    else => break,
                }
            }

            let event = match child.wait().await {
                Ok(status) => BridgeEvent::Complete(CommandResult {
                    success: status.success(),
                    exit_code: status.code(),
                    output: Some(collected),
                    error: (!status.success()).then(|| {
                        let trimmed = errors.trim();
                        if trimmed.is_empty() {
                            format!("exit code {}", status.code().unwrap_or(-1))
                        } else {
                            trimmed.to_string()
                        }
                    }),
                }),
                Err(e) => BridgeEvent::Error(format!("failed to wait for command: {e}")),
            };

            running.lock().remove(&task_id);
            let _ = events.send(event);
        });

        Ok(id)
    }

    fn running_commands(&self) -> Vec<RunningCommand> {
        self.running
            .lock()
            .iter()
            .map(|(id, entry)| RunningCommand {
                id: id.clone(),
                command: entry.command.clone(),
                start_time: entry.start_time,
                duration: entry.started.elapsed(),
            })
            .collect()
    }

    fn is_command_running(&self, id: &str) -> bool {
        self.running.lock().contains_key(id)
    }
}

/// Line reader over a child pipe that tolerates bytes which are not UTF-8.
///
/// Partial reads stay in `pending`, so the read can be dropped by `select!`
/// and resumed on the next call without losing data.
struct LineStream<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineStream<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    /// Next line without its terminator, `None` at end of stream.
    async fn next_line(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.pending).await {
            Ok(0) if self.pending.is_empty() => None,
            Ok(_) => {
                let line = decode_line(&self.pending);
                self.pending.clear();
                Some(line)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Output pipe read failed");
                None
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Next line from an optional stream. Pends forever once the stream is gone.
async fn next_line<R>(lines: &mut Option<LineStream<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match lines {
        Some(stream) => stream.next_line().await,
        None => std::future::pending().await,
    }
}
