//! Uniform command API over a [`HostBridge`].

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};

use super::{BridgeEvent, CommandId, CommandResult, ExecMethod, HostBridge, RunningCommand};
use crate::options::BridgePollOptions;
use chrootctl_shared::constants::LOGGING_PREFIX;
use chrootctl_shared::errors::{ChrootError, ChrootResult};

const NO_BRIDGE: &str = "No command bridge available";
const START_FAILED: &str = "Failed to start command";
const STREAM_CLOSED: &str = "Command bridge closed before completion";

/// Per-call execution options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunOptions {
    /// Run through the host's privilege escalation. Defaults to `true`.
    pub as_root: bool,
    /// Prefix the command with the verbose-logging marker.
    pub debug: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            as_root: true,
            debug: false,
        }
    }
}

impl RunOptions {
    pub fn root() -> Self {
        Self::default()
    }

    /// For tooling checks that do not need elevated privileges.
    pub fn unprivileged() -> Self {
        Self {
            as_root: false,
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

pub type LineCallback = Box<dyn FnMut(&str) + Send>;
type ErrorCallback = Box<dyn FnOnce(String) + Send>;
type CompleteCallback = Box<dyn FnOnce(CommandResult) + Send>;

/// Callbacks for [`CommandRunner::run_async`].
///
/// Exactly one of `on_error` / `on_complete` fires per started command.
#[derive(Default)]
pub struct AsyncCallbacks {
    on_output: Option<LineCallback>,
    on_raw_output: Option<LineCallback>,
    on_error: Option<ErrorCallback>,
    on_complete: Option<CompleteCallback>,
}

impl AsyncCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per normalized output line.
    pub fn on_output(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_output = Some(Box::new(f));
        self
    }

    /// Called with each raw chunk before normalization.
    pub fn on_raw_output(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_raw_output = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(String) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnOnce(CommandResult) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Route both terminal callbacks into `f`; errors arrive as failed results.
    pub fn on_settled(self, f: impl FnOnce(CommandResult) + Send + 'static) -> Self {
        let slot = Arc::new(Mutex::new(Some(f)));
        let error_slot = Arc::clone(&slot);
        self.on_error(move |error| {
            if let Some(f) = error_slot.lock().take() {
                f(CommandResult::failure(error));
            }
        })
        .on_complete(move |result| {
            if let Some(f) = slot.lock().take() {
                f(result);
            }
        })
    }

    fn output(&mut self, raw: &str) {
        if let Some(cb) = self.on_raw_output.as_mut() {
            cb(raw);
        }
        if let Some(cb) = self.on_output.as_mut() {
            for line in normalize_output(raw) {
                cb(&line);
            }
        }
    }

    fn error(mut self, error: String) {
        if let Some(cb) = self.on_error.take() {
            cb(error);
        }
    }

    fn complete(mut self, result: CommandResult) {
        if let Some(cb) = self.on_complete.take() {
            cb(result);
        }
    }
}

/// Split raw output into trimmed, non-empty lines, dropping the host's
/// `[Executing: ...]` echo lines.
pub fn normalize_output(raw: &str) -> Vec<String> {
    raw.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("[Executing:"))
        .map(String::from)
        .collect()
}

/// Prefix `command` with the verbose-logging marker when `debug` is set.
pub fn apply_debug_prefix(command: &str, debug: bool) -> String {
    if debug {
        format!("{LOGGING_PREFIX} {command}")
    } else {
        command.to_string()
    }
}

/// Adapter over an optionally-attached [`HostBridge`].
///
/// Cheap to clone; all clones share the same bridge slot.
#[derive(Clone)]
pub struct CommandRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    bridge: RwLock<Option<Arc<dyn HostBridge>>>,
    poll: BridgePollOptions,
}

impl CommandRunner {
    /// Runner with no bridge attached yet.
    pub fn new(poll: BridgePollOptions) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                bridge: RwLock::new(None),
                poll,
            }),
        }
    }

    pub fn with_bridge(bridge: Arc<dyn HostBridge>, poll: BridgePollOptions) -> Self {
        let runner = Self::new(poll);
        runner.attach(bridge);
        runner
    }

    pub fn attach(&self, bridge: Arc<dyn HostBridge>) {
        tracing::debug!(exec_method = bridge.exec_method().as_str(), "Command bridge attached");
        *self.inner.bridge.write() = Some(bridge);
    }

    pub fn detach(&self) {
        *self.inner.bridge.write() = None;
    }

    fn bridge(&self) -> Option<Arc<dyn HostBridge>> {
        self.inner.bridge.read().clone()
    }

    /// True iff a bridge is attached and exposes at least one primitive.
    pub fn is_available(&self) -> bool {
        self.bridge()
            .is_some_and(|b| b.supports_sync() || b.supports_async())
    }

    pub fn exec_method(&self) -> ExecMethod {
        self.bridge()
            .map(|b| b.exec_method())
            .unwrap_or(ExecMethod::None)
    }

    /// Poll for a late-attaching bridge at a fixed interval, up to the configured max wait.
    pub async fn wait_for_bridge(&self) -> bool {
        if self.is_available() {
            return true;
        }

        let interval = self.inner.poll.interval;
        let attempts =
            (self.inner.poll.max_wait.as_millis() / interval.as_millis().max(1)).max(1) as u64;

        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        for attempt in 1..=attempts {
            ticker.tick().await;
            if self.is_available() {
                tracing::debug!(attempt, "Command bridge became available");
                return true;
            }
        }

        tracing::warn!(
            max_wait = ?self.inner.poll.max_wait,
            "No command bridge attached, giving up"
        );
        false
    }

    /// Run a command to completion and return its raw output.
    pub async fn run_sync(&self, command: &str, options: RunOptions) -> ChrootResult<String> {
        let bridge = self
            .bridge()
            .filter(|b| b.supports_sync())
            .ok_or(ChrootError::BridgeUnavailable)?;

        let command = apply_debug_prefix(command, options.debug);
        tracing::debug!(command = %command, as_root = options.as_root, "Running command");

        bridge
            .execute(&command, options.as_root)
            .await
            .inspect_err(|e| tracing::debug!(command = %command, error = %e, "Command raised"))
    }

    /// Start a command without waiting for it.
    ///
    /// Returns `None` if the bridge is absent or refuses to start the command;
    /// in that case no callback fires.
    pub fn run_async(
        &self,
        command: &str,
        options: RunOptions,
        callbacks: AsyncCallbacks,
    ) -> Option<CommandId> {
        let bridge = self.bridge().filter(|b| b.supports_async())?;

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("run_async called outside a tokio runtime");
            return None;
        };

        let command = apply_debug_prefix(command, options.debug);
        let (tx, rx) = mpsc::unbounded_channel();

        let id = match bridge.execute_async(&command, options.as_root, tx) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(command = %command, error = %e, "Bridge failed to start command");
                return None;
            }
        };

        tracing::debug!(command_id = %id, command = %command, as_root = options.as_root, "Started async command");
        handle.spawn(pump_events(rx, callbacks, id.clone()));
        Some(id)
    }

    /// Run a command asynchronously and wait for its terminal result.
    ///
    /// Never fails: a missing bridge or a refused start resolve to a failed
    /// [`CommandResult`].
    pub async fn run_async_awaitable(
        &self,
        command: &str,
        options: RunOptions,
        on_output: Option<LineCallback>,
    ) -> CommandResult {
        if !self.is_available() {
            return CommandResult::failure(NO_BRIDGE);
        }

        let (tx, rx) = oneshot::channel();
        let mut callbacks = AsyncCallbacks::new().on_settled(move |result| {
            let _ = tx.send(result);
        });
        callbacks.on_output = on_output;

        if self.run_async(command, options, callbacks).is_none() {
            return CommandResult::failure(START_FAILED);
        }

        rx.await
            .unwrap_or_else(|_| CommandResult::failure(STREAM_CLOSED))
    }

    /// Run a command asynchronously, collecting its normalized output lines.
    pub async fn capture_output(
        &self,
        command: &str,
        options: RunOptions,
    ) -> (CommandResult, Vec<String>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let result = self
            .run_async_awaitable(
                command,
                options,
                Some(Box::new(move |line: &str| sink.lock().push(line.to_string()))),
            )
            .await;
        let lines = std::mem::take(&mut *lines.lock());
        (result, lines)
    }

    pub fn running_commands(&self) -> Vec<RunningCommand> {
        self.bridge()
            .map(|b| b.running_commands())
            .unwrap_or_default()
    }

    pub fn is_command_running(&self, id: &str) -> bool {
        self.bridge().is_some_and(|b| b.is_command_running(id))
    }
}

async fn pump_events(
    mut events: mpsc::UnboundedReceiver<BridgeEvent>,
    mut callbacks: AsyncCallbacks,
    id: CommandId,
) {
    while let Some(event) = events.recv().await {
        match event {
            BridgeEvent::Output(raw) => callbacks.output(&raw),
            BridgeEvent::Error(error) => {
                tracing::debug!(command_id = %id, error = %error, "Async command errored");
                callbacks.error(error);
                return;
            }
            BridgeEvent::Complete(result) => {
                tracing::debug!(
                    command_id = %id,
                    success = result.success,
                    exit_code = ?result.exit_code,
                    "Async command completed"
                );
                callbacks.complete(result);
                return;
            }
        }
    }

    tracing::warn!(command_id = %id, "Bridge closed event stream without a result");
    callbacks.error(STREAM_CLOSED.to_string());
}
