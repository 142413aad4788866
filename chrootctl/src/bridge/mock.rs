//! Scriptable in-process bridge for tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use super::{BridgeEvent, CommandId, CommandResult, ExecMethod, HostBridge, RunningCommand};
use chrootctl_shared::errors::{ChrootError, ChrootResult};

/// One recorded invocation.
#[derive(Clone, Debug)]
pub(crate) struct Call {
    pub command: String,
    pub as_root: bool,
    pub is_async: bool,
}

#[derive(Clone)]
enum Reply {
    Sync(Result<String, String>),
    Async {
        chunks: Vec<String>,
        outcome: AsyncOutcome,
        hold: Option<Arc<Notify>>,
    },
}

#[derive(Clone)]
enum AsyncOutcome {
    Complete(CommandResult),
    Error(String),
    StartFailure,
    /// Drop the event channel without a terminal event.
    Silent,
}

struct Rule {
    pattern: String,
    reply: Reply,
    once: bool,
}

/// Bridge whose replies are matched by command substring.
///
/// Later rules take precedence; `*_once` rules are consumed on first match.
/// Unmatched sync commands return empty output, unmatched async commands
/// complete successfully with no output.
pub(crate) struct MockBridge {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
    running: Arc<Mutex<HashMap<CommandId, String>>>,
    next_id: AtomicU64,
    sync: bool,
    async_: bool,
}

impl MockBridge {
    pub fn new() -> Self {
        Self::with_support(true, true)
    }

    pub fn with_support(sync: bool, async_: bool) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            running: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            sync,
            async_,
        }
    }

    fn push(&self, pattern: &str, reply: Reply, once: bool) {
        self.rules.lock().push(Rule {
            pattern: pattern.to_string(),
            reply,
            once,
        });
    }

    pub fn on_sync(&self, pattern: &str, output: &str) {
        self.push(pattern, Reply::Sync(Ok(output.to_string())), false);
    }

    pub fn on_sync_once(&self, pattern: &str, output: &str) {
        self.push(pattern, Reply::Sync(Ok(output.to_string())), true);
    }

    pub fn on_sync_error(&self, pattern: &str, error: &str) {
        self.push(pattern, Reply::Sync(Err(error.to_string())), false);
    }

    pub fn on_async(&self, pattern: &str, chunks: &[&str], result: CommandResult) {
        self.push(pattern, async_reply(chunks, AsyncOutcome::Complete(result), None), false);
    }

    pub fn on_async_once(&self, pattern: &str, chunks: &[&str], result: CommandResult) {
        self.push(pattern, async_reply(chunks, AsyncOutcome::Complete(result), None), true);
    }

    /// Async command that waits for `release` before completing.
    pub fn on_async_held(&self, pattern: &str, release: Arc<Notify>, result: CommandResult) {
        self.push(
            pattern,
            async_reply(&[], AsyncOutcome::Complete(result), Some(release)),
            false,
        );
    }

    pub fn on_async_error(&self, pattern: &str, error: &str) {
        self.push(pattern, async_reply(&[], AsyncOutcome::Error(error.to_string()), None), false);
    }

    pub fn on_async_start_failure(&self, pattern: &str) {
        self.push(pattern, async_reply(&[], AsyncOutcome::StartFailure, None), false);
    }

    pub fn on_async_silent(&self, pattern: &str) {
        self.push(pattern, async_reply(&[], AsyncOutcome::Silent, None), false);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.command.clone()).collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.command.contains(pattern))
            .count()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.count(pattern) > 0
    }

    fn record(&self, command: &str, as_root: bool, is_async: bool) {
        self.calls.lock().push(Call {
            command: command.to_string(),
            as_root,
            is_async,
        });
    }

    fn find(&self, command: &str, want_async: bool) -> Option<Reply> {
        let mut rules = self.rules.lock();
        let index = rules.iter().rposition(|rule| {
            command.contains(&rule.pattern) && matches!(rule.reply, Reply::Async { .. }) == want_async
        })?;
        if rules[index].once {
            Some(rules.remove(index).reply)
        } else {
            Some(rules[index].reply.clone())
        }
    }
}

fn async_reply(chunks: &[&str], outcome: AsyncOutcome, hold: Option<Arc<Notify>>) -> Reply {
    Reply::Async {
        chunks: chunks.iter().map(|c| c.to_string()).collect(),
        outcome,
        hold,
    }
}

#[async_trait]
impl HostBridge for MockBridge {
    fn supports_sync(&self) -> bool {
        self.sync
    }

    fn supports_async(&self) -> bool {
        self.async_
    }

    fn exec_method(&self) -> ExecMethod {
        ExecMethod::Ksu
    }

    async fn execute(&self, command: &str, as_root: bool) -> ChrootResult<String> {
        self.record(command, as_root, false);
        match self.find(command, false) {
            Some(Reply::Sync(Ok(output))) => Ok(output),
            Some(Reply::Sync(Err(error))) => Err(ChrootError::Bridge(error)),
            _ => Ok(String::new()),
        }
    }

    fn execute_async(
        &self,
        command: &str,
        as_root: bool,
        events: mpsc::UnboundedSender<BridgeEvent>,
    ) -> ChrootResult<CommandId> {
        self.record(command, as_root, true);

        let (chunks, outcome, hold) = match self.find(command, true) {
            Some(Reply::Async {
                chunks,
                outcome,
                hold,
            }) => (chunks, outcome, hold),
            _ => (
                Vec::new(),
                AsyncOutcome::Complete(CommandResult::ok("")),
                None,
            ),
        };

        if matches!(outcome, AsyncOutcome::StartFailure) {
            return Err(ChrootError::Bridge("mock refused to start".into()));
        }

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.running.lock().insert(id.clone(), command.to_string());

        let running = Arc::clone(&self.running);
        let task_id = id.clone();
        tokio::spawn(async move {
            if let Some(release) = hold {
                release.notified().await;
            }
            for chunk in chunks {
                let _ = events.send(BridgeEvent::Output(chunk));
            }
            match outcome {
                AsyncOutcome::Complete(result) => {
                    let _ = events.send(BridgeEvent::Complete(result));
                }
                AsyncOutcome::Error(error) => {
                    let _ = events.send(BridgeEvent::Error(error));
                }
                AsyncOutcome::StartFailure | AsyncOutcome::Silent => drop(events),
            }
            running.lock().remove(&task_id);
        });

        Ok(id)
    }

    fn running_commands(&self) -> Vec<RunningCommand> {
        self.running
            .lock()
            .iter()
            .map(|(id, command)| RunningCommand {
                id: id.clone(),
                command: command.clone(),
                start_time: Utc::now(),
                duration: Duration::ZERO,
            })
            .collect()
    }

    fn is_command_running(&self, id: &str) -> bool {
        self.running.lock().contains_key(id)
    }
}
