//! Single-flight guard for user-initiated operations.
//!
//! At most one guarded operation runs at a time, process-wide. A second
//! request while one is in flight is rejected with a visible warning, never
//! queued.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::bridge::CommandRunner;
use crate::console::{LogClass, LogConsole};

const BUSY_MESSAGE: &str = "⚠ Another command is already running. Please wait...";
const UNAVAILABLE_MESSAGE: &str = "Cannot execute: root access not available";

/// Result of a guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome<T> {
    /// The action ran and produced `T`.
    Ran(T),
    /// Another operation holds the guard; the action was not invoked.
    Busy { holder: String },
    /// No bridge is attached; the action was not invoked.
    Unavailable,
}

impl<T> GuardOutcome<T> {
    pub fn ran(&self) -> bool {
        matches!(self, GuardOutcome::Ran(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            GuardOutcome::Ran(value) => Some(value),
            _ => None,
        }
    }
}

/// Holds the guard slot for one operation. Dropping it releases the slot.
#[must_use = "the guard is released as soon as the token is dropped"]
pub struct GuardToken {
    slot: Arc<Mutex<Option<String>>>,
    released: Arc<Notify>,
    operation: String,
}

impl GuardToken {
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_deref() == Some(self.operation.as_str()) {
            *slot = None;
        }
        drop(slot);
        self.released.notify_waiters();
        tracing::debug!(op = %self.operation, "Command guard released");
    }
}

/// The process-wide single-flight guard.
#[derive(Clone)]
pub struct CommandGuard {
    slot: Arc<Mutex<Option<String>>>,
    released: Arc<Notify>,
    runner: CommandRunner,
    console: LogConsole,
}

impl CommandGuard {
    pub fn new(runner: CommandRunner, console: LogConsole) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            released: Arc::new(Notify::new()),
            runner,
            console,
        }
    }

    /// Name of the operation currently holding the guard.
    pub fn active(&self) -> Option<String> {
        self.slot.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Wait until no operation holds the guard.
    ///
    /// Covers fire-and-forget operations whose token is released by a late
    /// callback.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed
            notified.as_mut().enable();
            if !self.is_busy() {
                return;
            }
            notified.await;
        }
    }

    /// Claim the guard for `operation`, reporting rejection to the console.
    ///
    /// The returned token may outlive the calling scope, which is how
    /// fire-and-forget operations keep the guard until their late callback.
    pub fn acquire(&self, operation: &str) -> GuardOutcome<GuardToken> {
        let mut slot = self.slot.lock();

        if let Some(holder) = (*slot).clone() {
            drop(slot);
            tracing::debug!(op = operation, holder = %holder, "Command guard busy");
            self.console.append(BUSY_MESSAGE, LogClass::Warn);
            return GuardOutcome::Busy { holder };
        }

        if !self.runner.is_available() {
            drop(slot);
            self.console.append(UNAVAILABLE_MESSAGE, LogClass::Err);
            return GuardOutcome::Unavailable;
        }

        *slot = Some(operation.to_string());
        tracing::debug!(op = operation, "Command guard acquired");
        GuardOutcome::Ran(GuardToken {
            slot: Arc::clone(&self.slot),
            released: Arc::clone(&self.released),
            operation: operation.to_string(),
        })
    }

    /// Run `action` under the guard.
    ///
    /// The guard is released when the action settles, panics, or its future
    /// is dropped. Calling `with_guard` again from inside `action` is
    /// rejected as busy.
    pub async fn with_guard<F, Fut, T>(&self, operation: &str, action: F) -> GuardOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let token = match self.acquire(operation) {
            GuardOutcome::Ran(token) => token,
            GuardOutcome::Busy { holder } => return GuardOutcome::Busy { holder },
            GuardOutcome::Unavailable => return GuardOutcome::Unavailable,
        };

        let value = action().await;
        drop(token);
        GuardOutcome::Ran(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::MockBridge;
    use crate::options::{BridgePollOptions, ConsoleOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn guard() -> CommandGuard {
        let runner =
            CommandRunner::with_bridge(Arc::new(MockBridge::new()), BridgePollOptions::default());
        CommandGuard::new(runner, LogConsole::new(ConsoleOptions::default(), None))
    }

    #[tokio::test]
    async fn test_runs_and_releases() {
        let guard = guard();
        let outcome = guard
            .with_guard("start", || async {
                assert!(guard.is_busy());
                42
            })
            .await;
        assert_eq!(outcome, GuardOutcome::Ran(42));
        assert_eq!(guard.active(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_returns_when_token_dropped() {
        let guard = guard();
        guard.wait_idle().await;

        let GuardOutcome::Ran(token) = guard.acquire("forwarding-stop") else {
            panic!("guard should be free");
        };
        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.wait_idle().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(token);
        waiter.await.unwrap();
        assert!(!guard.is_busy());
    }

    #[tokio::test]
    async fn test_released_after_error_result() {
        let guard = guard();
        let outcome: GuardOutcome<Result<(), String>> = guard
            .with_guard("backup", || async { Err("script failed".to_string()) })
            .await;
        assert!(outcome.ran());
        assert_eq!(guard.active(), None);
    }

    #[tokio::test]
    async fn test_released_after_panic() {
        let guard = guard();
        let inner = guard.clone();
        let handle = tokio::spawn(async move {
            inner
                .with_guard::<_, _, ()>("restore", || async { panic!("boom") })
                .await
        });
        assert!(handle.await.is_err());
        assert_eq!(guard.active(), None);
    }

    #[tokio::test]
    async fn test_released_when_future_dropped() {
        let guard = guard();
        let pending = guard.with_guard("resize", || std::future::pending::<()>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());
        assert_eq!(guard.active(), None);
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_exclusive() {
        let guard = guard();
        let running = Arc::new(AtomicUsize::new(0));
        let invoked = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(tokio::sync::Notify::new());

        let first = {
            let (guard, running, invoked, release) =
                (guard.clone(), running.clone(), invoked.clone(), release.clone());
            tokio::spawn(async move {
                guard
                    .with_guard("start", || async {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        running.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            })
        };

        while guard.active().is_none() {
            tokio::task::yield_now().await;
        }

        let second = guard
            .with_guard("start", || async {
                invoked.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(
            second,
            GuardOutcome::Busy {
                holder: "start".into()
            }
        );
        assert_eq!(guard.active().as_deref(), Some("start"));
        assert_eq!(running.load(Ordering::SeqCst), 1);

        release.notify_one();
        assert!(first.await.unwrap().ran());
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(guard.active(), None);
    }

    #[tokio::test]
    async fn test_nested_call_rejected() {
        let guard = guard();
        let outcome = guard
            .with_guard("update", || async {
                guard.with_guard("start", || async { "inner" }).await
            })
            .await;
        assert_eq!(
            outcome,
            GuardOutcome::Ran(GuardOutcome::Busy {
                holder: "update".into()
            })
        );
        assert_eq!(guard.active(), None);
    }

    #[tokio::test]
    async fn test_busy_warning_logged() {
        let guard = guard();
        let _token = guard.acquire("hotspot-start").into_option().unwrap();
        let outcome = guard.with_guard("stop", || async {}).await;
        assert!(!outcome.ran());

        guard.console.wait_for_flush().await;
        let lines = guard.console.lines();
        assert_eq!(lines.last().unwrap().text, BUSY_MESSAGE);
        assert_eq!(lines.last().unwrap().class, LogClass::Warn);
    }

    #[tokio::test]
    async fn test_unavailable_short_circuits() {
        let runner = CommandRunner::new(BridgePollOptions::default());
        let console = LogConsole::new(ConsoleOptions::default(), None);
        let guard = CommandGuard::new(runner, console.clone());

        let invoked = AtomicUsize::new(0);
        let outcome = guard
            .with_guard("start", || async {
                invoked.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(outcome, GuardOutcome::Unavailable);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(guard.active(), None);

        console.wait_for_flush().await;
        let last = console.lines().pop().unwrap();
        assert_eq!(last.text, UNAVAILABLE_MESSAGE);
        assert_eq!(last.class, LogClass::Err);
    }
}
