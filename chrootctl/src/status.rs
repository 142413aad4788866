//! Chroot status model.
//!
//! [`Status`] is the single source of truth for which lifecycle actions are
//! enabled. Raw script output is mapped onto it by [`classify_status_output`]
//! and the current value is published by [`StatusMachine`].

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use chrootctl_shared::errors::ChrootError;

// ============================================================================
// STATUS
// ============================================================================

/// Chroot or operation state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Unknown,
    Running,
    Stopped,
    Starting,
    Stopping,
    Restarting,
    NotFound,
    BackingUp,
    Restoring,
    Migrating,
    Uninstalling,
    Updating,
    Trimming,
    Resizing,
}

impl Status {
    pub const ALL: [Status; 14] = [
        Status::Unknown,
        Status::Running,
        Status::Stopped,
        Status::Starting,
        Status::Stopping,
        Status::Restarting,
        Status::NotFound,
        Status::BackingUp,
        Status::Restoring,
        Status::Migrating,
        Status::Uninstalling,
        Status::Updating,
        Status::Trimming,
        Status::Resizing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Running => "running",
            Status::Stopped => "stopped",
            Status::Starting => "starting",
            Status::Stopping => "stopping",
            Status::Restarting => "restarting",
            Status::NotFound => "not_found",
            Status::BackingUp => "backing_up",
            Status::Restoring => "restoring",
            Status::Migrating => "migrating",
            Status::Uninstalling => "uninstalling",
            Status::Updating => "updating",
            Status::Trimming => "trimming",
            Status::Resizing => "resizing",
        }
    }

    /// Start/stop/restart in flight.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Status::Starting | Status::Stopping | Status::Restarting
        )
    }

    /// A long-running maintenance operation holds the chroot.
    pub fn is_maintenance(&self) -> bool {
        matches!(
            self,
            Status::BackingUp
                | Status::Restoring
                | Status::Migrating
                | Status::Uninstalling
                | Status::Updating
                | Status::Trimming
                | Status::Resizing
        )
    }

    /// A definite state reported by the backing script.
    pub fn is_settled(&self) -> bool {
        matches!(self, Status::Running | Status::Stopped | Status::NotFound)
    }

    /// Button enablement for this status. `true` means disabled.
    pub fn buttons(&self) -> ButtonState {
        match self {
            Status::Running => ButtonState {
                start: true,
                stop: false,
                restart: false,
                user_select: false,
                copy_login: false,
            },
            Status::Stopped => ButtonState {
                start: false,
                ..ButtonState::ALL_DISABLED
            },
            _ => ButtonState::ALL_DISABLED,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ChrootError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            // Older builds wrote the busy state with a space
            "backing up" => Ok(Status::BackingUp),
            other => Status::ALL
                .into_iter()
                .find(|status| status.as_str() == other)
                .ok_or_else(|| ChrootError::InvalidArgument(format!("unknown status: {s}"))),
        }
    }
}

/// Disabled flags for the five lifecycle controls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonState {
    pub start: bool,
    pub stop: bool,
    pub restart: bool,
    pub user_select: bool,
    pub copy_login: bool,
}

impl ButtonState {
    pub const ALL_DISABLED: ButtonState = ButtonState {
        start: true,
        stop: true,
        restart: true,
        user_select: true,
        copy_login: true,
    };

    pub fn as_tuple(&self) -> (bool, bool, bool, bool, bool) {
        (
            self.start,
            self.stop,
            self.restart,
            self.user_select,
            self.copy_login,
        )
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

static RUNNING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)status:\s*running\b").expect("static regex"));

static STATUS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*status:\s*[a-z_]+").expect("static regex"));

/// Map the backing script's status report onto a [`Status`].
///
/// - a `Status: RUNNING` token (any case) or the bare word `running`: `Running`
/// - empty or whitespace only: `NotFound`
/// - any other `Status: <WORD>` report or the bare word `stopped`: `Stopped`
/// - anything else: `Unknown`
pub fn classify_status_output(raw: &str) -> Status {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Status::NotFound;
    }
    if RUNNING.is_match(raw) || trimmed.eq_ignore_ascii_case("running") {
        return Status::Running;
    }
    if STATUS_LINE.is_match(raw) || trimmed.eq_ignore_ascii_case("stopped") {
        return Status::Stopped;
    }
    Status::Unknown
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// What renderers observe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub status: Status,
    /// Effective enablement: all disabled while an action lock is held.
    pub buttons: ButtonState,
    pub actions_locked: bool,
}

/// Holds the current [`Status`] and publishes snapshots on change.
///
/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct StatusMachine {
    inner: Arc<StatusInner>,
}

struct StatusInner {
    current: Mutex<Status>,
    locks: AtomicUsize,
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusMachine {
    pub fn new() -> Self {
        let initial = StatusSnapshot {
            status: Status::Unknown,
            buttons: Status::Unknown.buttons(),
            actions_locked: false,
        };
        let (tx, _rx) = watch::channel(initial);
        Self {
            inner: Arc::new(StatusInner {
                current: Mutex::new(Status::Unknown),
                locks: AtomicUsize::new(0),
                tx,
            }),
        }
    }

    pub fn current(&self) -> Status {
        *self.inner.current.lock()
    }

    pub fn set(&self, status: Status) {
        let previous = std::mem::replace(&mut *self.inner.current.lock(), status);
        if previous != status {
            tracing::debug!(from = %previous, to = %status, "Status changed");
        }
        self.publish();
    }

    pub fn actions_locked(&self) -> bool {
        self.inner.locks.load(Ordering::SeqCst) > 0
    }

    /// Disable every action until the returned lock is dropped.
    pub fn lock_actions(&self) -> ActionLock {
        self.inner.locks.fetch_add(1, Ordering::SeqCst);
        self.publish();
        ActionLock {
            machine: self.clone(),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let status = self.current();
        let locked = self.actions_locked();
        StatusSnapshot {
            status,
            buttons: if locked {
                ButtonState::ALL_DISABLED
            } else {
                status.buttons()
            },
            actions_locked: locked,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.tx.subscribe()
    }

    fn publish(&self) {
        self.inner.tx.send_replace(self.snapshot());
    }
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle keeping all actions disabled.
#[must_use = "actions are re-enabled as soon as the lock is dropped"]
pub struct ActionLock {
    machine: StatusMachine,
}

impl Drop for ActionLock {
    fn drop(&mut self) {
        self.machine.inner.locks.fetch_sub(1, Ordering::SeqCst);
        self.machine.publish();
    }
}
