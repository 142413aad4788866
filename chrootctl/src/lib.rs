//! chrootctl: command orchestration for an Android chroot managed by root shell scripts.
//!
//! The library serializes privileged script invocations behind a single-flight
//! guard, reconciles their textual output into a finite [`Status`], and keeps a
//! bounded, persisted log console for everything that happens along the way.
//!
//! The moving parts, leaves first:
//! - [`bridge`]: adapter over the host's command execution primitives
//! - [`console`]: batched, size-bounded log buffer with scroll tracking
//! - [`guard`]: at-most-one user operation at a time
//! - [`status`]: status classification and button enablement
//! - [`panel`]: feature workflows composing all of the above

pub mod bridge;
pub mod console;
pub mod db;
pub mod guard;
pub mod options;
pub mod panel;
pub mod status;
pub mod util;

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub use bridge::{
    AsyncCallbacks, BridgeEvent, CommandId, CommandResult, CommandRunner, ExecMethod, HostBridge,
    ProcessBridge, RunOptions, RunningCommand,
};
pub use chrootctl_shared::errors::{ChrootError, ChrootResult};
pub use console::{Clipboard, CommandClipboard, LogClass, LogConsole, LogEntry, ProgressKind};
pub use db::{Database, FeatureFlags, Flag, StateStore};
pub use guard::{CommandGuard, GuardOutcome};
pub use options::PanelOptions;
pub use panel::{
    Band, ChrootAction, Confirmation, HotspotSettings, InterfaceList, InterfaceOption,
    NoInteraction, Panel, PanelBuilder, PathRequest, SizePurpose, UserInterface,
};
pub use status::{ButtonState, Status, StatusMachine, StatusSnapshot, classify_status_output};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global tracing subscriber, writing to `<home_dir>/logs`.
///
/// Filtering follows `RUST_LOG` and defaults to `info`. Calling this more than
/// once is harmless: only the first successful call installs a subscriber.
pub fn init_logging_for(home_dir: &Path) -> ChrootResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let logs_dir = home_dir.join("logs");
    std::fs::create_dir_all(&logs_dir)?;

    let appender = tracing_appender::rolling::daily(&logs_dir, "chrootctl.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        // Keep the worker alive for the lifetime of the process
        let _ = LOG_GUARD.set(guard);
        tracing::debug!(logs_dir = %logs_dir.display(), "Logging initialized");
    }

    Ok(())
}
