//! Chroot lifecycle: start/stop/restart, status refresh and updates.

use std::fmt;

use super::{Confirmation, Panel};
use crate::console::{LogClass, ProgressKind};
use crate::guard::GuardOutcome;
use crate::status::{Status, classify_status_output};

const OFFLINE_NOTICE: &str = "No root bridge detected — running offline. Actions disabled.";

/// A lifecycle command understood by the chroot script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChrootAction {
    Start,
    Stop,
    Restart,
}

impl ChrootAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ChrootAction::Start => "start",
            ChrootAction::Stop => "stop",
            ChrootAction::Restart => "restart",
        }
    }

    /// Status shown while the command runs.
    pub fn transitional_status(self) -> Status {
        match self {
            ChrootAction::Start => Status::Starting,
            ChrootAction::Stop => Status::Stopping,
            ChrootAction::Restart => Status::Restarting,
        }
    }

    fn progress_text(self) -> &'static str {
        match self {
            ChrootAction::Start => "Starting chroot",
            ChrootAction::Stop => "Stopping chroot",
            ChrootAction::Restart => "Restarting chroot",
        }
    }

    /// Whether a verification read of `running` confirms the action.
    fn verified_by(self, running: bool) -> bool {
        match self {
            ChrootAction::Start => running,
            ChrootAction::Stop => !running,
            ChrootAction::Restart => true,
        }
    }
}

impl fmt::Display for ChrootAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Panel {
    pub async fn start_chroot(&self) -> GuardOutcome<bool> {
        self.guarded_action(ChrootAction::Start).await
    }

    pub async fn stop_chroot(&self) -> GuardOutcome<bool> {
        self.guarded_action(ChrootAction::Stop).await
    }

    pub async fn restart_chroot(&self) -> GuardOutcome<bool> {
        self.guarded_action(ChrootAction::Restart).await
    }

    async fn guarded_action(&self, action: ChrootAction) -> GuardOutcome<bool> {
        self.guard()
            .with_guard(action.as_str(), || self.run_action(action))
            .await
    }

    /// Run a lifecycle command and reconcile the status afterwards.
    ///
    /// Not guarded; callers inside a guarded workflow use it directly.
    pub(crate) async fn run_action(&self, action: ChrootAction) -> bool {
        if !self.runner().is_available() {
            self.log("Cannot execute commands: backend unavailable", LogClass::Err);
            return false;
        }

        self.status().set(action.transitional_status());
        let lock = self.status().lock_actions();
        self.console().scroll_to_bottom();

        let progress = self
            .console()
            .begin_progress(action.progress_text(), ProgressKind::Dots);
        let command = self.chroot_command(&format!("{action} --no-shell"));
        let result = self.run_streamed(&command).await;
        progress.finish();

        tracing::info!(action = %action, success = result.success, "Lifecycle command finished");

        if result.success {
            tokio::time::sleep(self.options().delays.verify_settle).await;
            match self.read(&self.chroot_command("status")).await {
                Ok(raw) => {
                    let running = classify_status_output(&raw) == Status::Running;
                    if action.verified_by(running) {
                        self.log(
                            format!("✓ {action} completed successfully"),
                            LogClass::Success,
                        );
                    } else {
                        self.log(
                            format!("⚠ {action} completed but status verification failed"),
                            LogClass::Warn,
                        );
                    }
                }
                Err(e) => self.log(
                    format!("✓ {action} command succeeded, but verification failed: {e}"),
                    LogClass::Warn,
                ),
            }
        } else {
            let error = result.error.as_deref().unwrap_or("Unknown error");
            self.log(format!("✗ {action} failed: {error}"), LogClass::Err);
        }

        drop(lock);
        self.refresh_status().await;
        result.success
    }

    /// Check that root commands work.
    ///
    /// Without a bridge the offline notice is shown once per session.
    pub async fn check_root_access(&self, silent: bool) -> bool {
        if !self.runner().is_available() {
            let first = {
                let mut session = self.session();
                session.root_access = false;
                !std::mem::replace(&mut session.offline_notified, true)
            };
            if first {
                self.log(OFFLINE_NOTICE, LogClass::Info);
            }
            return false;
        }

        let access = match self.read("echo \"test\"").await {
            Ok(_) => {
                if !silent {
                    self.log("Root access available", LogClass::Info);
                }
                true
            }
            Err(e) => {
                if !silent {
                    self.log(
                        format!("Failed to detect root execution method: {e}"),
                        LogClass::Err,
                    );
                }
                false
            }
        };
        self.session().root_access = access;
        access
    }

    /// Re-read the chroot status from the script.
    ///
    /// Any failure degrades to `Unknown`, never to the previous status.
    pub async fn refresh_status(&self) -> Status {
        if !self.check_root_access(true).await {
            self.status().set(Status::Unknown);
            return Status::Unknown;
        }

        let status = match self.read(&self.chroot_command("status")).await {
            Ok(raw) => {
                self.log(
                    format!("[DEBUG] raw status output: {}", raw.trim()),
                    LogClass::Debug,
                );
                let status = classify_status_output(&raw);
                self.log(format!("[DEBUG] UI set to {status}"), LogClass::Debug);
                status
            }
            Err(e) => {
                self.log(format!("Failed to get status: {e}"), LogClass::Warn);
                Status::Unknown
            }
        };

        tracing::debug!(status = %status, "Status refreshed");
        self.status().set(status);
        status
    }

    /// Refresh triggered by the user: status plus the values read alongside it.
    pub async fn refresh_status_manual(&self) -> Status {
        let status = self.refresh_status().await;
        let root_access = self.session().root_access;
        if root_access {
            self.fetch_users(true).await;
        }
        self.read_run_at_boot().await;
        self.read_android_optimizations().await;
        status
    }

    /// Make sure the chroot is not running, stopping it if needed.
    ///
    /// # Returns
    /// * `true` - the chroot is stopped or absent
    /// * `false` - the status could not be read or stopping failed
    pub async fn ensure_chroot_stopped(&self) -> bool {
        let raw = match self.read(&self.chroot_command("status")).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read status before maintenance");
                return false;
            }
        };

        match classify_status_output(&raw) {
            Status::Stopped | Status::NotFound => true,
            Status::Running => {
                self.log("Stopping chroot before continuing", LogClass::Info);
                self.run_action(ChrootAction::Stop).await;
                matches!(
                    self.status().current(),
                    Status::Stopped | Status::NotFound
                )
            }
            _ => false,
        }
    }

    /// Apply the OTA update, starting the chroot first if needed.
    pub async fn update_chroot(&self) -> GuardOutcome<bool> {
        if !self.runner().is_available() {
            self.log(
                "Cannot update chroot: root access not available",
                LogClass::Err,
            );
            return GuardOutcome::Unavailable;
        }

        self.guard()
            .with_guard("update", || async {
                let confirmation = Confirmation::new(
                    "Update Chroot Environment",
                    "This will apply any available updates to the chroot environment.\n\n\
                     The chroot will be started if it's not running. Continue?",
                    "Update",
                );
                if !self.ui().confirm(&confirmation).await {
                    return false;
                }
                let ok = self.update_steps().await;
                self.refresh_status().await;
                ok
            })
            .await
    }

    async fn update_steps(&self) -> bool {
        self.close_popups(self.options().delays.popup_close).await;

        let previous = self.status().current();
        self.status().set(Status::Updating);
        let _lock = self.status().lock_actions();

        if previous != Status::Running {
            self.log("Starting chroot before update", LogClass::Info);
            if !self.run_action(ChrootAction::Start).await {
                self.log("✗ Chroot update failed", LogClass::Err);
                return false;
            }
            tokio::time::sleep(self.options().delays.update_settle).await;
            self.status().set(Status::Updating);
        }

        let progress =
            self.console()
                .begin_action("Starting Chroot Update", "Updating chroot", ProgressKind::Dots);
        let command = format!("sh {}", self.options().paths.ota_updater);
        let result = self.run_streamed(&command).await;
        progress.finish();

        if !result.success {
            self.log("✗ Chroot update failed", LogClass::Err);
            return false;
        }

        self.log("✓ Chroot update completed successfully", LogClass::Success);
        self.run_action(ChrootAction::Restart).await;
        self.log("━━━ Update Complete ━━━", LogClass::Success);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::bridge::CommandResult;
    use crate::panel::testing::{ScriptedUi, fixture};
    use crate::status::Status;

    #[tokio::test(start_paused = true)]
    async fn test_start_from_stopped_reaches_running() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("chroot.sh status", "Status: RUNNING");
        f.mock.on_sync_once("chroot.sh status", "Status: STOPPED");
        f.mock
            .on_async("chroot.sh start --no-shell", &["Mounting\n", "Started\n"], CommandResult::ok(""));

        assert_eq!(f.panel.refresh_status().await, Status::Stopped);

        let seen = Arc::new(Mutex::new(vec![f.panel.status().current()]));
        let mut rx = f.panel.status().subscribe();
        let recorder = {
            let seen = seen.clone();
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let status = rx.borrow_and_update().status;
                    let mut seen = seen.lock();
                    if seen.last() != Some(&status) {
                        seen.push(status);
                    }
                }
            })
        };

        let outcome = f.panel.start_chroot().await;
        assert_eq!(outcome, GuardOutcome::Ran(true));
        tokio::time::sleep(Duration::from_millis(10)).await;
        recorder.abort();

        assert_eq!(
            *seen.lock(),
            vec![Status::Stopped, Status::Starting, Status::Running]
        );
        let snapshot = f.panel.status().snapshot();
        assert_eq!(snapshot.buttons, Status::Running.buttons());
        assert!(!snapshot.actions_locked);
        assert!(f.has_line("✓ start completed successfully", LogClass::Success).await);
        assert!(f.texts().await.contains(&"Mounting".to_string()));
        assert_eq!(f.panel.guard().active(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_busy_is_rejected() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("chroot.sh status", "Status: STOPPED");
        f.panel.refresh_status().await;

        let _held = f.panel.guard().acquire("start").into_option().unwrap();
        let outcome = f.panel.start_chroot().await;

        assert_eq!(
            outcome,
            GuardOutcome::Busy {
                holder: "start".into()
            }
        );
        assert_eq!(f.panel.status().current(), Status::Stopped);
        assert!(!f.mock.ran("--no-shell"));
        assert!(
            f.has_line(
                "⚠ Another command is already running. Please wait...",
                LogClass::Warn
            )
            .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_stop_reports_and_refreshes() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("chroot.sh status", "Status: RUNNING");
        f.mock
            .on_async("chroot.sh stop", &[], CommandResult::failure("umount busy"));

        assert_eq!(f.panel.stop_chroot().await, GuardOutcome::Ran(false));
        assert!(f.has_line("✗ stop failed: umount busy", LogClass::Err).await);
        assert_eq!(f.panel.status().current(), Status::Running);
        assert!(!f.panel.status().actions_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_mismatch_warns() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("chroot.sh status", "Status: STOPPED");
        assert_eq!(f.panel.start_chroot().await, GuardOutcome::Ran(true));
        assert!(
            f.has_line(
                "⚠ start completed but status verification failed",
                LogClass::Warn
            )
            .await
        );
        assert_eq!(f.panel.status().current(), Status::Stopped);
    }

    #[tokio::test]
    async fn test_refresh_without_bridge_is_unknown() {
        let f = fixture(ScriptedUi::default());
        f.panel.status().set(Status::Running);
        f.panel.runner().detach();

        assert_eq!(f.panel.refresh_status().await, Status::Unknown);
        assert_eq!(f.panel.refresh_status().await, Status::Unknown);
        assert!(f.mock.calls().is_empty());

        let notices = f
            .texts()
            .await
            .into_iter()
            .filter(|t| t == OFFLINE_NOTICE)
            .count();
        assert_eq!(notices, 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_degrades_to_unknown() {
        let f = fixture(ScriptedUi::default());
        f.panel.status().set(Status::Running);
        f.mock.on_sync_error("chroot.sh status", "script crashed");

        assert_eq!(f.panel.refresh_status().await, Status::Unknown);
        assert!(
            f.has_line("Failed to get status: bridge error: script crashed", LogClass::Warn)
                .await
        );
    }

    #[tokio::test]
    async fn test_empty_status_is_not_found() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("chroot.sh status", "");
        assert_eq!(f.panel.refresh_status().await, Status::NotFound);
        assert!(f.panel.status().snapshot().buttons.start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_stopped_stops_running_chroot() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("chroot.sh status", "Status: STOPPED");
        f.mock.on_sync_once("chroot.sh status", "Status: RUNNING");

        assert!(f.panel.ensure_chroot_stopped().await);
        assert!(f.mock.ran("chroot.sh stop --no-shell"));
    }

    #[tokio::test]
    async fn test_ensure_stopped_unknown_is_false() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("chroot.sh status", "segfault");
        assert!(!f.panel.ensure_chroot_stopped().await);
        assert!(!f.mock.ran("--no-shell"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_starts_chroot_first() {
        let f = fixture(ScriptedUi::accepting());
        f.mock.on_sync("chroot.sh status", "Status: RUNNING");
        f.panel.status().set(Status::Stopped);

        assert_eq!(f.panel.update_chroot().await, GuardOutcome::Ran(true));
        let commands = f.mock.commands();
        let start = commands.iter().position(|c| c.contains("start --no-shell"));
        let ota = commands.iter().position(|c| c.contains("ota/updater.sh"));
        let restart = commands.iter().position(|c| c.contains("restart --no-shell"));
        assert!(start < ota && ota < restart, "{commands:?}");
        assert!(f.has_line("━━━ Update Complete ━━━", LogClass::Success).await);
        assert_eq!(f.panel.status().current(), Status::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_reads_users_and_flags_while_stopped() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("chroot.sh status", "Status: STOPPED");
        f.mock.on_sync("list-users", "alice,bob\n");
        f.mock.on_sync("boot-service", "1\n");
        f.mock.on_sync("dozeoff", "0\n");

        assert_eq!(f.panel.refresh_status_manual().await, Status::Stopped);
        assert_eq!(f.panel.users(), vec!["alice".to_string(), "bob".to_string()]);
        assert!(f.panel.run_at_boot());
        assert!(!f.panel.android_optimizations());
    }

    #[tokio::test]
    async fn test_update_declined_runs_nothing() {
        let f = fixture(ScriptedUi::default());
        assert_eq!(f.panel.update_chroot().await, GuardOutcome::Ran(false));
        assert!(!f.mock.ran("updater.sh"));
        assert_eq!(f.ui.confirmations.lock().len(), 1);
    }
}
