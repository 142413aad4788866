//! Archive and restore the chroot.

use chrono::Utc;

use super::{Confirmation, Panel, PathRequest};
use crate::console::LogClass;
use crate::guard::GuardOutcome;
use crate::status::Status;
use crate::util::{backup_file_name, double_quote};

impl Panel {
    /// Write a compressed archive of the chroot to a user-chosen path.
    ///
    /// A running chroot is stopped first; if it cannot be, nothing is
    /// archived.
    pub async fn backup_chroot(&self) -> GuardOutcome<bool> {
        self.guard()
            .with_guard("backup", || self.backup_steps())
            .await
    }

    async fn backup_steps(&self) -> bool {
        let request = PathRequest {
            title: "Backup Chroot Environment".into(),
            message: "Select where to save the backup file.\n\n\
                      The chroot will be stopped during backup if it's currently running."
                .into(),
            default_dir: self.options().paths.backup_dir.clone(),
            default_file_name: backup_file_name(Utc::now()),
            existing: false,
        };
        let Some(path) = self.ui().pick_path(&request).await else {
            return false;
        };

        let confirmation = Confirmation::new(
            "Backup Chroot Environment",
            format!(
                "This will create a compressed backup of your chroot environment.\n\n\
                 The chroot will be stopped during backup if it's currently running.\n\n\
                 Backup location: {path}\n\nContinue?"
            ),
            "Backup",
        );
        if !self.ui().confirm(&confirmation).await {
            return false;
        }

        self.close_popups(self.options().delays.popup_close_long).await;
        let lock = self.status().lock_actions();

        if !self.ensure_chroot_stopped().await {
            self.log("✗ Failed to stop chroot - backup aborted", LogClass::Err);
            drop(lock);
            self.schedule_status_refresh(self.options().delays.status_refresh);
            return false;
        }

        let command = self.chroot_command(&format!("backup --webui {}", double_quote(&path)));
        let result = self
            .run_maintenance(
                Status::BackingUp,
                "Starting Chroot Backup",
                "Backing up chroot",
                &command,
            )
            .await;

        if result.success {
            self.log("✓ Backup completed successfully", LogClass::Success);
            self.log(format!("Saved to: {path}"), LogClass::Info);
            self.log("━━━ Backup Complete ━━━", LogClass::Success);
        } else {
            self.log("✗ Backup failed", LogClass::Err);
        }

        drop(lock);
        self.schedule_status_refresh(self.options().delays.status_refresh);
        result.success
    }

    /// Replace the chroot with the contents of a user-chosen archive.
    pub async fn restore_chroot(&self) -> GuardOutcome<bool> {
        if !self.runner().is_available() {
            self.log(
                "Cannot restore chroot: root access not available",
                LogClass::Err,
            );
            return GuardOutcome::Unavailable;
        }

        self.guard()
            .with_guard("restore", || self.restore_steps())
            .await
    }

    async fn restore_steps(&self) -> bool {
        let request = PathRequest {
            title: "Restore Chroot Environment".into(),
            message: "Select the backup file to restore from.\n\n\
                      WARNING: This will permanently delete your current chroot environment!"
                .into(),
            default_dir: self.options().paths.backup_dir.clone(),
            default_file_name: String::new(),
            existing: true,
        };
        let Some(path) = self.ui().pick_path(&request).await else {
            return false;
        };

        let confirmation = Confirmation::new(
            "Restore Chroot Environment",
            format!(
                "⚠️ WARNING: This will permanently delete your current chroot environment \
                 and replace it with the backup!\n\n\
                 All current data in the chroot will be lost.\n\n\
                 Backup file: {path}\n\nThis action cannot be undone. Continue?"
            ),
            "Restore",
        );
        if !self.ui().confirm(&confirmation).await {
            return false;
        }

        self.close_popups(self.options().delays.popup_close_long).await;
        let lock = self.status().lock_actions();
        let refresh_delay = self.options().delays.status_refresh * 2;

        if !self.ensure_chroot_stopped().await {
            self.log("✗ Failed to stop chroot - restore aborted", LogClass::Err);
            drop(lock);
            self.schedule_status_refresh(refresh_delay);
            return false;
        }

        let command = self.chroot_command(&format!("restore --webui {}", double_quote(&path)));
        let result = self
            .run_maintenance(
                Status::Restoring,
                "Starting Chroot Restore",
                "Restoring chroot",
                &command,
            )
            .await;

        if result.success {
            self.log("✓ Restore completed successfully", LogClass::Success);
            self.log("The chroot environment has been restored", LogClass::Info);
            self.log("━━━ Restore Complete ━━━", LogClass::Success);
            self.status().set(Status::Stopped);
        } else {
            self.log("✗ Restore failed", LogClass::Err);
        }

        drop(lock);
        self.schedule_status_refresh(refresh_delay);
        result.success
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;
    use crate::bridge::CommandResult;
    use crate::panel::testing::{ScriptedUi, fixture};

    #[tokio::test(start_paused = true)]
    async fn test_backup_aborts_when_chroot_cannot_stop() {
        let f = fixture(ScriptedUi::accepting().with_path("/sdcard/b.tar.gz"));
        f.mock.on_sync_error("chroot.sh status", "status script missing");

        assert_eq!(f.panel.backup_chroot().await, GuardOutcome::Ran(false));

        assert!(!f.mock.ran("backup --webui"));
        assert!(
            f.has_line("✗ Failed to stop chroot - backup aborted", LogClass::Err)
                .await
        );
        assert_eq!(f.panel.guard().active(), None);
        assert!(!f.panel.status().actions_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_runs_with_default_name() {
        let f = fixture(ScriptedUi::accepting().with_path("/sdcard/my backup.tar.gz"));
        f.mock.on_sync("chroot.sh status", "Status: STOPPED");
        f.mock
            .on_async("backup --webui", &["Archiving rootfs\n"], CommandResult::ok(""));

        assert_eq!(f.panel.backup_chroot().await, GuardOutcome::Ran(true));

        let request = f.ui.path_requests.lock()[0].clone();
        assert_eq!(request.default_dir, "/sdcard");
        assert!(request.default_file_name.starts_with("chroot-backup-"));
        assert!(request.default_file_name.ends_with(".tar.gz"));
        assert!(!request.existing);

        assert!(f.mock.ran(
            "sh /data/local/ubuntu-chroot/chroot.sh backup --webui \"/sdcard/my backup.tar.gz\""
        ));
        let texts = f.texts().await;
        let header = texts.iter().position(|t| t == "━━━ Starting Chroot Backup ━━━");
        let saved = texts.iter().position(|t| t == "Saved to: /sdcard/my backup.tar.gz");
        assert!(header.is_some() && saved.is_some() && header < saved);
        assert!(!f.panel.status().actions_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_shows_busy_status_while_running() {
        let f = fixture(ScriptedUi::accepting().with_path("/sdcard/b.tar.gz"));
        f.mock.on_sync("chroot.sh status", "Status: STOPPED");
        let release = Arc::new(Notify::new());
        f.mock
            .on_async_held("backup --webui", release.clone(), CommandResult::ok(""));

        let panel = f.panel.clone();
        let task = tokio::spawn(async move { panel.backup_chroot().await });
        while !f.mock.ran("backup --webui") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.panel.status().current(), Status::BackingUp);
        assert!(f.panel.status().snapshot().actions_locked);

        release.notify_one();
        assert_eq!(task.await.unwrap(), GuardOutcome::Ran(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_cancelled_at_picker() {
        let f = fixture(ScriptedUi::accepting());
        assert_eq!(f.panel.backup_chroot().await, GuardOutcome::Ran(false));
        assert!(f.ui.confirmations.lock().is_empty());
        assert!(f.mock.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_success_sets_stopped() {
        let f = fixture(ScriptedUi::accepting().with_path("/sdcard/old.tar.gz"));
        f.mock.on_sync("chroot.sh status", "Status: STOPPED");
        f.mock.on_async("restore --webui", &[], CommandResult::ok(""));

        assert_eq!(f.panel.restore_chroot().await, GuardOutcome::Ran(true));
        assert_eq!(f.panel.status().current(), Status::Stopped);
        assert!(f.ui.path_requests.lock()[0].existing);
        assert!(f.has_line("━━━ Restore Complete ━━━", LogClass::Success).await);
        let confirmation = f.ui.confirmations.lock()[0].clone();
        assert_eq!(confirmation.confirm_label, "Restore");
        assert!(confirmation.message.contains("Backup file: /sdcard/old.tar.gz"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_declined_runs_nothing() {
        let f = fixture(ScriptedUi::default().with_path("/sdcard/old.tar.gz"));
        assert_eq!(f.panel.restore_chroot().await, GuardOutcome::Ran(false));
        assert!(f.mock.commands().is_empty());
        assert_eq!(f.ui.closes(), 0);
    }
}
