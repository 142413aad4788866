//! Remove the chroot and all of its data.

use super::{Confirmation, Panel};
use crate::console::LogClass;
use crate::guard::GuardOutcome;
use crate::status::Status;

impl Panel {
    /// Delete the chroot after confirmation, stopping it first.
    pub async fn uninstall_chroot(&self) -> GuardOutcome<bool> {
        self.guard()
            .with_guard("uninstall", || self.uninstall_steps())
            .await
    }

    async fn uninstall_steps(&self) -> bool {
        let confirmation = Confirmation::new(
            "Uninstall Chroot",
            "Are you sure you want to uninstall the chroot environment?\n\n\
             This will permanently delete all data in the chroot and cannot be undone.",
            "Uninstall",
        );
        if !self.ui().confirm(&confirmation).await {
            return false;
        }

        self.close_popups(self.options().delays.input_focus).await;
        let lock = self.status().lock_actions();

        if !self.ensure_chroot_stopped().await {
            self.log("✗ Failed to stop chroot - uninstall aborted", LogClass::Err);
            drop(lock);
            self.refresh_status().await;
            return false;
        }

        let result = self
            .run_maintenance(
                Status::Uninstalling,
                "Starting Uninstallation",
                "Uninstalling chroot",
                &self.chroot_command("uninstall --webui"),
            )
            .await;

        if result.success {
            self.log("✅ Chroot uninstalled successfully!", LogClass::Success);
            self.log("All chroot data has been removed.", LogClass::Info);
            self.log("━━━ Uninstallation Complete ━━━", LogClass::Success);
        } else {
            self.log("✗ Uninstallation failed", LogClass::Err);
            self.log("Check the logs above for details.", LogClass::Err);
        }

        drop(lock);
        self.refresh_status().await;
        result.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::CommandResult;
    use crate::panel::testing::{ScriptedUi, fixture};

    #[tokio::test(start_paused = true)]
    async fn test_uninstall_refreshes_to_not_found() {
        let f = fixture(ScriptedUi::accepting());
        f.mock.on_sync("chroot.sh status", "");
        f.mock.on_sync_once("chroot.sh status", "Status: STOPPED");
        f.mock.on_async("uninstall --webui", &["Removing rootfs\n"], CommandResult::ok(""));

        assert_eq!(f.panel.uninstall_chroot().await, GuardOutcome::Ran(true));
        assert_eq!(f.panel.status().current(), Status::NotFound);
        assert_eq!(f.ui.closes(), 1);
        assert!(f.has_line("━━━ Uninstallation Complete ━━━", LogClass::Success).await);
        assert_eq!(f.panel.guard().active(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninstall_stops_running_chroot_first() {
        let f = fixture(ScriptedUi::accepting());
        f.mock.on_sync("chroot.sh status", "Status: STOPPED");
        f.mock.on_sync_once("chroot.sh status", "Status: RUNNING");
        f.mock.on_async("chroot.sh stop --no-shell", &[], CommandResult::ok(""));
        f.mock.on_async("uninstall --webui", &[], CommandResult::ok(""));

        assert_eq!(f.panel.uninstall_chroot().await, GuardOutcome::Ran(true));
        let commands = f.mock.commands();
        let stop = commands.iter().position(|c| c.contains("stop --no-shell"));
        let uninstall = commands.iter().position(|c| c.contains("uninstall --webui"));
        assert!(stop.is_some() && stop < uninstall);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninstall_declined() {
        let f = fixture(ScriptedUi::default());
        assert_eq!(f.panel.uninstall_chroot().await, GuardOutcome::Ran(false));
        assert!(f.mock.commands().is_empty());
        assert_eq!(f.ui.confirmations.lock()[0].title, "Uninstall Chroot");
    }
}
