//! Sparse ext4 image maintenance: migrate, resize and trim.

use super::{Confirmation, Panel, SizePurpose};
use crate::console::LogClass;
use crate::db::Flag;
use crate::guard::GuardOutcome;
use crate::status::Status;
use crate::util::format_image_size;

impl Panel {
    pub fn sparse_migrated(&self) -> bool {
        self.store().flag(Flag::Sparse)
    }

    // ========================================================================
    // MIGRATE
    // ========================================================================

    /// Convert the directory rootfs into a sparse image of the chosen size.
    pub async fn migrate_to_sparse(&self) -> GuardOutcome<bool> {
        self.guard()
            .with_guard("migrate", || self.migrate_steps())
            .await
    }

    async fn migrate_steps(&self) -> bool {
        let Some(size_gb) = self.ui().select_size_gb(&SizePurpose::Migrate).await else {
            return false;
        };

        let confirmation = Confirmation::new(
            "Migrate to Sparse Image",
            format!(
                "This will convert your current rootfs to a {size_gb}GB sparse ext4 image.\n\n\
                 ⚠️ IMPORTANT: If your chroot is currently running, it will be stopped automatically.\n\n\
                 ℹ️ NOTE: Sparse images do not immediately use {size_gb}GB of storage. \
                 They only consume space as you write data to them, starting small and growing as needed.\n\n\
                 WARNING: This process cannot be undone. Make sure you have a backup!\n\n\
                 Continue with migration?"
            ),
            "Start Migration",
        );
        if !self.ui().confirm(&confirmation).await {
            return false;
        }

        self.close_popups(self.options().delays.popup_close_very_long)
            .await;
        let lock = self.status().lock_actions();

        if !self.ensure_chroot_stopped().await {
            self.log("✗ Failed to stop chroot - migration aborted", LogClass::Err);
            drop(lock);
            self.schedule_status_refresh(self.options().delays.status_refresh);
            return false;
        }

        self.log(format!("Target size: {size_gb}GB sparse ext4 image"), LogClass::Info);
        self.log("DO NOT CLOSE THIS WINDOW!", LogClass::Warn);

        let command = format!("sh {} migrate {size_gb}", self.options().paths.sparse_manager);
        let result = self
            .run_maintenance(
                Status::Migrating,
                "Starting Sparse Image Migration",
                "Migrating",
                &command,
            )
            .await;

        if result.success {
            self.log(
                "✅ Sparse image migration completed successfully!",
                LogClass::Success,
            );
            self.log(
                "Your rootfs has been converted to a sparse image.",
                LogClass::Info,
            );
            self.log("━━━ Migration Complete ━━━", LogClass::Success);
            self.store().set_flag(Flag::Sparse, true);
        } else {
            self.log("✗ Sparse image migration failed!", LogClass::Err);
            self.log("Check the logs above for details.", LogClass::Err);
            self.log("━━━ Migration Failed ━━━", LogClass::Err);
        }

        drop(lock);
        self.schedule_status_refresh(self.options().delays.status_refresh);
        result.success
    }

    // ========================================================================
    // RESIZE
    // ========================================================================

    /// Current apparent size of the rootfs image, `"Unknown"` if unreadable.
    pub async fn sparse_image_size(&self) -> String {
        let command = format!(
            "ls -lh {} | tr -s ' ' | cut -d' ' -f5",
            self.options().paths.rootfs_image
        );
        match self.read(&command).await {
            Ok(raw) => format_image_size(&raw),
            Err(e) => {
                tracing::debug!(error = %e, "Image size probe failed");
                format_image_size("")
            }
        }
    }

    /// Grow or shrink the sparse image.
    pub async fn resize_sparse(&self) -> GuardOutcome<bool> {
        if !self.runner().is_available() {
            self.log(
                "Cannot resize sparse image: root access not available",
                LogClass::Err,
            );
            return GuardOutcome::Unavailable;
        }

        self.guard()
            .with_guard("resize", || self.resize_steps())
            .await
    }

    async fn resize_steps(&self) -> bool {
        let current = self.sparse_image_size().await;
        let purpose = SizePurpose::Resize {
            current: current.clone(),
        };
        let Some(size_gb) = self.ui().select_size_gb(&purpose).await else {
            return false;
        };

        let confirmation = Confirmation::new(
            "Resize Sparse Image",
            format!(
                "⚠️ EXTREME WARNING: This operation can CORRUPT your filesystem!\n\n\
                 You MUST create a backup before proceeding.\n\n\
                 DO NOT close this window or interrupt the process.\n\n\
                 Current allocated: {current}\nNew size: {size_gb}GB\n\nContinue?"
            ),
            "Resize",
        );
        if !self.ui().confirm(&confirmation).await {
            return false;
        }

        self.close_popups(self.options().delays.popup_close_long).await;
        let lock = self.status().lock_actions();

        let command = self.chroot_command(&format!("resize --webui {size_gb}"));
        let result = self
            .run_maintenance(
                Status::Resizing,
                &format!("Resizing Sparse Image to {size_gb}GB"),
                "Preparing resize operation",
                &command,
            )
            .await;

        if result.success {
            self.log("✅ Sparse image resized successfully", LogClass::Success);
            self.log(format!("New size: {size_gb}GB"), LogClass::Info);
            self.log("━━━ Resize Complete ━━━", LogClass::Success);
        } else {
            self.log("✗ Sparse image resize failed", LogClass::Err);
            self.log("Check the logs above for details", LogClass::Err);
        }

        drop(lock);
        self.schedule_status_refresh(self.options().delays.status_refresh);
        result.success
    }

    // ========================================================================
    // TRIM
    // ========================================================================

    /// Run fstrim so the image gives unused blocks back to the host.
    pub async fn trim_sparse(&self) -> GuardOutcome<bool> {
        if !self.runner().is_available() {
            self.log(
                "Cannot trim sparse image: root access not available",
                LogClass::Err,
            );
            return GuardOutcome::Unavailable;
        }
        if !self.sparse_migrated() {
            self.log("Sparse image not detected - cannot trim", LogClass::Err);
            return GuardOutcome::Ran(false);
        }

        self.guard()
            .with_guard("trim", || self.trim_steps())
            .await
    }

    async fn trim_steps(&self) -> bool {
        let confirmation = Confirmation::new(
            "Trim Sparse Image",
            "This will run fstrim to reclaim unused space in the sparse image.\n\n\
             The operation may take a few seconds and space reclamation happens gradually. Continue?",
            "Trim",
        );
        if !self.ui().confirm(&confirmation).await {
            return false;
        }

        let lock = self.status().lock_actions();
        let result = self
            .run_maintenance(
                Status::Trimming,
                "Trimming Sparse Image",
                "Trimming sparse image",
                &self.chroot_command("fstrim"),
            )
            .await;

        if result.success {
            self.log("✓ Sparse image trimmed successfully", LogClass::Success);
            self.log("Space may be reclaimed after a few minutes", LogClass::Info);
            self.log("━━━ Trim Complete ━━━", LogClass::Success);
        } else {
            self.log("✗ Sparse image trim failed", LogClass::Err);
            self.log(
                "This may be expected on some Android kernels",
                LogClass::Warn,
            );
        }

        drop(lock);
        self.schedule_status_refresh(self.options().delays.status_refresh);
        result.success
    }
}
