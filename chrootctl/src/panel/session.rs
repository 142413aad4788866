//! Per-session settings read from and written to the device.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::Panel;
use crate::console::LogClass;
use crate::util::split_list;
use chrootctl_shared::constants::keys;

const LOGIN_HELPER_PROBE: &str = "command -v ubuntu-chroot 2>/dev/null || echo \"\"";

/// A boolean stored as `1`/`0` in a file on the device.
#[derive(Clone, Copy)]
enum DeviceFlag {
    RunAtBoot,
    AndroidOptimizations,
}

impl DeviceFlag {
    fn default_value(self) -> bool {
        match self {
            DeviceFlag::RunAtBoot => false,
            DeviceFlag::AndroidOptimizations => true,
        }
    }

    fn label(self) -> &'static str {
        match self {
            DeviceFlag::RunAtBoot => "Run-at-boot",
            DeviceFlag::AndroidOptimizations => "Android optimizations",
        }
    }

    fn failure_label(self) -> &'static str {
        match self {
            DeviceFlag::RunAtBoot => "run-at-boot",
            DeviceFlag::AndroidOptimizations => "Android optimizations",
        }
    }
}

impl Panel {
    // ========================================================================
    // USERS
    // ========================================================================

    /// List the regular users inside the chroot and restore the saved choice.
    pub async fn fetch_users(&self, silent: bool) -> Vec<String> {
        let raw = match self.read(&self.chroot_command("list-users")).await {
            Ok(raw) => raw,
            Err(e) => {
                if !silent {
                    self.log(
                        format!("Could not fetch users from chroot: {e}"),
                        LogClass::Warn,
                    );
                }
                return Vec::new();
            }
        };

        let users = split_list(&raw);
        let saved = self.store().get(keys::SELECTED_USER);
        {
            let mut session = self.session();
            session.selected_user = saved
                .filter(|user| users.contains(user))
                .or_else(|| users.first().cloned());
            session.users = users.clone();
        }

        if !silent {
            self.log(
                format!("Found {} regular user(s) in chroot", users.len()),
                LogClass::Info,
            );
        }
        users
    }

    pub fn users(&self) -> Vec<String> {
        self.session().users.clone()
    }

    pub fn selected_user(&self) -> Option<String> {
        self.session().selected_user.clone()
    }

    pub fn select_user(&self, user: &str) {
        self.store().set(keys::SELECTED_USER, user);
        self.session().selected_user = Some(user.to_string());
    }

    /// Build the login command for the selected user (root if none) and
    /// copy it to the clipboard.
    pub async fn copy_login_command(&self) -> String {
        let user = self.selected_user().unwrap_or_else(|| "root".to_string());

        let helper = self
            .read(LOGIN_HELPER_PROBE)
            .await
            .map(|out| out.trim().to_string())
            .unwrap_or_default();
        let base = if helper.is_empty() {
            format!("sh {}", self.options().paths.chroot_script)
        } else {
            helper
        };
        let command = format!("su -c \"{base} start {user} -s\"");

        if self.copy_text(&command).await {
            self.log(
                format!("Login command for user '{user}' copied to clipboard"),
                LogClass::Success,
            );
        } else {
            self.log("Failed to copy login command - please copy manually", LogClass::Warn);
            self.log(command.clone(), LogClass::Info);
        }
        command
    }

    // ========================================================================
    // DEVICE FLAGS
    // ========================================================================

    fn flag_file(&self, flag: DeviceFlag) -> &str {
        match flag {
            DeviceFlag::RunAtBoot => &self.options().paths.boot_file,
            DeviceFlag::AndroidOptimizations => &self.options().paths.doze_off_file,
        }
    }

    async fn read_device_flag(&self, flag: DeviceFlag) -> bool {
        let fallback = if flag.default_value() { "1" } else { "0" };
        let command = format!("cat {} 2>/dev/null || echo {fallback}", self.flag_file(flag));
        let value = match self.read(&command).await {
            Ok(out) => out.trim() == "1",
            Err(e) => {
                tracing::debug!(file = self.flag_file(flag), error = %e, "Flag read failed");
                flag.default_value()
            }
        };

        let mut session = self.session();
        match flag {
            DeviceFlag::RunAtBoot => session.run_at_boot = value,
            DeviceFlag::AndroidOptimizations => session.android_optimizations = value,
        }
        value
    }

    async fn write_device_flag(&self, flag: DeviceFlag, enabled: bool) -> bool {
        let command = format!(
            "mkdir -p {} && echo {} > {}",
            self.options().paths.chroot_dir,
            if enabled { 1 } else { 0 },
            self.flag_file(flag)
        );

        match self.read(&command).await {
            Ok(_) => {
                {
                    let mut session = self.session();
                    match flag {
                        DeviceFlag::RunAtBoot => session.run_at_boot = enabled,
                        DeviceFlag::AndroidOptimizations => session.android_optimizations = enabled,
                    }
                }
                let state = if enabled { "enabled" } else { "disabled" };
                self.log(format!("{} {state}", flag.label()), LogClass::Success);
                true
            }
            Err(e) => {
                self.log(
                    format!("✗ Failed to set {}: {e}", flag.failure_label()),
                    LogClass::Err,
                );
                self.read_device_flag(flag).await;
                false
            }
        }
    }

    pub async fn read_run_at_boot(&self) -> bool {
        self.read_device_flag(DeviceFlag::RunAtBoot).await
    }

    pub async fn set_run_at_boot(&self, enabled: bool) -> bool {
        self.write_device_flag(DeviceFlag::RunAtBoot, enabled).await
    }

    pub async fn read_android_optimizations(&self) -> bool {
        self.read_device_flag(DeviceFlag::AndroidOptimizations).await
    }

    pub async fn set_android_optimizations(&self, enabled: bool) -> bool {
        self.write_device_flag(DeviceFlag::AndroidOptimizations, enabled)
            .await
    }

    pub fn run_at_boot(&self) -> bool {
        self.session().run_at_boot
    }

    pub fn android_optimizations(&self) -> bool {
        self.session().android_optimizations
    }

    // ========================================================================
    // POST-EXEC SCRIPT
    // ========================================================================

    /// Read the script run after every chroot start. Empty if none.
    pub async fn load_post_exec_script(&self) -> String {
        let command = format!(
            "cat {} 2>/dev/null || echo ''",
            self.options().paths.post_exec_script
        );
        let content = self.read(&command).await.unwrap_or_default();
        self.session().post_exec_script = content.clone();
        content
    }

    /// Write the post-exec script. The content travels base64-encoded so no
    /// shell quoting is involved.
    pub async fn save_post_exec_script(&self, content: &str) -> bool {
        let path = &self.options().paths.post_exec_script;
        let encoded = STANDARD.encode(content.as_bytes());

        let written = self
            .read(&format!("echo '{encoded}' | base64 -d > {path}"))
            .await;
        let result = match written {
            Ok(_) => self.read(&format!("chmod 755 {path}")).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => {
                self.session().post_exec_script = content.to_string();
                self.log("Post-exec script saved successfully", LogClass::Success);
                true
            }
            Err(e) => {
                self.log(
                    format!("Failed to save post-exec script: {e}"),
                    LogClass::Err,
                );
                false
            }
        }
    }

    pub async fn clear_post_exec_script(&self) -> bool {
        let path = &self.options().paths.post_exec_script;
        match self.read(&format!("echo '' > {path}")).await {
            Ok(_) => {
                self.session().post_exec_script.clear();
                self.log("Post-exec script cleared successfully", LogClass::Info);
                true
            }
            Err(e) => {
                self.log(
                    format!("Failed to clear post-exec script: {e}"),
                    LogClass::Err,
                );
                false
            }
        }
    }
}
