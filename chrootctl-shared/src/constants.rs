//! Well-known paths, storage keys and timings.

/// Default locations of the control scripts on the device.
pub mod paths {
    pub const CHROOT_DIR: &str = "/data/local/ubuntu-chroot";
    pub const CHROOT_SCRIPT: &str = "/data/local/ubuntu-chroot/chroot.sh";
    pub const HOTSPOT_SCRIPT: &str = "/data/local/ubuntu-chroot/start-hotspot";
    pub const FORWARD_NAT_SCRIPT: &str = "/data/local/ubuntu-chroot/forward-nat.sh";
    pub const OTA_UPDATER: &str = "/data/local/ubuntu-chroot/ota/updater.sh";
    pub const SPARSE_MANAGER: &str = "/data/local/ubuntu-chroot/sparsemgr.sh";
    pub const BOOT_FILE: &str = "/data/local/ubuntu-chroot/boot-service";
    pub const DOZE_OFF_FILE: &str = "/data/local/ubuntu-chroot/dozeoff";
    pub const POST_EXEC_SCRIPT: &str = "/data/local/ubuntu-chroot/post_exec.sh";
    pub const ROOTFS_IMAGE: &str = "/data/local/ubuntu-chroot/rootfs.img";

    /// Default directory offered for backups.
    pub const BACKUP_DIR: &str = "/sdcard";
}

/// Keys in the durable key-value store.
pub mod keys {
    pub const CONSOLE_LOGS: &str = "chroot_console_logs";
    pub const SELECTED_USER: &str = "chroot_selected_user";
    pub const SELECTED_INTERFACE: &str = "chroot_selected_interface";
    pub const HOTSPOT_IFACE: &str = "chroot_hotspot_iface";
    pub const HOTSPOT_SETTINGS: &str = "chroot_hotspot_settings";
    pub const HOTSPOT_WARNING_DISMISSED: &str = "chroot_hotspot_warning_dismissed";
    pub const HOTSPOT_INTERFACES_CACHE: &str = "chroot_hotspot_interfaces_cache";
    pub const FORWARD_NAT_INTERFACES_CACHE: &str = "chroot_forward_nat_interfaces_cache";

    pub const FLAG_HOTSPOT: &str = "hotspot_active";
    pub const FLAG_FORWARDING: &str = "forwarding_active";
    pub const FLAG_DEBUG: &str = "debug_mode_active";
    pub const FLAG_SPARSE: &str = "sparse_migrated";
}

/// Environment variables read at startup.
pub mod envs {
    /// Overrides the state/log directory.
    pub const CHROOTCTL_HOME: &str = "CHROOTCTL_HOME";
}

/// Marker prepended to commands when script-side verbose logging is wanted.
pub const LOGGING_PREFIX: &str = "LOGGING_ENABLED=1";

/// Prefix of transient progress-indicator lines.
pub const PROGRESS_PREFIX: &str = "⏳ ";

/// Default bridge poll interval in milliseconds.
pub const BRIDGE_POLL_INTERVAL_MS: u64 = 250;

/// Default bridge poll window in milliseconds (40 attempts).
pub const BRIDGE_POLL_MAX_WAIT_MS: u64 = 10_000;
