//! Configuration for a control panel instance.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrootctl_shared::constants::{self, envs, paths};
use chrootctl_shared::errors::{ChrootError, ChrootResult};
use serde::{Deserialize, Serialize};

/// Top-level panel configuration.
///
/// Every field has a default, so a JSON file only needs to carry overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelOptions {
    /// Directory holding the state database and log files.
    pub home_dir: PathBuf,
    pub paths: ScriptPaths,
    pub console: ConsoleOptions,
    pub delays: Delays,
    pub bridge_poll: BridgePollOptions,
    pub hotspot: HotspotOptions,
}

impl Default for PanelOptions {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            paths: ScriptPaths::default(),
            console: ConsoleOptions::default(),
            delays: Delays::default(),
            bridge_poll: BridgePollOptions::default(),
            hotspot: HotspotOptions::default(),
        }
    }
}

impl PanelOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> ChrootResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ChrootError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let options: PanelOptions = serde_json::from_str(&raw)
            .map_err(|e| ChrootError::Config(format!("invalid {}: {}", path.display(), e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> ChrootResult<()> {
        if !self.home_dir.is_absolute() {
            return Err(ChrootError::Config(format!(
                "home_dir must be an absolute path, got {}",
                self.home_dir.display()
            )));
        }
        if self.console.max_lines == 0 {
            return Err(ChrootError::Config("console.max_lines must be > 0".into()));
        }
        if self.console.batch_size == 0 {
            return Err(ChrootError::Config("console.batch_size must be > 0".into()));
        }
        if self.bridge_poll.interval.is_zero() {
            return Err(ChrootError::Config("bridge_poll.interval must be > 0".into()));
        }
        Ok(())
    }

    /// Location of the state database.
    pub fn db_path(&self) -> PathBuf {
        self.home_dir.join("db").join("state.db")
    }
}

fn default_home_dir() -> PathBuf {
    if let Ok(home) = std::env::var(envs::CHROOTCTL_HOME)
        && !home.is_empty()
    {
        return PathBuf::from(home);
    }
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("chrootctl")
}

/// Locations of the scripts and flag files on the device.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptPaths {
    pub chroot_dir: String,
    pub chroot_script: String,
    pub hotspot_script: String,
    pub forward_nat_script: String,
    pub ota_updater: String,
    pub sparse_manager: String,
    pub boot_file: String,
    pub doze_off_file: String,
    pub post_exec_script: String,
    pub rootfs_image: String,
    pub backup_dir: String,
}

impl Default for ScriptPaths {
    fn default() -> Self {
        Self {
            chroot_dir: paths::CHROOT_DIR.into(),
            chroot_script: paths::CHROOT_SCRIPT.into(),
            hotspot_script: paths::HOTSPOT_SCRIPT.into(),
            forward_nat_script: paths::FORWARD_NAT_SCRIPT.into(),
            ota_updater: paths::OTA_UPDATER.into(),
            sparse_manager: paths::SPARSE_MANAGER.into(),
            boot_file: paths::BOOT_FILE.into(),
            doze_off_file: paths::DOZE_OFF_FILE.into(),
            post_exec_script: paths::POST_EXEC_SCRIPT.into(),
            rootfs_image: paths::ROOTFS_IMAGE.into(),
            backup_dir: paths::BACKUP_DIR.into(),
        }
    }
}

/// Log console sizing and scheduling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleOptions {
    /// Maximum retained (non-transient) lines.
    pub max_lines: usize,
    /// Maximum entries materialized per flush.
    pub batch_size: usize,
    /// Rows from the bottom still counted as "at bottom".
    pub scroll_threshold_rows: usize,
    /// Visible rows of the viewport.
    pub viewport_rows: usize,
    #[serde(with = "millis")]
    pub save_debounce: Duration,
    #[serde(with = "millis")]
    pub frame_interval: Duration,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            max_lines: 250,
            batch_size: 50,
            scroll_threshold_rows: 1,
            viewport_rows: 24,
            save_debounce: Duration::from_millis(500),
            frame_interval: Duration::from_millis(16),
        }
    }
}

/// Fixed waits used by the feature workflows.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Delays {
    #[serde(with = "millis")]
    pub popup_close: Duration,
    #[serde(with = "millis")]
    pub popup_close_long: Duration,
    #[serde(with = "millis")]
    pub popup_close_very_long: Duration,
    #[serde(with = "millis")]
    pub input_focus: Duration,
    /// Wait before a deferred status refresh.
    #[serde(with = "millis")]
    pub status_refresh: Duration,
    /// Wait between a lifecycle command finishing and the verification read.
    #[serde(with = "millis")]
    pub verify_settle: Duration,
    /// Wait after starting the chroot before running the updater.
    #[serde(with = "millis")]
    pub update_settle: Duration,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            popup_close: Duration::from_millis(450),
            popup_close_long: Duration::from_millis(750),
            popup_close_very_long: Duration::from_millis(850),
            input_focus: Duration::from_millis(100),
            status_refresh: Duration::from_millis(500),
            verify_settle: Duration::from_secs(5),
            update_settle: Duration::from_secs(1),
        }
    }
}

/// How long to keep looking for a late-attaching host bridge.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgePollOptions {
    #[serde(with = "millis")]
    pub interval: Duration,
    #[serde(with = "millis")]
    pub max_wait: Duration,
}

impl Default for BridgePollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(constants::BRIDGE_POLL_INTERVAL_MS),
            max_wait: Duration::from_millis(constants::BRIDGE_POLL_MAX_WAIT_MS),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotOptions {
    pub password_min_length: usize,
    pub default_band: String,
    pub channels_2ghz: Vec<u32>,
    pub default_channel_2ghz: u32,
    pub channels_5ghz: Vec<u32>,
    pub default_channel_5ghz: u32,
}

impl Default for HotspotOptions {
    fn default() -> Self {
        Self {
            password_min_length: 8,
            default_band: "2".into(),
            channels_2ghz: (1..=11).collect(),
            default_channel_2ghz: 6,
            channels_5ghz: vec![36, 40, 44, 48, 52, 56, 60, 64, 100, 104],
            default_channel_5ghz: 36,
        }
    }
}

/// Serialize a `Duration` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
