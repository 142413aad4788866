//! Wi-Fi hotspot started from inside the chroot.

use serde::{Deserialize, Serialize};

use super::Panel;
use super::outcome::mentions_warning;
use crate::console::{LogClass, ProgressKind};
use crate::db::Flag;
use crate::guard::GuardOutcome;
use crate::options::HotspotOptions;
use crate::util::double_quote;
use chrootctl_shared::constants::keys;

/// Radio band, passed to the script as `-b 2` or `-b 5`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Band {
    #[default]
    #[serde(rename = "2")]
    Ghz2,
    #[serde(rename = "5")]
    Ghz5,
}

impl Band {
    pub fn as_str(self) -> &'static str {
        match self {
            Band::Ghz2 => "2",
            Band::Ghz5 => "5",
        }
    }

    /// Anything other than `"5"` is the 2.4 GHz band.
    pub fn from_value(value: &str) -> Self {
        if value.trim() == "5" {
            Band::Ghz5
        } else {
            Band::Ghz2
        }
    }

    pub fn channels(self, options: &HotspotOptions) -> &[u32] {
        match self {
            Band::Ghz2 => &options.channels_2ghz,
            Band::Ghz5 => &options.channels_5ghz,
        }
    }

    pub fn default_channel(self, options: &HotspotOptions) -> u32 {
        match self {
            Band::Ghz2 => options.default_channel_2ghz,
            Band::Ghz5 => options.default_channel_5ghz,
        }
    }
}

/// Everything the hotspot script needs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotSettings {
    pub iface: String,
    pub ssid: String,
    pub password: String,
    pub band: Band,
    pub channel: u32,
}

impl HotspotSettings {
    /// Empty settings on the configured default band and channel.
    pub fn defaults(options: &HotspotOptions) -> Self {
        let band = Band::from_value(&options.default_band);
        Self {
            band,
            channel: band.default_channel(options),
            ..Default::default()
        }
    }

    /// Pull the channel back into the band's list, trimming text fields.
    pub fn normalized(mut self, options: &HotspotOptions) -> Self {
        self.iface = self.iface.trim().to_string();
        self.ssid = self.ssid.trim().to_string();
        if !self.band.channels(options).contains(&self.channel) {
            self.channel = self.band.default_channel(options);
        }
        self
    }

    /// The first problem a user has to fix, as shown in the console.
    pub fn validate(&self, options: &HotspotOptions) -> Result<(), String> {
        if self.iface.trim().is_empty() {
            return Err("Please select a network interface".to_string());
        }
        if self.ssid.trim().is_empty() {
            return Err("Please provide a SSID".to_string());
        }
        if self.password.chars().count() < options.password_min_length {
            return Err(format!(
                "Password must be at least {} characters",
                options.password_min_length
            ));
        }
        Ok(())
    }

    fn start_command(&self, script: &str) -> String {
        format!(
            "sh {script} -o {} -s {} -p {} -b {} -c {} 2>&1",
            double_quote(&self.iface),
            double_quote(&self.ssid),
            double_quote(&self.password),
            double_quote(self.band.as_str()),
            double_quote(&self.channel.to_string()),
        )
    }
}

impl Panel {
    /// Saved settings, or defaults with the last used interface.
    pub fn hotspot_settings(&self) -> HotspotSettings {
        let options = &self.options().hotspot;
        match self.store().get_json::<HotspotSettings>(keys::HOTSPOT_SETTINGS) {
            Some(saved) => saved.normalized(options),
            None => HotspotSettings {
                iface: self.store().get(keys::HOTSPOT_IFACE).unwrap_or_default(),
                ..HotspotSettings::defaults(options)
            },
        }
    }

    pub fn save_hotspot_settings(&self, settings: &HotspotSettings) {
        self.store().set_json(keys::HOTSPOT_SETTINGS, settings);
        if !settings.iface.is_empty() {
            self.store().set(keys::HOTSPOT_IFACE, &settings.iface);
        }
    }

    pub fn hotspot_active(&self) -> bool {
        self.store().flag(Flag::Hotspot)
    }

    pub fn hotspot_warning_dismissed(&self) -> bool {
        self.store().get_bool(keys::HOTSPOT_WARNING_DISMISSED, false)
    }

    pub fn dismiss_hotspot_warning(&self) {
        self.store().set_bool(keys::HOTSPOT_WARNING_DISMISSED, true);
    }

    /// Start the hotspot with `settings`.
    ///
    /// Invalid settings are reported in the console and nothing runs.
    pub async fn start_hotspot(&self, settings: HotspotSettings) -> GuardOutcome<bool> {
        self.guard()
            .with_guard("hotspot-start", || self.start_hotspot_steps(settings))
            .await
    }

    async fn start_hotspot_steps(&self, settings: HotspotSettings) -> bool {
        let settings = settings.normalized(&self.options().hotspot);
        if let Err(problem) = settings.validate(&self.options().hotspot) {
            self.log(problem, LogClass::Err);
            return false;
        }
        self.save_hotspot_settings(&settings);

        self.close_popups(self.options().delays.popup_close).await;
        let lock = self.status().lock_actions();

        let text = format!("Starting hotspot on {}", settings.iface);
        let progress = self
            .console()
            .begin_action(&text, text.clone(), ProgressKind::Spinner);
        let command = settings.start_command(&self.options().paths.hotspot_script);
        let result = self.run_streamed(&command).await;
        progress.finish();

        tracing::info!(iface = %settings.iface, band = settings.band.as_str(), channel = settings.channel, success = result.success, "Hotspot start finished");

        if result.success {
            self.log(
                format!("✓ Hotspot started on {}", settings.iface),
                LogClass::Success,
            );
            self.store().set_flag(Flag::Hotspot, true);
        } else {
            self.log("✗ Failed to start hotspot", LogClass::Err);
        }

        drop(lock);
        self.schedule_status_refresh(self.options().delays.status_refresh);
        result.success
    }

    /// Stop the hotspot. The active flag is cleared whatever the outcome.
    pub async fn stop_hotspot(&self) -> GuardOutcome<bool> {
        self.guard()
            .with_guard("hotspot-stop", || self.stop_hotspot_steps())
            .await
    }

    async fn stop_hotspot_steps(&self) -> bool {
        self.close_popups(self.options().delays.popup_close).await;
        let lock = self.status().lock_actions();

        let progress =
            self.console()
                .begin_action("Stopping hotspot", "Stopping hotspot", ProgressKind::Spinner);
        let command = format!("sh {} -k 2>&1", self.options().paths.hotspot_script);
        let (result, lines) = self.run_streamed_collect(&command).await;
        progress.finish();

        self.store().set_flag(Flag::Hotspot, false);

        if result.success {
            self.log("✓ Hotspot stopped successfully", LogClass::Success);
        } else if mentions_warning(result.text()) || mentions_warning(&lines.join("\n")) {
            self.log("⚠ Hotspot stop completed with warnings", LogClass::Warn);
        } else {
            self.log(
                "✗ Failed to stop hotspot (may already be stopped)",
                LogClass::Warn,
            );
        }

        drop(lock);
        self.schedule_status_refresh(self.options().delays.status_refresh);
        result.success
    }
}
