//! Network interface discovery for the hotspot and forwarding features.
//!
//! Each feature script answers `list-iface` with entries such as
//! `wlan0:10.0.0.1` or `eth0`, one per line or comma separated. The last
//! successful answer is cached in the state store so the selector can be
//! filled without a round-trip.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Panel;
use crate::bridge::{CommandRunner, RunOptions};
use crate::console::{LogClass, LogConsole};
use crate::db::StateStore;

static ENTRY_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n,]+").expect("static regex"));

/// One selectable interface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceOption {
    /// Interface name passed to the script.
    pub value: String,
    /// Text shown to the user, e.g. `wlan0 (10.0.0.1)`.
    pub label: String,
}

impl InterfaceOption {
    /// Parse one raw `name[:address]` entry.
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        match entry.split_once(':') {
            Some((name, address)) if !name.trim().is_empty() => {
                let name = name.trim();
                let address = address.trim();
                let label = if address.is_empty() {
                    name.to_string()
                } else {
                    format!("{name} ({address})")
                };
                Some(Self {
                    value: name.to_string(),
                    label,
                })
            }
            Some(_) => None,
            None => Some(Self {
                value: entry.to_string(),
                label: entry.to_string(),
            }),
        }
    }
}

/// Interfaces plus the selection restored for them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterfaceList {
    pub options: Vec<InterfaceOption>,
    pub selected: Option<String>,
}

impl InterfaceList {
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.options.iter().any(|o| o.value == value)
    }
}

/// Split a `list-iface` reply into raw entries.
fn split_entries(raw: &str) -> Vec<String> {
    ENTRY_SEPARATOR
        .split(raw)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}

/// Cached interface listing for one feature script.
#[derive(Clone)]
pub struct InterfaceManager {
    runner: CommandRunner,
    console: LogConsole,
    store: StateStore,
    script: String,
    cache_key: &'static str,
    selected_key: &'static str,
    default_to_first: bool,
}

impl InterfaceManager {
    pub fn new(
        runner: CommandRunner,
        console: LogConsole,
        store: StateStore,
        script: &str,
        cache_key: &'static str,
        selected_key: &'static str,
    ) -> Self {
        Self {
            runner,
            console,
            store,
            script: script.to_string(),
            cache_key,
            selected_key,
            default_to_first: false,
        }
    }

    /// Select the first interface when no saved selection survives.
    pub fn default_to_first(mut self, enabled: bool) -> Self {
        self.default_to_first = enabled;
        self
    }

    pub fn selected(&self) -> Option<String> {
        self.store.get(self.selected_key)
    }

    pub fn select(&self, value: &str) {
        self.store.set(self.selected_key, value);
    }

    /// Raw entries from the last successful listing.
    pub fn cached(&self) -> Option<Vec<String>> {
        self.store.get_json(self.cache_key)
    }

    /// List interfaces, using the cache unless `force` is set.
    ///
    /// # Returns
    /// * `Some(list)` - the (possibly empty) listing with its selection
    /// * `None` - the script could not be run; warned about unless
    ///   `background_only`
    pub async fn fetch(
        &self,
        force: bool,
        background_only: bool,
        options: RunOptions,
    ) -> Option<InterfaceList> {
        if !force && let Some(entries) = self.cached() {
            return Some(self.build_list(&entries));
        }

        let command = format!("sh {} list-iface 2>&1", self.script);
        match self.runner.run_sync(&command, options).await {
            Ok(raw) => {
                let entries = split_entries(&raw);
                self.store.set_json(self.cache_key, &entries);
                tracing::debug!(script = %self.script, count = entries.len(), "Interfaces listed");
                Some(self.build_list(&entries))
            }
            Err(e) => {
                if !background_only {
                    self.console
                        .append(format!("Could not fetch interfaces: {e}"), LogClass::Warn);
                }
                None
            }
        }
    }

    fn build_list(&self, entries: &[String]) -> InterfaceList {
        let options: Vec<InterfaceOption> = entries
            .iter()
            .filter_map(|entry| InterfaceOption::parse(entry))
            .collect();

        if options.is_empty() {
            self.store.remove(self.selected_key);
            return InterfaceList::default();
        }

        let saved = self
            .selected()
            .filter(|value| options.iter().any(|o| &o.value == value));
        let selected = match saved {
            Some(value) => Some(value),
            None if self.default_to_first => {
                let first = options[0].value.clone();
                self.select(&first);
                Some(first)
            }
            None => None,
        };

        InterfaceList { options, selected }
    }
}

impl Panel {
    pub fn hotspot_interface_manager(&self) -> &InterfaceManager {
        &self.inner.hotspot_ifaces
    }

    pub fn forwarding_interface_manager(&self) -> &InterfaceManager {
        &self.inner.forward_ifaces
    }

    /// Interfaces usable as hotspot uplinks.
    pub async fn hotspot_interfaces(
        &self,
        force: bool,
        background_only: bool,
    ) -> Option<InterfaceList> {
        self.inner
            .hotspot_ifaces
            .fetch(force, background_only, self.run_options())
            .await
    }

    /// Interfaces traffic can be forwarded through.
    pub async fn forwarding_interfaces(
        &self,
        force: bool,
        background_only: bool,
    ) -> Option<InterfaceList> {
        self.inner
            .forward_ifaces
            .fetch(force, background_only, self.run_options())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::testing::{ScriptedUi, fixture};
    use chrootctl_shared::constants::keys;

    #[test]
    fn test_parse_entries() {
        assert_eq!(
            InterfaceOption::parse("wlan0:10.0.0.1"),
            Some(InterfaceOption {
                value: "wlan0".into(),
                label: "wlan0 (10.0.0.1)".into()
            })
        );
        assert_eq!(InterfaceOption::parse(" eth0 ").map(|o| o.label), Some("eth0".into()));
        assert_eq!(InterfaceOption::parse("rmnet0:").map(|o| o.label), Some("rmnet0".into()));
        assert_eq!(InterfaceOption::parse(":1.2.3.4"), None);
        assert_eq!(InterfaceOption::parse("  "), None);
    }

    #[test]
    fn test_split_entries() {
        assert_eq!(
            split_entries("wlan0:10.0.0.1\r\neth0,rmnet0\n\n"),
            vec!["wlan0:10.0.0.1", "eth0", "rmnet0"]
        );
    }

    #[tokio::test]
    async fn test_fetch_uses_cache_until_forced() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("start-hotspot list-iface", "wlan0:10.0.0.1\neth0\n");

        let first = f.panel.hotspot_interfaces(false, false).await.unwrap();
        assert_eq!(first.options.len(), 2);
        assert_eq!(first.selected, None);
        assert_eq!(f.mock.count("list-iface"), 1);

        let cached = f.panel.hotspot_interfaces(false, false).await.unwrap();
        assert_eq!(cached, first);
        assert_eq!(f.mock.count("list-iface"), 1);

        f.panel.hotspot_interfaces(true, false).await.unwrap();
        assert_eq!(f.mock.count("list-iface"), 2);
        assert_eq!(
            f.panel
                .store()
                .get_json::<Vec<String>>(keys::HOTSPOT_INTERFACES_CACHE),
            Some(vec!["wlan0:10.0.0.1".to_string(), "eth0".to_string()])
        );
    }

    #[tokio::test]
    async fn test_saved_selection_restored_only_when_present() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("forward-nat.sh list-iface", "wlan0,rmnet_data0");

        f.panel.store().set(keys::SELECTED_INTERFACE, "rmnet_data0");
        let list = f.panel.forwarding_interfaces(true, false).await.unwrap();
        assert_eq!(list.selected.as_deref(), Some("rmnet_data0"));

        f.panel.store().set(keys::SELECTED_INTERFACE, "usb0");
        let list = f.panel.forwarding_interfaces(true, false).await.unwrap();
        assert_eq!(list.selected.as_deref(), Some("wlan0"));
        assert_eq!(
            f.panel.store().get(keys::SELECTED_INTERFACE).as_deref(),
            Some("wlan0")
        );
    }

    #[tokio::test]
    async fn test_empty_listing_clears_selection() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("start-hotspot list-iface", "\n");
        f.panel.store().set(keys::HOTSPOT_IFACE, "wlan0");

        let list = f.panel.hotspot_interfaces(true, false).await.unwrap();
        assert!(list.is_empty());
        assert_eq!(f.panel.store().get(keys::HOTSPOT_IFACE), None);
    }

    #[tokio::test]
    async fn test_fetch_failure_warns_unless_background() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync_error("list-iface", "no such file");

        assert_eq!(f.panel.hotspot_interfaces(true, true).await, None);
        assert!(f.texts().await.is_empty());

        assert_eq!(f.panel.hotspot_interfaces(true, false).await, None);
        assert!(
            f.has_line(
                "Could not fetch interfaces: bridge error: no such file",
                LogClass::Warn
            )
            .await
        );
    }
}
