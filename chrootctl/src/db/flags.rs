//! Persisted feature flags.

use serde::{Deserialize, Serialize};

use super::StateStore;
use chrootctl_shared::constants::keys;

/// One of the boolean feature flags kept across sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Flag {
    Hotspot,
    Forwarding,
    Debug,
    Sparse,
}

impl Flag {
    pub const ALL: [Flag; 4] = [Flag::Hotspot, Flag::Forwarding, Flag::Debug, Flag::Sparse];

    pub fn key(self) -> &'static str {
        match self {
            Flag::Hotspot => keys::FLAG_HOTSPOT,
            Flag::Forwarding => keys::FLAG_FORWARDING,
            Flag::Debug => keys::FLAG_DEBUG,
            Flag::Sparse => keys::FLAG_SPARSE,
        }
    }
}

/// Snapshot of all feature flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub hotspot: bool,
    pub forwarding: bool,
    pub debug: bool,
    pub sparse: bool,
}

impl FeatureFlags {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::Hotspot => self.hotspot,
            Flag::Forwarding => self.forwarding,
            Flag::Debug => self.debug,
            Flag::Sparse => self.sparse,
        }
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::Hotspot => self.hotspot = value,
            Flag::Forwarding => self.forwarding = value,
            Flag::Debug => self.debug = value,
            Flag::Sparse => self.sparse = value,
        }
    }
}

impl StateStore {
    pub fn flag(&self, flag: Flag) -> bool {
        self.get_bool(flag.key(), false)
    }

    pub fn set_flag(&self, flag: Flag, value: bool) {
        tracing::debug!(flag = ?flag, value, "Saving feature flag");
        self.set_bool(flag.key(), value);
    }

    pub fn load_flags(&self) -> FeatureFlags {
        let mut flags = FeatureFlags::default();
        for flag in Flag::ALL {
            flags.set(flag, self.flag(flag));
        }
        flags
    }

    pub fn save_flags(&self, flags: &FeatureFlags) {
        for flag in Flag::ALL {
            self.set_flag(flag, flags.get(flag));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_default_false() {
        let store = StateStore::in_memory().unwrap();
        assert_eq!(store.load_flags(), FeatureFlags::default());
    }

    #[test]
    fn test_save_and_load_all() {
        let store = StateStore::in_memory().unwrap();
        let flags = FeatureFlags {
            hotspot: true,
            forwarding: false,
            debug: true,
            sparse: true,
        };
        store.save_flags(&flags);
        assert_eq!(store.load_flags(), flags);
        assert_eq!(store.get("sparse_migrated").as_deref(), Some("true"));
    }
}
