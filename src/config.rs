use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Key under which the configuration blob is stored.
const CONFIG_KEY: &str = "config";

/// Backing key-value store (NVS-style), owned by the platform layer.
pub trait ConfigStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn save(&mut self, key: &str, value: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,

    // Display settings
    pub brightness: u8,
    pub auto_brightness: bool,
    pub dim_timeout_secs: u32,

    // OTA settings
    pub ota_enabled: bool,
    pub ota_check_interval_hours: u32,
    pub update_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_password: String::new(),
            brightness: 80,
            auto_brightness: true,
            dim_timeout_secs: 30,
            ota_enabled: true,
            ota_check_interval_hours: 24,
            update_url: String::new(),
        }
    }
}

impl Config {
    pub fn save(&self, store: &mut dyn ConfigStore) -> Result<()> {
        store.save(CONFIG_KEY, &serde_json::to_vec(self)?)?;
        log::info!("configuration saved");
        Ok(())
    }
}

/// Load the stored configuration, falling back to (and persisting)
/// defaults when nothing usable is stored.
pub fn load_or_default(store: &mut dyn ConfigStore) -> Config {
    match try_load(store) {
        Ok(Some(config)) => {
            log::info!("configuration loaded");
            config
        }
        Ok(None) => {
            log::info!("no stored configuration, using defaults");
            let config = Config::default();
            if let Err(err) = config.save(store) {
                log::warn!("failed to persist default configuration: {err:#}");
            }
            config
        }
        Err(err) => {
            log::warn!("failed to load configuration: {err:#}, using defaults");
            Config::default()
        }
    }
}

fn try_load(store: &dyn ConfigStore) -> Result<Option<Config>> {
    match store.load(CONFIG_KEY)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemStore(HashMap<String, Vec<u8>>);

    impl ConfigStore for MemStore {
        fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.0.get(key).cloned())
        }

        fn save(&mut self, key: &str, value: &[u8]) -> Result<()> {
            self.0.insert(key.to_string(), value.to_vec());
            Ok(())
        }
    }

    #[test]
    fn round_trips_through_store() {
        let mut store = MemStore::default();
        let mut config = Config::default();
        config.wifi_ssid = "panel-net".into();
        config.update_url = "http://updates.local/panel".into();
        config.save(&mut store).unwrap();

        let loaded = load_or_default(&mut store);
        assert_eq!(loaded, config);
    }

    #[test]
    fn empty_store_yields_and_persists_defaults() {
        let mut store = MemStore::default();
        let config = load_or_default(&mut store);
        assert_eq!(config, Config::default());
        assert!(store.0.contains_key(CONFIG_KEY));
    }

    #[test]
    fn corrupt_blob_falls_back_to_defaults() {
        let mut store = MemStore::default();
        store.save(CONFIG_KEY, b"not json").unwrap();
        let config = load_or_default(&mut store);
        assert_eq!(config, Config::default());
    }
}
