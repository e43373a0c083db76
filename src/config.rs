// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::bluetooth::{Device, SessionOptions};
use crate::normalize::RfidWindow;

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// RFID normalization settings.
    pub rfid: RfidConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Address of the default RFID reader.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_device: Option<String>,

    /// Length of one discovery window in seconds.
    pub scan_duration_secs: u64,

    /// Timeout for establishing the RFCOMM connection in seconds.
    pub connect_timeout_secs: u64,

    /// Maximum candidate/confirmation pairs before giving up. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_read_pairs: Option<u32>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            default_device: None,
            scan_duration_secs: 12,
            connect_timeout_secs: 20,
            max_read_pairs: None,
        }
    }
}

impl BluetoothConfig {
    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            max_read_pairs: self.max_read_pairs,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfidConfig {
    /// Keep the first or the last 15 characters of a reading.
    pub window: RfidWindow,
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("odk-sensors")
            .join("config.toml")
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from file or create default.
    pub fn load_from(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            config
        };

        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save configuration to file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Forget the default device if it is no longer bonded.
    ///
    /// Returns true when the configuration changed.
    pub fn prune_default_device(&mut self, paired: &[Device]) -> bool {
        let Some(address) = self.bluetooth.default_device.as_deref() else {
            return false;
        };

        if paired.iter().any(|d| d.has_address(address)) {
            return false;
        }

        warn!(
            "Saved default device {} is no longer paired, clearing it",
            address
        );
        self.bluetooth.default_device = None;
        true
    }

    /// Set the default device. Only bonded devices are accepted.
    pub fn set_default_device(&mut self, address: &str, paired: &[Device]) -> Result<()> {
        let device = paired
            .iter()
            .find(|d| d.has_address(address))
            .ok_or_else(|| anyhow::anyhow!("{} is not paired with this host", address))?;

        info!("Default device set to {}", device);
        self.bluetooth.default_device = Some(device.address.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired() -> Vec<Device> {
        vec![Device::new("AA:BB:CC:DD:EE:FF", Some("RS320".to_string()), true)]
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, Config::default());
        assert_eq!(config.bluetooth.scan_duration_secs, 12);
        assert_eq!(config.rfid.window, RfidWindow::First);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.set_default_device("aa:bb:cc:dd:ee:ff", &paired()).unwrap();
        config.bluetooth.max_read_pairs = Some(5);
        config.rfid.window = RfidWindow::Last;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.bluetooth.default_device.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(loaded.bluetooth.session_options().max_read_pairs, Some(5));
        assert_eq!(loaded.rfid.window, RfidWindow::Last);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[rfid]\nwindow = \"last\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.rfid.window, RfidWindow::Last);
        assert_eq!(config.bluetooth.connect_timeout_secs, 20);
    }

    #[test]
    fn test_unpaired_default_is_refused_and_pruned() {
        let mut config = Config::default();
        assert!(config.set_default_device("11:22:33:44:55:66", &paired()).is_err());
        assert!(config.bluetooth.default_device.is_none());

        config.bluetooth.default_device = Some("11:22:33:44:55:66".to_string());
        assert!(config.prune_default_device(&paired()));
        assert!(config.bluetooth.default_device.is_none());
        assert!(!config.prune_default_device(&paired()));
    }
}
