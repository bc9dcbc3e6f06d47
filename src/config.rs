// Copyright 2026 bleconfd developers
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

//! Daemon configuration.
//!
//! Loaded once at startup from a TOML file. Every key has a default, so a
//! partial or missing file is valid.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::bluetooth::advertising::BeaconIds;
use crate::bluetooth::beacon::BeaconConfiguration;
use crate::bluetooth::ble_constants::config as ble;
use crate::bluetooth::session::SessionOptions;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/bleconfd/config.toml";

/// Longest name the controller stores.
const MAX_DEVICE_NAME_LEN: usize = 248;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub listener: ListenerConfig,
    pub platform: PlatformConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ListenerConfig {
    pub ble_device_name: String,
    /// Adapter index; -1 picks the first adapter that is up.
    pub hci_device_id: i32,
    /// Bound on bytes queued for the peer.
    pub outgoing_queue_limit: usize,
    pub notify_interval_ms: u64,
    pub beacon_config: BeaconConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            ble_device_name: "XPI-SETUP".to_string(),
            hci_device_id: 0,
            outgoing_queue_limit: ble::OUTGOING_QUEUE_LIMIT,
            notify_interval_ms: ble::NOTIFY_INTERVAL_MS,
            beacon_config: BeaconConfig::default(),
        }
    }
}

impl ListenerConfig {
    pub fn beacon_configuration(&self) -> BeaconConfiguration {
        BeaconConfiguration {
            device_name: self.ble_device_name.clone(),
            hci_device_id: self.hci_device_id,
            ids: BeaconIds {
                company_id: self.beacon_config.company_id,
                device_info_uuid: self.beacon_config.device_info_uuid,
                rdk_diag_uuid: self.beacon_config.rdk_diag_uuid,
            },
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            rdk_diag_uuid: self.beacon_config.rdk_diag_uuid,
            notify_interval: Duration::from_millis(self.notify_interval_ms),
            queue_limit: self.outgoing_queue_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BeaconConfig {
    pub company_id: u16,
    pub device_info_uuid: u16,
    pub rdk_diag_uuid: u16,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            company_id: 0xFFFF,
            device_info_uuid: 0x1000,
            rdk_diag_uuid: 0x2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PlatformConfig {
    /// Root the device-info files are read from.
    pub root: PathBuf,
    /// CSV of board revisions, manufacturer in the fifth column.
    pub devices_db: PathBuf,
    pub machine_info: PathBuf,
    /// Command run after the device name changes.
    pub bluetooth_restart: Vec<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            devices_db: PathBuf::from("/usr/share/bleconfd/devices_db"),
            machine_info: PathBuf::from("/etc/machine-info"),
            bluetooth_restart: vec![
                "systemctl".to_string(),
                "restart".to_string(),
                "bluetooth".to_string(),
            ],
        }
    }
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config =
            Self::from_toml(&content).with_context(|| format!("Invalid config file {:?}", path))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        debug!("{:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let listener = &self.listener;
        if listener.hci_device_id < -1 {
            bail!(
                "hci-device-id must be -1 or a device index, got {}",
                listener.hci_device_id
            );
        }
        if listener.ble_device_name.is_empty() {
            bail!("ble-device-name must not be empty");
        }
        if listener.ble_device_name.len() > MAX_DEVICE_NAME_LEN {
            bail!(
                "ble-device-name is {} bytes, at most {} allowed",
                listener.ble_device_name.len(),
                MAX_DEVICE_NAME_LEN
            );
        }
        if listener.notify_interval_ms == 0 {
            bail!("notify-interval-ms must be positive");
        }
        if listener.outgoing_queue_limit == 0 || listener.outgoing_queue_limit > u32::MAX as usize
        {
            bail!(
                "outgoing-queue-limit must be between 1 and {}",
                u32::MAX
            );
        }
        if self.platform.bluetooth_restart.is_empty() {
            bail!("bluetooth-restart must name a command");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listener.ble_device_name, "XPI-SETUP");
        assert_eq!(config.listener.hci_device_id, 0);
        assert_eq!(config.listener.beacon_config.company_id, 0xFFFF);
        assert_eq!(config.listener.beacon_config.device_info_uuid, 0x1000);
        assert_eq!(config.listener.beacon_config.rdk_diag_uuid, 0x2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() -> Result<()> {
        let config = Config::from_toml(
            r#"
            [listener]
            ble-device-name = "RDK-1234"
            hci-device-id = -1

            [listener.beacon-config]
            rdk-diag-uuid = 0x2bcd
            "#,
        )?;
        assert_eq!(config.listener.ble_device_name, "RDK-1234");
        assert_eq!(config.listener.hci_device_id, -1);
        assert_eq!(config.listener.beacon_config.company_id, 0xFFFF);
        assert_eq!(config.listener.beacon_config.rdk_diag_uuid, 0x2bcd);
        assert_eq!(config.listener.notify_interval_ms, 1000);
        assert_eq!(config.platform, PlatformConfig::default());
        Ok(())
    }

    #[test]
    fn test_derived_settings() {
        let config = Config::default();
        let beacon = config.listener.beacon_configuration();
        assert_eq!(beacon.device_name, "XPI-SETUP");
        assert_eq!(beacon.ids.company_id, 0xFFFF);

        let options = config.listener.session_options();
        assert_eq!(options.rdk_diag_uuid, 0x2000);
        assert_eq!(options.notify_interval, Duration::from_millis(1000));
        assert_eq!(options.queue_limit, 65536);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(Config::from_toml("[listener.beacon-config]\ncompany-id = 0x10000\n").is_err());
        assert!(Config::from_toml("[listener]\nhci-device-id = -2\n").is_err());
        assert!(Config::from_toml("[listener]\nble-device-name = \"\"\n").is_err());
        assert!(Config::from_toml("[listener]\nnotify-interval-ms = 0\n").is_err());
        assert!(Config::from_toml("[listener]\noutgoing-queue-limit = 0\n").is_err());
        assert!(Config::from_toml("listener = 3").is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config = Config::load(&temp_dir.path().join("config.toml"))?;
        assert_eq!(config, Config::default());
        Ok(())
    }

    #[test]
    fn test_load_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[platform]\ndevices-db = \"/opt/devices_db\"\nbluetooth-restart = [\"true\"]\n",
        )?;
        let config = Config::load(&path)?;
        assert_eq!(config.platform.devices_db, PathBuf::from("/opt/devices_db"));
        assert_eq!(config.platform.bluetooth_restart, vec!["true".to_string()]);
        assert_eq!(config.listener, ListenerConfig::default());
        Ok(())
    }
}
