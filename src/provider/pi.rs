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

//! Device values read from a Raspberry Pi style Linux system.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use super::{DeviceInfoProvider, RdkDiagProvider};

const UNKNOWN: &str = "unknown";

/// Reads device identity from the filesystem under a configurable root.
#[derive(Debug, Clone)]
pub struct PlatformDataProvider {
    root: PathBuf,
    devices_db: PathBuf,
    kernel_version: Option<String>,
}

impl PlatformDataProvider {
    /// Provider reading `etc/` and `proc/` below `root` instead of `/`.
    pub fn with_root(root: impl Into<PathBuf>, devices_db: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            devices_db: devices_db.into(),
            kernel_version: None,
        }
    }

    /// Use a fixed `uname -a` line instead of running the command.
    pub fn with_kernel_version(mut self, uname: impl Into<String>) -> Self {
        self.kernel_version = Some(uname.into());
        self
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn uname(&self) -> Result<String> {
        if let Some(uname) = &self.kernel_version {
            return Ok(uname.clone());
        }
        let output = Command::new("uname")
            .arg("-a")
            .output()
            .context("Failed to run uname")?;
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    /// Row of the devices database whose first field is `revision`.
    fn device_record(&self, revision: &str) -> Option<Vec<String>> {
        let contents = match fs::read_to_string(&self.devices_db) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("Can't read {}: {}", self.devices_db.display(), e);
                return None;
            }
        };
        contents
            .lines()
            .map(|line| line.split(',').map(str::to_string).collect::<Vec<_>>())
            .find(|fields| fields.first().map(String::as_str) == Some(revision))
    }
}

/// First line of a file, or `unknown` when it can't be read.
fn first_line(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(contents) => match contents.lines().next() {
            // device-tree strings are NUL terminated
            Some(line) => line.trim_end_matches('\0').to_string(),
            None => UNKNOWN.to_string(),
        },
        Err(e) => {
            debug!("Can't read {}: {}", path.display(), e);
            UNKNOWN.to_string()
        }
    }
}

/// Value of a `Field : value` line, or empty when absent.
fn variable(path: &Path, field: &str) -> String {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!("Can't read {}: {}", path.display(), e);
            return String::new();
        }
    };
    contents
        .lines()
        .filter(|line| line.starts_with(field))
        .find_map(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
        .unwrap_or_default()
}

impl DeviceInfoProvider for PlatformDataProvider {
    fn system_id(&self) -> String {
        first_line(&self.path("etc/machine-id"))
    }

    fn model_number(&self) -> String {
        first_line(&self.path("proc/device-tree/model"))
    }

    fn serial_number(&self) -> String {
        variable(&self.path("proc/cpuinfo"), "Serial")
    }

    fn firmware_revision(&self) -> String {
        match self.uname() {
            Ok(full) => match full.find(" SMP") {
                Some(index) => full[..index].to_string(),
                None => full,
            },
            Err(e) => {
                warn!("{:#}", e);
                UNKNOWN.to_string()
            }
        }
    }

    fn hardware_revision(&self) -> String {
        variable(&self.path("proc/cpuinfo"), "Revision")
    }

    fn software_revision(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn manufacturer_name(&self) -> String {
        let revision = self.hardware_revision();
        self.device_record(&revision)
            .and_then(|fields| fields.get(4).cloned())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}

impl RdkDiagProvider for PlatformDataProvider {
    fn device_status(&self) -> String {
        "READY".to_string()
    }

    fn firmware_download_status(&self) -> String {
        "COMPLETED".to_string()
    }

    fn webpa_status(&self) -> String {
        "UP".to_string()
    }

    fn wifi_radio1_status(&self) -> String {
        "UP".to_string()
    }

    fn wifi_radio2_status(&self) -> String {
        "UP".to_string()
    }

    fn rf_status(&self) -> String {
        "Not Connected".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CPUINFO: &str = "processor\t: 0\nmodel name\t: ARMv7 Processor rev 4 (v7l)\n\n\
Hardware\t: BCM2835\nRevision\t: a02082\nSerial\t\t: 00000000c4f1a0e2\n";

    fn fixture() -> Result<(TempDir, PlatformDataProvider)> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("etc"))?;
        fs::create_dir_all(dir.path().join("proc/device-tree"))?;
        fs::write(dir.path().join("etc/machine-id"), "5f0c3e1a9b\n")?;
        fs::write(
            dir.path().join("proc/device-tree/model"),
            "Raspberry Pi 3 Model B Rev 1.2\0",
        )?;
        fs::write(dir.path().join("proc/cpuinfo"), CPUINFO)?;
        fs::write(
            dir.path().join("devices_db"),
            "9000c1,Q1 2017,Zero W,1.1,Sony UK\na02082,Q1 2016,3 Model B,1.2,Sony UK\n",
        )?;

        let provider = PlatformDataProvider::with_root(dir.path(), dir.path().join("devices_db"))
            .with_kernel_version(
                "Linux raspberrypi 4.19.66-v7+ #1253 SMP Thu Aug 15 11:49:46 BST 2019 armv7l GNU/Linux",
            );
        Ok((dir, provider))
    }

    #[test]
    fn test_device_info_from_files() -> Result<()> {
        let (_dir, provider) = fixture()?;
        assert_eq!(provider.system_id(), "5f0c3e1a9b");
        assert_eq!(provider.model_number(), "Raspberry Pi 3 Model B Rev 1.2");
        assert_eq!(provider.serial_number(), "00000000c4f1a0e2");
        assert_eq!(provider.hardware_revision(), "a02082");
        assert_eq!(provider.software_revision(), env!("CARGO_PKG_VERSION"));
        Ok(())
    }

    #[test]
    fn test_firmware_revision_cut_at_smp() -> Result<()> {
        let (_dir, provider) = fixture()?;
        assert_eq!(
            provider.firmware_revision(),
            "Linux raspberrypi 4.19.66-v7+ #1253"
        );

        let provider = provider.with_kernel_version("Linux host 6.1.0");
        assert_eq!(provider.firmware_revision(), "Linux host 6.1.0");
        Ok(())
    }

    #[test]
    fn test_manufacturer_lookup() -> Result<()> {
        let (dir, provider) = fixture()?;
        assert_eq!(provider.manufacturer_name(), "Sony UK");

        fs::write(dir.path().join("devices_db"), "9000c1,Q1 2017,Zero W,1.1,Sony UK\n")?;
        assert_eq!(provider.manufacturer_name(), "unknown");
        Ok(())
    }

    #[test]
    fn test_missing_files() -> Result<()> {
        let dir = TempDir::new()?;
        let provider = PlatformDataProvider::with_root(dir.path(), dir.path().join("devices_db"));
        assert_eq!(provider.system_id(), "unknown");
        assert_eq!(provider.model_number(), "unknown");
        assert_eq!(provider.serial_number(), "");
        assert_eq!(provider.manufacturer_name(), "unknown");
        Ok(())
    }

    #[test]
    fn test_rdk_status_values() {
        let provider = PlatformDataProvider::with_root("/nonexistent", "/nonexistent");
        assert_eq!(provider.device_status(), "READY");
        assert_eq!(provider.firmware_download_status(), "COMPLETED");
        assert_eq!(provider.webpa_status(), "UP");
        assert_eq!(provider.wifi_radio1_status(), "UP");
        assert_eq!(provider.wifi_radio2_status(), "UP");
        assert_eq!(provider.rf_status(), "Not Connected");
    }
}
