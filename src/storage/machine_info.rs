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

//! Device name persisted in `/etc/machine-info`.
//!
//! BlueZ reads `PRETTY_HOSTNAME` from this file when it starts, so changing
//! the advertised name means rewriting the file and restarting the bluetooth
//! service. Both need root.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::config::PlatformConfig;

const PRETTY_HOSTNAME: &str = "PRETTY_HOSTNAME";

/// Handle on the machine-info file and the service restart command.
pub struct MachineInfo {
    file_path: PathBuf,
    restart_command: Vec<String>,
}

impl MachineInfo {
    /// # Arguments
    /// * `file_path` - Usually `/etc/machine-info`
    /// * `restart_command` - Program and arguments that restart bluetoothd
    pub fn new(file_path: impl Into<PathBuf>, restart_command: Vec<String>) -> Self {
        Self {
            file_path: file_path.into(),
            restart_command,
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        Self::new(&config.machine_info, config.bluetooth_restart.clone())
    }

    /// Current `PRETTY_HOSTNAME`, if set.
    pub fn pretty_hostname(&self) -> Result<Option<String>> {
        let content = Self::load(&self.file_path)?;
        Ok(content.lines().find_map(|line| {
            line.split_once('=')
                .filter(|(key, _)| key.trim() == PRETTY_HOSTNAME)
                .map(|(_, value)| value.trim().trim_matches('"').to_string())
        }))
    }

    /// Set the device name and restart the bluetooth service.
    ///
    /// Returns `Ok(false)` without touching anything when the name is already
    /// current. Other keys in the file are preserved.
    pub fn set_pretty_hostname(&self, name: &str) -> Result<bool> {
        if name.is_empty() || name.contains('\n') {
            bail!("Invalid device name {:?}", name);
        }
        if self.pretty_hostname()?.as_deref() == Some(name) {
            debug!("Device name already {}, skipping", name);
            return Ok(false);
        }

        let content = Self::load(&self.file_path)?;
        let mut lines: Vec<String> = content
            .lines()
            .filter(|line| {
                line.split_once('=')
                    .map_or(true, |(key, _)| key.trim() != PRETTY_HOSTNAME)
            })
            .map(str::to_string)
            .collect();
        lines.push(format!("{}={}", PRETTY_HOSTNAME, name));
        self.save(&lines)?;

        self.restart_bluetooth()?;
        info!("Device name set to {}", name);
        Ok(true)
    }

    fn load(path: &Path) -> Result<String> {
        if !path.exists() {
            debug!("{:?} doesn't exist yet", path);
            return Ok(String::new());
        }
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
    }

    fn save(&self, lines: &[String]) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut content = lines.join("\n");
        content.push('\n');
        std::fs::write(&self.file_path, content)
            .with_context(|| format!("Failed to write {:?}", self.file_path))
    }

    fn restart_bluetooth(&self) -> Result<()> {
        let (program, args) = self
            .restart_command
            .split_first()
            .context("No bluetooth restart command configured")?;
        let status = Command::new(program)
            .args(args)
            .status()
            .with_context(|| format!("Failed to run {}", program))?;
        if !status.success() {
            bail!("{} exited with {}", self.restart_command.join(" "), status);
        }
        debug!("Bluetooth service restarted");
        Ok(())
    }
}
